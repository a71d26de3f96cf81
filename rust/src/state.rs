use serde::{Deserialize, Serialize};

#[derive(uniffi::Record, Clone, Debug)]
pub struct AppState {
    pub rev: u64,
    pub active_chat_id: Option<String>,
    /// Display order: oldest first.
    pub messages: Vec<ChatMessage>,
    pub chat_info: Option<ChatInfo>,
    pub pending_edit: Option<PendingEdit>,
    /// Present only while the chat info panel is open.
    pub membership: Option<MembershipPanel>,
    pub connection: ConnectionState,
    pub busy: BusyState,
    pub toast: Option<String>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            active_chat_id: None,
            messages: vec![],
            chat_info: None,
            pending_edit: None,
            membership: None,
            connection: ConnectionState::Disconnected,
            busy: BusyState::idle(),
            toast: None,
        }
    }

    pub fn message(&self, message_id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    pub fn is_active_chat(&self, chat_id: &str) -> bool {
        self.active_chat_id.as_deref() == Some(chat_id)
    }
}

/// A chat message as served by the chat service.
///
/// The service may encode `id` as a JSON number or string; it is kept as an
/// opaque string either way.
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(deserialize_with = "crate::service::opaque_id")]
    pub id: String,
    #[serde(rename = "senderName", default)]
    pub sender_name: String,
    #[serde(default)]
    pub text: String,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub username: String,
    #[serde(default)]
    pub name: String,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct ChatInfo {
    pub chat_id: String,
    pub chat_name: String,
    pub description: String,
    pub members: Vec<Member>,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct PendingEdit {
    pub target_message_id: String,
    pub draft_text: String,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Default)]
pub struct MembershipPanel {
    pub members: Vec<Member>,
    pub search_query: String,
    pub search_results: Vec<Member>,
    pub selected: Vec<Member>,
}

impl MembershipPanel {
    pub fn is_selected(&self, username: &str) -> bool {
        self.selected.iter().any(|m| m.username == username)
    }
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed { reason: String },
}

/// "In flight" flags for network operations the UI should reflect.
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct BusyState {
    pub loading_chat: bool,
    pub sending_message: bool,
    pub saving_edit: bool,
    pub searching_profiles: bool,
}

impl BusyState {
    pub fn idle() -> Self {
        Self {
            loading_chat: false,
            sending_message: false,
            saving_edit: false,
            searching_profiles: false,
        }
    }
}
