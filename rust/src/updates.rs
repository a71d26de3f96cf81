use crate::realtime::{ChatEvent, LinkStatus};
use crate::service::ChatHistory;
use crate::state::{AppState, Member};
use crate::AppAction;

#[derive(uniffi::Enum, Clone, Debug)]
pub enum AppUpdate {
    FullState(AppState),
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
        }
    }

    pub fn state(&self) -> &AppState {
        match self {
            AppUpdate::FullState(s) => s,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
    Shutdown,
}

/// Results of async work, fed back into the actor.
///
/// Every variant names the chat it was issued for so the actor can drop
/// results that arrive after the user switched chats.
#[derive(Debug)]
pub enum InternalEvent {
    // Chat history (full load / metadata-only refresh)
    ChatLoaded {
        chat_id: String,
        result: Result<ChatHistory, String>,
    },
    ChatInfoRefreshed {
        chat_id: String,
        result: Result<ChatHistory, String>,
    },

    // Message mutations
    MessageSent {
        chat_id: String,
        result: Result<(), String>,
    },
    MessageDeleted {
        chat_id: String,
        message_id: String,
        result: Result<(), String>,
    },
    MessageEdited {
        chat_id: String,
        message_id: String,
        text: String,
        result: Result<(), String>,
    },

    // Realtime receive path
    RealtimeStatus {
        chat_id: String,
        generation: u64,
        status: LinkStatus,
    },
    RealtimePublication {
        chat_id: String,
        generation: u64,
        event: ChatEvent,
    },

    // Membership panel
    MembersFetched {
        chat_id: String,
        result: Result<Vec<Member>, String>,
    },
    ProfilesSearched {
        chat_id: String,
        query: String,
        result: Result<Vec<Member>, String>,
    },
    MembersAdded {
        chat_id: String,
        added: Vec<Member>,
        result: Result<(), String>,
    },
    MemberRemoved {
        chat_id: String,
        username: String,
        result: Result<(), String>,
    },
}

impl InternalEvent {
    pub fn chat_id(&self) -> &str {
        match self {
            InternalEvent::ChatLoaded { chat_id, .. }
            | InternalEvent::ChatInfoRefreshed { chat_id, .. }
            | InternalEvent::MessageSent { chat_id, .. }
            | InternalEvent::MessageDeleted { chat_id, .. }
            | InternalEvent::MessageEdited { chat_id, .. }
            | InternalEvent::RealtimeStatus { chat_id, .. }
            | InternalEvent::RealtimePublication { chat_id, .. }
            | InternalEvent::MembersFetched { chat_id, .. }
            | InternalEvent::ProfilesSearched { chat_id, .. }
            | InternalEvent::MembersAdded { chat_id, .. }
            | InternalEvent::MemberRemoved { chat_id, .. } => chat_id,
        }
    }
}
