#[derive(uniffi::Enum, Debug, Clone, PartialEq, Eq)]
pub enum AppAction {
    // Chat window
    OpenChat {
        chat_id: String,
    },
    ReloadChat,
    CloseChat,

    // Messages
    SendMessage {
        text: String,
    },
    DeleteMessage {
        message_id: String,
    },
    StartEdit {
        message_id: String,
    },
    CancelEdit,
    CommitEdit {
        text: String,
    },

    // Chat info panel
    OpenChatInfo,
    CloseChatInfo,
    SearchProfiles {
        query: String,
    },
    ToggleProfileSelection {
        username: String,
    },
    AddSelectedMembers,
    RemoveMember {
        username: String,
    },

    // UI
    ClearToast,
}

impl AppAction {
    /// Log-safe action tag (never includes message text).
    pub fn tag(&self) -> &'static str {
        match self {
            // Chat window
            AppAction::OpenChat { .. } => "OpenChat",
            AppAction::ReloadChat => "ReloadChat",
            AppAction::CloseChat => "CloseChat",

            // Messages
            AppAction::SendMessage { .. } => "SendMessage",
            AppAction::DeleteMessage { .. } => "DeleteMessage",
            AppAction::StartEdit { .. } => "StartEdit",
            AppAction::CancelEdit => "CancelEdit",
            AppAction::CommitEdit { .. } => "CommitEdit",

            // Chat info panel
            AppAction::OpenChatInfo => "OpenChatInfo",
            AppAction::CloseChatInfo => "CloseChatInfo",
            AppAction::SearchProfiles { .. } => "SearchProfiles",
            AppAction::ToggleProfileSelection { .. } => "ToggleProfileSelection",
            AppAction::AddSelectedMembers => "AddSelectedMembers",
            AppAction::RemoveMember { .. } => "RemoveMember",

            // UI
            AppAction::ClearToast => "ClearToast",
        }
    }
}
