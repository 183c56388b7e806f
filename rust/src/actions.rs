use crate::gateway::UserRole;

#[derive(Debug, Clone)]
pub enum AppAction {
    // Auth
    Login,
    Logout,
    SaveProfile {
        username: String,
        display_name: String,
    },

    // Conversations
    OpenDirectConversation {
        counterparty: String,
    },
    CreateGroup {
        name: String,
    },
    SelectConversation {
        conversation_id: String,
    },
    CloseConversation,

    // Messaging
    SendMessage {
        conversation_id: String,
        content: String,
    },
    AddParticipant {
        group_id: String,
        participant: String,
    },
    RefreshActiveConversation,

    // Roles
    AssignUserRole {
        user: String,
        role: UserRole,
    },

    // UI
    ClearToast,
}

impl AppAction {
    /// Log-safe action tag (never includes message content or identities).
    pub fn tag(&self) -> &'static str {
        match self {
            AppAction::Login => "Login",
            AppAction::Logout => "Logout",
            AppAction::SaveProfile { .. } => "SaveProfile",
            AppAction::OpenDirectConversation { .. } => "OpenDirectConversation",
            AppAction::CreateGroup { .. } => "CreateGroup",
            AppAction::SelectConversation { .. } => "SelectConversation",
            AppAction::CloseConversation => "CloseConversation",
            AppAction::SendMessage { .. } => "SendMessage",
            AppAction::AddParticipant { .. } => "AddParticipant",
            AppAction::RefreshActiveConversation => "RefreshActiveConversation",
            AppAction::AssignUserRole { .. } => "AssignUserRole",
            AppAction::ClearToast => "ClearToast",
        }
    }
}
