//! UI-facing state snapshots. The reconciler receives the whole `AppState`
//! on every change; the UI renders it and dispatches actions back.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::gateway::{UserProfile, UserRole};

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Authentication and onboarding stages. Conversation and messaging
/// operations are permitted only in `Ready`; every other stage renders as
/// "no data".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthState {
    /// Identity restore in progress; resolved without user action.
    Initializing,
    Anonymous,
    LoggingIn,
    /// Authenticated, but no profile exists yet for this identity.
    /// A distinct valid stage (onboarding), not an error.
    AuthenticatedNoProfile { principal: String },
    Ready {
        principal: String,
        profile: UserProfile,
    },
    LoggingOut,
}

impl AuthState {
    pub fn principal(&self) -> Option<&str> {
        match self {
            AuthState::AuthenticatedNoProfile { principal }
            | AuthState::Ready { principal, .. } => Some(principal),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, AuthState::Ready { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationKind {
    Direct,
    Group,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub kind: ConversationKind,
    pub display_name: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    pub content: String,
    pub sender: String,
    pub timestamp: i64,
    /// Sender equals the session identity (canonical comparison); the UI
    /// aligns own messages to the trailing edge.
    pub is_own: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadStatus {
    Loading,
    Idle,
    Error,
}

/// Projection of the active conversation over the query cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadViewState {
    pub conversation_id: String,
    pub display_name: String,
    pub kind: ConversationKind,
    /// Backend order, verbatim.
    pub messages: Vec<MessageView>,
    pub status: ThreadStatus,
    /// At least one send for this conversation is in flight; blocks the
    /// input affordance only, never reads.
    pub sending: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyState {
    pub saving_profile: bool,
    pub creating_group: bool,
    pub adding_participant: bool,
}

impl BusyState {
    pub fn idle() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppState {
    /// Monotonic snapshot revision; each emitted update increments it.
    pub rev: u64,
    pub auth: AuthState,
    pub conversations: Vec<ConversationSummary>,
    pub current_thread: Option<ThreadViewState>,
    pub role: Option<UserRole>,
    pub busy: BusyState,
    pub toast: Option<String>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            auth: AuthState::Initializing,
            conversations: Vec::new(),
            current_thread: None,
            role: None,
            busy: BusyState::idle(),
            toast: None,
        }
    }
}
