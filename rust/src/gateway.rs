//! Typed boundary to the remote message ledger.
//!
//! Every backend operation is one method on [`ChatGateway`]; identity
//! bootstrap/login/logout live on [`IdentityProvider`]. Both are injected as
//! `Arc<dyn Trait>` so tests can run the whole core against in-process fakes.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Canonical textual identity of an authenticated actor.
///
/// The backend accepts several textual encodings of the same identity
/// (case and surrounding whitespace vary by transport), so the text is
/// canonicalized on construction and every comparison goes through the
/// canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Principal(String);

impl Principal {
    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        let canonical = text.trim().to_ascii_lowercase();
        if canonical.is_empty() {
            return Err(GatewayError::InvalidArgument("empty principal".into()));
        }
        if !canonical
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(GatewayError::InvalidArgument(
                "principal contains invalid characters".into(),
            ));
        }
        Ok(Self(canonical))
    }

    pub fn as_text(&self) -> &str {
        &self.0
    }

    /// Truncated form used as a placeholder conversation name.
    pub fn short(&self) -> String {
        if self.0.len() <= 10 {
            self.0.clone()
        } else {
            format!("{}…", &self.0[..10])
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    Admin,
    User,
    Guest,
}

/// One chat message as returned by the backend. Immutable; the backend's
/// ordering within a conversation is authoritative and is never re-sorted
/// against the client clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub content: String,
    pub sender: Principal,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Backend unreachable or the call failed in transit. Retried only via
    /// polling or explicit invalidation, never immediately.
    #[error("transport: {0}")]
    Transport(String),
    /// The caller lacks permission for the operation. Never retried.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Malformed request; rejected client-side where feasible.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Profile field validation, applied before any gateway call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("username must not be empty")]
    EmptyUsername,
    #[error("display name must not be empty")]
    EmptyDisplayName,
}

pub fn validate_profile(profile: &UserProfile) -> Result<(), ValidationError> {
    if profile.username.trim().is_empty() {
        return Err(ValidationError::EmptyUsername);
    }
    if profile.display_name.trim().is_empty() {
        return Err(ValidationError::EmptyDisplayName);
    }
    Ok(())
}

/// RPC surface of the message ledger. One method per remote call; the caller
/// identity is implicit in the connection, as on the wire.
#[async_trait]
pub trait ChatGateway: Send + Sync + 'static {
    async fn get_caller_user_profile(&self) -> Result<Option<UserProfile>, GatewayError>;
    async fn save_caller_user_profile(&self, profile: UserProfile) -> Result<(), GatewayError>;
    async fn get_user_profile(&self, user: Principal) -> Result<Option<UserProfile>, GatewayError>;

    async fn get_caller_user_role(&self) -> Result<UserRole, GatewayError>;
    async fn is_caller_admin(&self) -> Result<bool, GatewayError>;
    async fn assign_caller_user_role(
        &self,
        user: Principal,
        role: UserRole,
    ) -> Result<(), GatewayError>;

    async fn create_group_chat(&self, name: String) -> Result<String, GatewayError>;
    async fn add_participant(
        &self,
        group_id: String,
        participant: Principal,
    ) -> Result<(), GatewayError>;

    async fn get_direct_messages(
        &self,
        counterparty: Principal,
    ) -> Result<Vec<Message>, GatewayError>;
    async fn send_direct_message(
        &self,
        recipient: Principal,
        content: String,
    ) -> Result<(), GatewayError>;
    async fn get_group_messages(&self, group_id: String) -> Result<Vec<Message>, GatewayError>;
    async fn send_group_message(
        &self,
        group_id: String,
        content: String,
    ) -> Result<(), GatewayError>;
}

/// Identity bootstrap and login/logout against the identity service.
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Resolve any identity restored from a previous authentication.
    /// Runs once at startup, without user interaction.
    async fn bootstrap(&self) -> Result<Option<Principal>, GatewayError>;
    async fn login(&self) -> Result<Principal, GatewayError>;
    async fn logout(&self) -> Result<(), GatewayError>;
}
