//! Write operations and their cache-invalidation rules.
//!
//! Each mutation is exactly one gateway call; the keys it refreshes are a
//! declarative table ([`Mutation::invalidation_targets`]) applied by the
//! actor only after the call resolves successfully. Mutations are never
//! de-duplicated: every dispatch is an independent call with its own
//! per-call failure report.

use crate::gateway::{ChatGateway, GatewayError, Principal, UserProfile, UserRole};

use super::cache::CacheKey;
use super::conversations::derive_dm_id;

#[derive(Debug, Clone)]
pub enum Mutation {
    SendDirectMessage {
        recipient: Principal,
        content: String,
    },
    SendGroupMessage {
        group_id: String,
        content: String,
    },
    CreateGroup {
        name: String,
    },
    AddParticipant {
        group_id: String,
        participant: Principal,
    },
    SaveProfile {
        profile: UserProfile,
    },
    AssignUserRole {
        user: Principal,
        role: UserRole,
    },
}

#[derive(Debug, Clone)]
pub enum MutationOutput {
    Ack,
    GroupCreated { group_id: String },
}

impl Mutation {
    /// Log-safe tag (never message content).
    pub fn tag(&self) -> &'static str {
        match self {
            Mutation::SendDirectMessage { .. } => "SendDirectMessage",
            Mutation::SendGroupMessage { .. } => "SendGroupMessage",
            Mutation::CreateGroup { .. } => "CreateGroup",
            Mutation::AddParticipant { .. } => "AddParticipant",
            Mutation::SaveProfile { .. } => "SaveProfile",
            Mutation::AssignUserRole { .. } => "AssignUserRole",
        }
    }

    /// Cache keys refreshed after this mutation succeeds. `CreateGroup`
    /// invalidates nothing (the caller registers the new conversation
    /// instead), and `AssignUserRole` touches another user's role, which
    /// this client never caches.
    pub fn invalidation_targets(&self) -> Vec<CacheKey> {
        match self {
            Mutation::SendDirectMessage { recipient, .. } => {
                vec![CacheKey::DirectMessages(recipient.clone())]
            }
            Mutation::SendGroupMessage { group_id, .. } => {
                vec![CacheKey::GroupMessages(group_id.clone())]
            }
            Mutation::CreateGroup { .. } => vec![],
            Mutation::AddParticipant { group_id, .. } => {
                vec![CacheKey::GroupMessages(group_id.clone())]
            }
            Mutation::SaveProfile { .. } => vec![CacheKey::CurrentUserProfile],
            Mutation::AssignUserRole { .. } => vec![],
        }
    }

    /// Conversation whose send affordance is held while this is in flight.
    pub fn conversation_id(&self) -> Option<String> {
        match self {
            Mutation::SendDirectMessage { recipient, .. } => Some(derive_dm_id(recipient)),
            Mutation::SendGroupMessage { group_id, .. } => Some(group_id.clone()),
            _ => None,
        }
    }
}

pub async fn run(
    gateway: &dyn ChatGateway,
    mutation: Mutation,
) -> Result<MutationOutput, GatewayError> {
    match mutation {
        Mutation::SendDirectMessage { recipient, content } => gateway
            .send_direct_message(recipient, content)
            .await
            .map(|()| MutationOutput::Ack),
        Mutation::SendGroupMessage { group_id, content } => gateway
            .send_group_message(group_id, content)
            .await
            .map(|()| MutationOutput::Ack),
        Mutation::CreateGroup { name } => gateway
            .create_group_chat(name)
            .await
            .map(|group_id| MutationOutput::GroupCreated { group_id }),
        Mutation::AddParticipant {
            group_id,
            participant,
        } => gateway
            .add_participant(group_id, participant)
            .await
            .map(|()| MutationOutput::Ack),
        Mutation::SaveProfile { profile } => gateway
            .save_caller_user_profile(profile)
            .await
            .map(|()| MutationOutput::Ack),
        Mutation::AssignUserRole { user, role } => gateway
            .assign_caller_user_role(user, role)
            .await
            .map(|()| MutationOutput::Ack),
    }
}
