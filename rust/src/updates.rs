use crate::actions::AppAction;
use crate::core::cache::{CacheKey, CachedValue};
use crate::core::mutations::{Mutation, MutationOutput};
use crate::gateway::{GatewayError, Principal};
use crate::state::AppState;

#[derive(Debug, Clone)]
pub enum AppUpdate {
    /// Primary update stream: always a full state snapshot.
    ///
    /// Simplest reconciliation story for the UI collaborator; can be made
    /// granular later without touching the core.
    FullState(AppState),
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
}

/// Results of async work, routed back into the actor loop.
#[derive(Debug)]
pub enum InternalEvent {
    // Identity lifecycle
    IdentityResolved {
        result: Result<Option<Principal>, GatewayError>,
    },
    LoginResolved {
        result: Result<Principal, GatewayError>,
    },
    LogoutResolved {
        result: Result<(), GatewayError>,
    },

    // Query cache
    QueryResolved {
        key: CacheKey,
        token: u64,
        result: Result<CachedValue, GatewayError>,
    },
    PollTick {
        key: CacheKey,
        token: u64,
    },

    // Mutations
    MutationResolved {
        seq: u64,
        mutation: Mutation,
        result: Result<MutationOutput, GatewayError>,
    },

    // UI
    ToastAutoDismiss {
        token: u64,
    },
}
