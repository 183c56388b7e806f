// Session lifecycle: identity bootstrap, login, onboarding, logout.

use super::*;

impl AppCore {
    pub(super) fn start_identity_bootstrap(&mut self) {
        let provider = self.identity.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = provider.bootstrap().await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::IdentityResolved { result },
            )));
        });
    }

    pub(super) fn handle_identity_resolved(
        &mut self,
        result: Result<Option<Principal>, GatewayError>,
    ) {
        match result {
            Ok(Some(principal)) => {
                tracing::info!(principal = %principal, "identity restored");
                self.begin_profile_bootstrap(principal);
            }
            Ok(None) => {
                self.state.auth = AuthState::Anonymous;
                self.emit_state();
            }
            Err(e) => {
                tracing::warn!(%e, "identity bootstrap failed");
                self.state.auth = AuthState::Anonymous;
                self.emit_state();
            }
        }
    }

    pub(super) fn handle_login(&mut self) {
        if !matches!(self.state.auth, AuthState::Anonymous) {
            tracing::debug!("login ignored outside Anonymous");
            return;
        }
        self.state.auth = AuthState::LoggingIn;
        self.emit_state();
        let provider = self.identity.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = provider.login().await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::LoginResolved {
                result,
            })));
        });
    }

    pub(super) fn handle_login_resolved(&mut self, result: Result<Principal, GatewayError>) {
        match result {
            Ok(principal) => {
                tracing::info!(principal = %principal, "login succeeded");
                self.begin_profile_bootstrap(principal);
            }
            Err(e) => self.fail_login(&e),
        }
    }

    /// The caller profile decides the post-login stage
    /// (`Ready` vs `AuthenticatedNoProfile`), so it rides the same cache
    /// path as every other read.
    pub(super) fn begin_profile_bootstrap(&mut self, principal: Principal) {
        self.pending_identity = Some(principal);
        let key = CacheKey::CurrentUserProfile;
        let outcome = self.cache.subscribe(key.clone(), SubscribeOptions::once());
        if outcome.fetch_token.is_none() {
            // Entry still fresh from this process (relogin without logout
            // never happens across identities; the cache is cleared there).
            let profile = match self.cache.entry(&key).and_then(|e| e.data.clone()) {
                Some(CachedValue::Profile(profile)) => profile,
                _ => None,
            };
            self.complete_auth(profile);
            self.emit_state();
            return;
        }
        self.start_subscription_io(key, outcome);
    }

    pub(super) fn complete_auth(&mut self, profile: Option<UserProfile>) {
        let Some(principal) = self.pending_identity.take() else {
            return;
        };
        let principal_text = principal.as_text().to_string();
        self.session_principal = Some(principal);
        self.state.auth = match profile {
            Some(profile) => AuthState::Ready {
                principal: principal_text,
                profile,
            },
            None => AuthState::AuthenticatedNoProfile {
                principal: principal_text,
            },
        };
        self.fetch_caller_role();
    }

    pub(super) fn fail_login(&mut self, error: &GatewayError) {
        tracing::warn!(%error, "login failed");
        self.pending_identity = None;
        self.session_principal = None;
        self.state.auth = AuthState::Anonymous;
        self.toast(format!("Login failed: {error}"));
    }

    /// One-shot role read; failure leaves `role = None` (non-fatal).
    fn fetch_caller_role(&mut self) {
        let key = CacheKey::CurrentUserRole;
        let outcome = self.cache.subscribe(key.clone(), SubscribeOptions::once());
        self.start_subscription_io(key, outcome);
    }

    pub(super) fn handle_logout(&mut self) {
        if !matches!(
            self.state.auth,
            AuthState::Ready { .. } | AuthState::AuthenticatedNoProfile { .. }
        ) {
            tracing::debug!("logout ignored outside an authenticated stage");
            return;
        }
        // Polling for the active thread stops as soon as we leave Ready; the
        // full cache teardown happens once the provider round-trip resolves.
        if let Some(key) = self.registry.active().map(Conversation::thread_key) {
            self.cache.unsubscribe(&key);
        }
        self.state.auth = AuthState::LoggingOut;
        self.refresh_conversation_list();
        self.refresh_current_thread();
        self.emit_state();
        let provider = self.identity.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = provider.logout().await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::LogoutResolved {
                result,
            })));
        });
    }

    pub(super) fn handle_logout_resolved(&mut self, result: Result<(), GatewayError>) {
        if let Err(e) = result {
            // Local teardown proceeds regardless: the session is over either
            // way, and no data may survive into the next identity.
            tracing::warn!(%e, "identity provider logout failed");
        }
        tracing::info!(
            dropped_cache_entries = self.cache.len(),
            dropped_conversations = self.registry.len(),
            "session cleared"
        );
        self.cache.clear_all();
        self.registry.clear();
        self.session_principal = None;
        self.pending_identity = None;
        self.sends_in_flight.clear();
        self.state.role = None;
        self.state.conversations.clear();
        self.state.current_thread = None;
        self.state.busy = BusyState::idle();
        self.state.auth = AuthState::Anonymous;
        self.emit_state();
    }

    pub(super) fn complete_onboarding(&mut self, profile: UserProfile) {
        match &mut self.state.auth {
            AuthState::AuthenticatedNoProfile { principal } => {
                let principal = principal.clone();
                self.state.auth = AuthState::Ready { principal, profile };
            }
            AuthState::Ready {
                profile: existing, ..
            } => *existing = profile,
            _ => {}
        }
    }
}
