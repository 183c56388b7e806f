pub mod cache;
pub mod conversations;
pub mod mutations;
mod session;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Context;
use flume::Sender;

use crate::actions::AppAction;
use crate::gateway::{
    validate_profile, ChatGateway, GatewayError, IdentityProvider, Principal, UserProfile,
};
use crate::state::{
    now_millis, AppState, AuthState, BusyState, ConversationSummary, MessageView, ThreadStatus,
    ThreadViewState,
};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent};

use cache::{
    fetch_value, CacheKey, CachedValue, QueryCache, QueryStatus, SubscribeOptions,
    SubscribeOutcome,
};
use conversations::{derive_dm_id, Conversation, ConversationRegistry};
use mutations::{Mutation, MutationOutput};

/// Re-fetch cadence for the active conversation's messages.
const THREAD_POLL_INTERVAL: Duration = Duration::from_secs(3);
const TOAST_AUTO_DISMISS: Duration = Duration::from_secs(3);

/// Single-threaded app actor. Owns every piece of mutable state; all async
/// work runs on the owned runtime and returns as `CoreMsg::Internal` events,
/// so the cache map is only ever touched from this thread.
pub struct AppCore {
    pub state: AppState,
    rev: u64,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,

    identity: Arc<dyn IdentityProvider>,
    gateway: Arc<dyn ChatGateway>,
    runtime: tokio::runtime::Runtime,

    cache: QueryCache,
    registry: ConversationRegistry,

    /// Canonical identity of the authenticated session, if any.
    session_principal: Option<Principal>,
    /// Identity whose profile bootstrap is still deciding the post-login
    /// stage.
    pending_identity: Option<Principal>,

    mutation_seq: u64,
    /// conversation id -> sends currently in flight. Blocks the input
    /// affordance only; sends are never de-duplicated.
    sends_in_flight: HashMap<String, u32>,
    toast_dismiss_token: u64,
}

impl AppCore {
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        shared_state: Arc<RwLock<AppState>>,
        identity: Arc<dyn IdentityProvider>,
        gateway: Arc<dyn ChatGateway>,
    ) -> Self {
        // All I/O happens inside the injected gateway; the runtime only
        // needs timers for poll ticks and toast dismissal.
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .build()
            .expect("tokio runtime");

        let mut this = Self {
            state: AppState::empty(),
            rev: 0,
            update_sender,
            core_sender,
            shared_state,
            identity,
            gateway,
            runtime,
            cache: QueryCache::new(),
            registry: ConversationRegistry::new(),
            session_principal: None,
            pending_identity: None,
            mutation_seq: 0,
            sends_in_flight: HashMap::new(),
            toast_dismiss_token: 0,
        };

        // Ensure ChatApp::state() has an immediately-available snapshot.
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);
        this.start_identity_bootstrap();
        this
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn emit_state(&mut self) {
        self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::FullState(snapshot));
    }

    fn toast(&mut self, msg: impl Into<String>) {
        self.state.toast = Some(msg.into());
        self.toast_dismiss_token = self.toast_dismiss_token.saturating_add(1);
        self.schedule_toast_auto_dismiss(self.toast_dismiss_token);
        self.emit_state();
    }

    fn schedule_toast_auto_dismiss(&self, token: u64) {
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(TOAST_AUTO_DISMISS).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::ToastAutoDismiss { token },
            )));
        });
    }

    fn handle_toast_auto_dismiss(&mut self, token: u64) {
        if token != self.toast_dismiss_token || self.state.toast.is_none() {
            return;
        }
        self.state.toast = None;
        self.emit_state();
    }

    fn set_busy(&mut self, f: impl FnOnce(&mut BusyState)) {
        let mut next = self.state.busy.clone();
        f(&mut next);
        if next != self.state.busy {
            self.state.busy = next;
            self.emit_state();
        }
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(ref action) => {
                // Never log the full action: message content is private.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action.clone());
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::IdentityResolved { result } => self.handle_identity_resolved(result),
            InternalEvent::LoginResolved { result } => self.handle_login_resolved(result),
            InternalEvent::LogoutResolved { result } => self.handle_logout_resolved(result),
            InternalEvent::QueryResolved { key, token, result } => {
                self.handle_query_resolved(key, token, result)
            }
            InternalEvent::PollTick { key, token } => self.handle_poll_tick(key, token),
            InternalEvent::MutationResolved {
                seq,
                mutation,
                result,
            } => self.handle_mutation_resolved(seq, mutation, result),
            InternalEvent::ToastAutoDismiss { token } => self.handle_toast_auto_dismiss(token),
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            AppAction::Login => self.handle_login(),
            AppAction::Logout => self.handle_logout(),
            AppAction::SaveProfile {
                username,
                display_name,
            } => self.save_profile(username, display_name),
            AppAction::OpenDirectConversation { counterparty } => {
                if !self.require_ready() {
                    return;
                }
                if let Err(e) = self.open_direct_conversation(&counterparty) {
                    self.toast(format!("Could not open conversation: {e:#}"));
                }
            }
            AppAction::CreateGroup { name } => self.create_group(name),
            AppAction::SelectConversation { conversation_id } => {
                self.select_conversation(&conversation_id)
            }
            AppAction::CloseConversation => self.close_conversation(),
            AppAction::SendMessage {
                conversation_id,
                content,
            } => self.send_message(conversation_id, content),
            AppAction::AddParticipant {
                group_id,
                participant,
            } => {
                if !self.require_ready() {
                    return;
                }
                if let Err(e) = self.add_participant(group_id, &participant) {
                    self.toast(format!("Could not add participant: {e:#}"));
                }
            }
            AppAction::RefreshActiveConversation => self.refresh_active_conversation(),
            AppAction::AssignUserRole { user, role } => {
                if !self.require_ready() {
                    return;
                }
                if let Err(e) = self.assign_user_role(&user, role) {
                    self.toast(format!("Could not assign role: {e:#}"));
                }
            }
            AppAction::ClearToast => {
                if self.state.toast.is_some() {
                    self.state.toast = None;
                    self.emit_state();
                }
            }
        }
    }

    /// Conversation and messaging operations are only permitted in `Ready`.
    fn require_ready(&mut self) -> bool {
        if self.state.auth.is_ready() {
            true
        } else {
            self.toast("Please log in first");
            false
        }
    }

    // ---- query cache I/O -------------------------------------------------

    fn start_subscription_io(&mut self, key: CacheKey, outcome: SubscribeOutcome) {
        if let Some(token) = outcome.fetch_token {
            self.spawn_fetch(key.clone(), token);
        }
        if let Some(arm) = outcome.poll {
            self.schedule_poll_tick(key, arm.token, arm.interval);
        }
    }

    fn spawn_fetch(&mut self, key: CacheKey, token: u64) {
        let gateway = self.gateway.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = fetch_value(gateway.as_ref(), &key).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::QueryResolved {
                key,
                token,
                result,
            })));
        });
    }

    fn schedule_poll_tick(&self, key: CacheKey, token: u64, interval: Duration) {
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::PollTick {
                key,
                token,
            })));
        });
    }

    fn handle_poll_tick(&mut self, key: CacheKey, token: u64) {
        let outcome = self.cache.poll_tick(&key, token);
        if let Some(fetch) = outcome.fetch_token {
            self.spawn_fetch(key.clone(), fetch);
        }
        if let Some(interval) = outcome.rearm {
            self.schedule_poll_tick(key, token, interval);
        }
    }

    fn handle_query_resolved(
        &mut self,
        key: CacheKey,
        token: u64,
        result: Result<CachedValue, GatewayError>,
    ) {
        if let Err(e) = &result {
            tracing::warn!(key = ?key, %e, "query fetch failed");
        }
        let fetch_error = result.as_ref().err().cloned();
        let outcome = self.cache.on_fetch_resolved(&key, token, result, now_millis());
        if !outcome.applied {
            tracing::debug!(key = ?key, "stale query result discarded");
            return;
        }
        if let Some(refetch) = outcome.refetch_token {
            self.spawn_fetch(key.clone(), refetch);
        }

        let auth_bootstrap =
            self.pending_identity.is_some() && key == CacheKey::CurrentUserProfile;
        if auth_bootstrap {
            match fetch_error {
                None => {
                    let profile = match self
                        .cache
                        .entry(&key)
                        .and_then(|e| e.data.clone())
                    {
                        Some(CachedValue::Profile(profile)) => profile,
                        _ => None,
                    };
                    self.complete_auth(profile);
                }
                Some(e) => self.fail_login(&e),
            }
        } else {
            match &key {
                CacheKey::CurrentUserProfile => self.apply_profile_refresh(),
                CacheKey::CurrentUserRole => self.apply_role_from_cache(),
                CacheKey::UserProfile(user) => {
                    let user = user.clone();
                    self.apply_peer_profile(&user);
                }
                _ => {}
            }
        }

        self.refresh_current_thread();
        self.emit_state();
    }

    fn apply_role_from_cache(&mut self) {
        if let Some(entry) = self.cache.entry(&CacheKey::CurrentUserRole) {
            if let Some(CachedValue::Role(role)) = entry.data.as_ref() {
                self.state.role = Some(*role);
            }
        }
    }

    fn apply_profile_refresh(&mut self) {
        let fetched = match self
            .cache
            .entry(&CacheKey::CurrentUserProfile)
            .and_then(|e| e.data.clone())
        {
            Some(CachedValue::Profile(profile)) => profile,
            _ => return,
        };
        if let (AuthState::Ready { profile, .. }, Some(p)) = (&mut self.state.auth, fetched) {
            *profile = p;
        }
    }

    fn apply_peer_profile(&mut self, user: &Principal) {
        let fetched = match self
            .cache
            .entry(&CacheKey::UserProfile(user.clone()))
            .and_then(|e| e.data.clone())
        {
            Some(CachedValue::Profile(Some(profile))) => profile,
            _ => return,
        };
        self.registry
            .set_display_name(&derive_dm_id(user), fetched.display_name);
        self.refresh_conversation_list();
    }

    // ---- conversations ---------------------------------------------------

    fn open_direct_conversation(&mut self, counterparty: &str) -> anyhow::Result<()> {
        let principal = Principal::parse(counterparty).context("invalid principal")?;
        self.activate_conversation(Conversation::direct(principal.clone()));
        // One-shot profile lookup upgrades the placeholder display name.
        let key = CacheKey::UserProfile(principal);
        let outcome = self.cache.subscribe(key.clone(), SubscribeOptions::once());
        self.start_subscription_io(key, outcome);
        Ok(())
    }

    fn activate_conversation(&mut self, conversation: Conversation) {
        let new_key = conversation.thread_key();
        if let Some(prev_key) = self.registry.active().map(Conversation::thread_key) {
            if prev_key != new_key {
                self.cache.unsubscribe(&prev_key);
            }
        }
        self.registry.add(conversation);
        self.subscribe_active_thread();
        self.refresh_conversation_list();
        self.refresh_current_thread();
        self.emit_state();
    }

    fn select_conversation(&mut self, conversation_id: &str) {
        if !self.require_ready() {
            return;
        }
        if self.registry.active_id() == Some(conversation_id) {
            return;
        }
        if self.registry.get(conversation_id).is_none() {
            tracing::debug!(conversation_id, "select for unknown conversation ignored");
            return;
        }
        if let Some(prev_key) = self.registry.active().map(Conversation::thread_key) {
            self.cache.unsubscribe(&prev_key);
        }
        self.registry.select(conversation_id);
        self.subscribe_active_thread();
        self.refresh_conversation_list();
        self.refresh_current_thread();
        self.emit_state();
    }

    fn close_conversation(&mut self) {
        if let Some(key) = self.registry.active().map(Conversation::thread_key) {
            self.cache.unsubscribe(&key);
        }
        self.registry.deselect();
        self.refresh_conversation_list();
        self.refresh_current_thread();
        self.emit_state();
    }

    fn subscribe_active_thread(&mut self) {
        let Some(key) = self.registry.active().map(Conversation::thread_key) else {
            return;
        };
        let outcome = self
            .cache
            .subscribe(key.clone(), SubscribeOptions::polling(THREAD_POLL_INTERVAL));
        self.start_subscription_io(key, outcome);
    }

    fn refresh_active_conversation(&mut self) {
        if !self.require_ready() {
            return;
        }
        let Some(key) = self.registry.active().map(Conversation::thread_key) else {
            return;
        };
        if let Some(token) = self.cache.invalidate(&key) {
            self.spawn_fetch(key, token);
        }
    }

    fn refresh_conversation_list(&mut self) {
        if !self.state.auth.is_ready() || self.registry.is_empty() {
            self.state.conversations.clear();
            return;
        }
        let active = self.registry.active_id().map(str::to_string);
        self.state.conversations = self
            .registry
            .iter()
            .map(|c| ConversationSummary {
                id: c.id.clone(),
                kind: c.kind,
                display_name: c.display_name.clone(),
                is_active: active.as_deref() == Some(c.id.as_str()),
            })
            .collect();
    }

    /// Project the active conversation over its cache entry. Outside `Ready`
    /// there is no thread to show, whatever the cache still holds.
    fn refresh_current_thread(&mut self) {
        if !self.state.auth.is_ready() {
            self.state.current_thread = None;
            return;
        }
        let Some(conversation) = self.registry.active().cloned() else {
            self.state.current_thread = None;
            return;
        };
        let key = conversation.thread_key();
        let me = self.session_principal.clone();
        let sending = self
            .sends_in_flight
            .get(&conversation.id)
            .copied()
            .unwrap_or(0)
            > 0;

        let (messages, status) = match self.cache.entry(&key) {
            Some(entry) => {
                let messages = match entry.data.as_ref() {
                    Some(CachedValue::Messages(messages)) => messages
                        .iter()
                        .map(|m| MessageView {
                            content: m.content.clone(),
                            sender: m.sender.as_text().to_string(),
                            timestamp: m.timestamp,
                            is_own: me.as_ref() == Some(&m.sender),
                        })
                        .collect(),
                    _ => Vec::new(),
                };
                let status = match entry.status {
                    QueryStatus::Idle => ThreadStatus::Idle,
                    QueryStatus::Loading => ThreadStatus::Loading,
                    QueryStatus::Error => ThreadStatus::Error,
                };
                (messages, status)
            }
            None => (Vec::new(), ThreadStatus::Loading),
        };

        self.state.current_thread = Some(ThreadViewState {
            conversation_id: conversation.id.clone(),
            display_name: conversation.display_name.clone(),
            kind: conversation.kind,
            messages,
            status,
            sending,
        });
    }

    // ---- mutations -------------------------------------------------------

    fn save_profile(&mut self, username: String, display_name: String) {
        if self.state.auth.principal().is_none() {
            self.toast("Please log in first");
            return;
        }
        let profile = UserProfile {
            username: username.trim().to_string(),
            display_name: display_name.trim().to_string(),
        };
        // Rejected before any gateway call; no state change.
        if let Err(e) = validate_profile(&profile) {
            self.toast(e.to_string());
            return;
        }
        self.set_busy(|b| b.saving_profile = true);
        self.dispatch_mutation(Mutation::SaveProfile { profile });
    }

    fn create_group(&mut self, name: String) {
        if !self.require_ready() {
            return;
        }
        let name = name.trim().to_string();
        if name.is_empty() {
            self.toast("Enter a group name");
            return;
        }
        self.set_busy(|b| b.creating_group = true);
        self.dispatch_mutation(Mutation::CreateGroup { name });
    }

    fn add_participant(&mut self, group_id: String, participant: &str) -> anyhow::Result<()> {
        let participant = Principal::parse(participant).context("invalid principal")?;
        self.set_busy(|b| b.adding_participant = true);
        self.dispatch_mutation(Mutation::AddParticipant {
            group_id,
            participant,
        });
        Ok(())
    }

    fn assign_user_role(
        &mut self,
        user: &str,
        role: crate::gateway::UserRole,
    ) -> anyhow::Result<()> {
        let user = Principal::parse(user).context("invalid principal")?;
        self.dispatch_mutation(Mutation::AssignUserRole { user, role });
        Ok(())
    }

    fn send_message(&mut self, conversation_id: String, content: String) {
        if !self.require_ready() {
            return;
        }
        let content = content.trim().to_string();
        if content.is_empty() {
            return;
        }
        let Some(conversation) = self.registry.get(&conversation_id).cloned() else {
            self.toast("Unknown conversation");
            return;
        };
        let mutation = match (&conversation.kind, conversation.counterparty.clone()) {
            (crate::state::ConversationKind::Direct, Some(recipient)) => {
                Mutation::SendDirectMessage { recipient, content }
            }
            _ => Mutation::SendGroupMessage {
                group_id: conversation.id.clone(),
                content,
            },
        };
        *self.sends_in_flight.entry(conversation.id).or_insert(0) += 1;
        self.dispatch_mutation(mutation);
        self.refresh_current_thread();
        self.emit_state();
    }

    fn dispatch_mutation(&mut self, mutation: Mutation) {
        self.mutation_seq += 1;
        let seq = self.mutation_seq;
        tracing::info!(mutation = mutation.tag(), seq, "mutation dispatch");
        let gateway = self.gateway.clone();
        let tx = self.core_sender.clone();
        let for_task = mutation.clone();
        self.runtime.spawn(async move {
            let result = mutations::run(gateway.as_ref(), for_task.clone()).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::MutationResolved {
                    seq,
                    mutation: for_task,
                    result,
                },
            )));
        });
    }

    fn handle_mutation_resolved(
        &mut self,
        seq: u64,
        mutation: Mutation,
        result: Result<MutationOutput, GatewayError>,
    ) {
        if let Some(conversation_id) = mutation.conversation_id() {
            if let Some(n) = self.sends_in_flight.get_mut(&conversation_id) {
                *n = n.saturating_sub(1);
                if *n == 0 {
                    self.sends_in_flight.remove(&conversation_id);
                }
            }
        }
        match result {
            Ok(output) => {
                // Invalidation fires only after the call resolved
                // successfully; failures leave the cache untouched.
                let targets = mutation.invalidation_targets();
                if !targets.is_empty() {
                    for (key, token) in self.cache.invalidate_where(|k| targets.contains(k)) {
                        self.spawn_fetch(key, token);
                    }
                }
                self.apply_mutation_success(&mutation, output);
            }
            Err(e) => {
                tracing::warn!(mutation = mutation.tag(), seq, %e, "mutation failed");
                self.apply_mutation_failure(&mutation, &e);
            }
        }
        self.refresh_current_thread();
        self.emit_state();
    }

    fn apply_mutation_success(&mut self, mutation: &Mutation, output: MutationOutput) {
        match mutation {
            Mutation::SendDirectMessage { .. } | Mutation::SendGroupMessage { .. } => {}
            Mutation::CreateGroup { name } => {
                self.set_busy(|b| b.creating_group = false);
                if let MutationOutput::GroupCreated { group_id } = output {
                    // A create resolving after logout must not revive the
                    // registry for the next identity.
                    if self.state.auth.is_ready() {
                        self.activate_conversation(Conversation::group(group_id, name.clone()));
                        self.toast("Group created");
                    }
                }
            }
            Mutation::AddParticipant { .. } => {
                self.set_busy(|b| b.adding_participant = false);
                self.toast("Participant added");
            }
            Mutation::SaveProfile { profile } => {
                self.set_busy(|b| b.saving_profile = false);
                self.complete_onboarding(profile.clone());
            }
            Mutation::AssignUserRole { .. } => self.toast("Role assigned"),
        }
    }

    fn apply_mutation_failure(&mut self, mutation: &Mutation, error: &GatewayError) {
        match mutation {
            Mutation::SendDirectMessage { .. } | Mutation::SendGroupMessage { .. } => {
                self.toast(format!("Send failed: {error}"));
            }
            Mutation::CreateGroup { .. } => {
                self.set_busy(|b| b.creating_group = false);
                self.toast(format!("Create group failed: {error}"));
            }
            Mutation::AddParticipant { .. } => {
                self.set_busy(|b| b.adding_participant = false);
                // Surfaced verbatim: the backend's wording distinguishes
                // Unauthorized from a bad identity.
                self.toast(error.to_string());
            }
            Mutation::SaveProfile { .. } => {
                self.set_busy(|b| b.saving_profile = false);
                self.toast(format!("Save profile failed: {error}"));
            }
            Mutation::AssignUserRole { .. } => {
                self.toast(format!("Assign role failed: {error}"));
            }
        }
    }
}
