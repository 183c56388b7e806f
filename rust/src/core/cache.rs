//! Synchronized query cache: keyed asynchronous reads with per-key in-flight
//! de-duplication, interval re-fetch, and explicit invalidation.
//!
//! The cache itself performs no I/O. Every method is a synchronous state
//! transition returning an outcome that tells the actor which fetches to
//! spawn and which poll ticks to arm; fetch results come back through
//! [`QueryCache::on_fetch_resolved`]. Tokens guard both paths: a resolution
//! whose token no longer matches (entry cleared or superseded) is discarded,
//! and a tick whose token was bumped (unsubscribed or re-armed) is ignored.

use std::collections::HashMap;
use std::time::Duration;

use crate::gateway::{ChatGateway, GatewayError, Message, Principal, UserProfile, UserRole};

/// Value-compared identifier for one cached resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    CurrentUserProfile,
    CurrentUserRole,
    UserProfile(Principal),
    DirectMessages(Principal),
    GroupMessages(String),
}

/// One fetched payload; the variant matches the key's resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedValue {
    Profile(Option<UserProfile>),
    Role(UserRole),
    Messages(Vec<Message>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Idle,
    Loading,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Disabled suppresses the fetch (and polling) entirely.
    pub enabled: bool,
    pub poll_interval: Option<Duration>,
}

impl SubscribeOptions {
    /// One-shot read, no polling.
    pub fn once() -> Self {
        Self {
            enabled: true,
            poll_interval: None,
        }
    }

    pub fn polling(interval: Duration) -> Self {
        Self {
            enabled: true,
            poll_interval: Some(interval),
        }
    }
}

#[derive(Debug)]
pub struct CacheEntry {
    pub data: Option<CachedValue>,
    pub status: QueryStatus,
    /// Strictly increasing per key across successful fetches.
    pub last_fetched_at: Option<u64>,
    in_flight: Option<u64>,
    /// An invalidation arrived while a fetch was in flight; exactly one
    /// follow-up fetch starts when it resolves.
    refetch_queued: bool,
    stale: bool,
    subscribed: bool,
    poll_interval: Option<Duration>,
    poll_token: u64,
}

impl CacheEntry {
    fn new() -> Self {
        Self {
            data: None,
            status: QueryStatus::Idle,
            last_fetched_at: None,
            in_flight: None,
            refetch_queued: false,
            stale: false,
            subscribed: false,
            poll_interval: None,
            poll_token: 0,
        }
    }

    fn needs_fetch(&self) -> bool {
        self.stale || self.data.is_none() || self.last_fetched_at.is_none()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollArm {
    pub token: u64,
    pub interval: Duration,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SubscribeOutcome {
    /// Token of the fetch the actor must spawn, if one was started.
    pub fetch_token: Option<u64>,
    pub poll: Option<PollArm>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TickOutcome {
    pub fetch_token: Option<u64>,
    /// Interval to schedule the next tick with (same token); `None` stops
    /// the poll loop for this arm.
    pub rearm: Option<Duration>,
}

#[derive(Debug, Clone, Copy)]
pub struct ResolveOutcome {
    /// False: the result belonged to a cleared or superseded fetch and was
    /// discarded without touching the entry.
    pub applied: bool,
    pub refetch_token: Option<u64>,
}

#[derive(Debug, Default)]
pub struct QueryCache {
    entries: HashMap<CacheKey, CacheEntry>,
    fetch_seq: u64,
    poll_seq: u64,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Mount a subscriber for `key`. A fetch starts only when none is in
    /// flight and the entry is stale or has never fetched; concurrent
    /// subscribers join the pending fetch instead of racing it.
    pub fn subscribe(&mut self, key: CacheKey, options: SubscribeOptions) -> SubscribeOutcome {
        if !options.enabled {
            return SubscribeOutcome::default();
        }
        self.fetch_seq += 1;
        let fetch_candidate = self.fetch_seq;
        self.poll_seq += 1;
        let poll_candidate = self.poll_seq;

        let entry = self.entries.entry(key).or_insert_with(CacheEntry::new);
        entry.subscribed = true;
        entry.poll_interval = options.poll_interval;

        let poll = options.poll_interval.map(|interval| {
            entry.poll_token = poll_candidate;
            PollArm {
                token: poll_candidate,
                interval,
            }
        });

        let fetch_token = if entry.in_flight.is_none() && entry.needs_fetch() {
            entry.in_flight = Some(fetch_candidate);
            entry.status = QueryStatus::Loading;
            entry.stale = false;
            Some(fetch_candidate)
        } else {
            None
        };

        SubscribeOutcome { fetch_token, poll }
    }

    /// Detach the subscriber: polling stops, cached data stays.
    pub fn unsubscribe(&mut self, key: &CacheKey) {
        self.poll_seq += 1;
        if let Some(entry) = self.entries.get_mut(key) {
            entry.subscribed = false;
            entry.poll_interval = None;
            entry.poll_token = self.poll_seq;
        }
    }

    /// Mark `key` for mandatory re-fetch. Mounted entries re-fetch
    /// immediately (returned token); an in-flight fetch is never cancelled
    /// but queues exactly one follow-up; unmounted entries re-fetch on next
    /// subscribe. Unknown keys hold nothing and are left alone.
    pub fn invalidate(&mut self, key: &CacheKey) -> Option<u64> {
        self.fetch_seq += 1;
        let candidate = self.fetch_seq;
        let entry = self.entries.get_mut(key)?;
        if entry.in_flight.is_some() {
            entry.refetch_queued = true;
            return None;
        }
        entry.stale = true;
        if entry.subscribed {
            entry.in_flight = Some(candidate);
            entry.status = QueryStatus::Loading;
            entry.stale = false;
            return Some(candidate);
        }
        None
    }

    /// Predicate form of [`invalidate`]; returns the fetches to start.
    pub fn invalidate_where(
        &mut self,
        mut pred: impl FnMut(&CacheKey) -> bool,
    ) -> Vec<(CacheKey, u64)> {
        let matching: Vec<CacheKey> = self.entries.keys().filter(|k| pred(k)).cloned().collect();
        let mut fetches = Vec::new();
        for key in matching {
            if let Some(token) = self.invalidate(&key) {
                fetches.push((key, token));
            }
        }
        fetches
    }

    /// Drop every entry (logout). Fetches resolving afterwards find no entry
    /// carrying their token and are discarded, so nothing can leak across
    /// identities.
    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    /// A poll tick fired for `key`. Ticks re-fetch on cadence regardless of
    /// the previous attempt's outcome; a tick during an in-flight fetch
    /// joins it rather than starting a second one.
    pub fn poll_tick(&mut self, key: &CacheKey, token: u64) -> TickOutcome {
        self.fetch_seq += 1;
        let candidate = self.fetch_seq;
        let Some(entry) = self.entries.get_mut(key) else {
            return TickOutcome::default();
        };
        if !entry.subscribed || entry.poll_token != token {
            return TickOutcome::default();
        }
        let Some(interval) = entry.poll_interval else {
            return TickOutcome::default();
        };
        let fetch_token = if entry.in_flight.is_none() {
            entry.in_flight = Some(candidate);
            entry.status = QueryStatus::Loading;
            entry.stale = false;
            Some(candidate)
        } else {
            None
        };
        TickOutcome {
            fetch_token,
            rearm: Some(interval),
        }
    }

    /// Apply a fetch result. Success stores the data and stamps
    /// `last_fetched_at` strictly above its previous value; failure keeps
    /// the last good data (stale-while-error) and marks the entry stale so
    /// the next tick, invalidation, or subscribe retries.
    pub fn on_fetch_resolved(
        &mut self,
        key: &CacheKey,
        token: u64,
        result: Result<CachedValue, GatewayError>,
        now_ms: u64,
    ) -> ResolveOutcome {
        self.fetch_seq += 1;
        let follow_up = self.fetch_seq;
        let Some(entry) = self.entries.get_mut(key) else {
            return ResolveOutcome {
                applied: false,
                refetch_token: None,
            };
        };
        if entry.in_flight != Some(token) {
            return ResolveOutcome {
                applied: false,
                refetch_token: None,
            };
        }
        entry.in_flight = None;
        match result {
            Ok(value) => {
                entry.data = Some(value);
                entry.status = QueryStatus::Idle;
                let stamp = match entry.last_fetched_at {
                    Some(prev) => now_ms.max(prev + 1),
                    None => now_ms,
                };
                entry.last_fetched_at = Some(stamp);
            }
            Err(_) => {
                entry.status = QueryStatus::Error;
                entry.stale = true;
            }
        }
        let refetch_token = if entry.refetch_queued {
            entry.refetch_queued = false;
            entry.in_flight = Some(follow_up);
            entry.status = QueryStatus::Loading;
            entry.stale = false;
            Some(follow_up)
        } else {
            None
        };
        ResolveOutcome {
            applied: true,
            refetch_token,
        }
    }
}

/// Resolve a key to its one gateway call. Every key maps to exactly one RPC,
/// so the fetcher is bound by the key itself rather than supplied per
/// subscription.
pub async fn fetch_value(
    gateway: &dyn ChatGateway,
    key: &CacheKey,
) -> Result<CachedValue, GatewayError> {
    match key {
        CacheKey::CurrentUserProfile => gateway
            .get_caller_user_profile()
            .await
            .map(CachedValue::Profile),
        CacheKey::CurrentUserRole => gateway.get_caller_user_role().await.map(CachedValue::Role),
        CacheKey::UserProfile(user) => gateway
            .get_user_profile(user.clone())
            .await
            .map(CachedValue::Profile),
        CacheKey::DirectMessages(counterparty) => gateway
            .get_direct_messages(counterparty.clone())
            .await
            .map(CachedValue::Messages),
        CacheKey::GroupMessages(group_id) => gateway
            .get_group_messages(group_id.clone())
            .await
            .map(CachedValue::Messages),
    }
}
