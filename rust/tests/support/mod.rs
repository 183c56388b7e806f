//! In-process fakes: one shared ledger, per-caller gateways, and a scripted
//! identity provider. Lets several apps talk through the same backend the
//! way the real deployment does.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ledgerchat_core::{
    ChatApp, ChatGateway, GatewayError, IdentityProvider, Message, Principal, UserProfile,
    UserRole,
};

pub fn wait_until(what: &str, timeout: Duration, mut f: impl FnMut() -> bool) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    panic!("{what}: condition not met within {timeout:?}");
}

pub fn principal(text: &str) -> Principal {
    Principal::parse(text).unwrap()
}

// The RPC surface never reads a group's name back; the client keeps its own
// display name, so the fake only tracks membership and messages.
struct GroupChat {
    creator: Principal,
    participants: Vec<Principal>,
    messages: Vec<Message>,
}

#[derive(Default)]
struct LedgerData {
    profiles: HashMap<Principal, UserProfile>,
    roles: HashMap<Principal, UserRole>,
    dms: HashMap<(String, String), Vec<Message>>,
    groups: HashMap<String, GroupChat>,
}

/// The shared fake backend. Counts every call per resource and tracks the
/// maximum number of concurrently running reads per resource, so tests can
/// assert the one-fetch-in-flight invariant end to end.
#[derive(Default)]
pub struct FakeLedger {
    data: Mutex<LedgerData>,
    call_counts: Mutex<HashMap<String, u64>>,
    gauges: Mutex<HashMap<String, (usize, usize)>>,
    offline: AtomicBool,
    read_delay_ms: AtomicI64,
    next_timestamp: AtomicI64,
}

fn dm_slot(a: &Principal, b: &Principal) -> (String, String) {
    let (a, b) = (a.as_text().to_string(), b.as_text().to_string());
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

pub fn dm_resource(a: &Principal, b: &Principal) -> String {
    let (lo, hi) = dm_slot(a, b);
    format!("dm:{lo}:{hi}")
}

pub fn group_resource(group_id: &str) -> String {
    format!("group:{group_id}")
}

struct GaugeGuard<'a> {
    ledger: &'a FakeLedger,
    resource: String,
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        let mut gauges = self.ledger.gauges.lock().unwrap();
        let slot = gauges.entry(self.resource.clone()).or_insert((0, 0));
        slot.0 = slot.0.saturating_sub(1);
    }
}

impl FakeLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_timestamp: AtomicI64::new(1),
            ..Self::default()
        })
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn seed_profile(&self, user: &Principal, username: &str, display_name: &str) {
        self.data.lock().unwrap().profiles.insert(
            user.clone(),
            UserProfile {
                username: username.into(),
                display_name: display_name.into(),
            },
        );
    }

    pub fn seed_role(&self, user: &Principal, role: UserRole) {
        self.data.lock().unwrap().roles.insert(user.clone(), role);
    }

    pub fn seed_group(&self, group_id: &str, creator: &Principal) {
        self.data.lock().unwrap().groups.insert(
            group_id.to_string(),
            GroupChat {
                creator: creator.clone(),
                participants: vec![creator.clone()],
                messages: Vec::new(),
            },
        );
    }

    /// Append a DM with an explicit timestamp, preserving append order.
    pub fn seed_dm_message(&self, from: &Principal, to: &Principal, content: &str, timestamp: i64) {
        let mut data = self.data.lock().unwrap();
        data.dms.entry(dm_slot(from, to)).or_default().push(Message {
            content: content.into(),
            sender: from.clone(),
            timestamp,
        });
    }

    pub fn call_count(&self, resource: &str) -> u64 {
        self.call_counts
            .lock()
            .unwrap()
            .get(resource)
            .copied()
            .unwrap_or(0)
    }

    pub fn max_concurrent(&self, resource: &str) -> usize {
        self.gauges
            .lock()
            .unwrap()
            .get(resource)
            .map(|(_, max)| *max)
            .unwrap_or(0)
    }

    fn count(&self, resource: &str) {
        *self
            .call_counts
            .lock()
            .unwrap()
            .entry(resource.to_string())
            .or_insert(0) += 1;
    }

    fn enter(&self, resource: &str) -> GaugeGuard<'_> {
        let mut gauges = self.gauges.lock().unwrap();
        let slot = gauges.entry(resource.to_string()).or_insert((0, 0));
        slot.0 += 1;
        slot.1 = slot.1.max(slot.0);
        GaugeGuard {
            ledger: self,
            resource: resource.to_string(),
        }
    }

    fn check_online(&self) -> Result<(), GatewayError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(GatewayError::Transport("backend offline".into()))
        } else {
            Ok(())
        }
    }

    async fn read_delay(&self) {
        let ms = self.read_delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms as u64)).await;
        }
    }

    fn next_ts(&self) -> i64 {
        self.next_timestamp.fetch_add(1, Ordering::SeqCst)
    }
}

/// Gateway bound to one caller, the way a real connection carries its
/// authenticated principal implicitly.
pub struct CallerGateway {
    ledger: Arc<FakeLedger>,
    caller: Principal,
}

impl CallerGateway {
    pub fn new(ledger: Arc<FakeLedger>, caller: Principal) -> Self {
        Self { ledger, caller }
    }
}

#[async_trait]
impl ChatGateway for CallerGateway {
    async fn get_caller_user_profile(&self) -> Result<Option<UserProfile>, GatewayError> {
        let resource = format!("callerProfile:{}", self.caller);
        self.ledger.count(&resource);
        self.ledger.check_online()?;
        self.ledger.read_delay().await;
        Ok(self
            .ledger
            .data
            .lock()
            .unwrap()
            .profiles
            .get(&self.caller)
            .cloned())
    }

    async fn save_caller_user_profile(&self, profile: UserProfile) -> Result<(), GatewayError> {
        let resource = format!("saveProfile:{}", self.caller);
        self.ledger.count(&resource);
        self.ledger.check_online()?;
        self.ledger
            .data
            .lock()
            .unwrap()
            .profiles
            .insert(self.caller.clone(), profile);
        Ok(())
    }

    async fn get_user_profile(&self, user: Principal) -> Result<Option<UserProfile>, GatewayError> {
        self.ledger.count(&format!("userProfile:{user}"));
        self.ledger.check_online()?;
        self.ledger.read_delay().await;
        Ok(self.ledger.data.lock().unwrap().profiles.get(&user).cloned())
    }

    async fn get_caller_user_role(&self) -> Result<UserRole, GatewayError> {
        self.ledger.count(&format!("callerRole:{}", self.caller));
        self.ledger.check_online()?;
        Ok(self
            .ledger
            .data
            .lock()
            .unwrap()
            .roles
            .get(&self.caller)
            .copied()
            .unwrap_or(UserRole::User))
    }

    async fn is_caller_admin(&self) -> Result<bool, GatewayError> {
        Ok(self.get_caller_user_role().await? == UserRole::Admin)
    }

    async fn assign_caller_user_role(
        &self,
        user: Principal,
        role: UserRole,
    ) -> Result<(), GatewayError> {
        self.ledger.count("assignRole");
        self.ledger.check_online()?;
        if !self.is_caller_admin().await? {
            return Err(GatewayError::Unauthorized(
                "only admins can assign roles".into(),
            ));
        }
        self.ledger.data.lock().unwrap().roles.insert(user, role);
        Ok(())
    }

    async fn create_group_chat(&self, _name: String) -> Result<String, GatewayError> {
        self.ledger.count("createGroup");
        self.ledger.check_online()?;
        let group_id = format!("group-{}", uuid::Uuid::new_v4());
        self.ledger.data.lock().unwrap().groups.insert(
            group_id.clone(),
            GroupChat {
                creator: self.caller.clone(),
                participants: vec![self.caller.clone()],
                messages: Vec::new(),
            },
        );
        Ok(group_id)
    }

    async fn add_participant(
        &self,
        group_id: String,
        participant: Principal,
    ) -> Result<(), GatewayError> {
        self.ledger.count(&format!("addParticipant:{group_id}"));
        self.ledger.check_online()?;
        let mut data = self.ledger.data.lock().unwrap();
        let group = data
            .groups
            .get_mut(&group_id)
            .ok_or_else(|| GatewayError::InvalidArgument("unknown group".into()))?;
        if group.creator != self.caller {
            return Err(GatewayError::Unauthorized(
                "only the group creator can add participants".into(),
            ));
        }
        if !group.participants.contains(&participant) {
            group.participants.push(participant);
        }
        Ok(())
    }

    async fn get_direct_messages(
        &self,
        counterparty: Principal,
    ) -> Result<Vec<Message>, GatewayError> {
        let resource = dm_resource(&self.caller, &counterparty);
        self.ledger.count(&resource);
        self.ledger.check_online()?;
        let _gauge = self.ledger.enter(&resource);
        self.ledger.read_delay().await;
        Ok(self
            .ledger
            .data
            .lock()
            .unwrap()
            .dms
            .get(&dm_slot(&self.caller, &counterparty))
            .cloned()
            .unwrap_or_default())
    }

    async fn send_direct_message(
        &self,
        recipient: Principal,
        content: String,
    ) -> Result<(), GatewayError> {
        self.ledger
            .count(&format!("sendDm:{}", dm_resource(&self.caller, &recipient)));
        self.ledger.check_online()?;
        let timestamp = self.ledger.next_ts();
        let mut data = self.ledger.data.lock().unwrap();
        data.dms
            .entry(dm_slot(&self.caller, &recipient))
            .or_default()
            .push(Message {
                content,
                sender: self.caller.clone(),
                timestamp,
            });
        Ok(())
    }

    async fn get_group_messages(&self, group_id: String) -> Result<Vec<Message>, GatewayError> {
        let resource = group_resource(&group_id);
        self.ledger.count(&resource);
        self.ledger.check_online()?;
        let _gauge = self.ledger.enter(&resource);
        self.ledger.read_delay().await;
        self.ledger
            .data
            .lock()
            .unwrap()
            .groups
            .get(&group_id)
            .map(|g| g.messages.clone())
            .ok_or_else(|| GatewayError::InvalidArgument("unknown group".into()))
    }

    async fn send_group_message(
        &self,
        group_id: String,
        content: String,
    ) -> Result<(), GatewayError> {
        self.ledger.count(&format!("sendGroup:{group_id}"));
        self.ledger.check_online()?;
        let timestamp = self.ledger.next_ts();
        let mut data = self.ledger.data.lock().unwrap();
        let sender = self.caller.clone();
        let group = data
            .groups
            .get_mut(&group_id)
            .ok_or_else(|| GatewayError::InvalidArgument("unknown group".into()))?;
        group.messages.push(Message {
            content,
            sender,
            timestamp,
        });
        Ok(())
    }
}

/// Scripted identity provider: a stored identity for the bootstrap path, a
/// login identity for the interactive path, or a hard failure.
pub struct FakeIdentity {
    stored: Option<Principal>,
    login_as: Option<Principal>,
}

impl FakeIdentity {
    /// No restored session; `login()` authenticates as `principal`.
    pub fn logged_out(login_as: &str) -> Arc<Self> {
        Arc::new(Self {
            stored: None,
            login_as: Some(principal(login_as)),
        })
    }

    /// A previous session restores `principal` without user action.
    pub fn restored(restored: &str) -> Arc<Self> {
        Arc::new(Self {
            stored: Some(principal(restored)),
            login_as: Some(principal(restored)),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            stored: None,
            login_as: None,
        })
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn bootstrap(&self) -> Result<Option<Principal>, GatewayError> {
        Ok(self.stored.clone())
    }

    async fn login(&self) -> Result<Principal, GatewayError> {
        self.login_as
            .clone()
            .ok_or_else(|| GatewayError::Transport("identity service unreachable".into()))
    }

    async fn logout(&self) -> Result<(), GatewayError> {
        Ok(())
    }
}

/// App with no restored session whose `Login` lands as `caller`.
pub fn app_for(ledger: &Arc<FakeLedger>, caller: &str) -> Arc<ChatApp> {
    ChatApp::new(
        FakeIdentity::logged_out(caller),
        Arc::new(CallerGateway::new(ledger.clone(), principal(caller))),
    )
}

/// App that restores `caller` at bootstrap.
pub fn app_restored(ledger: &Arc<FakeLedger>, caller: &str) -> Arc<ChatApp> {
    ChatApp::new(
        FakeIdentity::restored(caller),
        Arc::new(CallerGateway::new(ledger.clone(), principal(caller))),
    )
}
