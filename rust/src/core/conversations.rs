//! Client-local conversation registry: the de-duplicated, insertion-ordered
//! list of conversations opened this session, plus the active selection.
//! Never persisted; cleared on logout.

use crate::gateway::Principal;
use crate::state::ConversationKind;

use super::cache::CacheKey;

/// Direct-conversation ids are a pure function of the canonicalized
/// counterparty, so one peer can never yield two distinct conversations.
pub fn derive_dm_id(counterparty: &Principal) -> String {
    format!("dm-{}", counterparty.as_text())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: String,
    pub kind: ConversationKind,
    pub display_name: String,
    pub counterparty: Option<Principal>,
}

impl Conversation {
    pub fn direct(counterparty: Principal) -> Self {
        Self {
            id: derive_dm_id(&counterparty),
            kind: ConversationKind::Direct,
            display_name: counterparty.short(),
            counterparty: Some(counterparty),
        }
    }

    pub fn group(id: String, display_name: String) -> Self {
        Self {
            id,
            kind: ConversationKind::Group,
            display_name,
            counterparty: None,
        }
    }

    /// The one cache key this conversation reads from (DM or group, never
    /// both).
    pub fn thread_key(&self) -> CacheKey {
        match (&self.kind, &self.counterparty) {
            (ConversationKind::Direct, Some(counterparty)) => {
                CacheKey::DirectMessages(counterparty.clone())
            }
            _ => CacheKey::GroupMessages(self.id.clone()),
        }
    }
}

#[derive(Debug, Default)]
pub struct ConversationRegistry {
    items: Vec<Conversation>,
    active: Option<String>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Front-insert iff the id is absent. A duplicate id leaves the existing
    /// entry untouched (position and fields); either way the conversation
    /// becomes the active selection.
    pub fn add(&mut self, conversation: Conversation) {
        let id = conversation.id.clone();
        if !self.items.iter().any(|c| c.id == id) {
            self.items.insert(0, conversation);
        }
        self.active = Some(id);
    }

    /// Set the active conversation without mutating the list. Returns false
    /// for an unknown id.
    pub fn select(&mut self, id: &str) -> bool {
        if self.items.iter().any(|c| c.id == id) {
            self.active = Some(id.to_string());
            true
        } else {
            false
        }
    }

    pub fn deselect(&mut self) {
        self.active = None;
    }

    pub fn active(&self) -> Option<&Conversation> {
        let id = self.active.as_deref()?;
        self.items.iter().find(|c| c.id == id)
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.items.iter().find(|c| c.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Conversation> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn set_display_name(&mut self, id: &str, display_name: String) {
        if let Some(c) = self.items.iter_mut().find(|c| c.id == id) {
            c.display_name = display_name;
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.active = None;
    }
}
