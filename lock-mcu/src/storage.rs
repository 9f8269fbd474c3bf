//! Key and event storage traits
//!
//! Firmware crates implement these on top of their non-volatile storage.
//! The in-memory implementations back tests and simulated locks.

use std::collections::BTreeMap;
use std::convert::Infallible;

use lock_proto::{Key, KeyData, KeyKind, KeyListItem, LockEvent, NewKey};
use uuid::Uuid;

/// Keys, pending invitations and their secrets
pub trait KeyStore {
    /// Error type for storage operations
    type Error: std::fmt::Display;

    /// Whether an owner key exists
    fn is_configured(&self) -> Result<bool, Self::Error>;

    /// Secret of a confirmed key or of a pending invitation
    fn secret(&self, id: &Uuid) -> Result<Option<KeyData>, Self::Error>;

    fn key(&self, id: &Uuid) -> Result<Option<Key>, Self::Error>;

    fn new_key(&self, id: &Uuid) -> Result<Option<NewKey>, Self::Error>;

    /// Confirmed keys followed by pending invitations
    fn keys(&self) -> Result<Vec<KeyListItem>, Self::Error>;

    fn add_key(&mut self, key: Key, secret: KeyData) -> Result<(), Self::Error>;

    fn add_new_key(&mut self, new_key: NewKey, secret: KeyData) -> Result<(), Self::Error>;

    /// Replace the invitation `key.id` by the confirmed `key`
    fn confirm_new_key(&mut self, key: Key, secret: KeyData) -> Result<(), Self::Error>;

    /// Returns `false` if nothing of that kind had this id
    fn remove_key(&mut self, id: &Uuid, kind: KeyKind) -> Result<bool, Self::Error>;
}

/// Append-only lock history
pub trait EventLog {
    type Error: std::fmt::Display;

    fn record(&mut self, event: LockEvent) -> Result<(), Self::Error>;

    /// Oldest first
    fn events(&self) -> Result<Vec<LockEvent>, Self::Error>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryKeyStore {
    keys: BTreeMap<Uuid, (Key, KeyData)>,
    new_keys: BTreeMap<Uuid, (NewKey, KeyData)>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    type Error = Infallible;

    fn is_configured(&self) -> Result<bool, Self::Error> {
        Ok(self
            .keys
            .values()
            .any(|(key, _)| key.permission == lock_proto::Permission::Owner))
    }

    fn secret(&self, id: &Uuid) -> Result<Option<KeyData>, Self::Error> {
        Ok(self
            .keys
            .get(id)
            .map(|(_, secret)| secret.clone())
            .or_else(|| self.new_keys.get(id).map(|(_, secret)| secret.clone())))
    }

    fn key(&self, id: &Uuid) -> Result<Option<Key>, Self::Error> {
        Ok(self.keys.get(id).map(|(key, _)| key.clone()))
    }

    fn new_key(&self, id: &Uuid) -> Result<Option<NewKey>, Self::Error> {
        Ok(self.new_keys.get(id).map(|(key, _)| key.clone()))
    }

    fn keys(&self) -> Result<Vec<KeyListItem>, Self::Error> {
        let keys = self.keys.values().map(|(key, _)| KeyListItem::Key(key.clone()));
        let new_keys = self
            .new_keys
            .values()
            .map(|(key, _)| KeyListItem::NewKey(key.clone()));
        Ok(keys.chain(new_keys).collect())
    }

    fn add_key(&mut self, key: Key, secret: KeyData) -> Result<(), Self::Error> {
        self.keys.insert(key.id, (key, secret));
        Ok(())
    }

    fn add_new_key(&mut self, new_key: NewKey, secret: KeyData) -> Result<(), Self::Error> {
        self.new_keys.insert(new_key.id, (new_key, secret));
        Ok(())
    }

    fn confirm_new_key(&mut self, key: Key, secret: KeyData) -> Result<(), Self::Error> {
        self.new_keys.remove(&key.id);
        self.keys.insert(key.id, (key, secret));
        Ok(())
    }

    fn remove_key(&mut self, id: &Uuid, kind: KeyKind) -> Result<bool, Self::Error> {
        Ok(match kind {
            KeyKind::Key => self.keys.remove(id).is_some(),
            KeyKind::NewKey => self.new_keys.remove(id).is_some(),
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryEventLog {
    events: Vec<LockEvent>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventLog for MemoryEventLog {
    type Error = Infallible;

    fn record(&mut self, event: LockEvent) -> Result<(), Self::Error> {
        self.events.push(event);
        Ok(())
    }

    fn events(&self) -> Result<Vec<LockEvent>, Self::Error> {
        Ok(self.events.clone())
    }
}
