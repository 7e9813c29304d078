//! The keyspace: every key, its value and its absolute expiry.
//!
//! ## Design Decisions
//!
//! 1. **Single owner**: the server creates one [`Keyspace`] and hands every
//!    connection an `Rc<RefCell<_>>` to it. All command execution happens on
//!    one thread and each command borrows the keyspace for its whole
//!    synchronous run, so no locks are involved.
//! 2. **Absolute expiry**: entries store expiry as Unix epoch milliseconds,
//!    which survives a snapshot/reload without any clock translation.
//! 3. **No lazy expiry**: reads return an entry even if its expiry has
//!    passed. Only [`Keyspace::remove_expired`] (driven by the reaper)
//!    removes expired keys.
//! 4. **Ordered keys**: a `BTreeMap` keeps enumeration order stable between
//!    calls, which `SCAN` offsets depend on.

use crate::storage::GlobPattern;
use bytes::Bytes;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Handle shared by the server, every connection and the background tasks.
pub type SharedKeyspace = Rc<RefCell<Keyspace>>;

/// Current wall-clock time in Unix epoch milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A stored value with optional expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub value: Bytes,
    /// Absolute expiry in epoch milliseconds; `None` never expires.
    pub expire_at: Option<u64>,
}

impl Entry {
    pub fn new(value: Bytes) -> Self {
        Self {
            value,
            expire_at: None,
        }
    }

    pub fn with_expiry(value: Bytes, expire_at: u64) -> Self {
        Self {
            value,
            expire_at: Some(expire_at),
        }
    }

    /// True once `now` has passed the expiry.
    #[inline]
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expire_at.is_some_and(|at| at < now)
    }

    /// Milliseconds left before expiry, or `None` if the entry never expires.
    /// Saturates at zero for entries the reaper has not collected yet.
    pub fn remaining_ms(&self, now: u64) -> Option<u64> {
        self.expire_at.map(|at| at.saturating_sub(now))
    }
}

/// Key → [`Entry`] map with a dirty flag for the snapshot writer.
#[derive(Debug, Default)]
pub struct Keyspace {
    entries: BTreeMap<Bytes, Entry>,
    dirty: bool,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a fresh keyspace in the shared handle.
    pub fn shared() -> SharedKeyspace {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Looks up an entry without checking its expiry.
    pub fn get(&self, key: &[u8]) -> Option<&Entry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts or replaces an entry.
    pub fn set(&mut self, key: Bytes, entry: Entry) {
        self.entries.insert(key, entry);
        self.dirty = true;
    }

    /// Removes a key, returning whether it was present.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.dirty = true;
        }
        removed
    }

    /// Sets an absolute expiry on an existing key.
    ///
    /// Returns `false`, leaving the keyspace untouched, when the key is absent.
    pub fn set_expiry(&mut self, key: &[u8], expire_at: u64) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.expire_at = Some(expire_at);
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.dirty = true;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, &Entry)> {
        self.entries.iter()
    }

    /// Snapshot of the keys matching `pattern` (all keys for `None`).
    pub fn keys(&self, pattern: Option<&GlobPattern>) -> Vec<Bytes> {
        self.entries
            .keys()
            .filter(|key| pattern.map_or(true, |p| p.matches(key)))
            .cloned()
            .collect()
    }

    /// Removes every entry whose expiry is strictly before `now` and returns
    /// the removed keys.
    pub fn remove_expired(&mut self, now: u64) -> Vec<Bytes> {
        let expired: Vec<Bytes> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.entries.remove(key);
        }
        if !expired.is_empty() {
            self.dirty = true;
        }
        expired
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Clears the dirty flag, returning its previous value.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}
