//! Keyed storage of sealed entries.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::time::Instant;
use tracing::error;
use uuid::Uuid;

use crate::crypto::Sealed;
use crate::error::{CacheError, Result};

pub type EntryId = Uuid;

#[derive(Debug, Clone)]
pub struct Entry {
    pub id: EntryId,
    pub sealed: Sealed,
    /// Monotonic creation time; the only input to expiry.
    pub created_at: Instant,
    /// Wall-clock creation time, reporting only.
    pub created_wall: DateTime<Utc>,
}

impl Entry {
    pub fn new(id: EntryId, sealed: Sealed) -> Self {
        Self {
            id,
            sealed,
            created_at: Instant::now(),
            created_wall: Utc::now(),
        }
    }
}

/// What the sweeper needs to decide expiry, without copying ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySummary {
    pub id: EntryId,
    pub created_at: Instant,
}

pub trait EntryStore: Send + Sync {
    /// Insert under `entry.id`. An existing id is an invariant violation.
    fn put(&self, entry: Entry) -> Result<()>;

    fn get(&self, id: &EntryId) -> Option<Entry>;

    /// Remove `id` if present. Returns whether anything was removed.
    fn delete(&self, id: &EntryId) -> Result<bool>;

    /// Point-in-time snapshot; holds no lock once returned.
    fn scan(&self) -> Vec<EntrySummary>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<EntryId, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntryStore for MemoryStore {
    fn put(&self, entry: Entry) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(&entry.id) {
            error!(id = %entry.id, "duplicate entry id on insert");
            return Err(CacheError::InvariantViolation(format!(
                "entry {} already exists",
                entry.id
            )));
        }
        entries.insert(entry.id, entry);
        Ok(())
    }

    fn get(&self, id: &EntryId) -> Option<Entry> {
        self.entries.read().get(id).cloned()
    }

    fn delete(&self, id: &EntryId) -> Result<bool> {
        Ok(self.entries.write().remove(id).is_some())
    }

    fn scan(&self) -> Vec<EntrySummary> {
        self.entries
            .read()
            .values()
            .map(|e| EntrySummary {
                id: e.id,
                created_at: e.created_at,
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}
