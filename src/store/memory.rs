//! In-process fixed-window counters.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{CounterStore, StoreError};

#[derive(Debug, Clone, Copy)]
struct Record {
    count: u64,
    expires_at: Option<Instant>,
}

impl Record {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Counters held in a mutex-guarded map. Expired records are reset lazily on
/// their next use, or dropped in bulk by [`MemoryStore::purge_expired`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Record>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired record, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now));
        before - records.len()
    }

    /// Number of tracked keys, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut records = self.records.lock();
        let record = records.entry(key.to_owned()).or_insert(Record {
            count: 0,
            expires_at: None,
        });
        if record.is_expired(now) {
            *record = Record {
                count: 0,
                expires_at: None,
            };
        }
        record.count = record.count.saturating_add(1);
        Ok(record.count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        if let Some(record) = self.records.lock().get_mut(key) {
            record.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn has_expiry(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        Ok(self
            .records
            .lock()
            .get(key)
            .is_some_and(|record| record.expires_at.is_some() && !record.is_expired(now)))
    }
}
