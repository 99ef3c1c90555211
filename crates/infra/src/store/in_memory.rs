//! In-memory stores for tests/dev.
//!
//! Besides the plain map semantics these expose a few knobs the worker tests
//! need: a per-key lookup delay on the catalog, injectable failures, and the
//! order in which result writes happened.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use hhrec_core::{CatalogRecord, HouseholdKey, RequestLogEntry, ResultRecord};

use super::{CatalogStore, RequestLog, ResultStore, StoreError};

fn poisoned() -> StoreError {
    StoreError::Unavailable("in-memory store lock poisoned".to_string())
}

/// In-memory catalog.
#[derive(Debug, Default)]
pub struct InMemoryCatalogStore {
    records: RwLock<HashMap<HouseholdKey, CatalogRecord>>,
    delays: RwLock<HashMap<HouseholdKey, Duration>>,
    failing: RwLock<HashSet<HouseholdKey>>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = CatalogRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.insert(record);
        }
        store
    }

    pub fn insert(&self, record: CatalogRecord) {
        if let Ok(mut map) = self.records.write() {
            map.insert(record.household_key, record);
        }
    }

    /// Make every lookup of `household_key` take at least `delay`.
    pub fn set_lookup_delay(&self, household_key: HouseholdKey, delay: Duration) {
        if let Ok(mut delays) = self.delays.write() {
            delays.insert(household_key, delay);
        }
    }

    /// Make lookups of `household_key` fail (or succeed again).
    pub fn set_failing(&self, household_key: HouseholdKey, failing: bool) {
        if let Ok(mut set) = self.failing.write() {
            if failing {
                set.insert(household_key);
            } else {
                set.remove(&household_key);
            }
        }
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn get(&self, household_key: HouseholdKey) -> Result<Option<CatalogRecord>, StoreError> {
        let delay = self
            .delays
            .read()
            .map_err(|_| poisoned())?
            .get(&household_key)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.read().map_err(|_| poisoned())?.contains(&household_key) {
            return Err(StoreError::Unavailable(format!(
                "catalog lookup for {household_key} failed"
            )));
        }

        let map = self.records.read().map_err(|_| poisoned())?;
        Ok(map.get(&household_key).cloned())
    }
}

/// In-memory result store.
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    records: RwLock<HashMap<HouseholdKey, ResultRecord>>,
    writes: Mutex<Vec<HouseholdKey>>,
    failures_left: AtomicU32,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` upserts. `u32::MAX` fails them all.
    pub fn fail_next_writes(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Keys of successful upserts, in the order they happened.
    pub fn write_log(&self) -> Vec<HouseholdKey> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                u32::MAX => Some(u32::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn upsert(&self, record: &ResultRecord) -> Result<(), StoreError> {
        if self.take_failure() {
            return Err(StoreError::Unavailable(format!(
                "result write for {} failed",
                record.household_key
            )));
        }

        let mut map = self.records.write().map_err(|_| poisoned())?;
        map.insert(record.household_key, record.clone());
        drop(map);

        if let Ok(mut writes) = self.writes.lock() {
            writes.push(record.household_key);
        }
        Ok(())
    }

    async fn get(&self, household_key: HouseholdKey) -> Result<Option<ResultRecord>, StoreError> {
        let map = self.records.read().map_err(|_| poisoned())?;
        Ok(map.get(&household_key).cloned())
    }
}

/// In-memory request log.
#[derive(Debug, Default)]
pub struct InMemoryRequestLog {
    entries: RwLock<Vec<RequestLogEntry>>,
}

impl InMemoryRequestLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestLog for InMemoryRequestLog {
    async fn append(&self, entry: &RequestLogEntry) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.push(entry.clone());
        Ok(())
    }

    async fn recent(&self, requester: &str, limit: usize) -> Result<Vec<RequestLogEntry>, StoreError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        let mut mine: Vec<RequestLogEntry> = entries
            .iter()
            .filter(|e| e.requester == requester)
            .cloned()
            .collect();
        // Stable sort: entries with equal timestamps keep append order, newest append first.
        mine.reverse();
        mine.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        mine.truncate(limit);
        Ok(mine)
    }
}
