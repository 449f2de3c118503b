//! Time-expiring domain record cache.
//!
//! [`ResolutionCache`] owns only the staleness policy; storage is a pluggable
//! [`RecordStore`]. Records are written on success only and a write never replaces a
//! fresher record, so concurrent resolutions of the same name converge on the newest
//! answer.

use chrono::{DateTime, Duration, Utc};
use eyre::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use crate::models::chain::Chain;
use crate::models::domain_record::{DomainKey, DomainRecord, ResolvedValue};

pub trait RecordStore: Send + Sync {
    fn load(&self, key: &DomainKey) -> Option<DomainRecord>;

    /// Stores `record` unless an existing record for the same key is fresher.
    /// Returns whether the record was written.
    fn save_if_newer(&self, record: DomainRecord) -> bool;
}

#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<DomainKey, DomainRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn load(&self, key: &DomainKey) -> Option<DomainRecord> {
        self.records.read().ok()?.get(key).cloned()
    }

    fn save_if_newer(&self, record: DomainRecord) -> bool {
        let Ok(mut records) = self.records.write() else {
            return false;
        };
        if records
            .get(&record.key)
            .is_some_and(|existing| existing.fetched_at > record.fetched_at)
        {
            return false;
        }
        records.insert(record.key.clone(), record);
        true
    }
}

/// Content-addressed on-disk store (cacache), one namespace per resolution kind.
pub struct DiskRecordStore {
    dir: PathBuf,
    namespace: String,
    // serialises read-compare-write within this process
    write_lock: Mutex<()>,
}

impl DiskRecordStore {
    pub fn new(dir: impl AsRef<Path>, namespace: &str) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            namespace: namespace.to_string(),
            write_lock: Mutex::new(()),
        }
    }

    fn cache_key(&self, key: &DomainKey) -> String {
        format!("{}:{}:{}", self.namespace, key.chain, key.query)
    }

    fn read(&self, key: &DomainKey) -> Result<Option<DomainRecord>> {
        match cacache::read_sync(&self.dir, self.cache_key(key)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(cacache::Error::EntryNotFound(_, _)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, record: &DomainRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        cacache::write_sync(&self.dir, self.cache_key(&record.key), bytes)?;
        Ok(())
    }
}

impl RecordStore for DiskRecordStore {
    fn load(&self, key: &DomainKey) -> Option<DomainRecord> {
        match self.read(key) {
            Ok(record) => record,
            Err(e) => {
                log::warn!(
                    "resolution::cache: failed to read {} from disk: {e}",
                    self.cache_key(key)
                );
                None
            }
        }
    }

    fn save_if_newer(&self, record: DomainRecord) -> bool {
        let Ok(_guard) = self.write_lock.lock() else {
            return false;
        };
        if self
            .load(&record.key)
            .is_some_and(|existing| existing.fetched_at > record.fetched_at)
        {
            return false;
        }
        match self.write(&record) {
            Ok(()) => true,
            Err(e) => {
                log::warn!(
                    "resolution::cache: failed to write {} to disk: {e}",
                    self.cache_key(&record.key)
                );
                false
            }
        }
    }
}

/// Staleness policy over a [`RecordStore`].
#[derive(Clone)]
pub struct ResolutionCache {
    store: Arc<dyn RecordStore>,
    expiration: Duration,
}

impl ResolutionCache {
    pub fn new(store: Arc<dyn RecordStore>, expiration: Duration) -> Self {
        Self { store, expiration }
    }

    pub fn in_memory(expiration: Duration) -> Self {
        Self::new(Arc::new(MemoryRecordStore::new()), expiration)
    }

    /// Returns the cached value, or `None` if absent or expired.
    pub fn get(&self, query: &str, chain: Chain) -> Option<ResolvedValue> {
        self.get_at(query, chain, Utc::now())
    }

    pub fn get_at(&self, query: &str, chain: Chain, now: DateTime<Utc>) -> Option<ResolvedValue> {
        let record = self.store.load(&DomainKey::new(query, chain))?;
        if record.is_expired(now, self.expiration) {
            log::debug!("resolution::cache: {query} on chain {chain} expired");
            return None;
        }
        Some(record.value)
    }

    /// Records a successful resolution made now.
    pub fn put(&self, query: &str, chain: Chain, value: ResolvedValue) -> bool {
        self.put_record(DomainRecord::new(DomainKey::new(query, chain), value))
    }

    pub fn put_record(&self, record: DomainRecord) -> bool {
        self.store.save_if_newer(record)
    }
}
