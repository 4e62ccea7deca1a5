//! TTL-scoped persistence for mapping records.
//!
//! The pipeline writes a mapping record before forwarding upstream and reads
//! it back on the response path, which may run long after the forward. The
//! store owns nothing beyond that window: records disappear on explicit
//! delete or when `created_at + ttl` passes, whichever comes first.
//!
//! `get` returning absent is a normal outcome, not an error. It happens
//! whenever a TTL expires during a slow upstream call; the pipeline then
//! responds with placeholders un-restored and logs a warning.
//!
//! Two backends share the interface: an in-process map with a low-frequency
//! janitor task, and (behind the `redis-store` feature) a Redis-backed
//! variant that delegates expiry to the backend.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::mapping::{MappingRecord, unix_now};

/// Failures surfaced by a store backend.
#[derive(Debug)]
pub enum StoreError {
    /// `put` was called with an id that already exists.
    Duplicate(String),
    /// The backend transport or serialization failed.
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate(id) => write!(f, "mapping id already exists: {id}"),
            Self::Backend(msg) => write!(f, "store backend failure: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Bidirectional mapping persistence, TTL-scoped.
#[async_trait]
pub trait MappingStore: Send + Sync + 'static {
    /// Atomically creates a record. Overwriting an existing id is an error.
    async fn put(&self, record: MappingRecord) -> Result<(), StoreError>;

    /// Fetches a record. Absent (including expired) is a normal outcome.
    async fn get(&self, id: &str) -> Result<Option<MappingRecord>, StoreError>;

    /// Removes a record. Idempotent.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Removes expired records, returning how many were dropped.
    async fn sweep(&self) -> Result<usize, StoreError>;
}

/// In-process store backed by a concurrent map.
#[derive(Default)]
pub struct MemoryMappingStore {
    records: DashMap<String, MappingRecord>,
    janitor_started: AtomicBool,
}

impl MemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Starts the background sweep once. The period should be at most one
    /// TTL so records never outlive two periods.
    pub fn spawn_janitor(self: &Arc<Self>, period: Duration) {
        if self.janitor_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period.max(Duration::from_secs(1)));
            loop {
                tick.tick().await;
                if let Ok(dropped) = store.sweep().await
                    && dropped > 0
                {
                    tracing::debug!(dropped, "swept expired mapping records");
                }
            }
        });
    }
}

#[async_trait]
impl MappingStore for MemoryMappingStore {
    async fn put(&self, record: MappingRecord) -> Result<(), StoreError> {
        match self.records.entry(record.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(StoreError::Duplicate(record.id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Option<MappingRecord>, StoreError> {
        let now = unix_now();
        match self.records.get(id) {
            Some(record) if record.is_expired(now) => {
                drop(record);
                self.records.remove(id);
                Ok(None)
            }
            Some(record) => Ok(Some(record.clone())),
            None => Ok(None),
        }
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let _ = self.records.remove(id);
        Ok(())
    }

    async fn sweep(&self) -> Result<usize, StoreError> {
        let now = unix_now();
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        Ok(before.saturating_sub(self.records.len()))
    }
}

/// Redis-backed store; expiry is delegated to the backend TTL.
#[cfg(feature = "redis-store")]
pub struct RedisMappingStore {
    conn: redis::aio::ConnectionManager,
}

#[cfg(feature = "redis-store")]
impl RedisMappingStore {
    const KEY_PREFIX: &'static str = "cloak:mapping:";

    /// Connects to the Redis backend.
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        tracing::info!("connected to redis mapping store");
        Ok(Self { conn })
    }

    fn key(id: &str) -> String {
        format!("{}{id}", Self::KEY_PREFIX)
    }
}

#[cfg(feature = "redis-store")]
#[async_trait]
impl MappingStore for RedisMappingStore {
    async fn put(&self, record: MappingRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(&record)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        // SET NX EX: atomic create with backend expiry.
        let mut conn = self.conn.clone();
        let created: Option<String> = redis::cmd("SET")
            .arg(Self::key(&record.id))
            .arg(json)
            .arg("NX")
            .arg("EX")
            .arg(record.ttl.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        match created {
            Some(_) => Ok(()),
            None => Err(StoreError::Duplicate(record.id)),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<MappingRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let json: Option<String> = redis::cmd("GET")
            .arg(Self::key(id))
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        match json {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| StoreError::Backend(e.to_string())),
            None => Ok(None),
        }
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(Self::key(id))
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn sweep(&self) -> Result<usize, StoreError> {
        // Backend TTL reclaims records.
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::Mapping;

    fn record(ttl_secs: u64) -> MappingRecord {
        let mapping = Mapping::new("default", Duration::from_secs(ttl_secs));
        mapping.intern("EMAIL", "a@example.com", |n| {
            crate::placeholder::format("EMAIL", n)
        });
        mapping.to_record()
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = MemoryMappingStore::new();
        let rec = record(300);
        let id = rec.id.clone();

        store.put(rec.clone()).await.unwrap();
        let fetched = store.get(&id).await.unwrap();
        assert_eq!(fetched, Some(rec));
    }

    #[tokio::test]
    async fn duplicate_put_is_an_error() {
        let store = MemoryMappingStore::new();
        let rec = record(300);

        store.put(rec.clone()).await.unwrap();
        let err = store.put(rec).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryMappingStore::new();
        let rec = record(300);
        let id = rec.id.clone();

        store.put(rec).await.unwrap();
        store.delete(&id).await.unwrap();
        store.delete(&id).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_records_read_as_absent() {
        let store = MemoryMappingStore::new();
        let rec = record(0);
        let id = rec.id.clone();

        store.put(rec).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn sweep_drops_only_expired_records() {
        let store = MemoryMappingStore::new();
        let expired = record(0);
        let live = record(300);
        let live_id = live.id.clone();

        store.put(expired).await.unwrap();
        store.put(live).await.unwrap();

        let dropped = store.sweep().await.unwrap();
        assert_eq!(dropped, 1);
        assert!(store.get(&live_id).await.unwrap().is_some());
        assert_eq!(store.len(), 1);
    }
}
