//! Per-request bidirectional mapping between wire values and originals.
//!
//! A `Mapping` is owned by a single request lifetime. It assigns dense,
//! per-entity-type numbers to reversible replacements, keeps both directions
//! of the association, and snapshots into a serializable [`MappingRecord`]
//! that the store persists under the request's cryptographically random id.
//!
//! Behavior:
//! - Insertion is idempotent: the same `(entity_type, original)` pair always
//!   yields the wire value allocated on first sight.
//! - Numbers are dense per entity type: if `<EMAIL_3>` exists, `<EMAIL_1>`
//!   and `<EMAIL_2>` exist. Allocation and insertion happen under one lock,
//!   so concurrent detector spans cannot create gaps.
//! - Contents are append-only until the mapping is destroyed.
//! - The hash strategy records its digests in a shadow index serialized under
//!   the same record.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One reversible association held by a mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    /// The detected original text.
    pub original: String,
    /// Uppercase entity type the detector reported.
    pub entity_type: String,
}

#[derive(Debug, Default)]
struct MappingInner {
    /// Wire value (placeholder or synthetic) to original.
    entries: BTreeMap<String, MappingEntry>,
    /// `(entity_type, original)` back to the wire value allocated for it.
    reverse: HashMap<(String, String), String>,
    /// Hash-strategy shadow index: hex digest to original.
    digests: BTreeMap<String, MappingEntry>,
    /// Next placeholder number per entity type, starting at 1.
    counters: HashMap<String, u32>,
}

/// Request-scoped container of reversible substitutions.
pub struct Mapping {
    id: String,
    tenant: String,
    created_at: u64,
    ttl: Duration,
    inner: Mutex<MappingInner>,
}

impl Mapping {
    /// Creates an empty mapping for one request.
    pub fn new(tenant: &str, ttl: Duration) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            tenant: tenant.to_string(),
            created_at: unix_now(),
            ttl,
            inner: Mutex::new(MappingInner::default()),
        }
    }

    /// The mapping's random identifier, used as the store key.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Returns the wire value for `(entity_type, original)`, allocating one
    /// with the next dense number on first sight.
    ///
    /// `make_wire` receives the allocated number; the placeholder strategy
    /// passes the canonical `<TYPE_N>` formatter, the synthetic strategy a
    /// fake-value generator. Allocation and insertion are atomic under the
    /// mapping lock.
    pub fn intern<F>(&self, entity_type: &str, original: &str, make_wire: F) -> String
    where
        F: FnOnce(u32) -> String,
    {
        let mut inner = self.inner.lock();

        let key = (entity_type.to_string(), original.to_string());
        if let Some(existing) = inner.reverse.get(&key) {
            return existing.clone();
        }

        let n = {
            let counter = inner.counters.entry(entity_type.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };
        let wire = make_wire(n);

        inner.entries.insert(
            wire.clone(),
            MappingEntry {
                original: original.to_string(),
                entity_type: entity_type.to_string(),
            },
        );
        inner.reverse.insert(key, wire.clone());
        wire
    }

    /// Records a hash-strategy digest in the shadow index. Idempotent.
    pub fn insert_digest(&self, digest: &str, entity_type: &str, original: &str) {
        let mut inner = self.inner.lock();
        inner
            .digests
            .entry(digest.to_string())
            .or_insert_with(|| MappingEntry {
                original: original.to_string(),
                entity_type: entity_type.to_string(),
            });
    }

    /// Number of reversible entries (shadow digests excluded).
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.entries.is_empty() && inner.digests.is_empty()
    }

    /// Snapshots the mapping into its serializable store form.
    pub fn to_record(&self) -> MappingRecord {
        let inner = self.inner.lock();
        MappingRecord {
            id: self.id.clone(),
            tenant: self.tenant.clone(),
            created_at: self.created_at,
            ttl: self.ttl.as_secs(),
            entries: inner.entries.clone(),
            digests: inner.digests.clone(),
        }
    }
}

/// Serializable snapshot persisted by the mapping store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRecord {
    pub id: String,
    pub tenant: String,
    /// Creation time as unix seconds.
    pub created_at: u64,
    /// Lifetime in seconds from `created_at`.
    pub ttl: u64,
    /// Wire value (placeholder or synthetic) to original.
    pub entries: BTreeMap<String, MappingEntry>,
    /// Hash-strategy shadow index.
    pub digests: BTreeMap<String, MappingEntry>,
}

impl MappingRecord {
    /// Whether `created_at + ttl` has passed.
    pub fn is_expired(&self, now_unix: u64) -> bool {
        now_unix >= self.created_at.saturating_add(self.ttl)
    }

    /// Looks up a wire value across both indices.
    pub fn original_for(&self, wire: &str) -> Option<&MappingEntry> {
        self.entries.get(wire).or_else(|| self.digests.get(wire))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.digests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Current time as unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placeholder;

    fn placeholder_wire(ty: &'static str) -> impl Fn(u32) -> String {
        move |n| placeholder::format(ty, n)
    }

    #[test]
    fn repeated_values_collapse_to_one_wire_value() {
        let mapping = Mapping::new("default", Duration::from_secs(300));

        let a = mapping.intern("PERSON", "Alice", placeholder_wire("PERSON"));
        let b = mapping.intern("PERSON", "Alice", placeholder_wire("PERSON"));

        assert_eq!(a, "<PERSON_1>");
        assert_eq!(a, b);
        assert_eq!(mapping.len(), 1);
    }

    #[test]
    fn numbers_are_dense_per_entity_type() {
        let mapping = Mapping::new("default", Duration::from_secs(300));

        mapping.intern("EMAIL", "a@example.com", placeholder_wire("EMAIL"));
        mapping.intern("PERSON", "Alice", placeholder_wire("PERSON"));
        mapping.intern("EMAIL", "b@example.com", placeholder_wire("EMAIL"));
        let third = mapping.intern("EMAIL", "c@example.com", placeholder_wire("EMAIL"));

        assert_eq!(third, "<EMAIL_3>");
        let record = mapping.to_record();
        assert!(record.entries.contains_key("<EMAIL_1>"));
        assert!(record.entries.contains_key("<EMAIL_2>"));
        assert!(record.entries.contains_key("<PERSON_1>"));
    }

    #[test]
    fn distinct_originals_never_share_a_placeholder() {
        let mapping = Mapping::new("default", Duration::from_secs(300));

        let a = mapping.intern("PERSON", "Alice", placeholder_wire("PERSON"));
        let b = mapping.intern("PERSON", "Bob", placeholder_wire("PERSON"));

        assert_ne!(a, b);
        let record = mapping.to_record();
        assert_eq!(record.entries[&a].original, "Alice");
        assert_eq!(record.entries[&b].original, "Bob");
    }

    #[test]
    fn record_serializes_keyed_by_placeholder() {
        let mapping = Mapping::new("tenant-a", Duration::from_secs(60));
        mapping.intern("EMAIL", "a@example.com", placeholder_wire("EMAIL"));
        mapping.insert_digest("deadbeef", "PHONE", "555-0100");

        let record = mapping.to_record();
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["tenant"], "tenant-a");
        assert_eq!(json["ttl"], 60);
        assert_eq!(json["entries"]["<EMAIL_1>"]["original"], "a@example.com");
        assert_eq!(json["digests"]["deadbeef"]["entity_type"], "PHONE");

        let back: MappingRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn expiry_uses_created_at_plus_ttl() {
        let mapping = Mapping::new("default", Duration::from_secs(10));
        let record = mapping.to_record();

        assert!(!record.is_expired(record.created_at + 9));
        assert!(record.is_expired(record.created_at + 10));
    }

    #[test]
    fn concurrent_interning_stays_dense_and_unique() {
        use std::sync::Arc;

        let mapping = Arc::new(Mapping::new("default", Duration::from_secs(300)));
        let mut handles = Vec::new();
        for i in 0..8 {
            let mapping = mapping.clone();
            handles.push(std::thread::spawn(move || {
                for j in 0..50 {
                    let original = format!("user{}@example.com", (i * 50 + j) % 100);
                    mapping.intern("EMAIL", &original, |n| {
                        crate::placeholder::format("EMAIL", n)
                    });
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let record = mapping.to_record();
        assert_eq!(record.entries.len(), 100);
        for n in 1..=100u32 {
            assert!(record.entries.contains_key(&format!("<EMAIL_{n}>")));
        }
    }
}
