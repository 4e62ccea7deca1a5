//! Bounded response cache keyed by sanitized request content.
//!
//! Cache keys hash the *anonymized* request body together with the model and
//! tenant, so two callers whose sanitized content is identical share a hit
//! even though their raw prompts differ. Bodies are stored in sanitized form
//! and restored through the current request's mapping on every hit.
//!
//! Insertion is an atomic check-and-insert (first writer wins); eviction is
//! opportunistic: expired entries go first, then the oldest, whenever an
//! insert finds the cache full.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::strategy::sha1_hex;

struct CacheEntry {
    /// Sanitized (placeholder-form) response body.
    body: Arc<String>,
    created_at: Instant,
    hits: AtomicU64,
}

/// Bounded LRU-ish cache of sanitized upstream responses.
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    max_entries: usize,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            ttl,
        }
    }

    /// Derives the cache key from the sanitized request.
    pub fn key(tenant: &str, model: &str, anonymized_body: &str) -> String {
        sha1_hex(format!("{tenant}\u{1f}{model}\u{1f}{anonymized_body}").as_bytes())
    }

    /// Fetches a live entry, counting the hit.
    pub fn get(&self, key: &str) -> Option<Arc<String>> {
        match self.entries.get(key) {
            Some(entry) if entry.created_at.elapsed() >= self.ttl => {
                drop(entry);
                self.entries.remove(key);
                None
            }
            Some(entry) => {
                entry.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.body.clone())
            }
            None => None,
        }
    }

    /// Stores a sanitized body under the key unless one is already present.
    pub fn insert(&self, key: String, body: String) {
        if self.entries.len() >= self.max_entries {
            self.evict();
        }

        if let dashmap::mapref::entry::Entry::Vacant(slot) = self.entries.entry(key) {
            slot.insert(CacheEntry {
                body: Arc::new(body),
                created_at: Instant::now(),
                hits: AtomicU64::new(0),
            });
        }
    }

    /// Total hits recorded for a key, for observability.
    pub fn hits(&self, key: &str) -> u64 {
        self.entries
            .get(key)
            .map(|e| e.hits.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops expired entries, then the oldest until back under the bound.
    fn evict(&self) {
        self.entries
            .retain(|_, entry| entry.created_at.elapsed() < self.ttl);

        while self.entries.len() >= self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.created_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}
