//! TTL cache for database snapshots.
//!
//! An explicit object passed by handle into the pipeline, keyed by connection
//! identity, so tests inject a fresh cache per case instead of sharing
//! process state. Concurrent misses for the same key are not de-duplicated:
//! each caller runs its own scan and the last writer wins, which is
//! acceptable because scans are read-only and idempotent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::DatabaseSnapshot;

struct CacheEntry {
    snapshot: Arc<DatabaseSnapshot>,
    stored_at: Instant,
}

pub struct SchemaCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl SchemaCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Unexpired snapshot for a connection identity, if any.
    pub fn get(&self, key: &str) -> Option<Arc<DatabaseSnapshot>> {
        let entries = self.entries.lock().expect("schema cache poisoned");
        entries.get(key).and_then(|entry| {
            if entry.stored_at.elapsed() < self.ttl {
                Some(Arc::clone(&entry.snapshot))
            } else {
                None
            }
        })
    }

    /// Replaces the entry for a connection identity wholesale.
    pub fn put(&self, key: &str, snapshot: Arc<DatabaseSnapshot>) {
        let mut entries = self.entries.lock().expect("schema cache poisoned");
        entries.insert(
            key.to_string(),
            CacheEntry {
                snapshot,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.entries.lock().expect("schema cache poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(db: &str) -> Arc<DatabaseSnapshot> {
        Arc::new(DatabaseSnapshot {
            database: db.to_string(),
            collections: vec![],
            scanned_at: Utc::now(),
            total_documents: 0,
        })
    }

    #[test]
    fn hit_within_ttl_returns_the_identical_snapshot() {
        let cache = SchemaCache::new(Duration::from_secs(300));
        let snap = snapshot("shop");
        cache.put("k", Arc::clone(&snap));
        let hit = cache.get("k").unwrap();
        assert!(Arc::ptr_eq(&hit, &snap));
    }

    #[test]
    fn expired_entries_miss() {
        let cache = SchemaCache::new(Duration::from_millis(0));
        cache.put("k", snapshot("shop"));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn clear_drops_everything() {
        let cache = SchemaCache::new(Duration::from_secs(300));
        cache.put("a", snapshot("one"));
        cache.put("b", snapshot("two"));
        cache.clear();
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_none());
    }
}
