//! Per-recall result cache.
//!
//! Keys are scoped per configuration: a global cache keys on the recall
//! name alone, a per-user cache keys on name plus uid. Entries expire
//! after the configured TTL; when the capacity bound is hit the least
//! recently used live entry is evicted (approximate LRU: a full scan of
//! the table, acceptable at per-recall capacities).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{CacheScope, CacheSettings};
use crate::item::Item;

struct CacheEntry {
    items: Arc<Vec<Item>>,
    inserted_at: Instant,
    last_used: Instant,
}

/// TTL + capacity bounded cache of recall result lists.
pub struct RecallCache {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl RecallCache {
    pub fn new(settings: &CacheSettings) -> Self {
        Self {
            ttl: Duration::from_secs(settings.ttl_secs),
            capacity: settings.capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cache key for a request, per the configured scope.
    pub fn key_for(scope: CacheScope, recall_name: &str, uid: &str) -> String {
        match scope {
            CacheScope::Global => recall_name.to_string(),
            CacheScope::PerUser => format!("{recall_name}:{uid}"),
        }
    }

    /// Fetch a live entry, bumping its recency.
    pub fn get(&self, key: &str) -> Option<Arc<Vec<Item>>> {
        let mut entries = self.entries.lock();
        let expired = entries
            .get(key)
            .map(|e| e.inserted_at.elapsed() >= self.ttl)?;
        if expired {
            entries.remove(key);
            return None;
        }
        let entry = entries.get_mut(key)?;
        entry.last_used = Instant::now();
        Some(Arc::clone(&entry.items))
    }

    /// Insert a result list, evicting as needed.
    pub fn put(&self, key: impl Into<String>, items: Vec<Item>) {
        let key = key.into();
        let now = Instant::now();
        let mut entries = self.entries.lock();

        entries.retain(|_, e| e.inserted_at.elapsed() < self.ttl);

        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                items: Arc::new(items),
                inserted_at: now,
                last_used: now,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(ttl_secs: u64, capacity: usize) -> CacheSettings {
        CacheSettings {
            scope: CacheScope::Global,
            ttl_secs,
            capacity,
        }
    }

    fn items(n: usize) -> Vec<Item> {
        (0..n).map(|i| Item::new(format!("i{i}"), "item")).collect()
    }

    #[test]
    fn hit_within_ttl() {
        let cache = RecallCache::new(&settings(60, 8));
        cache.put("pop", items(3));
        let hit = cache.get("pop").unwrap();
        assert_eq!(hit.len(), 3);
        assert!(cache.get("other").is_none());
    }

    #[test]
    fn expired_entries_miss() {
        let cache = RecallCache::new(&settings(0, 8));
        cache.put("pop", items(3));
        assert!(cache.get("pop").is_none());
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let cache = RecallCache::new(&settings(60, 2));
        cache.put("a", items(1));
        cache.put("b", items(1));
        // Touch "a" so "b" becomes the eviction candidate.
        cache.get("a");
        cache.put("c", items(1));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn scoped_keys() {
        assert_eq!(RecallCache::key_for(CacheScope::Global, "pop", "u1"), "pop");
        assert_eq!(
            RecallCache::key_for(CacheScope::PerUser, "cf", "u1"),
            "cf:u1"
        );
    }
}
