//! Generic TTL-bounded cache shared by the IP cache and DNS domain cache.
//!
//! A value inserted with `ttl_secs == 0` never expires on its own; it is
//! only swept by the periodic cleanup once it has gone unused for
//! `evict_time`.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

struct Entry<T> {
    value: T,
    expiration: i64,
    last_used: i64,
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// A single-shard TTL cache guarded by a mutex.
pub struct TimeCache<T: Clone> {
    items: Mutex<HashMap<String, Entry<T>>>,
    evict_time: Duration,
}

impl<T: Clone> TimeCache<T> {
    pub fn new(evict_time: Duration) -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            evict_time,
        }
    }

    /// Insert a value, expiring after `ttl_secs` seconds. A `ttl_secs` of
    /// zero means the entry has no absolute expiration and is only
    /// reclaimed by [`Self::clear_expired`] once stale.
    pub fn insert(&self, key: &str, value: T, ttl_secs: i64) {
        let expiration = if ttl_secs == 0 { 0 } else { now_secs() + ttl_secs };
        let mut items = self.items.lock();
        items.insert(
            key.to_string(),
            Entry {
                value,
                expiration,
                last_used: now_secs(),
            },
        );
    }

    /// Look up a value. An entry whose absolute expiration has passed is
    /// evicted immediately and reported as a miss.
    pub fn lookup(&self, key: &str) -> Option<T> {
        let now = now_secs();
        let mut items = self.items.lock();
        match items.get_mut(key) {
            Some(entry) if entry.expiration > 0 && entry.expiration < now => {
                items.remove(key);
                None
            }
            Some(entry) => {
                entry.last_used = now;
                Some(entry.value.clone())
            }
            None => None,
        }
    }

    /// Sweep entries that are both expired and unused for longer than
    /// `evict_time`. Matches the eviction rule used by the periodic
    /// cleanup: an entry with no absolute expiration is kept alive
    /// indefinitely as long as it is still being looked up.
    pub fn clear_expired(&self) {
        let now = now_secs();
        let evict_secs = self.evict_time.as_secs() as i64;
        let mut items = self.items.lock();
        items.retain(|_, entry| !(entry.expiration < now && entry.last_used + evict_secs < now));
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let cache: TimeCache<u32> = TimeCache::new(Duration::from_secs(600));
        cache.insert("a", 42, 0);
        assert_eq!(cache.lookup("a"), Some(42));
        assert_eq!(cache.lookup("b"), None);
    }

    #[test]
    fn test_expired_entry_removed_on_lookup() {
        let cache: TimeCache<u32> = TimeCache::new(Duration::from_secs(600));
        cache.insert("a", 1, -5);
        assert_eq!(cache.lookup("a"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_zero_ttl_never_expires_on_lookup() {
        let cache: TimeCache<u32> = TimeCache::new(Duration::from_secs(600));
        cache.insert("a", 7, 0);
        assert_eq!(cache.lookup("a"), Some(7));
        assert_eq!(cache.len(), 1);
    }
}
