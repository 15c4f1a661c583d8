//! In-process cache with absolute and sliding expiry.

use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::time::Instant;

/// Lifetime of an entry from the moment it is written.
pub const DEFAULT_ABSOLUTE_TTL: Duration = Duration::from_secs(30 * 60);
/// Idle lifetime, renewed on every hit.
pub const DEFAULT_SLIDING_TTL: Duration = Duration::from_secs(10 * 60);

/// Expiry settings applied when `set` is called without explicit TTLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Hard lifetime.
    pub absolute: Duration,
    /// Idle lifetime.
    pub sliding: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            absolute: DEFAULT_ABSOLUTE_TTL,
            sliding: DEFAULT_SLIDING_TTL,
        }
    }
}

struct CacheEntry<V> {
    value: V,
    absolute_expiry: Instant,
    sliding: Duration,
    sliding_expiry: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.absolute_expiry || now >= self.sliding_expiry
    }
}

/// Thread-safe key/value cache shared by cloning.
///
/// An entry is gone as soon as either of its clocks lapses. Expired entries
/// are dropped lazily on access or by [`TieredCache::purge_expired`].
pub struct TieredCache<V> {
    inner: Arc<Mutex<Inner<V>>>,
}

struct Inner<V> {
    policy: CachePolicy,
    entries: HashMap<String, CacheEntry<V>>,
}

impl<V> Clone for TieredCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone> Default for TieredCache<V> {
    fn default() -> Self {
        Self::new(CachePolicy::default())
    }
}

impl<V: Clone> TieredCache<V> {
    /// Empty cache using `policy` for entries set without explicit TTLs.
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                policy,
                entries: HashMap::new(),
            })),
        }
    }

    /// Default expiry settings.
    pub fn policy(&self) -> CachePolicy {
        self.inner.lock().policy
    }

    /// Look up `key`, renewing its sliding expiry on a hit.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        match inner.entries.get_mut(key) {
            None => return None,
            Some(entry) if !entry.is_expired(now) => {
                entry.sliding_expiry = now + entry.sliding;
                return Some(entry.value.clone());
            }
            Some(_) => {}
        }
        inner.entries.remove(key);
        None
    }

    /// Insert with the default policy.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with(key, value, None, None);
    }

    /// Insert with optional per-entry TTLs, falling back to the policy.
    pub fn set_with(
        &self,
        key: impl Into<String>,
        value: V,
        absolute: Option<Duration>,
        sliding: Option<Duration>,
    ) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let absolute = absolute.unwrap_or(inner.policy.absolute);
        let sliding = sliding.unwrap_or(inner.policy.sliding);
        inner.entries.insert(
            key.into(),
            CacheEntry {
                value,
                absolute_expiry: now + absolute,
                sliding,
                sliding_expiry: now + sliding,
            },
        );
    }

    /// Drop `key`; returns whether a live entry was present.
    pub fn remove(&self, key: &str) -> bool {
        let now = Instant::now();
        self.inner
            .lock()
            .entries
            .remove(key)
            .map(|entry| !entry.is_expired(now))
            .unwrap_or(false)
    }

    /// Evict everything.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        before - inner.entries.len()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .lock()
            .entries
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    /// True when no live entry is held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn sliding_expiry_renews_on_access() {
        let cache = TieredCache::default();
        cache.set("offer:june-2023", 1);

        advance(Duration::from_secs(9 * 60)).await;
        assert_eq!(cache.get("offer:june-2023"), Some(1));

        // Idle for 9 more minutes: still alive because the hit renewed it.
        advance(Duration::from_secs(9 * 60)).await;
        assert_eq!(cache.get("offer:june-2023"), Some(1));

        advance(Duration::from_secs(10 * 60)).await;
        assert_eq!(cache.get("offer:june-2023"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn absolute_expiry_wins_over_sliding_renewal() {
        let cache = TieredCache::default();
        cache.set_with("2024", "partition", Some(Duration::from_secs(60)), None);

        for _ in 0..5 {
            advance(Duration::from_secs(10)).await;
            assert_eq!(cache.get("2024"), Some("partition"));
        }
        advance(Duration::from_secs(10)).await;
        assert_eq!(cache.get("2024"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired_entries() {
        let cache = TieredCache::new(CachePolicy {
            absolute: Duration::from_secs(30),
            sliding: Duration::from_secs(30),
        });
        cache.set("short", 1);
        cache.set_with("long", 2, Some(Duration::from_secs(120)), Some(Duration::from_secs(120)));

        advance(Duration::from_secs(31)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("long"), Some(2));
    }

    #[test]
    fn remove_and_clear_are_exact() {
        let cache = TieredCache::default();
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("c", 3);

        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        assert_eq!(cache.len(), 2);

        let shared = cache.clone();
        shared.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get("b"), None);
    }
}
