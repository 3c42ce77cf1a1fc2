//! In-process TTL cache
//!
//! Provides:
//! - A size-bounded map whose entries expire after a fixed window
//! - An injectable [`Clock`] so expiry can be driven from tests
//! - Get-or-compute with fallible async loaders
//!
//! Used to hold the shared storage context between bursts of requests.
//! It is a latency optimization only: a TTL of zero disables it entirely.

use crate::errors::Result;
use crate::metrics;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Source of the current instant
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Size-bounded cache with per-entry expiry
pub struct TtlCache<K, V> {
    name: &'static str,
    capacity: usize,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<K, Entry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache on the system clock
    pub fn new(name: &'static str, capacity: usize, ttl: Duration) -> Self {
        Self::with_clock(name, capacity, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(
        name: &'static str,
        capacity: usize,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name,
            capacity,
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Whether entries are retained at all
    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero() && self.capacity > 0
    }

    /// Get a live entry
    pub fn get(&self, key: &K) -> Option<V> {
        if !self.is_enabled() {
            return None;
        }

        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert or replace an entry, evicting to stay within capacity
    pub fn insert(&self, key: K, value: V) {
        if !self.is_enabled() {
            return;
        }

        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            entries.retain(|_, entry| entry.expires_at > now);

            if entries.len() >= self.capacity {
                // Evict whichever entry would have expired first
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key,
            Entry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Drop an entry
    pub fn invalidate(&self, key: &K) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached value or compute, store and return a fresh one.
    ///
    /// The lock is not held while the loader runs, so two callers that miss
    /// at the same time may both compute; the later insert wins.
    pub async fn get_or_try_insert_with<F, Fut>(&self, key: K, loader: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V>>,
    {
        if let Some(hit) = self.get(&key) {
            debug!(cache = self.name, "Cache hit");
            metrics::record_cache(self.name, true);
            return Ok(hit);
        }

        debug!(cache = self.name, "Cache miss");
        metrics::record_cache(self.name, false);

        let value = loader().await?;
        self.insert(key, value.clone());
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache(capacity: usize, ttl_secs: u64) -> (TtlCache<String, u32>, ManualClock) {
        let clock = ManualClock::new();
        let cache = TtlCache::with_clock(
            "test",
            capacity,
            Duration::from_secs(ttl_secs),
            Arc::new(clock.clone()),
        );
        (cache, clock)
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let (cache, clock) = cache(10, 300);
        cache.insert("ctx".into(), 1);

        clock.advance(Duration::from_secs(299));
        assert_eq!(cache.get(&"ctx".to_string()), Some(1));

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get(&"ctx".to_string()), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_earliest_expiry() {
        let (cache, clock) = cache(2, 300);
        cache.insert("a".into(), 1);
        clock.advance(Duration::from_secs(10));
        cache.insert("b".into(), 2);
        clock.advance(Duration::from_secs(10));
        cache.insert("c".into(), 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a".to_string()), None);
        assert_eq!(cache.get(&"b".to_string()), Some(2));
        assert_eq!(cache.get(&"c".to_string()), Some(3));
    }

    #[test]
    fn test_zero_ttl_disables_cache() {
        let (cache, _clock) = cache(10, 0);
        assert!(!cache.is_enabled());
        cache.insert("ctx".into(), 1);
        assert_eq!(cache.get(&"ctx".to_string()), None);
    }

    #[tokio::test]
    async fn test_get_or_insert_recomputes_after_expiry() {
        let (cache, clock) = cache(10, 60);
        let loads = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_try_insert_with("ctx".to_string(), || async {
                    Ok(loads.fetch_add(1, Ordering::SeqCst) as u32)
                })
                .await
                .unwrap();
            assert_eq!(value, 0);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(61));
        let value = cache
            .get_or_try_insert_with("ctx".to_string(), || async {
                Ok(loads.fetch_add(1, Ordering::SeqCst) as u32)
            })
            .await
            .unwrap();
        assert_eq!(value, 1);
    }

    #[tokio::test]
    async fn test_loader_error_is_not_cached() {
        let (cache, _clock) = cache(10, 60);
        let result = cache
            .get_or_try_insert_with("ctx".to_string(), || async {
                Err(crate::AppError::Internal {
                    message: "boom".into(),
                })
            })
            .await;
        assert!(result.is_err());
        assert!(cache.is_empty());
    }
}
