use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use log::debug;
use tokio::time::Instant;

/// Default time-to-live for cached upstream data (one hour)
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// A single cached value with its expiry
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Build a deterministic cache key from an operation kind and its arguments.
///
/// Arguments are trimmed and lowercased so that "Nora En Pure" and
/// " nora en pure" share one entry.
pub fn make_key(kind: &str, args: &[&str]) -> String {
    let mut key = kind.to_string();
    for arg in args {
        key.push_str("::");
        key.push_str(&arg.trim().to_lowercase());
    }
    key
}

/// In-memory key/value cache with per-entry expiry.
///
/// Expiry is lazy: an expired entry is evicted by the `get` that finds it,
/// there is no background sweep. There is no size bound either; the keyspace
/// is one entry per artist/track/playlist lookup.
///
/// Time is read from `tokio::time::Instant`, so tests running with a paused
/// runtime clock control expiry with `tokio::time::advance`.
pub struct TtlCache<V> {
    /// Name used in log output
    name: String,
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    /// One gate per key currently being fetched by `get_or_insert_with`
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    default_ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    /// Create a new cache using the default TTL of one hour
    pub fn new(name: &str) -> Self {
        Self::with_default_ttl(name, DEFAULT_TTL)
    }

    /// Create a new cache with a custom default TTL
    pub fn with_default_ttl(name: &str, default_ttl: Duration) -> Self {
        TtlCache {
            name: name.to_string(),
            entries: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            default_ttl,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Get a value; a missing or expired entry is a miss
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries();

        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                debug!("[{}] Removing expired cache entry: {}", self.name, key);
                entries.remove(key);
                None
            }
            Some(entry) => {
                debug!("[{}] Cache hit: {}", self.name, key);
                Some(entry.value.clone())
            }
            None => {
                debug!("[{}] Cache miss: {}", self.name, key);
                None
            }
        }
    }

    /// Store a value, overwriting any existing entry and resetting its expiry
    pub fn set(&self, key: &str, value: V, ttl: Duration) {
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries().insert(key.to_string(), entry);
        debug!("[{}] Stored key '{}' with ttl {:?}", self.name, key, ttl);
    }

    /// Store a value with the cache's default TTL
    pub fn set_default(&self, key: &str, value: V) {
        self.set(key, value, self.default_ttl);
    }

    /// Remove a single entry, returns true if something was removed
    pub fn remove(&self, key: &str) -> bool {
        self.entries().remove(key).is_some()
    }

    /// Remove all entries unconditionally
    pub fn clear(&self) {
        let mut entries = self.entries();
        let count = entries.len();
        entries.clear();
        debug!("[{}] Cleared {} entries", self.name, count);
    }

    /// Number of stored entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Evict every expired entry now. Never called automatically.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - entries.len();
        if removed > 0 {
            debug!("[{}] Purged {} expired entries", self.name, removed);
        }
        removed
    }

    /// Return the cached value for `key`, or run `fetch` and cache its result.
    ///
    /// Errors from `fetch` are returned as-is and never cached. Concurrent
    /// misses on the same key are coalesced: one caller fetches while the
    /// others wait, then read its result from the cache. If that fetch fails,
    /// the next waiter fetches on its own.
    pub async fn get_or_insert_with<F, Fut, E>(&self, key: &str, ttl: Duration, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let gate = self
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(key.to_string())
            .or_default()
            .clone();
        let inflight = InflightGuard {
            inflight: &self.inflight,
            key,
            gate,
        };

        let _fetching = inflight.gate.lock().await;
        match self.get(key) {
            Some(value) => Ok(value),
            None => {
                let value = fetch().await?;
                self.set(key, value.clone(), ttl);
                Ok(value)
            }
        }
    }
}

/// Drops the per-key gate once no other caller holds it, including when the
/// owning future is cancelled mid-fetch
struct InflightGuard<'a> {
    inflight: &'a Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    key: &'a str,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        let mut inflight = self.inflight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Only the map and this guard still hold the gate: nobody is waiting
        let ours = inflight.get(self.key).is_some_and(|gate| Arc::ptr_eq(gate, &self.gate));
        if ours && Arc::strong_count(&self.gate) <= 2 {
            inflight.remove(self.key);
        }
    }
}
