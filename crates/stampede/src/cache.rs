//! StampedeCache: in-process cache that coalesces concurrent loads

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use ahash::RandomState;
use kvstore::{BoxError, Error, Result};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::lock_table::LockTable;
use crate::stats::CacheStats;

/// Cache where concurrent misses on one key trigger a single load
///
/// Lookups use double-checked acquisition: a hit never touches the per-key
/// lock; a miss takes the key's lock, looks again, and only then loads.
pub struct StampedeCache<V> {
    /// Loaded values; only complete loader results are ever inserted
    entries: RwLock<HashMap<String, V, RandomState>>,

    /// Per-key locks, shareable between caches
    locks: Arc<LockTable>,

    /// Bumped by `invalidate`; a load only inserts if its key's generation
    /// is unchanged since the load started
    generations: Mutex<HashMap<String, u64, RandomState>>,

    /// Cache statistics
    stats: CacheStats,
}

impl<V> Default for StampedeCache<V>
where
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> StampedeCache<V>
where
    V: Clone,
{
    /// Create an empty cache with its own lock table
    pub fn new() -> Self {
        Self::with_lock_table(Arc::new(LockTable::new()))
    }

    /// Create an empty cache using the given lock table
    pub fn with_lock_table(locks: Arc<LockTable>) -> Self {
        Self {
            entries: RwLock::new(HashMap::with_hasher(RandomState::new())),
            locks,
            generations: Mutex::new(HashMap::with_hasher(RandomState::new())),
            stats: CacheStats::new(),
        }
    }

    /// Get a cached value without loading
    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.read().get(key).cloned()
    }

    /// Return the cached value for `key`, loading it with `loader` on a miss
    ///
    /// Concurrent callers for the same missing key wait on the key's lock
    /// while one of them runs `loader`; the rest then see its result. A
    /// failed load is returned only to the caller that ran it and is not
    /// cached, so the next waiter runs its own loader.
    ///
    /// # Arguments
    /// * `key` - Cache key
    /// * `loader` - Produces the value on a miss
    ///
    /// # Returns
    /// * `Result<V>` - Cached or freshly loaded value, or `Error::Loader`
    pub async fn get_or_set<F, Fut, E>(&self, key: &str, loader: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        E: Into<BoxError>,
    {
        // Fast path, no per-key lock
        if let Some(value) = self.get(key) {
            self.stats.record_hit();
            return Ok(value);
        }
        self.stats.record_miss();

        let lock = self.locks.get_lock(key);
        let _guard = lock.lock().await;

        // Another caller may have finished loading while we waited
        if let Some(value) = self.get(key) {
            self.stats.record_coalesced();
            return Ok(value);
        }

        self.load(key, loader).await
    }

    /// Run `loader` under the key's lock and replace any cached value
    ///
    /// On failure the previous value, if any, stays cached.
    pub async fn reload<F, Fut, E>(&self, key: &str, loader: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        E: Into<BoxError>,
    {
        let lock = self.locks.get_lock(key);
        let _guard = lock.lock().await;

        self.load(key, loader).await
    }

    async fn load<F, Fut, E>(&self, key: &str, loader: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        E: Into<BoxError>,
    {
        let started = Instant::now();
        let generation = self.generation(key);

        match loader().await {
            Ok(value) => {
                self.stats.record_load();

                let mut entries = self.entries.write();
                if self.generation(key) == generation {
                    entries.insert(key.to_string(), value.clone());
                    debug!(key, elapsed_ms = started.elapsed().as_millis() as u64, "Loaded cache entry");
                } else {
                    debug!(key, "Key invalidated during load, not caching result");
                }
                Ok(value)
            }
            Err(err) => {
                let err = err.into();
                self.stats.record_load_failure();
                warn!(key, error = %err, "Cache loader failed");
                Err(Error::Loader(err))
            }
        }
    }

    fn generation(&self, key: &str) -> u64 {
        self.generations.lock().get(key).copied().unwrap_or(0)
    }

    /// Drop the cached value for `key`; the next lookup loads again
    ///
    /// A load already running for `key` still returns its value to its
    /// caller but does not cache it.
    ///
    /// # Returns
    /// * `bool` - Whether a value was cached
    pub fn invalidate(&self, key: &str) -> bool {
        let mut entries = self.entries.write();
        *self.generations.lock().entry(key.to_string()).or_insert(0) += 1;

        let removed = entries.remove(key).is_some();
        if removed {
            debug!(key, "Invalidated cache entry");
        }
        removed
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Get the lock table this cache coalesces on
    pub fn lock_table(&self) -> &Arc<LockTable> {
        &self.locks
    }

    /// Get number of cached values
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every cached value and reset statistics (locks are kept)
    pub fn clear(&self) {
        self.entries.write().clear();
        self.stats.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Barrier;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_coalesces_concurrent_requests() {
        let cache = Arc::new(StampedeCache::<String>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_set("key1", || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok::<_, Infallible>("computed".to_string())
                        })
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "computed");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().loads(), 1);
    }

    #[tokio::test]
    async fn test_reuses_cached_value() {
        let cache = StampedeCache::new();
        let first_calls = AtomicUsize::new(0);
        let second_calls = AtomicUsize::new(0);

        let first = cache
            .get_or_set("x", || async {
                first_calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>("once")
            })
            .await
            .unwrap();

        let second = cache
            .get_or_set("x", || async {
                second_calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>("twice")
            })
            .await
            .unwrap();

        assert_eq!(first, "once");
        assert_eq!(second, "once");
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_different_keys_load_independently() {
        let cache = Arc::new(StampedeCache::<&'static str>::new());
        // Both loaders must be inside their load at once to pass the barrier
        let barrier = Arc::new(Barrier::new(2));

        let spawn_load = |key: &'static str, value: &'static str| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                cache
                    .get_or_set(key, || async move {
                        barrier.wait().await;
                        Ok::<_, Infallible>(value)
                    })
                    .await
            })
        };

        let a = spawn_load("a", "A");
        let b = spawn_load("b", "B");

        let (a, b) = tokio::time::timeout(Duration::from_secs(2), async move { (a.await, b.await) })
            .await
            .expect("loads for distinct keys blocked each other");

        assert_eq!(a.unwrap().unwrap(), "A");
        assert_eq!(b.unwrap().unwrap(), "B");
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_hit_skips_key_lock() {
        let cache = StampedeCache::new();
        cache
            .get_or_set("k", || async { Ok::<_, Infallible>(1u32) })
            .await
            .unwrap();

        // A held key lock must not delay a hit
        let _held = cache.lock_table().get_lock("k").lock().await;
        let value = tokio::time::timeout(
            Duration::from_millis(100),
            cache.get_or_set("k", || async { Ok::<_, Infallible>(2u32) }),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(value, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failure_not_cached_and_waiter_retries() {
        let cache = Arc::new(StampedeCache::<String>::new());

        let failing = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_set("k", || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err::<String, _>("backend exploded")
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;

        let retrying = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_set("k", || async { Ok::<_, Infallible>("second".to_string()) })
                    .await
            })
        };

        let failed = failing.await.unwrap();
        assert!(matches!(failed, Err(Error::Loader(_))));

        assert_eq!(retrying.await.unwrap().unwrap(), "second");
        assert_eq!(cache.get("k").as_deref(), Some("second"));
        assert_eq!(cache.stats().load_failures(), 1);
        assert_eq!(cache.stats().loads(), 1);
    }

    #[tokio::test]
    async fn test_failure_leaves_key_absent() {
        let cache = StampedeCache::<u32>::new();

        let result = cache.get_or_set("k", || async { Err::<u32, _>("nope") }).await;

        assert!(matches!(result, Err(Error::Loader(_))));
        assert!(cache.get("k").is_none());
        assert!(cache.lock_table().get_lock("k").try_lock().is_some());
    }

    #[tokio::test]
    async fn test_cancelled_loader_releases_lock() {
        let cache = Arc::new(StampedeCache::<u32>::new());

        let stuck = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_set("k", || async {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        Ok::<_, Infallible>(1)
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        stuck.abort();
        assert!(stuck.await.unwrap_err().is_cancelled());

        let value = tokio::time::timeout(
            Duration::from_secs(1),
            cache.get_or_set("k", || async { Ok::<_, Infallible>(2) }),
        )
        .await
        .expect("lock was not released by cancelled loader")
        .unwrap();

        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn test_reload_overwrites() {
        let cache = StampedeCache::new();
        cache.get_or_set("k", || async { Ok::<_, Infallible>("old") }).await.unwrap();

        let value = cache.reload("k", || async { Ok::<_, Infallible>("new") }).await.unwrap();
        assert_eq!(value, "new");
        assert_eq!(cache.get("k"), Some("new"));

        // Failed reload keeps the old value
        let result = cache.reload("k", || async { Err::<&str, _>("down") }).await;
        assert!(result.is_err());
        assert_eq!(cache.get("k"), Some("new"));
    }

    #[tokio::test]
    async fn test_invalidate_forces_new_load() {
        let cache = StampedeCache::new();
        cache.get_or_set("k", || async { Ok::<_, Infallible>(1) }).await.unwrap();

        assert!(cache.invalidate("k"));
        assert!(!cache.invalidate("k"));

        let value = cache.get_or_set("k", || async { Ok::<_, Infallible>(2) }).await.unwrap();
        assert_eq!(value, 2);
        assert_eq!(cache.stats().loads(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_during_load_discards_result() {
        let cache = Arc::new(StampedeCache::<&'static str>::new());
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let pending = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_set("k", || async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Ok::<_, Infallible>("v1-stale")
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        assert!(!cache.invalidate("k"));
        release_tx.send(()).unwrap();

        // The caller that ran the load still gets its value
        assert_eq!(pending.await.unwrap().unwrap(), "v1-stale");
        assert!(cache.get("k").is_none());

        let value = cache.get_or_set("k", || async { Ok::<_, Infallible>("v2-fresh") }).await.unwrap();
        assert_eq!(value, "v2-fresh");
        assert_eq!(cache.get("k"), Some("v2-fresh"));
    }

    #[tokio::test]
    async fn test_shared_lock_table() {
        let table = Arc::new(LockTable::new());
        let first = StampedeCache::<u8>::with_lock_table(Arc::clone(&table));
        let second = StampedeCache::<u8>::with_lock_table(Arc::clone(&table));

        first.get_or_set("k", || async { Ok::<_, Infallible>(1) }).await.unwrap();
        second.get_or_set("k", || async { Ok::<_, Infallible>(2) }).await.unwrap();

        // Values are per cache, locks are shared
        assert_eq!(first.get("k"), Some(1));
        assert_eq!(second.get("k"), Some(2));
        assert_eq!(table.len(), 1);
        assert!(first.lock_table().get_lock("k").same_lock(&second.lock_table().get_lock("k")));
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = StampedeCache::new();
        cache.get_or_set("a", || async { Ok::<_, Infallible>(1) }).await.unwrap();
        cache.get_or_set("b", || async { Ok::<_, Infallible>(2) }).await.unwrap();
        assert_eq!(cache.len(), 2);

        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.stats().loads(), 0);
        assert_eq!(cache.lock_table().len(), 2);
    }
}
