// =============================================================================
// TTL cache with single-flight fetch — stampede protection for polled sources
// =============================================================================
//
// One entry per upstream source class, registered at construction. Concurrent
// callers on an expired key share exactly one upstream call: the first caller
// registers a broadcast channel as the in-flight marker and spawns the fetch,
// everyone else subscribes to the same channel. A failed refresh clears the
// marker without touching stored data, so the last-known-good value survives.
//
// The entry map lock is never held across an await point.
// =============================================================================

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Errors surfaced by [`TtlCache::get`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// Programmer error: the key was never registered. Fatal to the calling
    /// operation, not to the process.
    #[error("unknown cache key: {0}")]
    UnknownKey(String),
    /// The upstream fetch failed. Delivered to every coalesced waiter; the
    /// stored value (if any) is unchanged.
    #[error("upstream fetch failed: {0}")]
    Upstream(String),
}

struct Entry<T> {
    data: Option<T>,
    last_updated: Option<Instant>,
    in_flight: Option<broadcast::Sender<Result<T, CacheError>>>,
}

impl<T> Entry<T> {
    fn empty() -> Self {
        Self {
            data: None,
            last_updated: None,
            in_flight: None,
        }
    }
}

/// Keyed cache with TTL expiry and request coalescing.
pub struct TtlCache<T> {
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, Entry<T>>>>,
}

impl<T: Clone + Send + 'static> TtlCache<T> {
    /// Create a cache with one empty entry per registered key.
    pub fn new(ttl: Duration, keys: &[&str]) -> Self {
        let entries = keys
            .iter()
            .map(|key| ((*key).to_string(), Entry::empty()))
            .collect();
        Self {
            ttl,
            entries: Arc::new(Mutex::new(entries)),
        }
    }

    /// Return the cached value for `key`, fetching via `fetch` only when the
    /// stored value is missing or older than the TTL.
    ///
    /// At most one fetch is in flight per key at any time, regardless of
    /// caller concurrency. The fetch runs as a detached task so a cancelled
    /// caller cannot orphan the other waiters.
    pub async fn get<F, Fut>(&self, key: &str, fetch: F) -> Result<T, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let mut rx = {
            let mut entries = self.entries.lock();
            let entry = entries
                .get_mut(key)
                .ok_or_else(|| CacheError::UnknownKey(key.to_string()))?;

            // Fresh hit: no upstream call, no suspension.
            if let (Some(data), Some(at)) = (&entry.data, entry.last_updated) {
                if at.elapsed() < self.ttl {
                    return Ok(data.clone());
                }
            }

            match &entry.in_flight {
                // A fetch is already running: share its result.
                Some(tx) => tx.subscribe(),
                // We are the initiating caller: register the marker and
                // spawn the fetch.
                None => {
                    let (tx, rx) = broadcast::channel(1);
                    entry.in_flight = Some(tx.clone());

                    let entries = Arc::clone(&self.entries);
                    let key = key.to_string();
                    let fut = fetch();
                    tokio::spawn(async move {
                        let result = fut
                            .await
                            .map_err(|e| CacheError::Upstream(format!("{e:#}")));

                        {
                            let mut entries = entries.lock();
                            if let Some(entry) = entries.get_mut(&key) {
                                if let Ok(value) = &result {
                                    entry.data = Some(value.clone());
                                    entry.last_updated = Some(Instant::now());
                                    debug!(key = %key, "cache entry refreshed");
                                } else {
                                    warn!(key = %key, "fetch failed — keeping stale cache entry");
                                }
                                entry.in_flight = None;
                            }
                        }

                        // Waiters may all have gone away; that is fine.
                        let _ = tx.send(result);
                    });

                    rx
                }
            }
        };

        match rx.recv().await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Upstream(
                "fetch task dropped before completing".to_string(),
            )),
        }
    }

    /// The stored value regardless of age. Used for the degraded path when a
    /// refresh fails and the caller wants last-known-good data.
    pub fn last_known(&self, key: &str) -> Option<T> {
        self.entries.lock().get(key).and_then(|e| e.data.clone())
    }

    /// Age of the stored value, if any.
    pub fn age(&self, key: &str) -> Option<Duration> {
        self.entries
            .lock()
            .get(key)
            .and_then(|e| e.last_updated)
            .map(|at| at.elapsed())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{advance, sleep};

    const TTL: Duration = Duration::from_secs(60);

    fn counting_fetch(
        counter: &Arc<AtomicUsize>,
        value: u64,
    ) -> impl FnOnce() -> futures_util::future::BoxFuture<'static, anyhow::Result<u64>> {
        let counter = Arc::clone(counter);
        move || {
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(10)).await;
                Ok(value)
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_gets_share_one_fetch() {
        let cache = TtlCache::new(TTL, &["crypto"]);
        let calls = Arc::new(AtomicUsize::new(0));

        let futures: Vec<_> = (0..8)
            .map(|_| cache.get("crypto", counting_fetch(&calls, 42)))
            .collect();
        let results = futures_util::future::join_all(futures).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap(), 42);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry_triggers_refetch() {
        let cache = TtlCache::new(TTL, &["crypto"]);
        let calls = Arc::new(AtomicUsize::new(0));

        assert_eq!(cache.get("crypto", counting_fetch(&calls, 1)).await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Just inside the window: served from cache.
        advance(TTL - Duration::from_secs(1)).await;
        assert_eq!(cache.get("crypto", counting_fetch(&calls, 2)).await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Just past the window: refetched.
        advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("crypto", counting_fetch(&calls, 2)).await.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_keeps_stored_value_and_allows_retry() {
        let cache = TtlCache::new(TTL, &["crypto"]);
        let calls = Arc::new(AtomicUsize::new(0));

        assert_eq!(cache.get("crypto", counting_fetch(&calls, 7)).await.unwrap(), 7);

        advance(TTL + Duration::from_secs(1)).await;

        let err = cache
            .get("crypto", || async { anyhow::bail!("upstream down") })
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Upstream(_)));

        // Last-known-good survives the failed refresh.
        assert_eq!(cache.last_known("crypto"), Some(7));

        // The in-flight marker was cleared, so the next call retries.
        assert_eq!(cache.get("crypto", counting_fetch(&calls, 8)).await.unwrap(), 8);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_delivered_to_every_coalesced_waiter() {
        let cache: TtlCache<u64> = TtlCache::new(TTL, &["crypto"]);

        let futures: Vec<_> = (0..4)
            .map(|_| {
                cache.get("crypto", || async {
                    sleep(Duration::from_millis(10)).await;
                    anyhow::bail!("upstream down")
                })
            })
            .collect();

        for result in futures_util::future::join_all(futures).await {
            assert!(matches!(result.unwrap_err(), CacheError::Upstream(_)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unregistered_key_is_rejected() {
        let cache: TtlCache<u64> = TtlCache::new(TTL, &["crypto"]);
        let err = cache.get("forex", || async { Ok(1) }).await.unwrap_err();
        assert_eq!(err, CacheError::UnknownKey("forex".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn age_tracks_time_since_refresh() {
        let cache = TtlCache::new(TTL, &["crypto"]);
        assert_eq!(cache.age("crypto"), None);

        cache
            .get("crypto", || async { Ok(1u64) })
            .await
            .unwrap();
        advance(Duration::from_secs(5)).await;
        assert_eq!(cache.age("crypto"), Some(Duration::from_secs(5)));
    }
}
