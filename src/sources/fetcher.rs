// =============================================================================
// Snapshot fetcher — drives polled sources through the TTL cache and applies
// the results to the reconciliation engine
// =============================================================================
//
// Refreshes are coalesced per source class: concurrent refresh triggers (the
// poll loop, startup) share a single upstream call per TTL window. A failing
// source degrades to the last-known-good snapshot; nothing ever propagates
// to readers of the view.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::warn;

use super::PriceSource;
use crate::cache::TtlCache;
use crate::engine::ReconciliationEngine;
use crate::market::{Snapshot, CACHE_TTL};

pub struct SnapshotFetcher {
    cache: TtlCache<Snapshot>,
    sources: Vec<Arc<dyn PriceSource>>,
}

impl SnapshotFetcher {
    pub fn new(sources: Vec<Arc<dyn PriceSource>>) -> Self {
        let keys: Vec<&str> = sources.iter().map(|s| s.key()).collect();
        Self {
            cache: TtlCache::new(CACHE_TTL, &keys),
            sources,
        }
    }

    /// Refresh every source (concurrently, coalesced through the cache) and
    /// apply the resulting snapshots to the engine. Infallible by design: a
    /// failed source logs a warning and falls back to its last-known-good
    /// snapshot, if one exists.
    pub async fn refresh(&self, engine: &ReconciliationEngine) {
        let fetches = self.sources.iter().map(|source| {
            let key = source.key();
            let source = Arc::clone(source);
            async move {
                (
                    key,
                    self.cache
                        .get(key, move || async move { source.fetch().await })
                        .await,
                )
            }
        });

        for (key, result) in join_all(fetches).await {
            match result {
                Ok(snapshot) => engine.apply_snapshot(snapshot),
                Err(e) => {
                    warn!(
                        source = key,
                        error = %e,
                        "snapshot refresh failed — retaining last-known-good data"
                    );
                    if let Some(snapshot) = self.cache.last_known(key) {
                        engine.apply_snapshot(snapshot);
                    }
                }
            }
        }
    }

    /// Age of a source's stored snapshot, for the status surface.
    pub fn snapshot_age(&self, key: &str) -> Option<Duration> {
        self.cache.age(key)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{Asset, AssetKind, SnapshotSource};
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::advance;

    fn btc_asset(price_usd: f64) -> Asset {
        Asset {
            id: "bitcoin".into(),
            symbol: "BTC".into(),
            name: "Bitcoin".into(),
            kind: AssetKind::Crypto,
            price_usd,
            price_idr: price_usd * 16_350.0,
            change_24h: 0.0,
            last_updated: Utc::now(),
        }
    }

    /// A source scripted with a sequence of outcomes; `None` means fail.
    struct ScriptedSource {
        outcomes: Mutex<VecDeque<Option<f64>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(outcomes: Vec<Option<f64>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PriceSource for ScriptedSource {
        fn key(&self) -> &'static str {
            SnapshotSource::Crypto.cache_key()
        }

        async fn fetch(&self) -> anyhow::Result<Snapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outcomes.lock().pop_front().flatten() {
                Some(price) => Ok(Snapshot {
                    source: SnapshotSource::Crypto,
                    assets: vec![btc_asset(price)],
                    usd_idr_rate: None,
                }),
                None => anyhow::bail!("upstream down"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_applies_snapshot_to_engine() {
        let source = ScriptedSource::new(vec![Some(60_000.0)]);
        let fetcher = SnapshotFetcher::new(vec![source.clone()]);
        let engine = ReconciliationEngine::new();

        fetcher.refresh(&engine).await;

        assert_eq!(engine.read().crypto[0].price_usd, 60_000.0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_within_ttl_is_served_from_cache() {
        let source = ScriptedSource::new(vec![Some(60_000.0), Some(61_000.0)]);
        let fetcher = SnapshotFetcher::new(vec![source.clone()]);
        let engine = ReconciliationEngine::new();

        fetcher.refresh(&engine).await;
        advance(Duration::from_secs(10)).await;
        fetcher.refresh(&engine).await;

        // The second refresh hit the cache — one upstream call total.
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.read().crypto[0].price_usd, 60_000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_retains_last_known_good() {
        let source = ScriptedSource::new(vec![Some(60_000.0), None]);
        let fetcher = SnapshotFetcher::new(vec![source.clone()]);
        let engine = ReconciliationEngine::new();

        fetcher.refresh(&engine).await;
        advance(CACHE_TTL + Duration::from_secs(1)).await;
        fetcher.refresh(&engine).await;

        // Two upstream attempts, second failed; view still holds good data.
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(engine.read().crypto[0].price_usd, 60_000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_with_no_prior_snapshot_leaves_view_empty() {
        let source = ScriptedSource::new(vec![None]);
        let fetcher = SnapshotFetcher::new(vec![source]);
        let engine = ReconciliationEngine::new();

        fetcher.refresh(&engine).await;
        assert!(engine.read().crypto.is_empty());
    }
}
