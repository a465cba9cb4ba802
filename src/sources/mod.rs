pub mod coingecko;
pub mod fetcher;
pub mod yahoo;

pub use coingecko::CoinGeckoSource;
pub use fetcher::SnapshotFetcher;
pub use yahoo::YahooSource;

use async_trait::async_trait;

use crate::market::Snapshot;

/// A polled upstream producing a full snapshot for its asset buckets.
///
/// Implementations validate strictly at the boundary: malformed entries are
/// skipped with a warning and never enter the market view.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Cache key for this source's snapshot (one entry per source class).
    fn key(&self) -> &'static str;

    async fn fetch(&self) -> anyhow::Result<Snapshot>;
}
