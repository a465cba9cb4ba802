// =============================================================================
// Reconciliation engine — merges polled snapshots with streamed price deltas
// =============================================================================
//
// Sole owner and writer of the MarketView. Snapshots replace their source's
// buckets wholesale (polled data is authoritative for names, 24h change, and
// membership); stream updates overlay price fields onto existing assets only.
// Readers never block on writers: the write lock is held for the duration of
// a bucket swap or a single-asset update, and `read` clones under the read
// lock, so a reader sees either the pre- or post-update state, never a torn
// one.
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::market::{
    stream_symbol_to_id, MarketView, Snapshot, FALLBACK_USD_IDR_RATE,
};

pub struct ReconciliationEngine {
    view: RwLock<MarketView>,
    /// Latest USD/IDR rate observed by any snapshot. Seeded with the fallback
    /// constant; the engine never fetches rates itself, so streamed updates
    /// pair against whatever the last equities snapshot provided.
    usd_idr_rate: RwLock<f64>,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        Self {
            view: RwLock::new(MarketView::default()),
            usd_idr_rate: RwLock::new(FALLBACK_USD_IDR_RATE),
        }
    }

    pub fn usd_idr_rate(&self) -> f64 {
        *self.usd_idr_rate.read()
    }

    /// Apply a full snapshot: replace every bucket the source owns with the
    /// snapshot's assets for that bucket. Assets absent from the snapshot are
    /// removed — membership never grows stale across poll cycles.
    pub fn apply_snapshot(&self, snapshot: Snapshot) {
        if let Some(rate) = snapshot.usd_idr_rate {
            if rate > 0.0 {
                *self.usd_idr_rate.write() = rate;
            }
        }

        let mut view = self.view.write();
        for kind in snapshot.source.buckets() {
            let assets: Vec<_> = snapshot
                .assets
                .iter()
                .filter(|a| a.kind == *kind)
                .cloned()
                .collect();
            *view.bucket_mut(*kind) = assets;
        }

        debug!(
            source = %snapshot.source,
            count = snapshot.assets.len(),
            "snapshot applied"
        );
    }

    /// Overlay a streamed USD price onto an existing asset.
    ///
    /// The stream symbol is resolved through the fixed mapping; if no asset
    /// with that id is currently in the view (snapshot not yet arrived, or
    /// asset not tracked), the update is dropped — a price without metadata
    /// never creates a synthetic asset. Returns whether the update applied.
    pub fn apply_stream_update(
        &self,
        symbol: &str,
        price: f64,
        observed_at: DateTime<Utc>,
    ) -> bool {
        let Some(id) = stream_symbol_to_id(symbol) else {
            debug!(symbol, "stream update for unmapped symbol dropped");
            return false;
        };

        let rate = *self.usd_idr_rate.read();
        let mut view = self.view.write();
        let Some(asset) = view.crypto.iter_mut().find(|a| a.id == id) else {
            debug!(symbol, id, "stream update for absent asset dropped");
            return false;
        };

        asset.price_usd = price;
        asset.price_idr = price * rate;
        asset.last_updated = observed_at;
        true
    }

    /// The current best-known view. Non-blocking and infallible: even with
    /// every upstream failing, this returns the last consistent state (which
    /// simply grows stale, reflected in each asset's `lastUpdated`).
    pub fn read(&self) -> MarketView {
        self.view.read().clone()
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}
