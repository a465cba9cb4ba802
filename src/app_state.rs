// =============================================================================
// Shared service state — ties the engine, fetcher, and stream health together
// for the HTTP surface
// =============================================================================

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::engine::ReconciliationEngine;
use crate::market::SnapshotSource;
use crate::sources::SnapshotFetcher;

pub struct AppState {
    pub engine: Arc<ReconciliationEngine>,
    pub fetcher: Arc<SnapshotFetcher>,
    stream_connected: RwLock<bool>,
    last_stream_event: RwLock<Option<Instant>>,
    start_time: Instant,
}

impl AppState {
    pub fn new(engine: Arc<ReconciliationEngine>, fetcher: Arc<SnapshotFetcher>) -> Self {
        Self {
            engine,
            fetcher,
            stream_connected: RwLock::new(false),
            last_stream_event: RwLock::new(None),
            start_time: Instant::now(),
        }
    }

    pub fn set_stream_connected(&self, connected: bool) {
        *self.stream_connected.write() = connected;
    }

    /// Record that a stream tick arrived; feeds the staleness surface.
    pub fn note_stream_event(&self) {
        *self.last_stream_event.write() = Some(Instant::now());
    }

    /// Build the status payload for `GET /api/v1/status`. This is how the
    /// (external) UI learns about a disconnected stream or stale snapshots —
    /// failures never surface as errors on the market view itself.
    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            stream_connected: *self.stream_connected.read(),
            last_stream_event_age_ms: self
                .last_stream_event
                .read()
                .map(|at| at.elapsed().as_millis() as u64),
            usd_idr_rate: self.engine.usd_idr_rate(),
            crypto_snapshot_age_s: self
                .fetcher
                .snapshot_age(SnapshotSource::Crypto.cache_key())
                .map(|age| age.as_secs()),
            equities_snapshot_age_s: self
                .fetcher
                .snapshot_age(SnapshotSource::Equities.cache_key())
                .map(|age| age.as_secs()),
            uptime_s: self.start_time.elapsed().as_secs(),
            server_time: Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub stream_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_stream_event_age_ms: Option<u64>,
    pub usd_idr_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crypto_snapshot_age_s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equities_snapshot_age_s: Option<u64>,
    pub uptime_s: u64,
    pub server_time: i64,
}
