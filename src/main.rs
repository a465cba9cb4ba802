// =============================================================================
// Market Pulse — multi-source market price service
// =============================================================================
//
// Maintains an always-fresh in-memory view of crypto, equity, and commodity
// prices: polled snapshots (CoinGecko, Yahoo Finance) coalesced through a TTL
// cache, overlaid with low-latency ticks from the Binance ticker stream, and
// served read-only over HTTP. Consumers never block on a slow or failing
// upstream — the view simply grows stale.
// =============================================================================

mod api;
mod app_state;
mod cache;
mod config;
mod engine;
mod market;
mod sources;
mod stream;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::Config;
use crate::engine::ReconciliationEngine;
use crate::sources::{CoinGeckoSource, PriceSource, SnapshotFetcher, YahooSource};
use crate::stream::{BinanceTransport, StreamClient, StreamEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Market Pulse starting up");

    let mut config = Config::load("pulse_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        Config::default()
    });
    config.apply_env();

    info!(
        bind = %config.bind_addr,
        poll_interval_secs = config.poll_interval_secs,
        stream_enabled = config.stream_enabled,
        "configuration resolved"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let engine = Arc::new(ReconciliationEngine::new());
    let sources: Vec<Arc<dyn PriceSource>> = vec![
        Arc::new(CoinGeckoSource::new()),
        Arc::new(YahooSource::new()),
    ];
    let fetcher = Arc::new(SnapshotFetcher::new(sources));
    let state = Arc::new(AppState::new(engine.clone(), fetcher.clone()));

    // ── 3. Initial snapshot before serving ───────────────────────────────
    fetcher.refresh(&engine).await;

    // ── 4. Poll loop ─────────────────────────────────────────────────────
    let poll_engine = engine.clone();
    let poll_fetcher = fetcher.clone();
    let poll_interval = Duration::from_secs(config.poll_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll_interval);
        interval.tick().await; // the initial refresh above covers tick zero
        loop {
            interval.tick().await;
            poll_fetcher.refresh(&poll_engine).await;
        }
    });

    // ── 5. Ticker stream + consumer task ─────────────────────────────────
    let stream_handle = if config.stream_enabled {
        let (handle, mut events) =
            StreamClient::start(BinanceTransport::new(), market::stream_symbols());

        let ev_engine = engine.clone();
        let ev_state = state.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    StreamEvent::Price { symbol, price, at } => {
                        ev_state.note_stream_event();
                        ev_engine.apply_stream_update(&symbol, price, at);
                    }
                    StreamEvent::Connected(connected) => {
                        ev_state.set_stream_connected(connected);
                        info!(connected, "ticker stream connection changed");
                    }
                }
            }
        });

        Some(handle)
    } else {
        warn!("ticker stream disabled — running on polled data alone");
        None
    };

    // ── 6. API server ────────────────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr = config.bind_addr.clone();
    tokio::spawn(async move {
        let app = api::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("failed to bind API server");
        info!(addr = %bind_addr, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    info!("all subsystems running — press Ctrl+C to stop");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping");

    if let Some(handle) = stream_handle {
        handle.stop().await;
    }

    info!("Market Pulse shut down complete");
    Ok(())
}
