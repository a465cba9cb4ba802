// =============================================================================
// Stream client — reconnecting subscription over an abstract transport
// =============================================================================
//
// One long-lived run task owns the connection. Events flow to the consumer
// through an unbounded channel, decoupling ingestion from processing rate.
// Reconnection is best-effort with a fixed backoff: the stream is a latency
// optimisation, polling remains the source-of-truth baseline, so repeated
// failures never escalate.
//
// `StreamHandle::stop` signals shutdown and joins the run task, so no Price
// event can be delivered after it returns, and a backoff timer can never fire
// into a stopped client.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::market::RECONNECT_BACKOFF;

// -----------------------------------------------------------------------------
// Transport abstraction
// -----------------------------------------------------------------------------

/// Opens subscription connections. The production impl is the Binance
/// combined ticker stream; tests script connections directly.
#[async_trait]
pub trait StreamTransport: Send + Sync + 'static {
    type Conn: StreamConnection;

    async fn connect(&self, symbols: &[String]) -> Result<Self::Conn>;
}

/// One open connection delivering raw text frames.
#[async_trait]
pub trait StreamConnection: Send {
    /// The next text frame. `None` means the remote ended the stream;
    /// `Some(Err)` is a transport error. Both trigger reconnection.
    async fn next_message(&mut self) -> Option<Result<String>>;
}

// -----------------------------------------------------------------------------
// Events and state
// -----------------------------------------------------------------------------

/// Lifecycle of the subscription connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Open => write!(f, "OPEN"),
            Self::Reconnecting => write!(f, "RECONNECTING"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Events pushed to the consumer channel.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A price tick for a subscribed symbol. `at` is the local receive time;
    /// upstream clocks are not trusted.
    Price {
        symbol: String,
        price: f64,
        at: DateTime<Utc>,
    },
    /// Fired exactly once per transition into OPEN (`true`) and once per
    /// transition out of it (`false`).
    Connected(bool),
}

// -----------------------------------------------------------------------------
// Client
// -----------------------------------------------------------------------------

pub struct StreamClient;

impl StreamClient {
    /// Start the run task for `symbols` and return its control handle plus
    /// the event channel.
    pub fn start<T: StreamTransport>(
        transport: T,
        symbols: Vec<String>,
    ) -> (StreamHandle, mpsc::UnboundedReceiver<StreamEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(RwLock::new(ConnectionState::Connecting));

        let task = tokio::spawn(run_loop(
            transport,
            symbols,
            events_tx,
            shutdown_rx,
            Arc::clone(&state),
        ));

        (
            StreamHandle {
                shutdown: shutdown_tx,
                task,
                state,
            },
            events_rx,
        )
    }
}

/// Owner handle for a running stream client.
pub struct StreamHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    state: Arc<RwLock<ConnectionState>>,
}

impl StreamHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Stop the client and wait for the run task to finish. Consuming the
    /// handle makes stop terminal; after this returns, the connection is
    /// released and no further event is delivered.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

// -----------------------------------------------------------------------------
// Run loop
// -----------------------------------------------------------------------------

async fn run_loop<T: StreamTransport>(
    transport: T,
    symbols: Vec<String>,
    events: mpsc::UnboundedSender<StreamEvent>,
    mut shutdown: watch::Receiver<bool>,
    state: Arc<RwLock<ConnectionState>>,
) {
    let subscribed: HashSet<String> = symbols.iter().map(|s| s.to_lowercase()).collect();

    loop {
        *state.write() = ConnectionState::Connecting;

        let conn = tokio::select! {
            _ = shutdown.changed() => break,
            conn = transport.connect(&symbols) => conn,
        };

        match conn {
            Ok(mut conn) => {
                *state.write() = ConnectionState::Open;
                info!(symbols = symbols.len(), "stream connected");
                let _ = events.send(StreamEvent::Connected(true));

                let stopped =
                    read_messages(&mut conn, &subscribed, &events, &mut shutdown).await;

                let _ = events.send(StreamEvent::Connected(false));
                if stopped {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "stream connect failed");
            }
        }

        *state.write() = ConnectionState::Reconnecting;
        info!(delay = ?RECONNECT_BACKOFF, "stream reconnecting after backoff");
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
        }
    }

    *state.write() = ConnectionState::Closed;
    info!("stream client stopped");
}

/// Read frames until shutdown or connection loss. Returns whether shutdown
/// was requested.
async fn read_messages<C: StreamConnection>(
    conn: &mut C,
    subscribed: &HashSet<String>,
    events: &mpsc::UnboundedSender<StreamEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    loop {
        let msg = tokio::select! {
            _ = shutdown.changed() => return true,
            msg = conn.next_message() => msg,
        };

        match msg {
            Some(Ok(text)) => match parse_ticker(&text) {
                Ok(Some((symbol, price))) => {
                    if subscribed.contains(&symbol) {
                        let _ = events.send(StreamEvent::Price {
                            symbol,
                            price,
                            at: Utc::now(),
                        });
                    } else {
                        debug!(symbol, "tick for unsubscribed symbol ignored");
                    }
                }
                // Control frame (subscription ack etc.) — not a tick.
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "malformed stream message dropped");
                }
            },
            Some(Err(e)) => {
                error!(error = %e, "stream read error");
                return false;
            }
            None => {
                warn!("stream ended by remote");
                return false;
            }
        }
    }
}

/// Parse a combined-stream frame. Frames without a `data` envelope are
/// control messages and yield `Ok(None)`; frames with an envelope must carry
/// a symbol and a numeric price.
fn parse_ticker(text: &str) -> Result<Option<(String, f64)>> {
    use anyhow::Context;

    let root: serde_json::Value =
        serde_json::from_str(text).context("stream frame is not valid JSON")?;

    let Some(data) = root.get("data") else {
        return Ok(None);
    };

    let symbol = data["s"]
        .as_str()
        .context("ticker missing symbol field")?
        .to_lowercase();

    let price = match &data["c"] {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("ticker price '{s}' is not numeric"))?,
        serde_json::Value::Number(n) => n.as_f64().context("ticker price out of range")?,
        _ => anyhow::bail!("ticker missing price field"),
    };

    Ok(Some((symbol, price)))
}
