// =============================================================================
// Binance combined ticker stream transport
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info};

use super::client::{StreamConnection, StreamTransport};

const BINANCE_WS_BASE: &str = "wss://stream.binance.com:9443/stream";

/// Connects to Binance combined streams: one connection carries a `@ticker`
/// stream per subscribed symbol.
pub struct BinanceTransport {
    base_url: String,
}

impl BinanceTransport {
    pub fn new() -> Self {
        Self {
            base_url: BINANCE_WS_BASE.to_string(),
        }
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl Default for BinanceTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamTransport for BinanceTransport {
    type Conn = BinanceConnection;

    async fn connect(&self, symbols: &[String]) -> Result<BinanceConnection> {
        let streams = symbols
            .iter()
            .map(|s| format!("{}@ticker", s.to_lowercase()))
            .collect::<Vec<_>>()
            .join("/");
        let url = format!("{}?streams={}", self.base_url, streams);

        info!(streams = symbols.len(), "connecting to ticker WebSocket");
        let (ws, _response) = connect_async(&url)
            .await
            .context("failed to connect to ticker WebSocket")?;

        Ok(BinanceConnection { ws })
    }
}

pub struct BinanceConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl StreamConnection for BinanceConnection {
    async fn next_message(&mut self) -> Option<Result<String>> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Ping(payload)) => {
                    // Binance drops connections that do not answer pings.
                    if let Err(e) = self.ws.send(Message::Pong(payload)).await {
                        return Some(Err(e.into()));
                    }
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "server closed ticker stream");
                    return None;
                }
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}
