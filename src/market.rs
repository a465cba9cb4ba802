// =============================================================================
// Shared market data model — assets, buckets, and fixed identifier tables
// =============================================================================

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------
// Fixed constants
// -----------------------------------------------------------------------------

/// How long a polled snapshot stays fresh before a new upstream call is made.
pub const CACHE_TTL: Duration = Duration::from_secs(60);

/// Fixed delay before the ticker stream attempts to reconnect.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(3);

/// Fallback USD/IDR rate used until the first equities snapshot delivers one.
pub const FALLBACK_USD_IDR_RATE: f64 = 16_350.0;

/// CoinGecko asset id, display ticker, and display name for the crypto bucket.
pub const COINGECKO_ASSETS: [(&str, &str, &str); 5] = [
    ("bitcoin", "BTC", "Bitcoin"),
    ("ethereum", "ETH", "Ethereum"),
    ("solana", "SOL", "Solana"),
    ("binancecoin", "BNB", "Binance Coin"),
    ("dogecoin", "DOGE", "Dogecoin"),
];

/// Yahoo Finance tickers polled for the equities and commodities buckets.
/// `.JK` marks IDX-listed stocks, `=F` marks futures (commodities).
pub const YAHOO_SYMBOLS: [&str; 10] = [
    "AAPL", "NVDA", "MSFT", "TSLA", // US stocks
    "BBCA.JK", "BBRI.JK", "TLKM.JK", "GOTO.JK", // ID stocks
    "GC=F", "SI=F", // commodities
];

/// Exchange-rate pseudo-symbol appended to every equities poll.
pub const USD_IDR_SYMBOL: &str = "IDR=X";

/// Ticker stream symbol → internal asset id. Only crypto is streamed;
/// equities and commodities rely on polling alone.
pub const STREAM_SYMBOLS: [(&str, &str); 5] = [
    ("btcusdt", "bitcoin"),
    ("ethusdt", "ethereum"),
    ("solusdt", "solana"),
    ("bnbusdt", "binancecoin"),
    ("dogeusdt", "dogecoin"),
];

/// Resolve a lowercase stream symbol to its internal asset id.
pub fn stream_symbol_to_id(symbol: &str) -> Option<&'static str> {
    STREAM_SYMBOLS
        .iter()
        .find(|(sym, _)| *sym == symbol)
        .map(|(_, id)| *id)
}

/// The full set of stream symbols to subscribe to.
pub fn stream_symbols() -> Vec<String> {
    STREAM_SYMBOLS.iter().map(|(sym, _)| (*sym).to_string()).collect()
}

// -----------------------------------------------------------------------------
// Asset
// -----------------------------------------------------------------------------

/// Which bucket of the market view an asset belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetKind {
    Crypto,
    StockUs,
    StockId,
    Commodity,
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Crypto => write!(f, "CRYPTO"),
            Self::StockUs => write!(f, "STOCK_US"),
            Self::StockId => write!(f, "STOCK_ID"),
            Self::Commodity => write!(f, "COMMODITY"),
        }
    }
}

/// A single priced asset, normalised into both currencies.
///
/// `price_usd` and `price_idr` always reflect the same observation: a streamed
/// USD price recomputes the IDR side with the latest known rate, never pairing
/// with a stale value silently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    /// Stable lowercase identifier, unique within its kind.
    pub id: String,
    /// Display ticker (e.g. "BTC", "BBCA").
    pub symbol: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AssetKind,
    #[serde(rename = "priceUSD")]
    pub price_usd: f64,
    #[serde(rename = "priceIDR")]
    pub price_idr: f64,
    /// 24-hour change in percent, signed.
    #[serde(rename = "change24h")]
    pub change_24h: f64,
    /// Timestamp of the freshest contributing update, whichever source.
    #[serde(rename = "lastUpdated")]
    pub last_updated: DateTime<Utc>,
}

// -----------------------------------------------------------------------------
// MarketView
// -----------------------------------------------------------------------------

/// The externally consumed asset table: four ordered buckets, each keyed
/// internally by asset id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketView {
    pub crypto: Vec<Asset>,
    #[serde(rename = "stocksUS")]
    pub stocks_us: Vec<Asset>,
    #[serde(rename = "stocksID")]
    pub stocks_id: Vec<Asset>,
    pub commodities: Vec<Asset>,
}

impl MarketView {
    pub fn bucket(&self, kind: AssetKind) -> &Vec<Asset> {
        match kind {
            AssetKind::Crypto => &self.crypto,
            AssetKind::StockUs => &self.stocks_us,
            AssetKind::StockId => &self.stocks_id,
            AssetKind::Commodity => &self.commodities,
        }
    }

    pub fn bucket_mut(&mut self, kind: AssetKind) -> &mut Vec<Asset> {
        match kind {
            AssetKind::Crypto => &mut self.crypto,
            AssetKind::StockUs => &mut self.stocks_us,
            AssetKind::StockId => &mut self.stocks_id,
            AssetKind::Commodity => &mut self.commodities,
        }
    }
}

// -----------------------------------------------------------------------------
// Snapshots
// -----------------------------------------------------------------------------

/// Which upstream polled source produced a snapshot. Each source is
/// authoritative for a fixed set of buckets, replaced wholesale per refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotSource {
    /// CoinGecko — owns the CRYPTO bucket.
    Crypto,
    /// Yahoo Finance — owns STOCK_US, STOCK_ID, and COMMODITY.
    Equities,
}

impl SnapshotSource {
    pub fn cache_key(self) -> &'static str {
        match self {
            Self::Crypto => "crypto",
            Self::Equities => "equities",
        }
    }

    /// The buckets this source replaces on every applied snapshot.
    pub fn buckets(self) -> &'static [AssetKind] {
        match self {
            Self::Crypto => &[AssetKind::Crypto],
            Self::Equities => &[AssetKind::StockUs, AssetKind::StockId, AssetKind::Commodity],
        }
    }
}

impl std::fmt::Display for SnapshotSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.cache_key())
    }
}

/// A complete point-in-time replacement data set from one polled source.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub source: SnapshotSource,
    pub assets: Vec<Asset>,
    /// USD/IDR rate observed alongside this snapshot, if the source carries
    /// one (only the equities source does).
    pub usd_idr_rate: Option<f64>,
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_symbols_map_to_asset_ids() {
        assert_eq!(stream_symbol_to_id("btcusdt"), Some("bitcoin"));
        assert_eq!(stream_symbol_to_id("dogeusdt"), Some("dogecoin"));
        assert_eq!(stream_symbol_to_id("xrpusdt"), None);
        assert_eq!(stream_symbols().len(), STREAM_SYMBOLS.len());
    }

    #[test]
    fn asset_serialises_with_wire_field_names() {
        let asset = Asset {
            id: "bitcoin".into(),
            symbol: "BTC".into(),
            name: "Bitcoin".into(),
            kind: AssetKind::Crypto,
            price_usd: 60_000.0,
            price_idr: 978_000_000.0,
            change_24h: -1.25,
            last_updated: Utc::now(),
        };
        let json = serde_json::to_value(&asset).unwrap();
        assert_eq!(json["type"], "CRYPTO");
        assert_eq!(json["priceUSD"], 60_000.0);
        assert_eq!(json["priceIDR"], 978_000_000.0);
        assert_eq!(json["change24h"], -1.25);
        assert!(json["lastUpdated"].is_string());
    }

    #[test]
    fn market_view_serialises_bucket_names() {
        let view = MarketView::default();
        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("crypto").is_some());
        assert!(json.get("stocksUS").is_some());
        assert!(json.get("stocksID").is_some());
        assert!(json.get("commodities").is_some());
    }

    #[test]
    fn equities_source_owns_three_buckets() {
        assert_eq!(SnapshotSource::Crypto.buckets(), &[AssetKind::Crypto]);
        assert_eq!(SnapshotSource::Equities.buckets().len(), 3);
        assert_ne!(
            SnapshotSource::Crypto.cache_key(),
            SnapshotSource::Equities.cache_key()
        );
    }
}
