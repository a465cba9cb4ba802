// =============================================================================
// Yahoo Finance polled source — equities and commodities, plus the USD/IDR
// exchange-rate pseudo-symbol used for currency pairing
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use super::PriceSource;
use crate::market::{
    Asset, AssetKind, Snapshot, SnapshotSource, FALLBACK_USD_IDR_RATE, USD_IDR_SYMBOL,
    YAHOO_SYMBOLS,
};

const YAHOO_BASE: &str = "https://query1.finance.yahoo.com";

pub struct YahooSource {
    client: reqwest::Client,
    base_url: String,
}

impl YahooSource {
    pub fn new() -> Self {
        Self::with_base_url(YAHOO_BASE)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

impl Default for YahooSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceSource for YahooSource {
    fn key(&self) -> &'static str {
        SnapshotSource::Equities.cache_key()
    }

    async fn fetch(&self) -> Result<Snapshot> {
        let mut symbols: Vec<&str> = YAHOO_SYMBOLS.to_vec();
        symbols.push(USD_IDR_SYMBOL);
        let url = format!(
            "{}/v7/finance/quote?symbols={}",
            self.base_url,
            symbols.join(",")
        );

        let resp = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .context("Yahoo quote request failed")?;

        let status = resp.status();
        let body: serde_json::Value =
            resp.json().await.context("failed to parse Yahoo response")?;

        if !status.is_success() {
            anyhow::bail!("Yahoo quote returned {}: {}", status, body);
        }

        let (assets, rate) = parse_quote_response(&body)?;
        debug!(count = assets.len(), rate, "equities snapshot fetched");

        Ok(Snapshot {
            source: SnapshotSource::Equities,
            assets,
            usd_idr_rate: Some(rate),
        })
    }
}

/// Map a v7 quote response onto assets plus the observed USD/IDR rate.
///
/// Yahoo quotes in the currency of the listing exchange: IDX stocks arrive in
/// IDR and are divided for the USD side, everything else arrives in USD and
/// is multiplied for the IDR side.
fn parse_quote_response(body: &serde_json::Value) -> Result<(Vec<Asset>, f64)> {
    let results = body["quoteResponse"]["result"]
        .as_array()
        .context("quote response missing result array")?;

    let rate = results
        .iter()
        .find(|q| q["symbol"].as_str() == Some(USD_IDR_SYMBOL))
        .and_then(|q| q["regularMarketPrice"].as_f64())
        .filter(|r| *r > 0.0)
        .unwrap_or_else(|| {
            warn!(
                fallback = FALLBACK_USD_IDR_RATE,
                "USD/IDR quote missing — using fallback rate"
            );
            FALLBACK_USD_IDR_RATE
        });

    let now = Utc::now();
    let mut assets = Vec::with_capacity(results.len());

    for quote in results {
        let Some(symbol) = quote["symbol"].as_str() else {
            warn!("quote entry without symbol — skipped");
            continue;
        };
        if symbol == USD_IDR_SYMBOL {
            continue;
        }
        let Some(price) = quote["regularMarketPrice"].as_f64() else {
            warn!(symbol, "quote without price — skipped");
            continue;
        };
        let change = quote["regularMarketChangePercent"].as_f64().unwrap_or(0.0);

        let kind = asset_kind_for(symbol);
        let (price_usd, price_idr) = if quote["currency"].as_str() == Some("IDR") {
            (price / rate, price)
        } else {
            (price, price * rate)
        };

        assets.push(Asset {
            id: sanitize_id(symbol),
            symbol: display_symbol(symbol),
            name: display_name(symbol, quote),
            kind,
            price_usd,
            price_idr,
            change_24h: change,
            last_updated: now,
        });
    }

    Ok((assets, rate))
}

fn asset_kind_for(symbol: &str) -> AssetKind {
    if symbol.ends_with(".JK") {
        AssetKind::StockId
    } else if symbol.contains("=F") {
        AssetKind::Commodity
    } else {
        AssetKind::StockUs
    }
}

/// Lowercased ticker with everything non-alphanumeric stripped, e.g.
/// "BBCA.JK" → "bbcajk", "GC=F" → "gcf".
fn sanitize_id(symbol: &str) -> String {
    symbol
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

fn display_symbol(symbol: &str) -> String {
    symbol.replace(".JK", "").replace("=F", "")
}

fn display_name(symbol: &str, quote: &serde_json::Value) -> String {
    match symbol {
        "GC=F" => "Gold".to_string(),
        "SI=F" => "Silver".to_string(),
        _ => quote["shortName"]
            .as_str()
            .or_else(|| quote["longName"].as_str())
            .unwrap_or(symbol)
            .to_string(),
    }
}
