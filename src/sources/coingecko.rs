// =============================================================================
// CoinGecko polled source — crypto bucket (USD + IDR + 24h change)
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use super::PriceSource;
use crate::market::{Asset, AssetKind, Snapshot, SnapshotSource, COINGECKO_ASSETS};

const COINGECKO_BASE: &str = "https://api.coingecko.com";

pub struct CoinGeckoSource {
    client: reqwest::Client,
    base_url: String,
}

impl CoinGeckoSource {
    pub fn new() -> Self {
        Self::with_base_url(COINGECKO_BASE)
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

impl Default for CoinGeckoSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    fn key(&self) -> &'static str {
        SnapshotSource::Crypto.cache_key()
    }

    async fn fetch(&self) -> Result<Snapshot> {
        let ids = COINGECKO_ASSETS
            .iter()
            .map(|(id, _, _)| *id)
            .collect::<Vec<_>>()
            .join(",");
        let url = format!(
            "{}/api/v3/simple/price?ids={}&vs_currencies=usd,idr&include_24hr_change=true",
            self.base_url, ids
        );

        let resp = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .context("CoinGecko simple/price request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse CoinGecko response")?;

        if !status.is_success() {
            anyhow::bail!("CoinGecko simple/price returned {}: {}", status, body);
        }

        let assets = parse_simple_price(&body);
        debug!(count = assets.len(), "crypto snapshot fetched");

        Ok(Snapshot {
            source: SnapshotSource::Crypto,
            assets,
            usd_idr_rate: None,
        })
    }
}

/// Map a `simple/price` response onto assets. Entries that are missing or
/// carry non-numeric prices are skipped — partially-shaped data never enters
/// the view.
fn parse_simple_price(body: &serde_json::Value) -> Vec<Asset> {
    let now = Utc::now();
    let mut assets = Vec::with_capacity(COINGECKO_ASSETS.len());

    for (id, symbol, name) in COINGECKO_ASSETS {
        let Some(entry) = body.get(id) else {
            warn!(id, "asset missing from CoinGecko response — skipped");
            continue;
        };
        let (Some(usd), Some(idr)) = (entry["usd"].as_f64(), entry["idr"].as_f64()) else {
            warn!(id, "non-numeric price in CoinGecko response — skipped");
            continue;
        };
        let change = entry["usd_24h_change"].as_f64().unwrap_or(0.0);

        assets.push(Asset {
            id: id.to_string(),
            symbol: symbol.to_string(),
            name: name.to_string(),
            kind: AssetKind::Crypto,
            price_usd: usd,
            price_idr: idr,
            change_24h: change,
            last_updated: now,
        });
    }

    assets
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_complete_response() {
        let body = serde_json::json!({
            "bitcoin": { "usd": 60000.0, "idr": 978000000.0, "usd_24h_change": 1.5 },
            "ethereum": { "usd": 3000.0, "idr": 48900000.0, "usd_24h_change": -0.8 },
            "solana": { "usd": 150.0, "idr": 2452500.0, "usd_24h_change": 3.2 },
            "binancecoin": { "usd": 600.0, "idr": 9810000.0, "usd_24h_change": 0.0 },
            "dogecoin": { "usd": 0.12, "idr": 1962.0, "usd_24h_change": -2.1 },
        });

        let assets = parse_simple_price(&body);
        assert_eq!(assets.len(), 5);

        let btc = &assets[0];
        assert_eq!(btc.id, "bitcoin");
        assert_eq!(btc.symbol, "BTC");
        assert_eq!(btc.name, "Bitcoin");
        assert_eq!(btc.kind, AssetKind::Crypto);
        assert_eq!(btc.price_usd, 60000.0);
        assert_eq!(btc.price_idr, 978000000.0);
        assert_eq!(btc.change_24h, 1.5);
    }

    #[test]
    fn skips_missing_and_malformed_entries() {
        let body = serde_json::json!({
            "bitcoin": { "usd": 60000.0, "idr": 978000000.0 },
            "ethereum": { "usd": "not-a-number", "idr": 48900000.0 },
            // solana, binancecoin, dogecoin absent entirely
        });

        let assets = parse_simple_price(&body);
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].id, "bitcoin");
        // Missing 24h change defaults to zero rather than dropping the asset.
        assert_eq!(assets[0].change_24h, 0.0);
    }
}
