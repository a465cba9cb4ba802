// =============================================================================
// Service configuration — deployment knobs with serde defaults
// =============================================================================
//
// Only deployment concerns live here (bind address, poll cadence, stream
// toggle). The data-path constants — cache TTL, reconnect backoff, and the
// streamed-symbol mapping — are fixed in `market.rs` and intentionally not
// reconfigurable.
//
// All fields carry `#[serde(default)]` so that an older config file missing
// new fields still loads.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address the HTTP API binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// How often the poll loop triggers a (coalesced) snapshot refresh.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Whether to run the live ticker stream alongside polling. Disabled,
    /// the service operates on polled data alone (degraded but correct).
    #[serde(default = "default_true")]
    pub stream_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            poll_interval_secs: default_poll_interval_secs(),
            stream_enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Override fields from environment variables where set.
    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("PULSE_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Ok(secs) = std::env::var("PULSE_POLL_INTERVAL_SECS") {
            if let Ok(secs) = secs.parse() {
                self.poll_interval_secs = secs;
            }
        }
        if let Ok(enabled) = std::env::var("PULSE_STREAM_ENABLED") {
            self.stream_enabled = enabled != "0" && !enabled.eq_ignore_ascii_case("false");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = Config::default();
        assert_eq!(cfg.bind_addr, "0.0.0.0:3001");
        assert_eq!(cfg.poll_interval_secs, 30);
        assert!(cfg.stream_enabled);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:3001");
        assert!(cfg.stream_enabled);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "bind_addr": "127.0.0.1:8080", "stream_enabled": false }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.bind_addr, "127.0.0.1:8080");
        assert!(!cfg.stream_enabled);
        assert_eq!(cfg.poll_interval_secs, 30);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = Config::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.bind_addr, cfg2.bind_addr);
        assert_eq!(cfg.poll_interval_secs, cfg2.poll_interval_secs);
    }
}
