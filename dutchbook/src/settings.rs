//! Layered settings: a TOML file overlaid with `DUTCHBOOK_*` environment
//! variables. Venue sections are optional; a venue without credentials runs
//! with degraded coverage.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use dutchbook_data::normalizer::TokenRegistry;
use dutchbook_engine::pairs::MarketPair;
use dutchbook_engine::EngineConfig;
use dutchbook_instrument::{DurationClass, MarketProfile, Outcome, Venue};
use serde::Deserialize;
use smol_str::SmolStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("failed to read {path}: {source}")]
    KeyFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub app: AppSettings,
    #[serde(default)]
    pub kalshi: Option<KalshiSettings>,
    #[serde(default)]
    pub polymarket: Option<PolymarketSettings>,
    #[serde(default)]
    pub trading: EngineConfig,
    #[serde(default)]
    pub markets: MarketSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Bind address for the control plane.
    pub control_addr: String,
    /// Trade log path (JSON lines).
    pub trade_log: PathBuf,
    /// Balance refresh cadence in seconds.
    pub balance_refresh_secs: u64,
    /// Polygon JSON-RPC endpoint.
    pub polygon_rpc_url: String,
    /// Flat per-transaction gas allowance in USDC.
    pub gas_allowance_usdc: rust_decimal::Decimal,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            control_addr: "127.0.0.1:8080".to_string(),
            trade_log: PathBuf::from("./trades.jsonl"),
            balance_refresh_secs: 30,
            polygon_rpc_url: "https://polygon-rpc.com".to_string(),
            gas_allowance_usdc: rust_decimal::Decimal::new(5, 3),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KalshiSettings {
    pub api_key: String,
    /// PEM string; takes precedence over the file path.
    #[serde(default)]
    pub private_key_pem: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    #[serde(default)]
    pub demo: bool,
}

impl KalshiSettings {
    /// Resolve the private key material.
    pub fn private_key(&self) -> Result<String, SettingsError> {
        if let Some(pem) = &self.private_key_pem {
            return Ok(pem.clone());
        }
        let path = self.private_key_path.clone().unwrap_or_default();
        std::fs::read_to_string(&path).map_err(|source| SettingsError::KeyFile { path, source })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolymarketSettings {
    pub api_key: String,
    pub api_secret: String,
    pub api_passphrase: String,
    pub wallet_address: String,
    /// Hex private key for EIP-712 signing and the Polygon signer.
    pub private_key: String,
    #[serde(default)]
    pub neg_risk: bool,
}

/// Monitored markets.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarketSettings {
    #[serde(default)]
    pub polymarket: Vec<PolymarketMarket>,
    #[serde(default)]
    pub kalshi: Vec<KalshiMarket>,
    /// Cross-venue whitelist: (kalshi_ticker, polymarket_condition_id).
    #[serde(default)]
    pub cross_venue: Vec<(String, String)>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolymarketMarket {
    pub condition_id: String,
    pub yes_token: String,
    pub no_token: String,
    #[serde(default)]
    pub crypto: bool,
    #[serde(default)]
    pub duration: DurationClass,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KalshiMarket {
    pub ticker: String,
    #[serde(default)]
    pub crypto: bool,
    #[serde(default)]
    pub duration: DurationClass,
}

impl Settings {
    /// Load from an optional TOML file overlaid with environment variables
    /// (`DUTCHBOOK_KALSHI__API_KEY=...`).
    pub fn load(path: Option<&str>) -> Result<Self, SettingsError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            builder = builder.add_source(config::File::with_name("dutchbook").required(false));
        }
        let loaded = builder
            .add_source(config::Environment::with_prefix("DUTCHBOOK").separator("__"))
            .build()?;
        Ok(loaded.try_deserialize()?)
    }

    /// Monitored pairings: one intra pairing per market, plus the
    /// whitelisted cross-venue pairings in both directions.
    pub fn pairs(&self) -> Vec<MarketPair> {
        let kalshi_profiles: HashMap<&str, MarketProfile> = self
            .markets
            .kalshi
            .iter()
            .map(|market| {
                (
                    market.ticker.as_str(),
                    MarketProfile::new(market.crypto, market.duration),
                )
            })
            .collect();
        let poly_profiles: HashMap<&str, MarketProfile> = self
            .markets
            .polymarket
            .iter()
            .map(|market| {
                (
                    market.condition_id.as_str(),
                    MarketProfile::new(market.crypto, market.duration),
                )
            })
            .collect();

        let mut pairs = Vec::new();
        for market in &self.markets.polymarket {
            pairs.push(MarketPair::intra(
                Venue::Polymarket,
                market.condition_id.as_str(),
                poly_profiles[market.condition_id.as_str()],
            ));
        }
        for market in &self.markets.kalshi {
            pairs.push(MarketPair::intra(
                Venue::Kalshi,
                market.ticker.as_str(),
                kalshi_profiles[market.ticker.as_str()],
            ));
        }
        for (ticker, condition) in &self.markets.cross_venue {
            let profile = kalshi_profiles
                .get(ticker.as_str())
                .or_else(|| poly_profiles.get(condition.as_str()))
                .copied()
                .unwrap_or_default();
            let cross = MarketPair::cross(ticker.as_str(), condition.as_str(), profile);
            pairs.push(cross.flipped());
            pairs.push(cross);
        }
        pairs
    }

    /// Token registry for the normalizer (asset id -> condition, outcome).
    pub fn token_registry(&self) -> TokenRegistry {
        let mut registry = TokenRegistry::default();
        for market in &self.markets.polymarket {
            registry.insert(
                market.yes_token.as_str(),
                market.condition_id.as_str(),
                Outcome::Yes,
            );
            registry.insert(
                market.no_token.as_str(),
                market.condition_id.as_str(),
                Outcome::No,
            );
        }
        registry
    }

    /// Token map for the execution client ((condition, outcome) -> asset id).
    pub fn token_map(&self) -> HashMap<(SmolStr, Outcome), SmolStr> {
        let mut map = HashMap::new();
        for market in &self.markets.polymarket {
            map.insert(
                (SmolStr::new(&market.condition_id), Outcome::Yes),
                SmolStr::new(&market.yes_token),
            );
            map.insert(
                (SmolStr::new(&market.condition_id), Outcome::No),
                SmolStr::new(&market.no_token),
            );
        }
        map
    }

    /// Engine configuration with the cross-venue whitelist folded in.
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = self.trading.clone();
        let whitelist: HashSet<(SmolStr, SmolStr)> = self
            .markets
            .cross_venue
            .iter()
            .map(|(ticker, condition)| (SmolStr::new(ticker), SmolStr::new(condition)))
            .collect();
        config.cross_platform_whitelist = whitelist;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Settings {
        let toml = r#"
            [app]
            control_addr = "127.0.0.1:9999"
            trade_log = "/tmp/trades.jsonl"
            balance_refresh_secs = 30
            polygon_rpc_url = "https://polygon-rpc.com"
            gas_allowance_usdc = "0.005"

            [trading]
            min_spread_cents = 2
            crypto_short_duration_min_spread_cents = 4
            max_position_size_usd = "1000"
            balance_fraction = "0.02"
            capacity_cap_contracts = 1000
            min_viable_qty = 1
            enable_live_trading = false
            cross_platform_whitelist = []
            cross_venue_size_factor = "0.5"
            poly_dynamic_fee_ceiling = "0.03"
            merge_max_retries = 3
            hedge_timeout_ms = 3000
            max_hedge_loss_per_contract = "0.05"
            poly_leg_timeout_ms = 500
            kalshi_leg_timeout_ms = 2000
            cross_leg_timeout_ms = 5000
            shutdown_deadline_ms = 30000

            [markets]
            cross_venue = [["KXTEST", "0xcond"]]

            [[markets.polymarket]]
            condition_id = "0xcond"
            yes_token = "111"
            no_token = "222"
            crypto = true
            duration = "min15"

            [[markets.kalshi]]
            ticker = "KXTEST"
        "#;

        let loaded = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap();
        loaded.try_deserialize().unwrap()
    }

    #[test]
    fn test_pairs_and_registry() {
        let settings = sample();
        let pairs = settings.pairs();
        // 1 poly intra + 1 kalshi intra + 2 cross directions.
        assert_eq!(pairs.len(), 4);
        assert!(pairs.iter().any(|p| p.is_cross_venue()));

        let registry = settings.token_registry();
        let (condition, outcome) = registry.resolve("111").unwrap();
        assert_eq!(condition.as_str(), "0xcond");
        assert_eq!(*outcome, Outcome::Yes);

        let map = settings.token_map();
        assert_eq!(
            map[&(SmolStr::new("0xcond"), Outcome::No)].as_str(),
            "222"
        );
    }

    #[test]
    fn test_whitelist_folded_into_engine_config() {
        let settings = sample();
        let config = settings.engine_config();
        assert!(config
            .cross_platform_whitelist
            .contains(&(SmolStr::new("KXTEST"), SmolStr::new("0xcond"))));
        assert!(!config.enable_live_trading);
    }

    #[test]
    fn test_crypto_profile_carried_to_pairs() {
        let settings = sample();
        let pairs = settings.pairs();
        let poly = pairs
            .iter()
            .find(|p| !p.is_cross_venue() && p.yes.venue == Venue::Polymarket)
            .unwrap();
        assert!(poly.profile.is_short_duration_crypto());
    }
}
