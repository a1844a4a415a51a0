//! Configuration - Type-safe, validated config
//!
//! Loads from `config.toml` at the project root. Every field has a default,
//! so a partial file (or no file at all) is valid.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::core::{Error, Result};
use crate::risk::MetricLimit;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,

    #[serde(default)]
    pub exchange: ExchangeConfig,

    #[serde(default)]
    pub simulation: SimulationConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub risk: RiskConfig,

    #[serde(default)]
    pub latency: LatencyConfig,

    #[serde(default)]
    pub compliance: ComplianceConfig,

    #[serde(default)]
    pub stress: StressConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,

    /// Fallback log filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_app_name() -> String {
    "hft-platform".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

/// Connector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// "fix" or "websocket"
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// API key (loaded from HFT_API_KEY if not provided)
    #[serde(default)]
    pub api_key: Option<String>,

    /// API secret (loaded from HFT_API_SECRET if not provided)
    #[serde(default)]
    pub api_secret: Option<String>,

    /// Capacity of the outbound order and inbound market data queues
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Sleep between run loop iterations
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_protocol() -> String {
    "fix".to_string()
}
fn default_queue_capacity() -> usize {
    1024
}
fn default_poll_interval_ms() -> u64 {
    10
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            api_key: None,
            api_secret: None,
            queue_capacity: default_queue_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Simulated venue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// RNG seed for the price walk
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Interval between venue ticks in the demo
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    #[serde(default = "default_symbols")]
    pub symbols: Vec<SymbolConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolConfig {
    pub symbol: String,
    pub initial_price: f64,
    /// Absolute bid/ask spread
    #[serde(default = "default_spread")]
    pub spread: f64,
    /// Per-tick shock amplitude as a fraction of price
    #[serde(default = "default_volatility")]
    pub volatility: f64,
    /// Quantity available at the touch per side
    #[serde(default = "default_liquidity")]
    pub liquidity: f64,
}

fn default_seed() -> u64 {
    42
}
fn default_tick_interval_ms() -> u64 {
    100
}
fn default_spread() -> f64 {
    0.02
}
fn default_volatility() -> f64 {
    0.002
}
fn default_liquidity() -> f64 {
    1_000.0
}
fn default_symbols() -> Vec<SymbolConfig> {
    vec![
        SymbolConfig {
            symbol: "AAPL".to_string(),
            initial_price: 150.0,
            spread: default_spread(),
            volatility: default_volatility(),
            liquidity: default_liquidity(),
        },
        SymbolConfig {
            symbol: "GOOG".to_string(),
            initial_price: 2_800.0,
            spread: 0.5,
            volatility: default_volatility(),
            liquidity: default_liquidity(),
        },
    ]
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            tick_interval_ms: default_tick_interval_ms(),
            symbols: default_symbols(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub twap: TwapConfig,

    #[serde(default)]
    pub vwap: VwapConfig,

    #[serde(default)]
    pub iceberg: IcebergConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwapConfig {
    #[serde(default = "default_twap_total")]
    pub total_quantity: f64,
    #[serde(default = "default_twap_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_twap_duration_ms")]
    pub duration_ms: u64,
}

fn default_twap_total() -> f64 {
    1_000.0
}
fn default_twap_interval_ms() -> u64 {
    1_000
}
fn default_twap_duration_ms() -> u64 {
    10_000
}

impl Default for TwapConfig {
    fn default() -> Self {
        Self {
            total_quantity: default_twap_total(),
            interval_ms: default_twap_interval_ms(),
            duration_ms: default_twap_duration_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VwapConfig {
    #[serde(default = "default_vwap_base")]
    pub base_volume: f64,
    #[serde(default = "default_vwap_min")]
    pub min_volume: f64,
    #[serde(default = "default_vwap_max")]
    pub max_volume: f64,
    /// Fraction of observed market volume a participation slice may take
    #[serde(default = "default_participation_rate")]
    pub participation_rate: f64,
}

fn default_vwap_base() -> f64 {
    500.0
}
fn default_vwap_min() -> f64 {
    100.0
}
fn default_vwap_max() -> f64 {
    1_000.0
}
fn default_participation_rate() -> f64 {
    0.1
}

impl Default for VwapConfig {
    fn default() -> Self {
        Self {
            base_volume: default_vwap_base(),
            min_volume: default_vwap_min(),
            max_volume: default_vwap_max(),
            participation_rate: default_participation_rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcebergConfig {
    #[serde(default = "default_visible_size")]
    pub visible_size: f64,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_visible_size() -> f64 {
    100.0
}
fn default_min_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    5_000
}

impl Default for IcebergConfig {
    fn default() -> Self {
        Self {
            visible_size: default_visible_size(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Pre-trade limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_max_position_size")]
    pub max_position_size: f64,
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: f64,
    #[serde(default = "default_max_loss_per_trade")]
    pub max_loss_per_trade: f64,
    /// Position value at or below which a stop-loss fires (negative)
    #[serde(default = "default_stop_loss_threshold")]
    pub stop_loss_threshold: f64,
    #[serde(default = "default_max_orders_per_minute")]
    pub max_orders_per_minute: usize,
    /// Portfolio metric ceilings checked by the risk manager
    #[serde(default)]
    pub metric_limits: Vec<MetricLimit>,
}

fn default_max_position_size() -> f64 {
    100_000.0
}
fn default_max_daily_loss() -> f64 {
    50_000.0
}
fn default_max_loss_per_trade() -> f64 {
    10_000.0
}
fn default_stop_loss_threshold() -> f64 {
    -20_000.0
}
fn default_max_orders_per_minute() -> usize {
    600
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_size: default_max_position_size(),
            max_daily_loss: default_max_daily_loss(),
            max_loss_per_trade: default_max_loss_per_trade(),
            stop_loss_threshold: default_stop_loss_threshold(),
            max_orders_per_minute: default_max_orders_per_minute(),
            metric_limits: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyConfig {
    #[serde(default = "default_latency_threshold_ms")]
    pub threshold_ms: f64,
    #[serde(default = "default_latency_window")]
    pub window: usize,
}

fn default_latency_threshold_ms() -> f64 {
    5.0
}
fn default_latency_window() -> usize {
    100
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            threshold_ms: default_latency_threshold_ms(),
            window: default_latency_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceConfig {
    /// Cumulative loss allowed across all assets
    #[serde(default = "default_compliance_max_loss")]
    pub max_loss: f64,

    /// JSON-lines audit log; `None` keeps events in the tracing output only
    #[serde(default)]
    pub audit_log: Option<PathBuf>,

    /// Per-asset absolute position limits
    #[serde(default)]
    pub position_limits: HashMap<String, f64>,
}

fn default_compliance_max_loss() -> f64 {
    100_000.0
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            max_loss: default_compliance_max_loss(),
            audit_log: None,
            position_limits: HashMap::new(),
        }
    }
}

/// Portfolio and scenarios for the stress-test binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_stress_assets")]
    pub assets: Vec<StressAssetConfig>,
    #[serde(default = "default_stress_scenarios")]
    pub scenarios: Vec<StressScenarioConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressAssetConfig {
    pub name: String,
    pub value: f64,
    #[serde(default = "default_position_size")]
    pub position_size: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressScenarioConfig {
    pub price_change: f64,
    pub volatility: f64,
    pub liquidity: f64,
}

fn default_position_size() -> f64 {
    1.0
}
fn default_stress_assets() -> Vec<StressAssetConfig> {
    [("Stock A", 500_000.0), ("Bond B", 300_000.0), ("Commodity C", 200_000.0)]
        .into_iter()
        .map(|(name, value)| StressAssetConfig {
            name: name.to_string(),
            value,
            position_size: default_position_size(),
        })
        .collect()
}
fn default_stress_scenarios() -> Vec<StressScenarioConfig> {
    [
        (-0.05, 0.02, 0.8),
        (0.1, 0.05, 0.5),
        (-0.2, 0.1, 0.3),
        (0.3, 0.15, 0.7),
        (-0.1, 0.08, 0.4),
    ]
    .into_iter()
    .map(|(price_change, volatility, liquidity)| StressScenarioConfig {
        price_change,
        volatility,
        liquidity,
    })
    .collect()
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            assets: default_stress_assets(),
            scenarios: default_stress_scenarios(),
        }
    }
}

impl Config {
    /// Load from TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config {}: {}", path.display(), e)))?;

        Self::from_toml(&content)
    }

    /// Parse and validate TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load from the default location (project root config.toml).
    pub fn load_default() -> Self {
        let candidates = [
            "config.toml",
            concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml"),
        ];

        for path in &candidates {
            match Self::load(Path::new(path)) {
                Ok(cfg) => {
                    tracing::info!("📋 Loaded config from {}", path);
                    return cfg;
                }
                Err(e) if Path::new(path).exists() => {
                    tracing::warn!("⚠️ Ignoring {}: {}", path, e);
                }
                Err(_) => {}
            }
        }

        tracing::warn!("⚠️ No config.toml found, using defaults");
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    /// Fill missing credentials from HFT_API_KEY / HFT_API_SECRET
    pub fn apply_env(&mut self) {
        if self.exchange.api_key.is_none() {
            self.exchange.api_key = std::env::var("HFT_API_KEY").ok();
        }
        if self.exchange.api_secret.is_none() {
            self.exchange.api_secret = std::env::var("HFT_API_SECRET").ok();
        }
    }

    pub fn validate(&self) -> Result<()> {
        let twap = &self.execution.twap;
        if twap.total_quantity <= 0.0 {
            return Err(Error::Config("execution.twap.total_quantity must be positive".into()));
        }
        if twap.interval_ms == 0 {
            return Err(Error::Config("execution.twap.interval_ms must be non-zero".into()));
        }
        if twap.duration_ms < twap.interval_ms {
            return Err(Error::Config("execution.twap.duration_ms must be >= interval_ms".into()));
        }

        let vwap = &self.execution.vwap;
        if vwap.base_volume <= 0.0 || vwap.min_volume <= 0.0 {
            return Err(Error::Config("execution.vwap volumes must be positive".into()));
        }
        if vwap.min_volume > vwap.max_volume {
            return Err(Error::Config("execution.vwap.min_volume exceeds max_volume".into()));
        }
        if !(0.0..=1.0).contains(&vwap.participation_rate) || vwap.participation_rate == 0.0 {
            return Err(Error::Config("execution.vwap.participation_rate must be in (0, 1]".into()));
        }

        let iceberg = &self.execution.iceberg;
        if iceberg.visible_size <= 0.0 {
            return Err(Error::Config("execution.iceberg.visible_size must be positive".into()));
        }
        if iceberg.min_delay_ms > iceberg.max_delay_ms {
            return Err(Error::Config("execution.iceberg delay range is inverted".into()));
        }

        for s in &self.simulation.symbols {
            if s.initial_price <= 0.0 || s.liquidity <= 0.0 || s.spread < 0.0 {
                return Err(Error::Config(format!("simulation symbol {} has invalid parameters", s.symbol)));
            }
        }
        if self.simulation.tick_interval_ms == 0 {
            return Err(Error::Config("simulation.tick_interval_ms must be non-zero".into()));
        }

        if self.exchange.queue_capacity == 0 {
            return Err(Error::Config("exchange.queue_capacity must be non-zero".into()));
        }
        if self.latency.window == 0 || self.latency.threshold_ms <= 0.0 {
            return Err(Error::Config("latency window and threshold must be positive".into()));
        }
        if self.risk.max_orders_per_minute == 0 {
            return Err(Error::Config("risk.max_orders_per_minute must be non-zero".into()));
        }

        Ok(())
    }
}
