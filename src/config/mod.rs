//! Configuration management for PaperTrail
//!
//! Loads built-in defaults, optional `config/default` and `config/local`
//! files, then `PAPERTRAIL__SECTION__KEY` environment overrides (.env first).

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::recorder::DEFAULT_RISK_CAPITAL;
use crate::strategy::{SizingPreset, DEFAULT_COOLDOWN_SECS};
use crate::types::Asset;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub feed: FeedConfig,
    pub store: StoreConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Assets to track
    pub assets: Vec<String>,
    /// Scheduling tick interval in milliseconds
    pub tick_interval_ms: u64,
    /// Per-asset cooldown between admitted signals
    pub signal_cooldown_secs: i64,
    /// Money at risk per position
    pub risk_capital: f64,
    /// Position sizing preset
    pub preset: SizingPreset,
    /// Port for the manual-close control endpoint
    pub control_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// WebSocket URL of the tick stream
    pub url: String,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Consecutive failures before the long cool-down
    pub max_consecutive_failures: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Base URL of the shared store
    pub url: String,
    /// Per-request timeout
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    /// Directory holding state.json
    pub data_dir: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of the human format
    pub json: bool,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        Self::load_from("config/default")
    }

    /// Same layering as [`AppConfig::load`] with a custom base file
    pub fn load_from(base_file: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Engine defaults
            .set_default("engine.assets", vec!["BTC", "ETH"])?
            .set_default("engine.tick_interval_ms", 1000)?
            .set_default("engine.signal_cooldown_secs", DEFAULT_COOLDOWN_SECS)?
            .set_default("engine.risk_capital", DEFAULT_RISK_CAPITAL)?
            .set_default("engine.preset", "conservative")?
            .set_default("engine.control_port", 8091)?
            // Feed defaults
            .set_default("feed.url", "ws://127.0.0.1:8080/prices")?
            .set_default("feed.base_delay_ms", 1000)?
            .set_default("feed.max_delay_ms", 60000)?
            .set_default("feed.max_consecutive_failures", 10)?
            // Store client defaults
            .set_default("store.url", "http://127.0.0.1:8090")?
            .set_default("store.timeout_ms", 3000)?
            // Store server defaults
            .set_default("server.port", 8090)?
            .set_default("server.data_dir", "./data")?
            .set_default("logging.json", false)?
            .add_source(File::with_name(base_file).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (PAPERTRAIL__*)
            .add_source(Environment::with_prefix("PAPERTRAIL").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        app_config.validate()?;

        Ok(app_config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.tracked_assets().is_empty() {
            bail!("engine.assets must name at least one of BTC, ETH");
        }
        if self.engine.tick_interval_ms == 0 {
            bail!("engine.tick_interval_ms must be positive");
        }
        if !self.engine.risk_capital.is_finite() || self.engine.risk_capital <= 0.0 {
            bail!("engine.risk_capital must be a positive number");
        }
        Ok(())
    }

    /// Parsed, de-duplicated asset list; unknown names are skipped
    pub fn tracked_assets(&self) -> Vec<Asset> {
        let mut assets = Vec::new();
        for name in &self.engine.assets {
            match Asset::from_str(name) {
                Some(asset) if !assets.contains(&asset) => assets.push(asset),
                Some(_) => {}
                None => tracing::warn!(asset = %name, "[CONFIG] Ignoring unknown asset"),
            }
        }
        assets
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "assets={:?} preset={:?} tick_ms={} cooldown_s={} risk=${:.2} store={}",
            self.engine.assets,
            self.engine.preset,
            self.engine.tick_interval_ms,
            self.engine.signal_cooldown_secs,
            self.engine.risk_capital,
            self.store.url
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
