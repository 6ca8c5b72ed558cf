//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `thermo.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - DeviceConfig: where the device lives and its two well-known paths.
//!     - SeriesConfig: buffer capacity.
//!     - StreamConfig: reconnect delay (and optional backoff growth).
//!     - RefreshConfig: fallback history refresh cadence.
//!     - ServerConfig / LoggingConfig: the host side.
//!
//! ==============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use url::Url;

use crate::ingest::RefreshSchedule;
use crate::stream::{socket_url, ReconnectPolicy};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub series: SeriesConfig,
    pub stream: StreamConfig,
    pub refresh: RefreshConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeviceConfig {
    pub base_url: String,
    pub history_path: String,
    pub stream_path: String,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SeriesConfig {
    pub capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StreamConfig {
    pub reconnect_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RefreshConfig {
    pub interval_ms: u64,
    pub stale_after_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://192.168.4.1".to_string(),
            history_path: "/temperature_log.csv".to_string(),
            stream_path: "/ws".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self { capacity: crate::series::DEFAULT_CAPACITY }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 5000,
            backoff_multiplier: 1.0,
            max_reconnect_delay_ms: 5000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self { interval_ms: 30_000, stale_after_ms: 30_000 }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:3000".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

/// searched in order by `load_or_default`
const SEARCH_PATHS: [&str; 2] = ["config/thermo.toml", "../config/thermo.toml"];

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("loading {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(content).context("invalid toml")?;
        config.validate()?;
        Ok(config)
    }

    /// first candidate that exists and loads cleanly; broken files are
    /// reported and skipped
    pub fn load_first(candidates: &[PathBuf]) -> Option<(PathBuf, Self)> {
        candidates.iter().filter(|path| path.is_file()).find_map(|path| {
            match Self::load(path) {
                Ok(config) => Some((path.clone(), config)),
                Err(e) => {
                    eprintln!("config: skipping {}: {:#}", path.display(), e);
                    None
                }
            }
        })
    }

    /// config from the first search path, or built-in defaults
    pub fn load_or_default() -> Self {
        let candidates: Vec<PathBuf> = SEARCH_PATHS.iter().map(PathBuf::from).collect();
        match Self::load_first(&candidates) {
            Some((path, config)) => {
                println!("config: using {}", path.display());
                config
            }
            None => {
                println!("config: no thermo.toml found, using defaults");
                Self::default()
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.series.capacity == 0 {
            anyhow::bail!("series.capacity must be at least 1");
        }
        if self.stream.reconnect_delay_ms == 0 {
            anyhow::bail!("stream.reconnect_delay_ms must be positive");
        }
        let multiplier = self.stream.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            anyhow::bail!("stream.backoff_multiplier must be a finite number >= 1.0, got {multiplier}");
        }
        if self.device.request_timeout_ms == 0 || self.stream.connect_timeout_ms == 0 {
            anyhow::bail!("device.request_timeout_ms and stream.connect_timeout_ms must be positive");
        }
        if self.refresh.interval_ms == 0 {
            anyhow::bail!("refresh.interval_ms must be positive");
        }
        self.history_url()?;
        self.stream_url()?;
        Ok(())
    }

    fn base_url(&self) -> anyhow::Result<Url> {
        Url::parse(&self.device.base_url)
            .map_err(|e| anyhow::anyhow!("Invalid device.base_url {:?}: {}", self.device.base_url, e))
    }

    pub fn history_url(&self) -> anyhow::Result<Url> {
        Ok(self.base_url()?.join(&self.device.history_path)?)
    }

    /// ws for an http device, wss for https
    pub fn stream_url(&self) -> anyhow::Result<Url> {
        Ok(socket_url(&self.base_url()?, &self.device.stream_path)?)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(self.stream.reconnect_delay_ms),
            multiplier: self.stream.backoff_multiplier,
            max_delay: Duration::from_millis(self.stream.max_reconnect_delay_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.device.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.stream.connect_timeout_ms)
    }

    pub fn refresh_schedule(&self) -> RefreshSchedule {
        RefreshSchedule {
            interval: Duration::from_millis(self.refresh.interval_ms),
            stale_after: Duration::from_millis(self.refresh.stale_after_ms),
        }
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("┌─────────────────────────────────────────┐");
        println!("│          THERMO CONFIGURATION           │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Device: {}", self.device.base_url);
        println!("│ Capacity: {} readings", self.series.capacity);
        println!("│ Reconnect Delay: {}ms", self.stream.reconnect_delay_ms);
        println!("│ Refresh Interval: {}ms", self.refresh.interval_ms);
        println!("│ Dashboard: {}", self.server.bind);
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}
