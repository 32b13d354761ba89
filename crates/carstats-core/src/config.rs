//! Configuration for a carstats session.
//!
//! Stored as JSON. Every section has defaults, so a partial file (or none at
//! all) is valid:
//!
//! ```json
//! {
//!   "client": { "rpc_timeout_ms": 1500, "poll_interval_ms": 250 },
//!   "monitors": { "oil_temp": { "low_threshold": 90.0 } },
//!   "providers": []
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::simulated::SimulatedProviderConfig;

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Settings of the aggregation client itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Upper bound on any single provider call.
    pub rpc_timeout_ms: u64,
    /// Period of the measurement poller.
    pub poll_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_ms: 2000,
            poll_interval_ms: 250,
        }
    }
}

impl ClientConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ---------------------------------------------------------------------------
// Monitors
// ---------------------------------------------------------------------------

/// Oil temperature monitor thresholds, in °C.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OilTempConfig {
    pub enabled: bool,
    /// Operating temperature.
    pub low_threshold: f64,
    /// Overheat warning temperature.
    pub high_threshold: f64,
    pub hysteresis: f64,
}

impl Default for OilTempConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            low_threshold: 85.0,
            high_threshold: 120.0,
            hysteresis: 1.0,
        }
    }
}

/// Boost pressure monitor limit, in psi.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostConfig {
    pub enabled: bool,
    pub max_pressure: f64,
    pub hysteresis: f64,
}

impl Default for BoostConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_pressure: 20.0,
            hysteresis: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub oil_temp: OilTempConfig,
    pub boost: BoostConfig,
}

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub client: ClientConfig,
    pub monitors: MonitorConfig,
    /// Simulated providers, in priority order. Empty means "use the demo
    /// fleet" for the CLI.
    pub providers: Vec<SimulatedProviderConfig>,
}

impl Config {
    /// Read, parse and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.rpc_timeout_ms == 0 {
            return Err(invalid("client.rpc_timeout_ms", "must be greater than zero"));
        }
        if self.client.poll_interval_ms == 0 {
            return Err(invalid(
                "client.poll_interval_ms",
                "must be greater than zero",
            ));
        }

        let oil = &self.monitors.oil_temp;
        if oil.low_threshold >= oil.high_threshold {
            return Err(invalid(
                "monitors.oil_temp",
                format!(
                    "low threshold {} must be below high threshold {}",
                    oil.low_threshold, oil.high_threshold
                ),
            ));
        }
        if oil.hysteresis < 0.0 || self.monitors.boost.hysteresis < 0.0 {
            return Err(invalid("monitors.*.hysteresis", "must not be negative"));
        }
        if self.monitors.boost.max_pressure <= 0.0 {
            return Err(invalid("monitors.boost.max_pressure", "must be positive"));
        }

        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if !seen.insert(&provider.identity) {
                return Err(invalid(
                    "providers",
                    format!("duplicate provider identity {}", provider.identity),
                ));
            }
        }
        Ok(())
    }
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.into(),
    }
}
