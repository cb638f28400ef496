use serde::Deserialize;
use std::time::Duration;

use crate::error::{BroadcastError, BroadcastResult};

/// Root application configuration. Loaded from environment variables
/// with the prefix `BROADCAST_EXPRESS__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
}

/// Quota and pacing settings for a broadcast dispatcher.
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    /// Maximum cumulative weight packed into one batch.
    #[serde(default = "default_rate_limit_amount")]
    pub rate_limit_amount: u64,
    /// Pacing delay between batches and after failed sends.
    #[serde(default = "default_rate_limit_time_ms")]
    pub rate_limit_time_ms: u64,
    /// Provider-wide operation ceiling the preflight check protects.
    #[serde(default = "default_global_rate_limit")]
    pub global_rate_limit: u64,
    /// Already-open sessions are counted as `open / divisor` quota pressure.
    #[serde(default = "default_open_session_pressure_divisor")]
    pub open_session_pressure_divisor: u64,
    #[serde(default = "default_new_session_cost")]
    pub new_session_cost: u64,
    #[serde(default = "default_reused_session_cost")]
    pub reused_session_cost: u64,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_rate_limit_amount() -> u64 {
    1000
}
fn default_rate_limit_time_ms() -> u64 {
    1000 * 60 * 5
}
fn default_global_rate_limit() -> u64 {
    10_000
}
fn default_open_session_pressure_divisor() -> u64 {
    2
}
fn default_new_session_cost() -> u64 {
    3
}
fn default_reused_session_cost() -> u64 {
    1
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            rate_limit_amount: default_rate_limit_amount(),
            rate_limit_time_ms: default_rate_limit_time_ms(),
            global_rate_limit: default_global_rate_limit(),
            open_session_pressure_divisor: default_open_session_pressure_divisor(),
            new_session_cost: default_new_session_cost(),
            reused_session_cost: default_reused_session_cost(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            broadcast: BroadcastConfig::default(),
        }
    }
}

impl BroadcastConfig {
    pub fn rate_limit_time(&self) -> Duration {
        Duration::from_millis(self.rate_limit_time_ms)
    }

    /// Whether sessions already open on the transport put the run at risk of
    /// crossing the provider-wide ceiling before the first batch.
    pub fn exceeds_global_ceiling(&self, open_sessions: usize) -> bool {
        let pressure = open_sessions as f64 / self.open_session_pressure_divisor as f64;
        let headroom = self.global_rate_limit as f64 - self.rate_limit_amount as f64;
        pressure > headroom
    }

    pub fn validate(&self) -> BroadcastResult<()> {
        if self.rate_limit_amount == 0 {
            return Err(BroadcastError::Config(
                "rate_limit_amount must be greater than 0".into(),
            ));
        }
        if self.open_session_pressure_divisor == 0 {
            return Err(BroadcastError::Config(
                "open_session_pressure_divisor must be greater than 0".into(),
            ));
        }
        if self.new_session_cost <= self.reused_session_cost {
            return Err(BroadcastError::Config(format!(
                "new_session_cost ({}) must exceed reused_session_cost ({})",
                self.new_session_cost, self.reused_session_cost
            )));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("BROADCAST_EXPRESS")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
