//! Application configuration: a handful of scalar settings overlaid from the
//! environment via the teacher's `config` crate dependency. Everything with
//! actual shape (constraint registries, fee schedules, phase schedules) is a
//! value type constructed by the caller and passed directly to the relevant
//! component — this module only covers the few knobs a deployment actually
//! wants to flip without a recompile.
//!
//! Grounded on the teacher's `config::CacheConfig::from_env()` /
//! `PriceFeedConfig` pattern (small `Deserialize` struct, `serde(default)`
//! per field, loaded once at startup) and the `config` crate's standard
//! `Config::builder().add_source(Environment::...)` idiom.

use serde::Deserialize;
use std::time::Duration;

fn default_port() -> u16 {
    8080
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_log_filter() -> String {
    "exchange_core=info,tower_http=info".to_string()
}

fn default_coordinator_timeout_ms() -> u64 {
    500
}

fn default_max_pending_requests() -> usize {
    10_000
}

fn default_cleanup_interval_secs() -> u64 {
    30
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_phase_poll_interval_ms() -> u64 {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Default time a registered request waits for pipeline completion
    /// before the coordinator synthesises a timeout.
    #[serde(default = "default_coordinator_timeout_ms")]
    pub coordinator_timeout_ms: u64,

    #[serde(default = "default_max_pending_requests")]
    pub max_pending_requests: usize,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Bound on every pipeline stage's channel.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How often the phase-transition poller re-resolves the schedule.
    #[serde(default = "default_phase_poll_interval_ms")]
    pub phase_poll_interval_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            environment: default_environment(),
            log_filter: default_log_filter(),
            coordinator_timeout_ms: default_coordinator_timeout_ms(),
            max_pending_requests: default_max_pending_requests(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            queue_capacity: default_queue_capacity(),
            phase_poll_interval_ms: default_phase_poll_interval_ms(),
        }
    }
}

impl AppConfig {
    /// Overlay environment variables prefixed `EXCHANGE_` (e.g.
    /// `EXCHANGE_PORT`) onto the defaults above. Never reads a config file —
    /// the core has no opinion on deployment-time file formats.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::with_prefix("EXCHANGE").separator("__"))
            .build()?
            .try_deserialize()
    }

    pub fn coordinator_timeout(&self) -> Duration {
        Duration::from_millis(self.coordinator_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn phase_poll_interval(&self) -> Duration {
        Duration::from_millis(self.phase_poll_interval_ms)
    }

    pub fn coordinator_config(&self) -> crate::coordinator::CoordinatorConfig {
        crate::coordinator::CoordinatorConfig {
            default_timeout: self.coordinator_timeout(),
            max_pending_requests: self.max_pending_requests,
            cleanup_interval: self.cleanup_interval(),
            request_id_prefix: "req".to_string(),
        }
    }

    pub fn pipeline_config(&self) -> crate::pipeline::PipelineConfig {
        crate::pipeline::PipelineConfig {
            queue_capacity: self.queue_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let config = AppConfig::default();
        assert_eq!(config.coordinator_timeout(), Duration::from_millis(500));
        assert_eq!(config.pipeline_config().queue_capacity, 1024);
    }
}
