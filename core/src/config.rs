//! Engine-wide configuration loaded from environment variables.
//!
//! Mirrors `services/execution_service_rust/src/config.rs`'s
//! `SafeguardConfig`: a plain struct with a `from_env()` constructor,
//! one `env::var(..).ok().and_then(|v| v.parse().ok()).unwrap_or(default)`
//! per field, a `log_config()` diagnostic, and `Default` delegating to
//! `from_env()`.

use std::env;

/// Default goal tick frequency in Hz (spec §6: `GOAL_TICK_FREQ_HZ`,
/// default 10, commonly overridden to 100 for fast-moving scenarios).
pub const DEFAULT_TICK_FREQ_HZ: f64 = 10.0;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `GOALDSL_ZERO_LOGS` — disable logging entirely.
    pub zero_logs: bool,
    /// `GOALDSL_LOG_LEVEL` — standard level name, default "INFO".
    pub log_level: String,
    /// `GOAL_TICK_FREQ_HZ` — default goal tick frequency.
    pub tick_freq_hz: f64,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            zero_logs: env::var("GOALDSL_ZERO_LOGS").map(|v| v == "1").unwrap_or(false),

            log_level: env::var("GOALDSL_LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),

            tick_freq_hz: env::var("GOAL_TICK_FREQ_HZ")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_TICK_FREQ_HZ),
        }
    }

    pub fn log_config(&self) {
        log::info!("EngineConfig loaded:");
        log::info!("  zero_logs: {}", self.zero_logs);
        log::info!("  log_level: {}", self.log_level);
        log::info!("  tick_freq_hz: {}", self.tick_freq_hz);
    }

    pub fn tick_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.tick_freq_hz)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_table() {
        let config = EngineConfig {
            zero_logs: false,
            log_level: "INFO".to_string(),
            tick_freq_hz: DEFAULT_TICK_FREQ_HZ,
        };
        assert!(!config.zero_logs);
        assert_eq!(config.log_level, "INFO");
        assert_eq!(config.tick_freq_hz, 10.0);
    }

    #[test]
    fn tick_period_is_inverse_of_frequency() {
        let config = EngineConfig { zero_logs: false, log_level: "INFO".into(), tick_freq_hz: 100.0 };
        assert_eq!(config.tick_period(), std::time::Duration::from_millis(10));
    }
}
