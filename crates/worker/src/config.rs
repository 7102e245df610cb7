//! Worker configuration loaded from environment variables.

use std::time::Duration;

/// Worker configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `STEP_TIMEOUT_SECS` — per-step completion deadline (default: none)
/// - `MAX_CAS_RETRIES` — version-conflict retry bound (default: `5`)
/// - `DEADLINE_TICK_MS` — deadline monitor sweep interval (default: `500`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub step_timeout_secs: Option<u64>,
    pub max_cas_retries: u32,
    pub deadline_tick_ms: u64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            step_timeout_secs: std::env::var("STEP_TIMEOUT_SECS")
                .ok()
                .and_then(|t| t.parse().ok()),
            max_cas_retries: std::env::var("MAX_CAS_RETRIES")
                .ok()
                .and_then(|r| r.parse().ok())
                .unwrap_or(5),
            deadline_tick_ms: std::env::var("DEADLINE_TICK_MS")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(500),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the per-step completion deadline, if configured.
    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_secs.map(Duration::from_secs)
    }

    /// Returns the deadline monitor sweep interval.
    pub fn deadline_tick(&self) -> Duration {
        Duration::from_millis(self.deadline_tick_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            step_timeout_secs: None,
            max_cas_retries: 5,
            deadline_tick_ms: 500,
        }
    }
}
