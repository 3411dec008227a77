//! Runtime configuration (ambient stack; SPEC_FULL.md §3).
//!
//! Loaded from environment variables (optionally seeded by a `.env` file,
//! the way the teacher's `main.rs` calls `dotenv().ok()` before reading
//! `env::var`), falling back to the defaults `spec.md` states explicitly.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// §4.1: "up to 3 retries" with "attempt i waits 5s × i".
    pub webhook_max_retries: u32,
    pub webhook_backoff_base_secs: u64,
    /// §4.1: "2xx response within 10s".
    pub webhook_timeout_secs: u64,
    /// §4.1: "failure_count >= 20" recommended default.
    pub webhook_auto_deactivate_threshold: u32,
    /// §4.3: "Default extension_seconds is 60."
    pub auction_default_extension_secs: i64,
    /// §4.4: "A configurable percentage (default 2.5%)".
    pub platform_fee_percent: rust_decimal::Decimal,
    /// §4.5 / §3: "max_retries (default 3)".
    pub task_default_max_retries: u32,
    /// §5: bounded per-subscriber real-time fan-out queue depth.
    pub event_bus_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        use rust_decimal_macros::dec;
        Self {
            webhook_max_retries: 3,
            webhook_backoff_base_secs: 5,
            webhook_timeout_secs: 10,
            webhook_auto_deactivate_threshold: 20,
            auction_default_extension_secs: 60,
            platform_fee_percent: dec!(0.025),
            task_default_max_retries: 3,
            event_bus_capacity: 1024,
        }
    }
}

/// Optional overlay file (§3: "optionally overlaid by a toml file"). Every
/// field is optional so a file only needs to name the knobs it overrides;
/// anything absent falls through to the built-in default.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    webhook_max_retries: Option<u32>,
    webhook_backoff_base_secs: Option<u64>,
    webhook_timeout_secs: Option<u64>,
    webhook_auto_deactivate_threshold: Option<u32>,
    auction_default_extension_secs: Option<i64>,
    platform_fee_percent: Option<rust_decimal::Decimal>,
    task_default_max_retries: Option<u32>,
    event_bus_capacity: Option<usize>,
}

impl Config {
    /// Layers config sources the way the teacher's `main.rs` assembles
    /// `AppState`: defaults, then an optional `SWARMMARKET_CONFIG_FILE` TOML
    /// file (or `swarmmarket.toml` in the working directory), then
    /// environment variables on top — each layer overriding the last.
    /// Missing or unparsable values silently fall back rather than failing
    /// startup, matching the teacher's
    /// `env::var(...).ok().and_then(...).unwrap_or(default)` style in
    /// `DataSourceKillSwitch::new`.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let mut config = Self::default();

        let file_path = env::var("SWARMMARKET_CONFIG_FILE").unwrap_or_else(|_| "swarmmarket.toml".to_string());
        if let Ok(contents) = std::fs::read_to_string(&file_path) {
            match toml::from_str::<ConfigFile>(&contents) {
                Ok(file) => config.apply_file(file),
                Err(err) => tracing::warn!(path = %file_path, error = %err, "ignoring unparsable config file"),
            }
        }

        config.apply_env();
        config
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(v) = file.webhook_max_retries {
            self.webhook_max_retries = v;
        }
        if let Some(v) = file.webhook_backoff_base_secs {
            self.webhook_backoff_base_secs = v;
        }
        if let Some(v) = file.webhook_timeout_secs {
            self.webhook_timeout_secs = v;
        }
        if let Some(v) = file.webhook_auto_deactivate_threshold {
            self.webhook_auto_deactivate_threshold = v;
        }
        if let Some(v) = file.auction_default_extension_secs {
            self.auction_default_extension_secs = v;
        }
        if let Some(v) = file.platform_fee_percent {
            self.platform_fee_percent = v;
        }
        if let Some(v) = file.task_default_max_retries {
            self.task_default_max_retries = v;
        }
        if let Some(v) = file.event_bus_capacity {
            self.event_bus_capacity = v;
        }
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_parse("SWARMMARKET_WEBHOOK_MAX_RETRIES") {
            self.webhook_max_retries = v;
        }
        if let Some(v) = env_parse("SWARMMARKET_WEBHOOK_BACKOFF_BASE_SECS") {
            self.webhook_backoff_base_secs = v;
        }
        if let Some(v) = env_parse("SWARMMARKET_WEBHOOK_TIMEOUT_SECS") {
            self.webhook_timeout_secs = v;
        }
        if let Some(v) = env_parse("SWARMMARKET_WEBHOOK_AUTO_DEACTIVATE_THRESHOLD") {
            self.webhook_auto_deactivate_threshold = v;
        }
        if let Some(v) = env_parse("SWARMMARKET_AUCTION_EXTENSION_SECS") {
            self.auction_default_extension_secs = v;
        }
        if let Some(v) = env::var("SWARMMARKET_PLATFORM_FEE_PERCENT").ok().and_then(|v| v.parse().ok()) {
            self.platform_fee_percent = v;
        }
        if let Some(v) = env_parse("SWARMMARKET_TASK_MAX_RETRIES") {
            self.task_default_max_retries = v;
        }
        if let Some(v) = env_parse("SWARMMARKET_EVENT_BUS_CAPACITY") {
            self.event_bus_capacity = v;
        }
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    pub fn webhook_backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.webhook_backoff_base_secs * attempt as u64)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
