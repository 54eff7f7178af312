//! Worker settings: optional TOML file plus `AUTO_TRADER__*` environment overrides

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use portfolio_risk::RiskConfig;
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "AUTO_TRADER";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Postgres URL; falls back to `DATABASE_URL`
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub executor: ExecutorSettings,

    #[serde(default)]
    pub logging: LogSettings,

    #[serde(default)]
    pub copy_trading: CopyTradingSettings,

    #[serde(default)]
    pub entitlements: EntitlementSettings,

    #[serde(default)]
    pub risk: RiskConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Run ticks internally at this interval; `None` leaves scheduling to an external caller
    #[serde(default)]
    pub tick_interval_secs: Option<u64>,

    #[serde(default = "default_max_connections")]
    pub max_db_connections: u32,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            tick_interval_secs: None,
            max_db_connections: default_max_connections(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSettings {
    /// Execution service URL; required unless `dry_run`
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Use the paper executor instead of the execution service
    #[serde(default = "default_true")]
    pub dry_run: bool,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_timeout_secs(),
            api_key: None,
            dry_run: true,
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyTradingSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for CopyTradingSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Capabilities granted to every user when no plan service is wired in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitlementSettings {
    #[serde(default = "default_true")]
    pub automated_bots: bool,

    #[serde(default)]
    pub futures_trading: bool,
}

impl Default for EntitlementSettings {
    fn default() -> Self {
        Self {
            automated_bots: true,
            futures_trading: false,
        }
    }
}

impl WorkerSettings {
    /// Load from an optional file, then apply environment overrides
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read worker settings")?
            .try_deserialize::<WorkerSettings>()
            .context("Invalid worker settings")?;

        Ok(settings)
    }

    pub fn database_url(&self) -> Option<String> {
        self.database_url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portfolio_risk::RiskFailMode;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = WorkerSettings::default();
        assert_eq!(settings.server.bind_address, "0.0.0.0:8080");
        assert!(settings.executor.dry_run);
        assert!(settings.copy_trading.enabled);
        assert!(settings.entitlements.automated_bots);
        assert_eq!(settings.risk.fail_mode, RiskFailMode::FailOpen);
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("auto-trader-{}.toml", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[server]
tick_interval_secs = 60

[executor]
endpoint = "http://executor:9000/execute"
dry_run = false

[risk]
fail_mode = "fail_closed"
"#
        )
        .unwrap();

        let settings = WorkerSettings::load(path.to_str()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.server.tick_interval_secs, Some(60));
        assert_eq!(settings.executor.endpoint.as_deref(), Some("http://executor:9000/execute"));
        assert!(!settings.executor.dry_run);
        assert_eq!(settings.executor.timeout_secs, 30);
        assert_eq!(settings.risk.fail_mode, RiskFailMode::FailClosed);
    }
}
