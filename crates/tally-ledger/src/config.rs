//! # Ledger Configuration
//!
//! Configuration for the ledger services.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TALLY_DATA_DIR=/srv/tally                                          │
//! │     TALLY_DEFAULT_COIN=USD                                             │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tally/ledger.toml (Linux)                                │
//! │     ~/Library/Application Support/com.tally.tally/ledger.toml (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # ledger.toml
//! [storage]
//! data_dir = "/var/lib/tally"   # one <company>.db per company
//! max_connections = 5
//! busy_timeout_ms = 5000
//!
//! [retry]
//! initial_backoff_ms = 20
//! max_backoff_ms = 500
//! max_elapsed_ms = 10000
//!
//! [ledger]
//! default_coin = "ARS"
//!
//! [logging]
//! filter = "info,tally_db=debug"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use tally_core::validation::validate_coin;
use tally_core::DEFAULT_COIN;
use tally_db::{DbConfig, RetryPolicy, TenantRegistry};

use crate::error::{LedgerError, LedgerResult};

// =============================================================================
// Storage Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Directory holding one SQLite file per company.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Pool size per company database.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// How long SQLite waits on a lock before reporting BUSY (milliseconds).
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "tally", "tally")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_busy_timeout() -> u64 {
    5_000
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            data_dir: default_data_dir(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

// =============================================================================
// Retry Settings
// =============================================================================

/// Backoff for transactions that hit SQLITE_BUSY.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Total time a transaction keeps retrying before the error is returned.
    #[serde(default = "default_max_elapsed")]
    pub max_elapsed_ms: u64,
}

fn default_initial_backoff() -> u64 {
    20
}
fn default_max_backoff() -> u64 {
    500
}
fn default_max_elapsed() -> u64 {
    10_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            max_elapsed_ms: default_max_elapsed(),
        }
    }
}

// =============================================================================
// Ledger & Logging Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    /// Coin stamped on payments and on quotas created without one.
    #[serde(default = "default_coin")]
    pub default_coin: String,
}

fn default_coin() -> String {
    DEFAULT_COIN.to_string()
}

impl Default for LedgerSettings {
    fn default() -> Self {
        LedgerSettings {
            default_coin: default_coin(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// `tracing_subscriber::EnvFilter` directive.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        LogSettings {
            filter: default_log_filter(),
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete ledger configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub ledger: LedgerSettings,

    #[serde(default)]
    pub logging: LogSettings,
}

impl LedgerConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (ledger.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> LedgerResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading ledger config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parses a TOML document; missing fields take their defaults.
    pub fn from_toml(contents: &str) -> LedgerResult<Self> {
        let config: LedgerConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        validate_coin(&self.ledger.default_coin)
            .map_err(|e| LedgerError::Config(format!("ledger.default_coin: {}", e)))?;

        if self.storage.max_connections == 0 {
            return Err(LedgerError::Config(
                "storage.max_connections must be greater than 0".into(),
            ));
        }
        if self.storage.min_connections > self.storage.max_connections {
            return Err(LedgerError::Config(
                "storage.min_connections must not exceed max_connections".into(),
            ));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(LedgerError::Config(
                "retry.initial_backoff_ms must not exceed max_backoff_ms".into(),
            ));
        }
        if self.retry.max_elapsed_ms == 0 {
            return Err(LedgerError::Config(
                "retry.max_elapsed_ms must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies `TALLY_*` overrides read through `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("TALLY_DATA_DIR") {
            debug!(data_dir = %dir, "Overriding data dir from environment");
            self.storage.data_dir = PathBuf::from(dir);
        }

        if let Some(coin) = lookup("TALLY_DEFAULT_COIN") {
            self.ledger.default_coin = coin;
        }

        if let Some(raw) = lookup("TALLY_MAX_CONNECTIONS") {
            match raw.parse::<u32>() {
                Ok(n) => self.storage.max_connections = n,
                Err(_) => warn!(value = %raw, "Ignoring invalid TALLY_MAX_CONNECTIONS"),
            }
        }

        if let Some(raw) = lookup("TALLY_BUSY_TIMEOUT_MS") {
            match raw.parse::<u64>() {
                Ok(ms) => self.storage.busy_timeout_ms = ms,
                Err(_) => warn!(value = %raw, "Ignoring invalid TALLY_BUSY_TIMEOUT_MS"),
            }
        }

        if let Some(raw) = lookup("TALLY_RETRY_MAX_ELAPSED_MS") {
            match raw.parse::<u64>() {
                Ok(ms) => self.retry.max_elapsed_ms = ms,
                Err(_) => warn!(value = %raw, "Ignoring invalid TALLY_RETRY_MAX_ELAPSED_MS"),
            }
        }

        if let Some(filter) = lookup("TALLY_LOG") {
            self.logging.filter = filter;
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tally", "tally")
            .map(|dirs| dirs.config_dir().join("ledger.toml"))
    }

    // =========================================================================
    // Derived Settings
    // =========================================================================

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            max_elapsed: Duration::from_millis(self.retry.max_elapsed_ms),
        }
    }

    /// Pool settings shared by every company database.
    pub fn db_template(&self) -> DbConfig {
        DbConfig::new(self.storage.data_dir.join("template.db"))
            .max_connections(self.storage.max_connections)
            .min_connections(self.storage.min_connections)
            .busy_timeout(Duration::from_millis(self.storage.busy_timeout_ms))
            .retry(self.retry_policy())
    }

    /// Registry opening `<data_dir>/<company>.db`.
    pub fn tenant_registry(&self) -> TenantRegistry {
        TenantRegistry::directory(self.storage.data_dir.clone(), self.db_template())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = LedgerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ledger.default_coin, "ARS");
        assert_eq!(config.retry_policy().max_elapsed, Duration::from_secs(10));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = LedgerConfig::from_toml(
            r#"
            [storage]
            data_dir = "/srv/tally"

            [ledger]
            default_coin = "USD"
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.data_dir, PathBuf::from("/srv/tally"));
        assert_eq!(config.storage.max_connections, 5);
        assert_eq!(config.ledger.default_coin, "USD");
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(LedgerConfig::from_toml("[ledger]\ndefault_coin = \"TOO-LONG-COIN\"").is_err());
        assert!(LedgerConfig::from_toml("[storage]\nmax_connections = 0").is_err());
        assert!(LedgerConfig::from_toml("[retry]\ninitial_backoff_ms = 900\nmax_backoff_ms = 100").is_err());
        assert!(LedgerConfig::from_toml("[storage]\nmax_connections = \"many\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("TALLY_DATA_DIR", "/tmp/tally"),
            ("TALLY_DEFAULT_COIN", "USD"),
            ("TALLY_MAX_CONNECTIONS", "not-a-number"),
            ("TALLY_RETRY_MAX_ELAPSED_MS", "2500"),
        ]);

        let mut config = LedgerConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/tally"));
        assert_eq!(config.ledger.default_coin, "USD");
        assert_eq!(config.storage.max_connections, 5);
        assert_eq!(config.retry.max_elapsed_ms, 2500);
    }

    #[test]
    fn test_db_template_carries_pool_settings() {
        let mut config = LedgerConfig::default();
        config.storage.max_connections = 9;
        config.storage.busy_timeout_ms = 250;

        let template = config.db_template();
        assert_eq!(template.max_connections, 9);
        assert_eq!(template.busy_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_toml_serialization() {
        let toml_str = toml::to_string_pretty(&LedgerConfig::default()).unwrap();
        assert!(toml_str.contains("[storage]"));
        assert!(toml_str.contains("[retry]"));
    }
}
