//! ## Share Processor Configuration Module
//!
//! Defines [`ShareProcessorConfig`], the configuration loaded at process start.
//!
//! This module handles:
//! - The coin whose rounds are being accounted
//! - Ledger backend selection ([`LedgerConfig`])
//! - Daemon RPC endpoint and credentials ([`DaemonConfig`])
//! - Reward recipients whose percentages form the pool fee
//! - The timeout bounding each settlement query
use serde::Deserialize;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::{ProcessorError, ProcessorResult};

/// Configuration for the share processor.
#[derive(Debug, Deserialize, Clone)]
pub struct ShareProcessorConfig {
    /// Coin name; prefixes every ledger key.
    pub coin: String,
    /// Ledger backend settings.
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// Daemon used to reconcile found blocks.
    pub daemon: DaemonConfig,
    /// Address -> percent of the block reward paid to that recipient.
    #[serde(default)]
    pub reward_recipients: HashMap<String, f64>,
    /// Upper bound for each settlement query, in seconds.
    #[serde(default = "default_reconciliation_timeout_secs")]
    pub reconciliation_timeout_secs: u64,
    /// The path to the log file for the share processor.
    log_file: Option<PathBuf>,
}

/// Ledger backend kind.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    #[default]
    Memory,
    Sqlite,
}

impl std::str::FromStr for LedgerBackend {
    type Err = ProcessorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(LedgerBackend::Memory),
            "sqlite" => Ok(LedgerBackend::Sqlite),
            other => Err(ProcessorError::Config(format!(
                "unknown ledger backend '{}'",
                other
            ))),
        }
    }
}

impl LedgerBackend {
    /// Whether the ledger outlives the process, so another process can read it back.
    pub fn is_persistent(&self) -> bool {
        matches!(self, LedgerBackend::Sqlite)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LedgerConfig {
    #[serde(default)]
    pub backend: LedgerBackend,
    /// Database file, required by the sqlite backend.
    pub database_path: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DaemonConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl DaemonConfig {
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

fn default_reconciliation_timeout_secs() -> u64 {
    30
}

impl ShareProcessorConfig {
    /// Load and validate a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> ProcessorResult<Self> {
        let path = path.as_ref();
        let config: Self = ext_config::Config::builder()
            .add_source(ext_config::File::from(path))
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| {
                ProcessorError::Config(format!("failed to load {}: {}", path.display(), e))
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Sum of all reward recipient percentages.
    pub fn total_fee_percent(&self) -> f64 {
        self.reward_recipients.values().sum()
    }

    pub fn reconciliation_timeout(&self) -> Duration {
        Duration::from_secs(self.reconciliation_timeout_secs)
    }

    /// Override the configured log file, if `log_file` is given.
    pub fn set_log_file(&mut self, log_file: Option<PathBuf>) {
        if let Some(path) = log_file {
            self.log_file = Some(path);
        }
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    /// Validates the configuration.
    ///
    /// # Validation Rules
    /// - `coin` must not be empty
    /// - the total fee must lie in `[0, 100)`
    /// - the sqlite backend requires `database_path`
    pub fn validate(&self) -> ProcessorResult<()> {
        if self.coin.trim().is_empty() {
            return Err(ProcessorError::Config("'coin' must not be empty".to_string()));
        }

        let fee = self.total_fee_percent();
        if !(0.0..100.0).contains(&fee) {
            return Err(ProcessorError::Config(format!(
                "total reward recipient percentage must be in [0, 100), got {}",
                fee
            )));
        }

        if self.ledger.backend == LedgerBackend::Sqlite && self.ledger.database_path.is_none() {
            return Err(ProcessorError::Config(
                "'ledger.database_path' is required for the sqlite backend".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> ShareProcessorConfig {
        toml::from_str(toml_str).unwrap()
    }

    const MINIMAL: &str = r#"
        coin = "litecoin"

        [daemon]
        host = "127.0.0.1"
        port = 9332
        user = "user"
        password = "pass"
    "#;

    #[test]
    fn test_defaults() {
        let config = parse(MINIMAL);
        assert_eq!(config.ledger.backend, LedgerBackend::Memory);
        assert_eq!(config.reconciliation_timeout(), Duration::from_secs(30));
        assert_eq!(config.total_fee_percent(), 0.0);
        assert_eq!(config.daemon.url(), "http://127.0.0.1:9332");
        assert!(config.log_file().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fee_is_sum_of_recipients() {
        let config = parse(&format!(
            "{}\n[reward_recipients]\n\"addr1\" = 1.5\n\"addr2\" = 0.5\n",
            MINIMAL
        ));
        assert_eq!(config.total_fee_percent(), 2.0);
    }

    #[test]
    fn test_rejects_full_fee() {
        let config = parse(&format!("{}\n[reward_recipients]\n\"addr\" = 100\n", MINIMAL));
        assert!(matches!(config.validate(), Err(ProcessorError::Config(_))));
    }

    #[test]
    fn test_sqlite_requires_path() {
        let mut config = parse(MINIMAL);
        config.ledger.backend = LedgerBackend::Sqlite;
        assert!(config.validate().is_err());
        config.ledger.database_path = Some("ledger.db".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_log_file_override() {
        let mut config = parse(&format!("log_file = \"a.log\"\n{}", MINIMAL));
        config.set_log_file(None);
        assert_eq!(config.log_file(), Some(Path::new("a.log")));
        config.set_log_file(Some(PathBuf::from("b.log")));
        assert_eq!(config.log_file(), Some(Path::new("b.log")));
    }

    #[test]
    fn test_only_sqlite_is_persistent() {
        assert!(!LedgerBackend::Memory.is_persistent());
        assert!(LedgerBackend::Sqlite.is_persistent());
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("SQLite".parse::<LedgerBackend>().unwrap(), LedgerBackend::Sqlite);
        assert!("redis".parse::<LedgerBackend>().is_err());
    }
}
