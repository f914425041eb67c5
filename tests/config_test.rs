//! Integration test for share processor configuration parsing
//!
//! Verifies that:
//! 1. The example config files can be loaded and validated
//! 2. Reward recipients sum to the pool fee
//! 3. Invalid configurations are rejected at load time

use share_processor::{LedgerBackend, ProcessorError, ShareProcessorConfig};
use std::{fs, time::Duration};

#[test]
fn test_load_example_config() {
    let config = ShareProcessorConfig::from_file("config-examples/share-processor-example.toml")
        .expect("Failed to load share-processor-example.toml");

    assert_eq!(config.coin, "litecoin");
    assert_eq!(config.ledger.backend, LedgerBackend::Memory);
    assert_eq!(config.reconciliation_timeout(), Duration::from_secs(30));
    assert_eq!(config.daemon.url(), "http://127.0.0.1:9332");
    assert_eq!(config.reward_recipients.len(), 2);
    assert!((config.total_fee_percent() - 2.0).abs() < 1e-9);
    assert!(config.log_file().is_none());
}

#[test]
fn test_load_sqlite_example_config() {
    let config =
        ShareProcessorConfig::from_file("config-examples/share-processor-sqlite-example.toml")
            .expect("Failed to load share-processor-sqlite-example.toml");

    assert_eq!(config.ledger.backend, LedgerBackend::Sqlite);
    assert_eq!(
        config.ledger.database_path.as_deref(),
        Some("./share-processor.db")
    );
    assert_eq!(config.total_fee_percent(), 0.0);
}

#[test]
fn test_example_config_structure() {
    let config_str = fs::read_to_string("config-examples/share-processor-example.toml")
        .expect("Failed to read share-processor-example.toml");
    let config: toml::Value = toml::from_str(&config_str).expect("Failed to parse TOML config file");

    let daemon = config.get("daemon").expect("daemon section should be present");
    assert!(daemon.get("host").is_some(), "host should be present");
    assert!(daemon.get("port").and_then(|v| v.as_integer()).is_some());
    assert!(config.get("reward_recipients").is_some());
}

#[test]
fn test_rejects_invalid_config_files() {
    let dir = tempfile::tempdir().unwrap();

    let no_coin = dir.path().join("no-coin.toml");
    fs::write(
        &no_coin,
        r#"
        coin = ""

        [daemon]
        host = "127.0.0.1"
        port = 9332
        user = "u"
        password = "p"
        "#,
    )
    .unwrap();
    assert!(matches!(
        ShareProcessorConfig::from_file(&no_coin),
        Err(ProcessorError::Config(_))
    ));

    let sqlite_without_path = dir.path().join("sqlite.toml");
    fs::write(
        &sqlite_without_path,
        r#"
        coin = "litecoin"

        [ledger]
        backend = "sqlite"

        [daemon]
        host = "127.0.0.1"
        port = 9332
        user = "u"
        password = "p"
        "#,
    )
    .unwrap();
    assert!(ShareProcessorConfig::from_file(&sqlite_without_path).is_err());

    assert!(ShareProcessorConfig::from_file(dir.path().join("missing.toml")).is_err());
}
