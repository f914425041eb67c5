//! SQLite ledger integration tests
//!
//! Run with `--features sqlite-backend`.
#![cfg(feature = "sqlite-backend")]

use share_processor::{
    backends::sqlite::SqliteLedger, Ledger, LedgerBatch, LedgerError, LedgerKeys, Round,
};

async fn open_ledger(dir: &tempfile::TempDir) -> SqliteLedger {
    let path = dir.path().join("ledger.db");
    let ledger = SqliteLedger::new(path.to_string_lossy().to_string());
    ledger.initialize().await.unwrap();
    ledger
}

#[tokio::test]
async fn test_sqlite_batch_accumulates() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = open_ledger(&dir).await;
    let keys = LedgerKeys::new("litecoin");

    let mut batch = LedgerBatch::new();
    batch
        .hash_increment(keys.round(Round::Current), "A", 1.5)
        .hash_increment(keys.round(Round::Current), "A", 2.5)
        .hash_increment(keys.stats(), "validShares", 2.0)
        .sorted_set_add(keys.hashrate(), 1_700_000_000.0, "1.5:A:1700000000001");
    ledger.exec(batch).await.unwrap();

    let round = ledger.hash_get_all(&keys.round(Round::Current)).await.unwrap();
    assert_eq!(round.get("A"), Some(&4.0));

    let samples = ledger
        .sorted_set_range_by_score(&keys.hashrate(), 0.0, 2_000_000_000.0)
        .await
        .unwrap();
    assert_eq!(samples.len(), 1);

    ledger.close().await.unwrap();
}

#[tokio::test]
async fn test_sqlite_close_round_is_atomic() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = open_ledger(&dir).await;
    let keys = LedgerKeys::new("litecoin");
    let closed = Round::Closed { height: 500 };

    let mut batch = LedgerBatch::new();
    batch.hash_increment(keys.round(Round::Current), "A", 10.0);
    ledger.exec(batch).await.unwrap();

    let mut close = LedgerBatch::new();
    close
        .hash_increment(keys.round(Round::Current), "A", 5.0)
        .rename(keys.round(Round::Current), keys.round(closed))
        .rename_if_present(keys.times(Round::Current), keys.times(closed))
        .hash_increment(keys.stats(), "validBlocks", 1.0);
    ledger.exec(close.clone()).await.unwrap();

    assert!(!ledger.exists(&keys.round(Round::Current)).await.unwrap());
    let archived = ledger.hash_get_all(&keys.round(closed)).await.unwrap();
    assert_eq!(archived.get("A"), Some(&15.0));

    // A second close of the same height must leave no trace.
    let err = ledger.exec(close).await.unwrap_err();
    assert!(matches!(err, LedgerError::KeyExists(_)));
    assert!(!ledger.exists(&keys.round(Round::Current)).await.unwrap());
    let stats = ledger.hash_get_all(&keys.stats()).await.unwrap();
    assert_eq!(stats.get("validBlocks"), Some(&1.0));

    ledger.close().await.unwrap();
}

#[tokio::test]
async fn test_sqlite_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let keys = LedgerKeys::new("litecoin");

    let ledger = open_ledger(&dir).await;
    let mut batch = LedgerBatch::new();
    batch
        .set_add(keys.blocks_pending(), "bh:tx:500:A:1700000000000")
        .set_add(keys.blocks_pending(), "bh:tx:500:A:1700000000000");
    ledger.exec(batch).await.unwrap();
    ledger.close().await.unwrap();

    let reopened = open_ledger(&dir).await;
    let members = reopened.set_members(&keys.blocks_pending()).await.unwrap();
    assert_eq!(members, vec!["bh:tx:500:A:1700000000000".to_string()]);

    let health = reopened.health_check().await.unwrap();
    assert!(health.is_healthy);
    reopened.close().await.unwrap();
}
