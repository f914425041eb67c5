//! Round settlement for found blocks.
//!
//! Closing a round happens in two commits:
//!
//! 1. The block share's own bookkeeping, the rename of the current round to its
//!    height-qualified name and the `validBlocks` increment commit as one batch as soon
//!    as the block is detected. Shares recorded afterwards, by this or any other
//!    process, land in a fresh current round.
//! 2. The reward, network difficulty and archived round total are fetched concurrently.
//!    Whatever the outcome, exactly one pending block record is appended for the
//!    payment engine: a full one when all three queries succeeded, a degraded one
//!    otherwise.
//!
//! Each commit is retried at most once. The close retry only happens after checking
//! that the archived round does not exist, so a commit that applied but failed to
//! acknowledge is never applied twice. A commit that still fails raises a
//! [`SettlementAlert`].

use async_channel::Sender;
use std::{future::Future, sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

use crate::{
    daemon::DaemonRpc,
    error::{LedgerError, ProcessorError, ProcessorResult, ReconciliationError},
    keys::{LedgerKeys, Round},
    ledger::{Ledger, LedgerBatch},
    pending::{PendingBlockEntry, Reconciled},
    types::{FoundBlock, StatField},
};

/// Block reward before pool fees: `amount * 100 / (100 - fee_percent)`.
pub fn normalize_reward(amount: f64, total_fee_percent: f64) -> f64 {
    amount * 100.0 / (100.0 - total_fee_percent)
}

/// Round effort truncated (not rounded) to four decimal digits.
pub fn block_effort(total_shares: f64, network_difficulty: f64) -> Result<f64, ReconciliationError> {
    if network_difficulty <= 0.0 {
        return Err(ReconciliationError::ZeroDifficulty);
    }
    Ok((total_shares / network_difficulty * 10_000.0).floor() / 10_000.0)
}

/// Raised when a settlement commit could not be applied after its retry.
///
/// Share accounting for the block may be out of sync until an operator intervenes.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementAlert {
    pub coin: String,
    pub height: u64,
    pub block_hash: String,
    pub worker: String,
    pub stage: &'static str,
    pub reason: String,
}

pub struct RoundSettlementCoordinator {
    ledger: Arc<dyn Ledger>,
    daemon: Arc<dyn DaemonRpc>,
    keys: LedgerKeys,
    total_fee_percent: f64,
    query_timeout: Duration,
    alerts: Option<Sender<SettlementAlert>>,
}

impl RoundSettlementCoordinator {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        daemon: Arc<dyn DaemonRpc>,
        keys: LedgerKeys,
        total_fee_percent: f64,
        query_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            daemon,
            keys,
            total_fee_percent,
            query_timeout,
            alerts: None,
        }
    }

    /// Publish escalations on `alerts`.
    pub fn with_alerts(mut self, alerts: Sender<SettlementAlert>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn keys(&self) -> &LedgerKeys {
        &self.keys
    }

    /// Queue the commands that close the current round under `height`.
    ///
    /// `credits_round` tells whether `batch` already adds to the current round. Only then
    /// is the round guaranteed to exist and its rename made strict, so that a second
    /// close of the same height fails with `KeyExists`. A block solved by an invalid
    /// share may find no open round, which closes nothing but still counts the block.
    pub fn stage_close(&self, batch: &mut LedgerBatch, height: u64, credits_round: bool) {
        let closed = Round::Closed { height };
        if credits_round {
            batch.rename(self.keys.round(Round::Current), self.keys.round(closed));
        } else {
            batch.rename_if_present(self.keys.round(Round::Current), self.keys.round(closed));
        }
        batch
            .rename_if_present(self.keys.times(Round::Current), self.keys.times(closed))
            .hash_increment(self.keys.stats(), StatField::ValidBlocks.as_str(), 1.0);
    }

    /// Commit a batch built with [`Self::stage_close`].
    ///
    /// Only transient failures are retried.
    pub async fn commit_close(&self, block: &FoundBlock, batch: LedgerBatch) -> ProcessorResult<()> {
        let archived = self.keys.round(Round::Closed {
            height: block.height,
        });

        let first = match self.ledger.exec(batch.clone()).await {
            Ok(()) => return Ok(()),
            Err(LedgerError::KeyExists(_)) => return Err(self.already_closed(block)),
            Err(e) if !e.is_transient() => return Err(self.reject_close(block, e)),
            Err(e) => e,
        };
        warn!(
            coin = self.keys.coin(),
            height = block.height,
            block_hash = %block.block_hash,
            "Round close commit failed, checking before retry: {}",
            first
        );

        match self.ledger.exists(&archived).await {
            Ok(true) => {
                warn!(
                    coin = self.keys.coin(),
                    height = block.height,
                    "Round close was applied despite the commit error"
                );
                return Ok(());
            }
            Ok(false) => {}
            // Without knowing whether the close applied, a retry could double count.
            Err(e) => return Err(self.escalate(block, "round close", e).await),
        }

        match self.ledger.exec(batch).await {
            Ok(()) => Ok(()),
            Err(LedgerError::KeyExists(_)) => Err(self.already_closed(block)),
            Err(e) if !e.is_transient() => Err(self.reject_close(block, e)),
            Err(e) => Err(self.escalate(block, "round close", e).await),
        }
    }

    /// Reconcile the block and append its pending record.
    pub async fn settle(&self, block: FoundBlock, found_at_millis: u64) -> ProcessorResult<PendingBlockEntry> {
        let entry = match self.reconcile(&block).await {
            Ok(Reconciled { reward, effort }) => {
                debug!(
                    coin = self.keys.coin(),
                    height = block.height,
                    "Successfully requested reward for block {}",
                    block.block_hash
                );
                PendingBlockEntry::full(&block, found_at_millis, reward, effort)
            }
            Err(e) => {
                error!(
                    coin = self.keys.coin(),
                    height = block.height,
                    worker = %block.worker,
                    block_hash = %block.block_hash,
                    "Block reconciliation failed, staging without reward and effort: {}",
                    e
                );
                PendingBlockEntry::degraded(&block, found_at_millis)
            }
        };

        let mut batch = LedgerBatch::new();
        batch.set_add(self.keys.blocks_pending(), entry.encode());

        // Set insertion is idempotent, so the retry needs no guard.
        if let Err(first) = self.ledger.exec(batch.clone()).await {
            warn!(
                coin = self.keys.coin(),
                height = block.height,
                "Pending block commit failed, retrying once: {}",
                first
            );
            if let Err(e) = self.ledger.exec(batch).await {
                return Err(self.escalate(&block, "pending block", e).await);
            }
        }

        info!(
            coin = self.keys.coin(),
            height = block.height,
            worker = %block.worker,
            degraded = entry.is_degraded(),
            "Staged block {} for payment",
            block.block_hash
        );
        Ok(entry)
    }

    /// Run the three settlement queries concurrently.
    pub async fn reconcile(&self, block: &FoundBlock) -> Result<Reconciled, ReconciliationError> {
        let (reward, difficulty, shares) = tokio::join!(
            self.bounded("reward", self.get_reward(&block.tx_hash)),
            self.bounded("difficulty", self.get_difficulty()),
            self.bounded("shares", self.get_shares(block.height)),
        );

        let failures = [reward.as_ref().err(), difficulty.as_ref().err(), shares.as_ref().err()];
        for failure in failures.into_iter().flatten() {
            warn!(
                coin = self.keys.coin(),
                height = block.height,
                "Settlement query failed: {}",
                failure
            );
        }

        Ok(Reconciled {
            reward: reward?,
            effort: block_effort(shares?, difficulty?)?,
        })
    }

    async fn bounded<T>(
        &self,
        query: &'static str,
        fut: impl Future<Output = Result<T, ReconciliationError>>,
    ) -> Result<T, ReconciliationError> {
        tokio::time::timeout(self.query_timeout, fut)
            .await
            .map_err(|_| ReconciliationError::Timeout { query })?
    }

    async fn get_reward(&self, tx_hash: &str) -> Result<f64, ReconciliationError> {
        let details = self
            .daemon
            .get_transaction(tx_hash)
            .await
            .map_err(ReconciliationError::Reward)?;
        Ok(normalize_reward(details.amount, self.total_fee_percent))
    }

    async fn get_difficulty(&self) -> Result<f64, ReconciliationError> {
        self.daemon
            .get_network_difficulty()
            .await
            .map_err(ReconciliationError::Difficulty)
    }

    /// Total share weight of the archived round.
    async fn get_shares(&self, height: u64) -> Result<f64, ReconciliationError> {
        let key = self.keys.round(Round::Closed { height });
        let round = self
            .ledger
            .hash_get_all(&key)
            .await
            .map_err(ReconciliationError::Shares)?;
        if round.is_empty() {
            return Err(ReconciliationError::Shares(LedgerError::NoSuchKey(key)));
        }
        Ok(round.values().sum())
    }

    /// The close batch can never apply as staged. Nothing was written.
    fn reject_close(&self, block: &FoundBlock, source: LedgerError) -> ProcessorError {
        error!(
            coin = self.keys.coin(),
            height = block.height,
            worker = %block.worker,
            block_hash = %block.block_hash,
            "Round close rejected by the ledger: {}",
            source
        );
        ProcessorError::Ledger(source)
    }

    fn already_closed(&self, block: &FoundBlock) -> ProcessorError {
        ProcessorError::RoundAlreadyClosed {
            coin: self.keys.coin().to_string(),
            height: block.height,
        }
    }

    async fn escalate(&self, block: &FoundBlock, stage: &'static str, source: LedgerError) -> ProcessorError {
        error!(
            alert = true,
            coin = self.keys.coin(),
            height = block.height,
            worker = %block.worker,
            block_hash = %block.block_hash,
            "{} commit failed after retry, manual reconciliation required: {}",
            stage,
            source
        );

        if let Some(alerts) = &self.alerts {
            let alert = SettlementAlert {
                coin: self.keys.coin().to_string(),
                height: block.height,
                block_hash: block.block_hash.clone(),
                worker: block.worker.clone(),
                stage,
                reason: source.to_string(),
            };
            if alerts.send(alert).await.is_err() {
                warn!("Settlement alert channel closed");
            }
        }

        ProcessorError::Commit {
            coin: self.keys.coin().to_string(),
            height: block.height,
            block_hash: block.block_hash.clone(),
            worker: block.worker.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effort_truncates() {
        assert_eq!(block_effort(1000.0, 7.0).unwrap(), 142.8571);
        // 2/3 would round to .6667
        assert_eq!(block_effort(2.0, 3.0).unwrap(), 0.6666);
        assert_eq!(block_effort(60.0, 5.0).unwrap(), 12.0);
    }

    #[test]
    fn test_effort_rejects_zero_difficulty() {
        assert!(matches!(
            block_effort(10.0, 0.0),
            Err(ReconciliationError::ZeroDifficulty)
        ));
    }

    #[test]
    fn test_reward_normalization() {
        let reward = normalize_reward(49.5, 2.0);
        assert!((reward - 50.510204081632654).abs() < 1e-9);
        assert_eq!(normalize_reward(10.0, 0.0), 10.0);
    }
}
