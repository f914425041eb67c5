//! Share recording for the current round.

use std::{collections::HashMap, sync::Arc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::{
    error::{ProcessorError, ProcessorResult},
    keys::{LedgerKeys, Round},
    ledger::{Ledger, LedgerBatch},
    pending::PendingBlockEntry,
    settlement::RoundSettlementCoordinator,
    types::{now_millis, HashrateSample, PoolStats, ShareData, ShareEvent, StatField},
};

/// What recording a share did to the ledger.
#[derive(Debug)]
pub enum ShareOutcome {
    /// The share was credited to the current round.
    Recorded,
    /// The share solved a block and closed the round. Reconciliation continues on
    /// its own task; the handle resolves to the staged pending record.
    RoundClosed {
        height: u64,
        settlement: JoinHandle<ProcessorResult<PendingBlockEntry>>,
    },
    /// The block's round was already archived. The share was credited to the
    /// current round and nothing was closed.
    AlreadySettled { height: u64 },
}

/// Credits share events into the ledger.
///
/// Ordinary shares commit in a single batch and never wait on the daemon. Block
/// shares close the round in the same batch and hand reconciliation to the
/// [`RoundSettlementCoordinator`].
pub struct ShareRecorder {
    ledger: Arc<dyn Ledger>,
    coordinator: Arc<RoundSettlementCoordinator>,
    keys: LedgerKeys,
}

impl ShareRecorder {
    pub fn new(ledger: Arc<dyn Ledger>, coordinator: Arc<RoundSettlementCoordinator>) -> Self {
        let keys = coordinator.keys().clone();
        Self {
            ledger,
            coordinator,
            keys,
        }
    }

    pub fn keys(&self) -> &LedgerKeys {
        &self.keys
    }

    pub async fn record_share(&self, event: ShareEvent) -> ProcessorResult<ShareOutcome> {
        let found_at = now_millis();
        let share = &event.share;
        let mut batch = self.share_batch(event.is_valid_share, share, found_at);

        if !event.is_valid_block {
            if share.block_hash.is_some() {
                batch.hash_increment(self.keys.stats(), StatField::InvalidBlocks.as_str(), 1.0);
            }
            self.commit(batch, share).await?;
            return Ok(ShareOutcome::Recorded);
        }

        let block = match share.found_block() {
            Ok(block) => block,
            Err(e) => {
                // The share still counts even though its block cannot be settled.
                self.commit(batch, share).await?;
                error!(
                    coin = self.keys.coin(),
                    worker = %share.worker,
                    "Credited block share as an ordinary share: {}",
                    e
                );
                return Err(e);
            }
        };
        let archived = self.keys.round(Round::Closed {
            height: block.height,
        });
        if self.ledger.exists(&archived).await? {
            warn!(
                coin = self.keys.coin(),
                height = block.height,
                block_hash = %block.block_hash,
                "Round already closed, crediting block share to the current round"
            );
            self.commit(batch, share).await?;
            return Ok(ShareOutcome::AlreadySettled {
                height: block.height,
            });
        }

        let share_only = batch.clone();
        self.coordinator
            .stage_close(&mut batch, block.height, event.is_valid_share);
        match self.coordinator.commit_close(&block, batch).await {
            Ok(()) => {}
            // Another process closed this round first.
            Err(ProcessorError::RoundAlreadyClosed { height, .. }) => {
                self.commit(share_only, share).await?;
                return Ok(ShareOutcome::AlreadySettled { height });
            }
            Err(e) => return Err(e),
        }

        info!(
            coin = self.keys.coin(),
            height = block.height,
            worker = %block.worker,
            "Found valid block {}, closed round",
            block.block_hash
        );

        let height = block.height;
        let coordinator = self.coordinator.clone();
        let settlement = tokio::spawn(async move { coordinator.settle(block, found_at).await });
        Ok(ShareOutcome::RoundClosed { height, settlement })
    }

    /// Commands recorded for every share regardless of block status.
    fn share_batch(&self, is_valid_share: bool, share: &ShareData, timestamp_millis: u64) -> LedgerBatch {
        let mut batch = LedgerBatch::new();
        if is_valid_share {
            batch
                .hash_increment(self.keys.round(Round::Current), share.worker.as_str(), share.difficulty)
                .hash_increment(self.keys.stats(), StatField::ValidShares.as_str(), 1.0);
        } else {
            batch.hash_increment(self.keys.stats(), StatField::InvalidShares.as_str(), 1.0);
        }

        let sample = HashrateSample::new(is_valid_share, share, timestamp_millis);
        batch.sorted_set_add(self.keys.hashrate(), sample.score(), sample.encode());
        batch
    }

    async fn commit(&self, batch: LedgerBatch, share: &ShareData) -> ProcessorResult<()> {
        self.ledger.exec(batch).await.map_err(|e| {
            error!(
                coin = self.keys.coin(),
                worker = %share.worker,
                "Error with share processor batch: {}",
                e
            );
            ProcessorError::from(e)
        })
    }

    pub async fn pool_stats(&self) -> ProcessorResult<PoolStats> {
        let fields = self.ledger.hash_get_all(&self.keys.stats()).await?;
        Ok(PoolStats::from_fields(&fields))
    }

    /// Worker -> accumulated difficulty of a round.
    pub async fn round_shares(&self, round: Round) -> ProcessorResult<HashMap<String, f64>> {
        Ok(self.ledger.hash_get_all(&self.keys.round(round)).await?)
    }

    /// Hashrate samples scored within `[from_secs, to_secs]`.
    pub async fn hashrate_samples(&self, from_secs: u64, to_secs: u64) -> ProcessorResult<Vec<HashrateSample>> {
        self.ledger
            .sorted_set_range_by_score(&self.keys.hashrate(), from_secs as f64, to_secs as f64)
            .await?
            .into_iter()
            .map(|(member, _)| member.parse::<HashrateSample>().map_err(ProcessorError::from))
            .collect()
    }

    /// Staged blocks awaiting payment. Records that cannot be read are logged and
    /// skipped so one bad record does not hide the rest of the queue.
    pub async fn pending_blocks(&self) -> ProcessorResult<Vec<PendingBlockEntry>> {
        let members = self.ledger.set_members(&self.keys.blocks_pending()).await?;
        Ok(members
            .into_iter()
            .filter_map(|member| match member.parse::<PendingBlockEntry>() {
                Ok(entry) => Some(entry),
                Err(e) => {
                    error!(coin = self.keys.coin(), "Unreadable pending block record: {}", e);
                    None
                }
            })
            .collect())
    }
}
