//! Data types for share events, pool counters and hashrate samples.

use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::error::{LedgerError, ProcessorError, ProcessorResult};

/// Share submission details reported by the stratum layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareData {
    /// Worker identity credited with the share
    pub worker: String,
    /// Share difficulty
    pub difficulty: f64,
    /// Height of the block candidate, when the share was a candidate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    /// Hash of the block candidate; present for accepted and rejected candidates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    /// Coinbase transaction hash of the block candidate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

impl ShareData {
    pub fn new(worker: impl Into<String>, difficulty: f64) -> Self {
        Self {
            worker: worker.into(),
            difficulty,
            height: None,
            block_hash: None,
            tx_hash: None,
        }
    }

    /// Attach block candidate details.
    pub fn with_block(
        mut self,
        height: u64,
        block_hash: impl Into<String>,
        tx_hash: impl Into<String>,
    ) -> Self {
        self.height = Some(height);
        self.block_hash = Some(block_hash.into());
        self.tx_hash = Some(tx_hash.into());
        self
    }

    /// Extract the block fields required to close a round.
    pub fn found_block(&self) -> ProcessorResult<FoundBlock> {
        let height = self
            .height
            .ok_or_else(|| ProcessorError::InvalidShare("block share without height".into()))?;
        let block_hash = self
            .block_hash
            .clone()
            .ok_or_else(|| ProcessorError::InvalidShare("block share without block hash".into()))?;
        let tx_hash = self
            .tx_hash
            .clone()
            .ok_or_else(|| ProcessorError::InvalidShare("block share without tx hash".into()))?;
        Ok(FoundBlock {
            worker: self.worker.clone(),
            difficulty: self.difficulty,
            height,
            block_hash,
            tx_hash,
        })
    }
}

/// One share result as emitted by the stratum layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareEvent {
    pub is_valid_share: bool,
    pub is_valid_block: bool,
    pub share: ShareData,
}

impl ShareEvent {
    pub fn new(is_valid_share: bool, is_valid_block: bool, share: ShareData) -> Self {
        Self {
            is_valid_share,
            is_valid_block,
            share,
        }
    }
}

/// A block solved by one of the pool's workers.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundBlock {
    pub worker: String,
    pub difficulty: f64,
    pub height: u64,
    pub block_hash: String,
    pub tx_hash: String,
}

/// Counter fields of the `stats` hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatField {
    ValidShares,
    InvalidShares,
    ValidBlocks,
    InvalidBlocks,
}

impl StatField {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatField::ValidShares => "validShares",
            StatField::InvalidShares => "invalidShares",
            StatField::ValidBlocks => "validBlocks",
            StatField::InvalidBlocks => "invalidBlocks",
        }
    }
}

/// Pool-wide lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub valid_shares: u64,
    pub invalid_shares: u64,
    pub valid_blocks: u64,
    pub invalid_blocks: u64,
}

impl PoolStats {
    /// Build from the raw `stats` hash. Missing fields count as zero.
    pub fn from_fields(fields: &HashMap<String, f64>) -> Self {
        let get = |field: StatField| {
            fields
                .get(field.as_str())
                .map(|value| value.max(0.0) as u64)
                .unwrap_or(0)
        };
        Self {
            valid_shares: get(StatField::ValidShares),
            invalid_shares: get(StatField::InvalidShares),
            valid_blocks: get(StatField::ValidBlocks),
            invalid_blocks: get(StatField::InvalidBlocks),
        }
    }

    pub fn total_shares(&self) -> u64 {
        self.valid_shares + self.invalid_shares
    }
}

/// A single contribution event used to derive sliding-window hashrate.
///
/// Stored as the member `signedDifficulty:worker:timestampMillis` of the `hashrate`
/// sorted set, scored by the second-resolution timestamp. The millisecond timestamp
/// in the member keeps two samples from the same worker within one second distinct.
#[derive(Debug, Clone, PartialEq)]
pub struct HashrateSample {
    /// Share difficulty, negated for invalid shares
    pub signed_difficulty: f64,
    pub worker: String,
    pub timestamp_millis: u64,
}

impl HashrateSample {
    pub fn new(is_valid_share: bool, share: &ShareData, timestamp_millis: u64) -> Self {
        let signed_difficulty = if is_valid_share {
            share.difficulty
        } else {
            -share.difficulty
        };
        Self {
            signed_difficulty,
            worker: share.worker.clone(),
            timestamp_millis,
        }
    }

    /// Sorted set score: whole seconds since the epoch.
    pub fn score(&self) -> f64 {
        (self.timestamp_millis / 1000) as f64
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    pub fn is_valid(&self) -> bool {
        self.signed_difficulty >= 0.0
    }
}

impl fmt::Display for HashrateSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.signed_difficulty, self.worker, self.timestamp_millis
        )
    }
}

impl FromStr for HashrateSample {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LedgerError::InvalidData(format!("malformed hashrate sample: {}", s));
        // Worker names may themselves contain ':', so split on the outermost separators.
        let (difficulty, rest) = s.split_once(':').ok_or_else(invalid)?;
        let (worker, timestamp) = rest.rsplit_once(':').ok_or_else(invalid)?;
        Ok(Self {
            signed_difficulty: difficulty.parse().map_err(|_| invalid())?,
            worker: worker.to_string(),
            timestamp_millis: timestamp.parse().map_err(|_| invalid())?,
        })
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
