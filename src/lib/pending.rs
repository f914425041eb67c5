//! Records of the pending block queue.
//!
//! Each found block is staged in the `blocksPending` set as one colon-joined record:
//!
//! ```text
//! blockHash:txHash:height:worker:foundAtMillis[:reward:effort]
//! ```
//!
//! The trailing reward and effort are present only when reconciliation succeeded. The
//! payment engine tells full and degraded records apart by their trailing fields. Worker
//! names may contain `:`, so records are read from both ends.

use std::{fmt, str::FromStr};

use crate::{error::LedgerError, types::FoundBlock};

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    /// Block reward before pool fees
    pub reward: f64,
    /// Round shares over network difficulty, truncated to four decimals
    pub effort: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingBlockEntry {
    pub block_hash: String,
    pub tx_hash: String,
    pub height: u64,
    pub worker: String,
    pub found_at_millis: u64,
    pub reconciled: Option<Reconciled>,
}

impl PendingBlockEntry {
    /// Entry without reward or effort, left for later backfill.
    pub fn degraded(block: &FoundBlock, found_at_millis: u64) -> Self {
        Self {
            block_hash: block.block_hash.clone(),
            tx_hash: block.tx_hash.clone(),
            height: block.height,
            worker: block.worker.clone(),
            found_at_millis,
            reconciled: None,
        }
    }

    pub fn full(block: &FoundBlock, found_at_millis: u64, reward: f64, effort: f64) -> Self {
        Self {
            reconciled: Some(Reconciled { reward, effort }),
            ..Self::degraded(block, found_at_millis)
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.reconciled.is_none()
    }

    pub fn reward(&self) -> Option<f64> {
        self.reconciled.as_ref().map(|r| r.reward)
    }

    pub fn effort(&self) -> Option<f64> {
        self.reconciled.as_ref().map(|r| r.effort)
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PendingBlockEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.block_hash, self.tx_hash, self.height, self.worker, self.found_at_millis
        )?;
        if let Some(reconciled) = &self.reconciled {
            write!(f, ":{}:{}", reconciled.reward, reconciled.effort)?;
        }
        Ok(())
    }
}

/// `worker:foundAt:reward:effort`, read from the right so the worker keeps its colons.
fn split_full(rest: &str) -> Option<(&str, u64, Reconciled)> {
    let mut fields = rest.rsplitn(4, ':');
    let effort = fields.next()?.parse().ok()?;
    let reward = fields.next()?.parse().ok()?;
    let found_at_millis = fields.next()?.parse().ok()?;
    let worker = fields.next()?;
    Some((worker, found_at_millis, Reconciled { reward, effort }))
}

fn split_degraded(rest: &str) -> Option<(&str, u64)> {
    let (worker, found_at_millis) = rest.rsplit_once(':')?;
    Some((worker, found_at_millis.parse().ok()?))
}

impl FromStr for PendingBlockEntry {
    type Err = LedgerError;

    /// A record whose trailing three fields parse as `foundAt:reward:effort` is read as
    /// full; otherwise it must end in `foundAt` and is read as degraded.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid =
            |what: &str| LedgerError::InvalidData(format!("pending block record {}: {}", what, s));

        let mut head = s.splitn(4, ':');
        let block_hash = head.next().ok_or_else(|| invalid("is empty"))?;
        let tx_hash = head.next().ok_or_else(|| invalid("has no tx hash"))?;
        let height = head
            .next()
            .ok_or_else(|| invalid("has no height"))?
            .parse()
            .map_err(|_| invalid("has bad height"))?;
        let rest = head.next().ok_or_else(|| invalid("has no worker"))?;

        let (worker, found_at_millis, reconciled) = match split_full(rest) {
            Some((worker, found_at, reconciled)) => (worker, found_at, Some(reconciled)),
            None => {
                let (worker, found_at) =
                    split_degraded(rest).ok_or_else(|| invalid("has bad timestamp"))?;
                (worker, found_at, None)
            }
        };

        Ok(Self {
            block_hash: block_hash.to_string(),
            tx_hash: tx_hash.to_string(),
            height,
            worker: worker.to_string(),
            found_at_millis,
            reconciled,
        })
    }
}
