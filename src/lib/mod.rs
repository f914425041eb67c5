//! Share accounting and block settlement for a pooled mining backend.
//!
//! The [`ShareRecorder`] credits every share reported by the stratum layer into the
//! coin's current round. When a share solves a block, the round is closed under the
//! block height and a [`RoundSettlementCoordinator`] reconciles the block reward and
//! round effort before staging the block in the pending queue for the payment engine.

pub mod backends;
pub mod config;
pub mod daemon;
pub mod error;
pub mod keys;
pub mod ledger;
pub mod pending;
pub mod recorder;
pub mod settlement;
pub mod types;

pub use config::*;
pub use daemon::{DaemonRpc, TransactionDetails};
pub use error::*;
pub use keys::{LedgerKeys, Round};
pub use ledger::{Ledger, LedgerBatch, LedgerCommand, LedgerHealth};
pub use pending::PendingBlockEntry;
pub use recorder::{ShareOutcome, ShareRecorder};
pub use settlement::{RoundSettlementCoordinator, SettlementAlert};
pub use types::*;
