//! Error types for share recording and block settlement.
//!
//! - `LedgerError` - failures of the key-value ledger
//! - `DaemonError` - failures talking to the coin daemon
//! - `ReconciliationError` - one of the settlement queries failed or timed out
//! - `ProcessorError` - errors surfaced to callers of the recorder and coordinator

use thiserror::Error;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Connection to the ledger was lost or could not be established
    #[error("Transport error: {0}")]
    Transport(String),

    /// Backend-specific error (database, file I/O, etc.)
    #[error("Backend error: {0}")]
    Backend(String),

    /// A command required a key that does not exist
    #[error("No such key: {0}")]
    NoSuchKey(String),

    /// A rename target already exists
    #[error("Key already exists: {0}")]
    KeyExists(String),

    /// Stored data could not be interpreted
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Ledger backend not initialized
    #[error("Ledger backend unavailable")]
    Unavailable,
}

/// Errors returned by the daemon RPC gateway.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// HTTP transport failure
    #[error("Daemon transport error: {0}")]
    Transport(String),

    /// The daemon answered with an error payload
    #[error("Daemon RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The response did not carry the expected field
    #[error("Daemon response missing {0}")]
    MissingField(&'static str),

    /// The response could not be decoded
    #[error("Malformed daemon response: {0}")]
    Malformed(String),
}

/// A settlement query that could not produce its value.
#[derive(Debug, Error)]
pub enum ReconciliationError {
    #[error("reward query failed: {0}")]
    Reward(#[source] DaemonError),

    #[error("difficulty query failed: {0}")]
    Difficulty(#[source] DaemonError),

    #[error("round shares query failed: {0}")]
    Shares(#[source] LedgerError),

    #[error("{query} query timed out")]
    Timeout { query: &'static str },

    #[error("daemon reported zero network difficulty")]
    ZeroDifficulty,
}

/// Errors surfaced by the share recorder and settlement coordinator.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The atomic batch for a found block could not be applied
    #[error("commit failed for {coin} block {block_hash} at height {height} (worker {worker}): {source}")]
    Commit {
        coin: String,
        height: u64,
        block_hash: String,
        worker: String,
        #[source]
        source: LedgerError,
    },

    /// The round for this height has already been archived
    #[error("round {height} for {coin} is already closed")]
    RoundAlreadyClosed { coin: String, height: u64 },

    /// The share event is missing data required by its flags
    #[error("Invalid share: {0}")]
    InvalidShare(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    /// Whether repeating the same batch may succeed. Missing keys, existing rename
    /// targets and mistyped keys fail the same way every time.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::Transport(_) | LedgerError::Backend(_) | LedgerError::Unavailable
        )
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

pub type ProcessorResult<T> = Result<T, ProcessorError>;
