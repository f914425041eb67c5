//! Trait interface for the shared key-value ledger.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::LedgerResult;

/// A single mutation queued in a [`LedgerBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerCommand {
    /// Add `delta` to a numeric hash field, creating the key and field when missing
    HashIncrement {
        key: String,
        field: String,
        delta: f64,
    },
    /// Insert or rescore a member of a sorted set
    SortedSetAdd {
        key: String,
        score: f64,
        member: String,
    },
    /// Insert a member into an unordered set
    SetAdd { key: String, member: String },
    /// Move `from` to `to`. Fails if `from` is missing or `to` already exists.
    Rename { from: String, to: String },
    /// Like `Rename`, but a missing `from` is a no-op.
    RenameIfPresent { from: String, to: String },
}

/// Ordered list of commands committed together.
///
/// Backends apply every command or none of them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerBatch {
    commands: Vec<LedgerCommand>,
}

impl LedgerBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hash_increment(&mut self, key: impl Into<String>, field: impl Into<String>, delta: f64) -> &mut Self {
        self.commands.push(LedgerCommand::HashIncrement {
            key: key.into(),
            field: field.into(),
            delta,
        });
        self
    }

    pub fn sorted_set_add(&mut self, key: impl Into<String>, score: f64, member: impl Into<String>) -> &mut Self {
        self.commands.push(LedgerCommand::SortedSetAdd {
            key: key.into(),
            score,
            member: member.into(),
        });
        self
    }

    pub fn set_add(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.commands.push(LedgerCommand::SetAdd {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn rename(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.commands.push(LedgerCommand::Rename {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    pub fn rename_if_present(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.commands.push(LedgerCommand::RenameIfPresent {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    pub fn commands(&self) -> &[LedgerCommand] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<LedgerCommand> {
        self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Trait defining the interface for ledger backends.
///
/// One handle is opened per process and shared by the recorder and the settlement
/// coordinator. Implementations must make [`Ledger::exec`] all-or-nothing from the
/// caller's point of view; no isolation across batches is assumed.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Initialize the backend (connect, create tables, etc.)
    async fn initialize(&self) -> LedgerResult<()>;

    /// Close the backend and release resources
    async fn close(&self) -> LedgerResult<()>;

    /// Commit every command of `batch` atomically
    async fn exec(&self, batch: LedgerBatch) -> LedgerResult<()>;

    /// Read a whole numeric hash. A missing key reads as empty.
    async fn hash_get_all(&self, key: &str) -> LedgerResult<HashMap<String, f64>>;

    /// Whether a key of any type exists
    async fn exists(&self, key: &str) -> LedgerResult<bool>;

    /// Members of a sorted set with `min <= score <= max`, ordered by score
    async fn sorted_set_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> LedgerResult<Vec<(String, f64)>>;

    /// All members of an unordered set
    async fn set_members(&self, key: &str) -> LedgerResult<Vec<String>>;

    /// Health check for the backend
    async fn health_check(&self) -> LedgerResult<LedgerHealth>;
}

/// Ledger backend health information
#[derive(Debug, Clone)]
pub struct LedgerHealth {
    pub is_healthy: bool,
    pub backend_type: String,
    pub connection_status: String,
    pub last_operation_timestamp: Option<u64>,
    pub error_message: Option<String>,
}
