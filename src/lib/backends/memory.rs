//! In-memory ledger backend for testing and development.
//!
//! This backend stores all data in memory and is useful for:
//! - Testing and development
//! - Single-process deployments where the ledger does not need to outlive the process

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use crate::{
    error::{LedgerError, LedgerResult},
    ledger::{Ledger, LedgerBatch, LedgerCommand, LedgerHealth},
};

#[derive(Debug, Clone)]
enum Entry {
    Hash(HashMap<String, f64>),
    SortedSet(HashMap<String, f64>),
    Set(HashSet<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Hash,
    SortedSet,
    Set,
}

impl Entry {
    fn kind(&self) -> Kind {
        match self {
            Entry::Hash(_) => Kind::Hash,
            Entry::SortedSet(_) => Kind::SortedSet,
            Entry::Set(_) => Kind::Set,
        }
    }
}

fn wrong_type(key: &str) -> LedgerError {
    LedgerError::InvalidData(format!("key {} holds the wrong kind of value", key))
}

/// In-memory implementation of [`Ledger`].
///
/// The keyspace is a single map behind a `RwLock`; a batch holds the write lock for
/// its whole duration. Batches are checked against the current keyspace before any
/// command is applied, so a failing batch leaves no trace. All data is lost when the
/// process stops.
pub struct MemoryLedger {
    data: RwLock<HashMap<String, Entry>>,
    last_operation_timestamp: RwLock<Option<u64>>,
}

impl MemoryLedger {
    /// Create a new MemoryLedger instance
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            last_operation_timestamp: RwLock::new(None),
        }
    }

    async fn update_last_operation_timestamp(&self) {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        *self.last_operation_timestamp.write().await = Some(timestamp);
    }

    /// Dry-run the batch over key kinds only.
    fn validate(data: &HashMap<String, Entry>, batch: &LedgerBatch) -> LedgerResult<()> {
        let mut kinds: HashMap<&str, Option<Kind>> = HashMap::new();

        for command in batch.commands() {
            let kind_of = |kinds: &HashMap<&str, Option<Kind>>, key: &str| match kinds.get(key) {
                Some(kind) => *kind,
                None => data.get(key).map(Entry::kind),
            };

            match command {
                LedgerCommand::HashIncrement { key, .. } => match kind_of(&kinds, key.as_str()) {
                    None | Some(Kind::Hash) => {
                        kinds.insert(key.as_str(), Some(Kind::Hash));
                    }
                    Some(_) => return Err(wrong_type(key)),
                },
                LedgerCommand::SortedSetAdd { key, .. } => match kind_of(&kinds, key.as_str()) {
                    None | Some(Kind::SortedSet) => {
                        kinds.insert(key.as_str(), Some(Kind::SortedSet));
                    }
                    Some(_) => return Err(wrong_type(key)),
                },
                LedgerCommand::SetAdd { key, .. } => match kind_of(&kinds, key.as_str()) {
                    None | Some(Kind::Set) => {
                        kinds.insert(key.as_str(), Some(Kind::Set));
                    }
                    Some(_) => return Err(wrong_type(key)),
                },
                LedgerCommand::Rename { from, to } | LedgerCommand::RenameIfPresent { from, to } => {
                    let source = match kind_of(&kinds, from.as_str()) {
                        Some(kind) => kind,
                        None if matches!(command, LedgerCommand::RenameIfPresent { .. }) => continue,
                        None => return Err(LedgerError::NoSuchKey(from.clone())),
                    };
                    if kind_of(&kinds, to.as_str()).is_some() {
                        return Err(LedgerError::KeyExists(to.clone()));
                    }
                    kinds.insert(from.as_str(), None);
                    kinds.insert(to.as_str(), Some(source));
                }
            }
        }
        Ok(())
    }

    /// Apply a batch that passed `validate`.
    fn apply(data: &mut HashMap<String, Entry>, batch: LedgerBatch) {
        for command in batch.into_commands() {
            match command {
                LedgerCommand::HashIncrement { key, field, delta } => {
                    if let Entry::Hash(fields) =
                        data.entry(key).or_insert_with(|| Entry::Hash(HashMap::new()))
                    {
                        *fields.entry(field).or_insert(0.0) += delta;
                    }
                }
                LedgerCommand::SortedSetAdd { key, score, member } => {
                    if let Entry::SortedSet(members) =
                        data.entry(key).or_insert_with(|| Entry::SortedSet(HashMap::new()))
                    {
                        members.insert(member, score);
                    }
                }
                LedgerCommand::SetAdd { key, member } => {
                    if let Entry::Set(members) =
                        data.entry(key).or_insert_with(|| Entry::Set(HashSet::new()))
                    {
                        members.insert(member);
                    }
                }
                LedgerCommand::Rename { from, to } | LedgerCommand::RenameIfPresent { from, to } => {
                    if let Some(entry) = data.remove(&from) {
                        data.insert(to, entry);
                    }
                }
            }
        }
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn initialize(&self) -> LedgerResult<()> {
        tracing::info!("Initializing memory ledger backend");
        self.update_last_operation_timestamp().await;
        Ok(())
    }

    async fn close(&self) -> LedgerResult<()> {
        tracing::info!("Closing memory ledger backend");
        self.data.write().await.clear();
        Ok(())
    }

    async fn exec(&self, batch: LedgerBatch) -> LedgerResult<()> {
        {
            let mut data = self.data.write().await;
            Self::validate(&data, &batch)?;
            Self::apply(&mut data, batch);
        }
        self.update_last_operation_timestamp().await;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> LedgerResult<HashMap<String, f64>> {
        let data = self.data.read().await;
        match data.get(key) {
            None => Ok(HashMap::new()),
            Some(Entry::Hash(fields)) => Ok(fields.clone()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn exists(&self, key: &str) -> LedgerResult<bool> {
        Ok(self.data.read().await.contains_key(key))
    }

    async fn sorted_set_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> LedgerResult<Vec<(String, f64)>> {
        let data = self.data.read().await;
        let members = match data.get(key) {
            None => return Ok(Vec::new()),
            Some(Entry::SortedSet(members)) => members,
            Some(_) => return Err(wrong_type(key)),
        };

        let mut filtered: Vec<(String, f64)> = members
            .iter()
            .filter(|(_, score)| **score >= min && **score <= max)
            .map(|(member, score)| (member.clone(), *score))
            .collect();
        filtered.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(filtered)
    }

    async fn set_members(&self, key: &str) -> LedgerResult<Vec<String>> {
        let data = self.data.read().await;
        match data.get(key) {
            None => Ok(Vec::new()),
            Some(Entry::Set(members)) => {
                let mut members: Vec<String> = members.iter().cloned().collect();
                members.sort();
                Ok(members)
            }
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn health_check(&self) -> LedgerResult<LedgerHealth> {
        let last_operation = *self.last_operation_timestamp.read().await;

        Ok(LedgerHealth {
            is_healthy: true,
            backend_type: "memory".to_string(),
            connection_status: "connected".to_string(),
            last_operation_timestamp: last_operation,
            error_message: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_increment_creates_missing_key() {
        let ledger = MemoryLedger::new();
        let mut batch = LedgerBatch::new();
        batch
            .hash_increment("c:round", "A", 10.0)
            .hash_increment("c:round", "A", 2.5)
            .hash_increment("c:round", "B", 1.0);
        ledger.exec(batch).await.unwrap();

        let round = ledger.hash_get_all("c:round").await.unwrap();
        assert_eq!(round.get("A"), Some(&12.5));
        assert_eq!(round.get("B"), Some(&1.0));
    }

    #[tokio::test]
    async fn test_failed_batch_applies_nothing() {
        let ledger = MemoryLedger::new();
        let mut batch = LedgerBatch::new();
        batch
            .hash_increment("c:stats", "validShares", 1.0)
            .rename("c:missing", "c:archived");

        let err = ledger.exec(batch).await.unwrap_err();
        assert!(matches!(err, LedgerError::NoSuchKey(key) if key == "c:missing"));
        assert!(!ledger.exists("c:stats").await.unwrap());
    }

    #[tokio::test]
    async fn test_rename_refuses_existing_destination() {
        let ledger = MemoryLedger::new();
        let mut batch = LedgerBatch::new();
        batch
            .hash_increment("c:current", "A", 1.0)
            .hash_increment("c:round1", "B", 1.0);
        ledger.exec(batch).await.unwrap();

        let mut batch = LedgerBatch::new();
        batch.rename("c:current", "c:round1");
        let err = ledger.exec(batch).await.unwrap_err();
        assert!(matches!(err, LedgerError::KeyExists(_)));

        let archived = ledger.hash_get_all("c:round1").await.unwrap();
        assert_eq!(archived.len(), 1);
        assert!(archived.contains_key("B"));
        assert!(ledger.exists("c:current").await.unwrap());
    }

    #[tokio::test]
    async fn test_rename_within_batch_then_recreate() {
        let ledger = MemoryLedger::new();
        let mut batch = LedgerBatch::new();
        batch
            .hash_increment("c:current", "A", 5.0)
            .rename("c:current", "c:round7")
            .rename_if_present("c:timesCurrent", "c:times7")
            .hash_increment("c:current", "B", 1.0);
        ledger.exec(batch).await.unwrap();

        assert_eq!(ledger.hash_get_all("c:round7").await.unwrap().get("A"), Some(&5.0));
        let current = ledger.hash_get_all("c:current").await.unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current.get("B"), Some(&1.0));
        assert!(!ledger.exists("c:times7").await.unwrap());
    }

    #[tokio::test]
    async fn test_sorted_set_range() {
        let ledger = MemoryLedger::new();
        let mut batch = LedgerBatch::new();
        batch
            .sorted_set_add("c:hashrate", 100.0, "1:A:100000")
            .sorted_set_add("c:hashrate", 100.0, "1:A:100500")
            .sorted_set_add("c:hashrate", 200.0, "-1:B:200000");
        ledger.exec(batch).await.unwrap();

        let window = ledger
            .sorted_set_range_by_score("c:hashrate", 100.0, 150.0)
            .await
            .unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].0, "1:A:100000");
        assert_eq!(window[1].0, "1:A:100500");
    }

    #[tokio::test]
    async fn test_wrong_type_rejected() {
        let ledger = MemoryLedger::new();
        let mut batch = LedgerBatch::new();
        batch.set_add("c:key", "member");
        ledger.exec(batch).await.unwrap();

        let mut batch = LedgerBatch::new();
        batch.hash_increment("c:key", "f", 1.0);
        assert!(matches!(
            ledger.exec(batch).await,
            Err(LedgerError::InvalidData(_))
        ));
        assert!(ledger.hash_get_all("c:key").await.is_err());
    }

    #[tokio::test]
    async fn test_health_check() {
        let ledger = MemoryLedger::new();
        ledger.initialize().await.unwrap();
        let health = ledger.health_check().await.unwrap();
        assert!(health.is_healthy);
        assert_eq!(health.backend_type, "memory");
        assert!(health.last_operation_timestamp.is_some());
    }
}
