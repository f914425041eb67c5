//! SQLite ledger backend implementation.
//!
//! This backend provides persistent storage using SQLite database.
//! Features:
//! - Every batch runs in one transaction
//! - File-based persistence shared by all processes on the host
//! - Embedded database (no separate server needed)

use async_trait::async_trait;
use sqlx::{sqlite::SqliteConnectOptions, Row, SqliteConnection, SqlitePool};
use std::{
    collections::HashMap,
    path::Path,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::sync::RwLock;

use crate::{
    error::{LedgerError, LedgerResult},
    ledger::{Ledger, LedgerBatch, LedgerCommand, LedgerHealth},
};

const TABLES: [&str; 3] = ["ledger_hashes", "ledger_sorted_sets", "ledger_sets"];

fn map_sqlx(e: sqlx::Error) -> LedgerError {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            LedgerError::Transport(e.to_string())
        }
        other => LedgerError::Backend(other.to_string()),
    }
}

/// SQLite implementation of [`Ledger`].
///
/// Hashes, sorted sets and sets live in one table each, keyed by ledger key.
/// A rename rewrites the key column of whichever table holds the source.
pub struct SqliteLedger {
    pool: RwLock<Option<SqlitePool>>,
    database_path: String,
    last_operation_timestamp: RwLock<Option<u64>>,
}

impl SqliteLedger {
    /// Create a new SqliteLedger instance
    pub fn new(database_path: impl Into<String>) -> Self {
        Self {
            pool: RwLock::new(None),
            database_path: database_path.into(),
            last_operation_timestamp: RwLock::new(None),
        }
    }

    /// Get database connection pool
    async fn get_pool(&self) -> LedgerResult<SqlitePool> {
        self.pool.read().await.clone().ok_or(LedgerError::Unavailable)
    }

    /// Initialize database schema
    async fn create_tables(pool: &SqlitePool) -> LedgerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledger_hashes (
                key TEXT NOT NULL,
                field TEXT NOT NULL,
                value REAL NOT NULL,
                PRIMARY KEY (key, field)
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(map_sqlx)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledger_sorted_sets (
                key TEXT NOT NULL,
                member TEXT NOT NULL,
                score REAL NOT NULL,
                PRIMARY KEY (key, member)
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(map_sqlx)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledger_sets (
                key TEXT NOT NULL,
                member TEXT NOT NULL,
                PRIMARY KEY (key, member)
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(map_sqlx)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sorted_sets_score ON ledger_sorted_sets(key, score)")
            .execute(pool)
            .await
            .map_err(map_sqlx)?;

        Ok(())
    }

    fn current_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    /// Table holding `key`, if any.
    async fn key_table(conn: &mut SqliteConnection, key: &str) -> LedgerResult<Option<&'static str>> {
        for table in TABLES {
            let found: Option<i64> =
                sqlx::query_scalar(&format!("SELECT 1 FROM {} WHERE key = ?1 LIMIT 1", table))
                    .bind(key)
                    .fetch_optional(&mut *conn)
                    .await
                    .map_err(map_sqlx)?;
            if found.is_some() {
                return Ok(Some(table));
            }
        }
        Ok(None)
    }

    /// Reject writes to a key that already holds another kind of value.
    async fn ensure_table(conn: &mut SqliteConnection, key: &str, table: &str) -> LedgerResult<()> {
        match Self::key_table(conn, key).await? {
            Some(existing) if existing != table => Err(LedgerError::InvalidData(format!(
                "key {} holds the wrong kind of value",
                key
            ))),
            _ => Ok(()),
        }
    }

    async fn apply(conn: &mut SqliteConnection, command: LedgerCommand) -> LedgerResult<()> {
        match command {
            LedgerCommand::HashIncrement { key, field, delta } => {
                Self::ensure_table(conn, &key, "ledger_hashes").await?;
                sqlx::query(
                    r#"
                    INSERT INTO ledger_hashes (key, field, value) VALUES (?1, ?2, ?3)
                    ON CONFLICT(key, field) DO UPDATE SET value = value + excluded.value
                    "#,
                )
                .bind(&key)
                .bind(&field)
                .bind(delta)
                .execute(&mut *conn)
                .await
                .map_err(map_sqlx)?;
            }
            LedgerCommand::SortedSetAdd { key, score, member } => {
                Self::ensure_table(conn, &key, "ledger_sorted_sets").await?;
                sqlx::query(
                    r#"
                    INSERT INTO ledger_sorted_sets (key, member, score) VALUES (?1, ?2, ?3)
                    ON CONFLICT(key, member) DO UPDATE SET score = excluded.score
                    "#,
                )
                .bind(&key)
                .bind(&member)
                .bind(score)
                .execute(&mut *conn)
                .await
                .map_err(map_sqlx)?;
            }
            LedgerCommand::SetAdd { key, member } => {
                Self::ensure_table(conn, &key, "ledger_sets").await?;
                sqlx::query("INSERT OR IGNORE INTO ledger_sets (key, member) VALUES (?1, ?2)")
                    .bind(&key)
                    .bind(&member)
                    .execute(&mut *conn)
                    .await
                    .map_err(map_sqlx)?;
            }
            LedgerCommand::Rename { from, to } => {
                let table = Self::key_table(conn, &from)
                    .await?
                    .ok_or(LedgerError::NoSuchKey(from.clone()))?;
                Self::rename(conn, table, &from, &to).await?;
            }
            LedgerCommand::RenameIfPresent { from, to } => {
                if let Some(table) = Self::key_table(conn, &from).await? {
                    Self::rename(conn, table, &from, &to).await?;
                }
            }
        }
        Ok(())
    }

    async fn rename(conn: &mut SqliteConnection, table: &str, from: &str, to: &str) -> LedgerResult<()> {
        if Self::key_table(conn, to).await?.is_some() {
            return Err(LedgerError::KeyExists(to.to_string()));
        }
        sqlx::query(&format!("UPDATE {} SET key = ?1 WHERE key = ?2", table))
            .bind(to)
            .bind(from)
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn initialize(&self) -> LedgerResult<()> {
        tracing::info!("Initializing SQLite ledger backend at: {}", self.database_path);

        // Create database directory if it doesn't exist
        if let Some(parent) = Path::new(&self.database_path).parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                LedgerError::Backend(format!("Failed to create database directory: {}", e))
            })?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", self.database_path))
            .map_err(|e| LedgerError::Backend(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        Self::create_tables(&pool).await?;
        *self.pool.write().await = Some(pool);
        *self.last_operation_timestamp.write().await = Some(Self::current_timestamp());

        tracing::info!("SQLite ledger initialized successfully");
        Ok(())
    }

    async fn close(&self) -> LedgerResult<()> {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
            tracing::info!("SQLite ledger closed");
        }
        Ok(())
    }

    async fn exec(&self, batch: LedgerBatch) -> LedgerResult<()> {
        let pool = self.get_pool().await?;
        let mut tx = pool.begin().await.map_err(map_sqlx)?;

        // Dropping the transaction on error rolls every command back.
        for command in batch.into_commands() {
            Self::apply(&mut tx, command).await?;
        }
        tx.commit().await.map_err(map_sqlx)?;

        *self.last_operation_timestamp.write().await = Some(Self::current_timestamp());
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> LedgerResult<HashMap<String, f64>> {
        let pool = self.get_pool().await?;
        let rows = sqlx::query("SELECT field, value FROM ledger_hashes WHERE key = ?1")
            .bind(key)
            .fetch_all(&pool)
            .await
            .map_err(map_sqlx)?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get::<String, _>("field"), row.get::<f64, _>("value")))
            .collect())
    }

    async fn exists(&self, key: &str) -> LedgerResult<bool> {
        let pool = self.get_pool().await?;
        let mut conn = pool.acquire().await.map_err(map_sqlx)?;
        Ok(Self::key_table(&mut conn, key).await?.is_some())
    }

    async fn sorted_set_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> LedgerResult<Vec<(String, f64)>> {
        let pool = self.get_pool().await?;
        let rows = sqlx::query(
            "SELECT member, score FROM ledger_sorted_sets
             WHERE key = ?1 AND score >= ?2 AND score <= ?3
             ORDER BY score, member",
        )
        .bind(key)
        .bind(min)
        .bind(max)
        .fetch_all(&pool)
        .await
        .map_err(map_sqlx)?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get::<String, _>("member"), row.get::<f64, _>("score")))
            .collect())
    }

    async fn set_members(&self, key: &str) -> LedgerResult<Vec<String>> {
        let pool = self.get_pool().await?;
        let rows = sqlx::query("SELECT member FROM ledger_sets WHERE key = ?1 ORDER BY member")
            .bind(key)
            .fetch_all(&pool)
            .await
            .map_err(map_sqlx)?;

        Ok(rows.into_iter().map(|row| row.get("member")).collect())
    }

    async fn health_check(&self) -> LedgerResult<LedgerHealth> {
        let last_operation = *self.last_operation_timestamp.read().await;
        let pool = match self.get_pool().await {
            Ok(pool) => pool,
            Err(_) => {
                return Ok(LedgerHealth {
                    is_healthy: false,
                    backend_type: "sqlite".to_string(),
                    connection_status: "disconnected".to_string(),
                    last_operation_timestamp: last_operation,
                    error_message: Some("Database pool not initialized".to_string()),
                })
            }
        };

        let (is_healthy, connection_status, error_message) =
            match sqlx::query("SELECT 1").execute(&pool).await {
                Ok(_) => (true, "connected".to_string(), None),
                Err(e) => (false, "error".to_string(), Some(e.to_string())),
            };

        Ok(LedgerHealth {
            is_healthy,
            backend_type: "sqlite".to_string(),
            connection_status,
            last_operation_timestamp: last_operation,
            error_message,
        })
    }
}
