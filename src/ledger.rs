//! Recipient ledger – remembers which recipients already hold a certificate.
//!
//! The only write primitive is an atomic insert-if-absent, so two concurrent
//! requests for the same new `id` cannot both create a record.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::LedgerError;

/// Default table name, fixed at deploy time.
pub const DEFAULT_TABLE: &str = "users_certificate";

/// A recipient's record. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientRecord {
    pub id: String,
    pub name: String,
    pub grade: String,
    /// Epoch milliseconds, assigned by the issuer.
    pub created_at: i64,
}

impl RecipientRecord {
    /// True when `name` and `grade` match this record.
    pub fn same_recipient(&self, name: &str, grade: &str) -> bool {
        self.name == name && self.grade == grade
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record already existed; it is returned untouched.
    AlreadyPresent(RecipientRecord),
}

#[async_trait]
pub trait RecipientLedger: Send + Sync {
    /// Point lookup by `id`.
    async fn find(&self, id: &str) -> Result<Option<RecipientRecord>, LedgerError>;

    /// Store `record` unless a record with the same `id` exists.
    async fn insert_if_absent(&self, record: &RecipientRecord)
        -> Result<InsertOutcome, LedgerError>;
}

/// Result of [`ensure_recorded`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
    /// The authoritative stored record.
    pub record: RecipientRecord,
    /// Whether this call created it.
    pub created: bool,
}

/// Record `candidate` if its recipient is unknown; otherwise keep the stored record.
pub async fn ensure_recorded(
    ledger: &dyn RecipientLedger,
    candidate: RecipientRecord,
) -> Result<RecordOutcome, LedgerError> {
    match ledger.insert_if_absent(&candidate).await? {
        InsertOutcome::Inserted => {
            log::info!("recorded recipient {}", candidate.id);
            Ok(RecordOutcome {
                record: candidate,
                created: true,
            })
        }
        InsertOutcome::AlreadyPresent(existing) => {
            log::info!("recipient {} already recorded, skipping write", existing.id);
            Ok(RecordOutcome {
                record: existing,
                created: false,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: RwLock<HashMap<String, RecipientRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RecipientLedger for MemoryLedger {
    async fn find(&self, id: &str) -> Result<Option<RecipientRecord>, LedgerError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn insert_if_absent(
        &self,
        record: &RecipientRecord,
    ) -> Result<InsertOutcome, LedgerError> {
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&record.id) {
            return Ok(InsertOutcome::AlreadyPresent(existing.clone()));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(InsertOutcome::Inserted)
    }
}

// ---------------------------------------------------------------------------
// SQLite backend
// ---------------------------------------------------------------------------

/// Ledger persisted in a SQLite table keyed by `id`.
#[derive(Clone)]
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
    table: String,
}

impl std::fmt::Debug for SqliteLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLedger")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl SqliteLedger {
    pub fn open(path: impl AsRef<Path>, table: &str) -> Result<Self, LedgerError> {
        Self::with_connection(Connection::open(path)?, table)
    }

    pub fn open_in_memory(table: &str) -> Result<Self, LedgerError> {
        Self::with_connection(Connection::open_in_memory()?, table)
    }

    fn with_connection(conn: Connection, table: &str) -> Result<Self, LedgerError> {
        validate_table_name(table)?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                grade TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )"
        ))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            table: table.to_string(),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, LedgerError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &str) -> Result<T, LedgerError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let table = self.table.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| LedgerError::Unavailable("connection lock poisoned".into()))?;
            f(&guard, &table)
        })
        .await
        .map_err(|e| LedgerError::Unavailable(format!("ledger task failed: {e}")))?
    }
}

/// Table names are plain SQL identifiers; they are interpolated into statements.
pub fn validate_table_name(table: &str) -> Result<(), LedgerError> {
    let mut chars = table.chars();
    let starts_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if starts_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(LedgerError::InvalidTable(table.to_string()))
    }
}

fn select_record(
    conn: &Connection,
    table: &str,
    id: &str,
) -> Result<Option<RecipientRecord>, LedgerError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, name, grade, created_at FROM {table} WHERE id = ?1"
    ))?;
    let record = stmt
        .query_row(params![id], |row| {
            Ok(RecipientRecord {
                id: row.get(0)?,
                name: row.get(1)?,
                grade: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;
    Ok(record)
}

#[async_trait]
impl RecipientLedger for SqliteLedger {
    async fn find(&self, id: &str) -> Result<Option<RecipientRecord>, LedgerError> {
        let id = id.to_string();
        self.with_conn(move |conn, table| select_record(conn, table, &id))
            .await
    }

    async fn insert_if_absent(
        &self,
        record: &RecipientRecord,
    ) -> Result<InsertOutcome, LedgerError> {
        let record = record.clone();
        self.with_conn(move |conn, table| {
            let changed = conn.execute(
                &format!(
                    "INSERT OR IGNORE INTO {table} (id, name, grade, created_at)
                     VALUES (?1, ?2, ?3, ?4)"
                ),
                params![record.id, record.name, record.grade, record.created_at],
            )?;
            if changed == 1 {
                return Ok(InsertOutcome::Inserted);
            }
            // The row exists; the lock is still held so it cannot vanish.
            match select_record(conn, table, &record.id)? {
                Some(existing) => Ok(InsertOutcome::AlreadyPresent(existing)),
                None => Err(LedgerError::Unavailable(format!(
                    "insert of {} was ignored but no row exists",
                    record.id
                ))),
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, name: &str, created_at: i64) -> RecipientRecord {
        RecipientRecord {
            id: id.to_string(),
            name: name.to_string(),
            grade: "A".to_string(),
            created_at,
        }
    }

    #[tokio::test]
    async fn memory_ledger_keeps_first_record() {
        let ledger = MemoryLedger::new();
        let first = ensure_recorded(&ledger, record("u1", "Ada", 1)).await.unwrap();
        assert!(first.created);

        let second = ensure_recorded(&ledger, record("u1", "Grace", 2)).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.record.name, "Ada");
        assert_eq!(second.record.created_at, 1);
        assert_eq!(ledger.len().await, 1);
    }

    #[tokio::test]
    async fn sqlite_ledger_inserts_once() {
        let ledger = SqliteLedger::open_in_memory(DEFAULT_TABLE).unwrap();
        assert_eq!(ledger.find("u1").await.unwrap(), None);

        let outcome = ledger.insert_if_absent(&record("u1", "Ada", 10)).await.unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted);

        let outcome = ledger.insert_if_absent(&record("u1", "Other", 20)).await.unwrap();
        assert_eq!(outcome, InsertOutcome::AlreadyPresent(record("u1", "Ada", 10)));
        assert_eq!(ledger.find("u1").await.unwrap(), Some(record("u1", "Ada", 10)));
    }

    #[tokio::test]
    async fn sqlite_ledger_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.sqlite");
        {
            let ledger = SqliteLedger::open(&path, DEFAULT_TABLE).unwrap();
            ledger.insert_if_absent(&record("u9", "Ada", 5)).await.unwrap();
        }
        let reopened = SqliteLedger::open(&path, DEFAULT_TABLE).unwrap();
        assert_eq!(reopened.find("u9").await.unwrap(), Some(record("u9", "Ada", 5)));
    }

    #[tokio::test]
    async fn concurrent_inserts_create_one_record() {
        let ledger = Arc::new(SqliteLedger::open_in_memory(DEFAULT_TABLE).unwrap());
        let mut handles = Vec::new();
        for i in 0..8 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ensure_recorded(ledger.as_ref(), record("race", "Ada", i)).await.unwrap()
            }));
        }
        let mut created = 0;
        for h in handles {
            if h.await.unwrap().created {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }

    #[test]
    fn table_names_are_identifiers() {
        assert!(SqliteLedger::open_in_memory("users_certificate").is_ok());
        assert!(matches!(
            SqliteLedger::open_in_memory("x; DROP TABLE y"),
            Err(LedgerError::InvalidTable(_))
        ));
    }
}
