mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use thiserror::Error;
use uuid::Uuid;

use crate::models::*;

/// Errors raised by the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Existing data could not be parsed. Callers reset to a fresh cursor.
    #[error("stored state is corrupt: {0}")]
    Corrupt(String),

    #[error("sequence {0} is beyond the storable range")]
    SequenceOutOfRange(u64),

    #[error("database error: {0}")]
    Sqlite(#[source] rusqlite::Error),

    #[error("migration failed: {0:#}")]
    Migration(anyhow::Error),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if is_corruption(&err) {
            Self::Corrupt(err.to_string())
        } else {
            Self::Sqlite(err)
        }
    }
}

fn is_corruption(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if matches!(inner.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt)
    )
}

/// Durable record of the change-stream position and classification cache.
///
/// Implementations must persist the sequence number together with its delta
/// as one unit, and treat a commit at or below the stored sequence as a no-op.
pub trait CursorStore: Send + Sync {
    fn load(&self) -> Result<CursorState, StoreError>;

    /// Returns `false` when `sequence` did not advance the stored cursor.
    fn commit(&self, sequence: u64, delta: &ClassificationDelta) -> Result<bool, StoreError>;

    /// Persist a delta whose batch did not advance the cursor, such as a
    /// full resync replayed at the committed sequence.
    fn merge(&self, delta: &ClassificationDelta) -> Result<(), StoreError>;

    fn reset(&self) -> Result<(), StoreError>;

    /// Load the cursor, falling back to a fresh one when stored data is corrupt.
    fn load_or_reset(&self) -> Result<CursorState, StoreError> {
        match self.load() {
            Ok(state) => Ok(state),
            Err(StoreError::Corrupt(reason)) => {
                tracing::warn!(
                    %reason,
                    "Cursor state is unreadable; starting from sequence 0, cached classifications are lost"
                );
                self.reset()?;
                Ok(CursorState::default())
            }
            Err(e) => Err(e),
        }
    }
}

/// Sink for per-account claim decisions.
pub trait ClaimJournal: Send + Sync {
    fn record(&self, record: &ClaimRecord) -> Result<(), StoreError>;
}

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open and migrate the database at `path`, moving an unreadable file
    /// aside and starting over instead of failing.
    pub fn open_or_recover(path: PathBuf) -> Result<Self, StoreError> {
        let attempt = Self::open(path.clone()).and_then(|db| {
            db.migrate()?;
            Ok(db)
        });

        match attempt {
            Ok(db) => Ok(db),
            Err(StoreError::Corrupt(reason)) => {
                let moved = quarantine(&path)?;
                tracing::warn!(
                    %reason,
                    moved_to = %moved.display(),
                    "Database is corrupt, moved it aside and starting fresh"
                );
                let db = Self::open(path)?;
                db.migrate()?;
                Ok(db)
            }
            Err(e) => Err(e),
        }
    }

    pub fn open_default() -> Result<Self, StoreError> {
        let dirs = directories::ProjectDirs::from("", "", "free-packages").ok_or_else(|| {
            StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine data directory",
            ))
        })?;
        Self::open_or_recover(dirs.data_dir().join("free-packages.db"))
    }

    pub fn open_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("database lock poisoned");
        schema::run_migrations(&conn).map_err(|e| match e.downcast_ref::<rusqlite::Error>() {
            Some(inner) if is_corruption(inner) => StoreError::Corrupt(inner.to_string()),
            _ => StoreError::Migration(e),
        })
    }

    // ============================================================
    // Cursor operations
    // ============================================================

    pub fn load_cursor(&self) -> Result<CursorState, StoreError> {
        let conn = self.conn.lock().expect("database lock poisoned");

        let last_sequence: i64 = conn
            .query_row("SELECT last_sequence FROM cursor WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?
            .unwrap_or(0);
        let last_sequence = u64::try_from(last_sequence)
            .map_err(|_| StoreError::Corrupt(format!("negative sequence {}", last_sequence)))?;

        let mut stmt = conn.prepare("SELECT entry_id, classification FROM categorized_entries")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut known_entries = std::collections::HashMap::with_capacity(rows.len());
        for (id, raw) in rows {
            let classification: Classification = serde_json::from_str(&raw).map_err(|e| {
                StoreError::Corrupt(format!("classification for entry {}: {}", id, e))
            })?;
            known_entries.insert(EntryId(id), classification);
        }

        let mut stmt = conn.prepare("SELECT entry_id FROM pending_entries")?;
        let pending_entries = stmt
            .query_map([], |row| row.get::<_, u32>(0).map(EntryId))?
            .collect::<Result<_, _>>()?;

        Ok(CursorState {
            last_sequence,
            known_entries,
            pending_entries,
        })
    }

    pub fn commit_cursor(
        &self,
        sequence: u64,
        delta: &ClassificationDelta,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;

        let current: i64 = tx
            .query_row("SELECT last_sequence FROM cursor WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?
            .unwrap_or(0);
        let sequence =
            i64::try_from(sequence).map_err(|_| StoreError::SequenceOutOfRange(sequence))?;
        if sequence <= current {
            return Ok(false);
        }

        write_delta(&tx, delta, sequence)?;
        tx.execute(
            "INSERT INTO cursor (id, last_sequence, updated_at) VALUES (1, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                last_sequence = excluded.last_sequence,
                updated_at = excluded.updated_at",
            (sequence, Utc::now().to_rfc3339()),
        )?;
        tx.commit()?;

        Ok(true)
    }

    /// Persist cache and pending changes without moving the sequence.
    pub fn merge_classifications(&self, delta: &ClassificationDelta) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;
        let current: i64 = tx
            .query_row("SELECT last_sequence FROM cursor WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?
            .unwrap_or(0);
        write_delta(&tx, delta, current)?;
        tx.commit()?;
        Ok(())
    }

    pub fn reset_cursor(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute_batch(
            "BEGIN TRANSACTION;
             DELETE FROM categorized_entries;
             DELETE FROM pending_entries;
             DELETE FROM cursor;
             COMMIT;",
        )?;
        Ok(())
    }

    pub fn cursor_summary(&self) -> Result<CursorSummary, StoreError> {
        let conn = self.conn.lock().expect("database lock poisoned");

        let (last_sequence, updated_at) = conn
            .query_row(
                "SELECT last_sequence, updated_at FROM cursor WHERE id = 1",
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()?
            .unwrap_or((0, None));
        let categorized: i64 =
            conn.query_row("SELECT COUNT(*) FROM categorized_entries", [], |row| {
                row.get(0)
            })?;
        let pending: i64 =
            conn.query_row("SELECT COUNT(*) FROM pending_entries", [], |row| row.get(0))?;

        Ok(CursorSummary {
            last_sequence: last_sequence.max(0) as u64,
            categorized_entries: categorized as usize,
            pending_entries: pending as usize,
            updated_at: updated_at.map(parse_datetime),
        })
    }

    // ============================================================
    // Claim log operations
    // ============================================================

    pub fn record_claim(&self, record: &ClaimRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT INTO claim_log (id, account_id, entry_id, decision, detail, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            (
                record.id.to_string(),
                &record.account_id,
                record.entry_id.0,
                record.decision.as_str(),
                &record.detail,
                record.created_at.to_rfc3339(),
            ),
        )?;
        Ok(())
    }

    /// Most recent decisions for an account, newest first.
    pub fn get_claims(&self, account_id: &str, limit: usize) -> Result<Vec<ClaimRecord>, StoreError> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, account_id, entry_id, decision, detail, created_at
             FROM claim_log WHERE account_id = ?
             ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )?;

        let records = stmt
            .query_map((account_id, limit as i64), |row| {
                Ok(ClaimRecord {
                    id: parse_uuid(row.get::<_, String>(0)?),
                    account_id: row.get(1)?,
                    entry_id: EntryId(row.get(2)?),
                    decision: ClaimDecision::from_str(&row.get::<_, String>(3)?)
                        .unwrap_or(ClaimDecision::Failed),
                    detail: row.get(4)?,
                    created_at: parse_datetime(row.get::<_, String>(5)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Delete journal rows older than `cutoff`. Returns the number removed.
    pub fn prune_claims(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let removed = conn.execute(
            "DELETE FROM claim_log WHERE created_at < ?",
            [cutoff.to_rfc3339()],
        )?;
        Ok(removed)
    }
}

impl CursorStore for Database {
    fn load(&self) -> Result<CursorState, StoreError> {
        self.load_cursor()
    }

    fn commit(&self, sequence: u64, delta: &ClassificationDelta) -> Result<bool, StoreError> {
        self.commit_cursor(sequence, delta)
    }

    fn merge(&self, delta: &ClassificationDelta) -> Result<(), StoreError> {
        self.merge_classifications(delta)
    }

    fn reset(&self) -> Result<(), StoreError> {
        self.reset_cursor()
    }
}

impl ClaimJournal for Database {
    fn record(&self, record: &ClaimRecord) -> Result<(), StoreError> {
        self.record_claim(record)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
        }
    }
}

fn write_delta(
    tx: &rusqlite::Transaction<'_>,
    delta: &ClassificationDelta,
    sequence: i64,
) -> Result<(), StoreError> {
    let mut upsert = tx.prepare(
        "INSERT INTO categorized_entries (entry_id, classification, sequence)
         VALUES (?, ?, ?)
         ON CONFLICT(entry_id) DO UPDATE SET
            classification = excluded.classification,
            sequence = excluded.sequence",
    )?;
    for (id, classification) in &delta.upserts {
        upsert.execute((id.0, serde_json::to_string(classification)?, sequence))?;
    }

    let mut resolve = tx.prepare("DELETE FROM pending_entries WHERE entry_id = ?")?;
    for id in &delta.resolved {
        resolve.execute([id.0])?;
    }

    let mut pend = tx.prepare(
        "INSERT OR IGNORE INTO pending_entries (entry_id, first_sequence) VALUES (?, ?)",
    )?;
    for id in &delta.pending {
        pend.execute((id.0, sequence))?;
    }
    Ok(())
}

/// Rename a corrupt database (and its WAL side files) out of the way.
fn quarantine(path: &Path) -> Result<PathBuf, StoreError> {
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let mut moved = path.as_os_str().to_owned();
    moved.push(format!(".corrupt-{}", stamp));
    let moved = PathBuf::from(moved);

    std::fs::rename(path, &moved)?;
    for suffix in ["-wal", "-shm"] {
        let mut side = path.as_os_str().to_owned();
        side.push(suffix);
        let side = PathBuf::from(side);
        if side.exists() {
            std::fs::remove_file(side)?;
        }
    }
    Ok(moved)
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
