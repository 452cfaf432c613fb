// src/state/mod.rs

//! Durable per-title state
//!
//! One record per title id, persisted in SQLite so install progress and
//! retry counts survive restarts. Records are written after every state
//! transition. A missing or corrupt record defaults to `{Pending, 0}`
//! rather than failing: the worst outcome of lost state is one redundant
//! install attempt, which the installer's idempotence contract absorbs.

mod retry;

pub use retry::{RetryCoordinator, RetryDisposition};

use crate::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use strum_macros::{Display, EnumString, FromRepr};
use tracing::{debug, info, warn};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Per-title install state machine states
///
/// Persisted by ordinal; `Done` and `Mounted` are terminal per-cycle and
/// re-entered on forced reinstall or source-path change.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, FromRepr,
)]
#[repr(u8)]
pub enum TitleState {
    /// Awaiting processing (initial)
    #[default]
    Pending = 0,
    /// Install attempt in flight
    Installing = 1,
    /// Restored: already registered, mount re-established
    Mounted = 2,
    /// Freshly installed and registered
    Done = 3,
    /// Retries exhausted, awaiting a user repair decision
    Error = 4,
}

/// Durable record of one title's install progress
#[derive(Debug, Clone)]
pub struct TitleRecord {
    pub title_id: String,
    pub state: TitleState,
    pub retry_count: u32,
    pub updated_at: DateTime<Utc>,
    pub source_path: PathBuf,
}

impl TitleRecord {
    /// Fresh record for a title seen for the first time
    pub fn new(title_id: &str, source_path: &Path) -> Self {
        Self {
            title_id: title_id.to_string(),
            state: TitleState::Pending,
            retry_count: 0,
            updated_at: Utc::now(),
            source_path: source_path.to_path_buf(),
        }
    }
}

/// SQLite-backed store of title records
pub struct StateStore {
    conn: Connection,
}

impl StateStore {
    /// Open (creating and migrating as needed) the store at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        migrate(&conn)?;
        Ok(Self { conn })
    }

    /// In-memory store for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Self { conn })
    }

    /// Load the record for a title, defaulting a missing or corrupt row to
    /// `{Pending, 0}` with the given source path
    pub fn load(&self, title_id: &str, source_path: &Path) -> TitleRecord {
        let row = self
            .conn
            .query_row(
                "SELECT state, retry_count, updated_at, source_path
                 FROM titles WHERE title_id = ?1",
                params![title_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional();

        match row {
            Ok(Some((state, retries, updated_at, source))) => {
                let Some(state) = u8::try_from(state).ok().and_then(TitleState::from_repr)
                else {
                    warn!(title_id, state, "corrupt state ordinal, defaulting to pending");
                    return TitleRecord::new(title_id, source_path);
                };
                TitleRecord {
                    title_id: title_id.to_string(),
                    state,
                    retry_count: u32::try_from(retries).unwrap_or(0),
                    updated_at: updated_at
                        .parse::<DateTime<Utc>>()
                        .unwrap_or_else(|_| Utc::now()),
                    source_path: PathBuf::from(source),
                }
            }
            Ok(None) => TitleRecord::new(title_id, source_path),
            Err(e) => {
                warn!(title_id, "failed to load record, defaulting to pending: {e}");
                TitleRecord::new(title_id, source_path)
            }
        }
    }

    /// Persist a record, replacing any previous row for the title
    pub fn save(&self, record: &TitleRecord) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO titles (title_id, state, retry_count, updated_at, source_path)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.title_id,
                record.state as u8,
                record.retry_count,
                record.updated_at.to_rfc3339(),
                record.source_path.to_string_lossy(),
            ],
        )?;
        debug!(
            title_id = %record.title_id,
            state = %record.state,
            retries = record.retry_count,
            "record saved"
        );
        Ok(())
    }

    /// Delete a title's record. Only an explicit user skip does this.
    pub fn remove(&self, title_id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM titles WHERE title_id = ?1", params![title_id])?;
        Ok(())
    }

    /// All persisted records
    pub fn all(&self) -> Result<Vec<TitleRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT title_id, state, retry_count, updated_at, source_path
             FROM titles ORDER BY title_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (title_id, state, retries, updated_at, source) = row?;
            let state = u8::try_from(state)
                .ok()
                .and_then(TitleState::from_repr)
                .unwrap_or_default();
            records.push(TitleRecord {
                title_id,
                state,
                retry_count: u32::try_from(retries).unwrap_or(0),
                updated_at: updated_at
                    .parse::<DateTime<Utc>>()
                    .unwrap_or_else(|_| Utc::now()),
                source_path: PathBuf::from(source),
            });
        }
        Ok(records)
    }

    /// Reset any record stuck in `Installing` back to `Pending`
    ///
    /// Run at startup: an in-flight marker can only survive a crash, and
    /// the invariant of at most one attempt per title is checked against it.
    pub fn recover_stale_installing(&self) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE titles SET state = ?1, updated_at = ?2 WHERE state = ?3",
            params![
                TitleState::Pending as u8,
                Utc::now().to_rfc3339(),
                TitleState::Installing as u8
            ],
        )?;
        if changed > 0 {
            info!(count = changed, "reset in-flight records from a previous run");
        }
        Ok(changed)
    }
}

/// Initialize or upgrade the schema
fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    for version in (current + 1)..=SCHEMA_VERSION {
        apply_migration(conn, version)?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            params![version],
        )?;
        debug!(version, "applied schema migration");
    }
    Ok(())
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        _ => Err(crate::Error::other(format!(
            "unknown schema migration version {version}"
        ))),
    }
}

/// Initial schema: one row per title id
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE titles (
            title_id TEXT PRIMARY KEY,
            state INTEGER NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            source_path TEXT NOT NULL
        );

        CREATE INDEX idx_titles_state ON titles(state);
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> StateStore {
        StateStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_missing_record_defaults_to_pending() {
        let store = store();
        let rec = store.load("CUSA00001", Path::new("/mnt/usb0/game"));
        assert_eq!(rec.state, TitleState::Pending);
        assert_eq!(rec.retry_count, 0);
        assert_eq!(rec.source_path, PathBuf::from("/mnt/usb0/game"));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let store = store();
        let mut rec = TitleRecord::new("CUSA00002", Path::new("/mnt/usb0/game"));
        rec.state = TitleState::Done;
        rec.retry_count = 2;
        store.save(&rec).unwrap();

        let loaded = store.load("CUSA00002", Path::new("/other"));
        assert_eq!(loaded.state, TitleState::Done);
        assert_eq!(loaded.retry_count, 2);
        assert_eq!(loaded.source_path, PathBuf::from("/mnt/usb0/game"));
    }

    #[test]
    fn test_corrupt_state_ordinal_defaults_to_pending() {
        let store = store();
        store
            .conn
            .execute(
                "INSERT INTO titles (title_id, state, retry_count, updated_at, source_path)
                 VALUES ('CUSA00003', 99, 7, 'garbage', '/mnt/usb0/game')",
                [],
            )
            .unwrap();

        let rec = store.load("CUSA00003", Path::new("/mnt/usb0/game"));
        assert_eq!(rec.state, TitleState::Pending);
        assert_eq!(rec.retry_count, 0);
    }

    #[test]
    fn test_remove_deletes_record() {
        let store = store();
        let rec = TitleRecord::new("CUSA00004", Path::new("/mnt/usb0/game"));
        store.save(&rec).unwrap();
        store.remove("CUSA00004").unwrap();
        assert!(store.all().unwrap().is_empty());
    }

    #[test]
    fn test_recover_stale_installing() {
        let store = store();
        let mut rec = TitleRecord::new("CUSA00005", Path::new("/mnt/usb0/game"));
        rec.state = TitleState::Installing;
        store.save(&rec).unwrap();
        let mut done = TitleRecord::new("CUSA00006", Path::new("/mnt/usb0/other"));
        done.state = TitleState::Done;
        store.save(&done).unwrap();

        assert_eq!(store.recover_stale_installing().unwrap(), 1);
        assert_eq!(
            store.load("CUSA00005", Path::new("/x")).state,
            TitleState::Pending
        );
        assert_eq!(
            store.load("CUSA00006", Path::new("/x")).state,
            TitleState::Done
        );
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("state.db");
        drop(StateStore::open(&path).unwrap());
        // Reopening runs migrate again against the existing schema
        let store = StateStore::open(&path).unwrap();
        assert!(store.all().unwrap().is_empty());
    }

    #[test]
    fn test_state_ordinals_are_stable() {
        // Persisted ordinals must never shift between releases
        assert_eq!(TitleState::Pending as u8, 0);
        assert_eq!(TitleState::Installing as u8, 1);
        assert_eq!(TitleState::Mounted as u8, 2);
        assert_eq!(TitleState::Done as u8, 3);
        assert_eq!(TitleState::Error as u8, 4);
        assert_eq!(TitleState::from_repr(3), Some(TitleState::Done));
    }
}
