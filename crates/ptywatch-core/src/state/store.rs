//! SQLite-backed status store.
//!
//! Concurrency contract: every status row has exactly one writer (the
//! monitoring task of its session, or the scheduler before that task exists
//! and after it ends). Any number of readers, in this process or others, may
//! read at any time; WAL mode keeps them from blocking the writer and each
//! write is a single transaction, so readers see whole records only.

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::agents::{Session, SessionState};
use crate::error::StoreError;

/// How long a connection waits for a competing writer
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Current status of one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub session_id: String,
    /// Filled from the sessions table on reads
    #[serde(default)]
    pub agent_type: String,
    pub state: SessionState,
    pub summary: String,
    #[serde(default)]
    pub actions: Vec<String>,
    pub last_snapshot_hash: Option<String>,
    /// When `state` or `summary` last changed
    pub last_change_at: DateTime<Utc>,
    pub last_polled_at: Option<DateTime<Utc>>,
    /// Consecutive polls with an unchanged snapshot
    pub stable_count: u32,
}

impl StatusRecord {
    /// Fresh record for a newly registered session
    pub fn untracked(session: &Session, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session.id.clone(),
            agent_type: session.agent_type.clone(),
            state: SessionState::Untracked,
            summary: "Not classified yet".to_string(),
            actions: Vec::new(),
            last_snapshot_hash: None,
            last_change_at: now,
            last_polled_at: None,
            stable_count: 0,
        }
    }
}

/// Append-only history row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub session_id: String,
    pub ts: DateTime<Utc>,
    pub state: SessionState,
    pub summary: String,
}

/// Fixed-width UTC timestamps sort lexicographically
fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {:?}: {}", raw, e)))
}

fn parse_state(raw: &str) -> Result<SessionState, StoreError> {
    raw.parse().map_err(StoreError::Corrupt)
}

/// Raw status row before conversion
struct StatusRow {
    id: String,
    agent_type: Option<String>,
    state: String,
    summary: String,
    actions: String,
    hash: Option<String>,
    last_change_at: String,
    last_polled_at: Option<String>,
    stable_count: i64,
}

impl StatusRow {
    const COLUMNS: &'static str = "s.id, p.agent_type, s.state, s.summary, s.actions, \
         s.last_snapshot_hash, s.last_change_at, s.last_polled_at, s.stable_count";

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            agent_type: row.get(1)?,
            state: row.get(2)?,
            summary: row.get(3)?,
            actions: row.get(4)?,
            hash: row.get(5)?,
            last_change_at: row.get(6)?,
            last_polled_at: row.get(7)?,
            stable_count: row.get(8)?,
        })
    }

    fn into_record(self) -> Result<StatusRecord, StoreError> {
        Ok(StatusRecord {
            session_id: self.id,
            agent_type: self.agent_type.unwrap_or_default(),
            state: parse_state(&self.state)?,
            summary: self.summary,
            actions: serde_json::from_str(&self.actions)?,
            last_snapshot_hash: self.hash,
            last_change_at: parse_ts(&self.last_change_at)?,
            last_polled_at: self.last_polled_at.as_deref().map(parse_ts).transpose()?,
            stable_count: u32::try_from(self.stable_count).unwrap_or(u32::MAX),
        })
    }
}

/// Durable current status and history for every tracked session
pub struct StatusStore {
    conn: Mutex<Connection>,
}

impl StatusStore {
    /// Open or create the database at the given path
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                agent_type TEXT NOT NULL,
                cwd TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS status (
                id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                summary TEXT NOT NULL DEFAULT '',
                actions TEXT NOT NULL DEFAULT '[]',
                last_snapshot_hash TEXT,
                last_change_at TEXT NOT NULL,
                last_polled_at TEXT,
                stable_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS status_history (
                id TEXT NOT NULL,
                ts TEXT NOT NULL,
                state TEXT NOT NULL,
                summary TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_history_id_ts ON status_history(id, ts);
            CREATE INDEX IF NOT EXISTS idx_status_polled ON status(last_polled_at);
            "#,
        )?;
        Ok(())
    }

    /// Record a newly observed session and reset its status to UNTRACKED
    pub fn register_session(&self, session: &Session) -> Result<StatusRecord, StoreError> {
        let record = StatusRecord::untracked(session, session.created_at);
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO sessions (id, agent_type, cwd, created_at) VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                agent_type = excluded.agent_type,
                cwd = excluded.cwd,
                created_at = excluded.created_at
            "#,
            params![session.id, session.agent_type, session.cwd, ts(&session.created_at)],
        )?;
        upsert_status(&tx, &record)?;
        tx.commit()?;
        Ok(record)
    }

    /// Persist a record and its new history entries atomically
    pub fn save(
        &self,
        record: &StatusRecord,
        history: &[StatusHistoryEntry],
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        upsert_status(&tx, record)?;
        for entry in history {
            insert_history(&tx, entry)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_status(&self, session_id: &str) -> Result<Option<StatusRecord>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM status s LEFT JOIN sessions p ON p.id = s.id WHERE s.id = ?1",
                    StatusRow::COLUMNS
                ),
                params![session_id],
                StatusRow::from_row,
            )
            .optional()?;
        row.map(StatusRow::into_record).transpose()
    }

    /// All status records, optionally only those polled at or after `since`
    pub fn list_statuses(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<StatusRecord>, StoreError> {
        let conn = self.conn.lock();
        let rows = match since {
            Some(since) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM status s LEFT JOIN sessions p ON p.id = s.id \
                     WHERE s.last_polled_at >= ?1 ORDER BY s.id",
                    StatusRow::COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![ts(&since)], StatusRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM status s LEFT JOIN sessions p ON p.id = s.id ORDER BY s.id",
                    StatusRow::COLUMNS
                ))?;
                let rows = stmt
                    .query_map([], StatusRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        rows.into_iter().map(StatusRow::into_record).collect()
    }

    /// The newest `limit` history entries of a session, oldest first
    pub fn tail_history(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<StatusHistoryEntry>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, ts, state, summary FROM status_history WHERE id = ?1 \
             ORDER BY ts DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![session_id, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut entries = rows
            .into_iter()
            .map(|(id, at, state, summary)| {
                Ok(StatusHistoryEntry {
                    session_id: id,
                    ts: parse_ts(&at)?,
                    state: parse_state(&state)?,
                    summary,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        entries.reverse();
        Ok(entries)
    }

    /// Ids of all sessions that have a status row
    pub fn tracked_ids(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id FROM status ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Record REMOVED in the history and drop the status row in one step
    ///
    /// Used for sessions whose monitoring task no longer exists (orphans
    /// found at startup).
    pub fn remove_orphan(&self, session_id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let previous: Option<String> = tx
            .query_row(
                "SELECT state FROM status WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        if previous.as_deref() != Some(SessionState::Removed.as_str()) {
            insert_history(
                &tx,
                &StatusHistoryEntry {
                    session_id: session_id.to_string(),
                    ts: now,
                    state: SessionState::Removed,
                    summary: "Session no longer exists".to_string(),
                },
            )?;
        }
        tx.execute("DELETE FROM status WHERE id = ?1", params![session_id])?;
        tx.commit()?;
        Ok(())
    }

    /// Delete status rows in state REMOVED; sessions and history are kept
    pub fn purge_removed(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let purged = conn.execute(
            "DELETE FROM status WHERE state = ?1",
            params![SessionState::Removed.as_str()],
        )?;
        Ok(purged)
    }
}

fn upsert_status(conn: &Connection, record: &StatusRecord) -> Result<(), StoreError> {
    conn.execute(
        r#"
        INSERT INTO status (id, state, summary, actions, last_snapshot_hash,
                            last_change_at, last_polled_at, stable_count)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(id) DO UPDATE SET
            state = excluded.state,
            summary = excluded.summary,
            actions = excluded.actions,
            last_snapshot_hash = excluded.last_snapshot_hash,
            last_change_at = excluded.last_change_at,
            last_polled_at = excluded.last_polled_at,
            stable_count = excluded.stable_count
        "#,
        params![
            record.session_id,
            record.state.as_str(),
            record.summary,
            serde_json::to_string(&record.actions)?,
            record.last_snapshot_hash,
            ts(&record.last_change_at),
            record.last_polled_at.as_ref().map(ts),
            i64::from(record.stable_count),
        ],
    )?;
    Ok(())
}

fn insert_history(conn: &Connection, entry: &StatusHistoryEntry) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO status_history (id, ts, state, summary) VALUES (?1, ?2, ?3, ?4)",
        params![entry.session_id, ts(&entry.ts), entry.state.as_str(), entry.summary],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn session(id: &str) -> Session {
        Session {
            id: id.to_string(),
            agent_type: "shell".to_string(),
            cwd: "/tmp".to_string(),
            created_at: at(0),
        }
    }

    fn entry(id: &str, secs: i64, state: SessionState, summary: &str) -> StatusHistoryEntry {
        StatusHistoryEntry {
            session_id: id.to_string(),
            ts: at(secs),
            state,
            summary: summary.to_string(),
        }
    }

    #[test]
    fn test_register_creates_untracked_record() {
        let store = StatusStore::open_in_memory().unwrap();
        let record = store.register_session(&session("%1")).unwrap();
        assert_eq!(record.state, SessionState::Untracked);

        let loaded = store.get_status("%1").unwrap().unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded.agent_type, "shell");
        assert!(store.get_status("%2").unwrap().is_none());
    }

    #[test]
    fn test_save_record_and_history() {
        let store = StatusStore::open_in_memory().unwrap();
        let mut record = store.register_session(&session("%1")).unwrap();
        record.state = SessionState::NeedsConfirmation;
        record.summary = "Asks y/N".to_string();
        record.actions = vec!["Answer it".to_string()];
        record.last_snapshot_hash = Some("abc".to_string());
        record.last_change_at = at(10);
        record.last_polled_at = Some(at(10));
        record.stable_count = 3;

        store
            .save(&record, &[entry("%1", 10, SessionState::NeedsConfirmation, "Asks y/N")])
            .unwrap();

        assert_eq!(store.get_status("%1").unwrap().unwrap(), record);
        let history = store.tail_history("%1", 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].state, SessionState::NeedsConfirmation);
    }

    #[test]
    fn test_tail_history_newest_n_oldest_first() {
        let store = StatusStore::open_in_memory().unwrap();
        let record = store.register_session(&session("%1")).unwrap();
        store
            .save(
                &record,
                &[
                    entry("%1", 1, SessionState::Busy, "a"),
                    entry("%1", 2, SessionState::Ready, "b"),
                    entry("%1", 2, SessionState::Busy, "c"),
                    entry("%1", 3, SessionState::Error, "d"),
                    entry("%2", 4, SessionState::Ready, "other"),
                ],
            )
            .unwrap();

        let summaries: Vec<String> = store
            .tail_history("%1", 3)
            .unwrap()
            .into_iter()
            .map(|e| e.summary)
            .collect();
        assert_eq!(summaries, vec!["b", "c", "d"]);
    }

    #[test]
    fn test_list_statuses_since() {
        let store = StatusStore::open_in_memory().unwrap();
        let mut old = store.register_session(&session("%1")).unwrap();
        old.last_polled_at = Some(at(5));
        store.save(&old, &[]).unwrap();
        let mut fresh = store.register_session(&session("%2")).unwrap();
        fresh.last_polled_at = Some(at(100));
        store.save(&fresh, &[]).unwrap();
        store.register_session(&session("%3")).unwrap();

        assert_eq!(store.list_statuses(None).unwrap().len(), 3);
        let recent = store.list_statuses(Some(at(50))).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].session_id, "%2");
    }

    #[test]
    fn test_reregister_resets_record() {
        let store = StatusStore::open_in_memory().unwrap();
        let mut record = store.register_session(&session("%1")).unwrap();
        record.state = SessionState::Ready;
        store.save(&record, &[]).unwrap();

        store.register_session(&session("%1")).unwrap();
        assert_eq!(
            store.get_status("%1").unwrap().unwrap().state,
            SessionState::Untracked
        );
    }

    #[test]
    fn test_remove_orphan() {
        let store = StatusStore::open_in_memory().unwrap();
        store.register_session(&session("%1")).unwrap();
        store.remove_orphan("%1", at(9)).unwrap();

        assert!(store.get_status("%1").unwrap().is_none());
        assert!(store.tracked_ids().unwrap().is_empty());
        let history = store.tail_history("%1", 5).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].state, SessionState::Removed);
    }

    #[test]
    fn test_purge_removed() {
        let store = StatusStore::open_in_memory().unwrap();
        let mut gone = store.register_session(&session("%1")).unwrap();
        gone.state = SessionState::Removed;
        store.save(&gone, &[]).unwrap();
        store.register_session(&session("%2")).unwrap();

        assert_eq!(store.purge_removed().unwrap(), 1);
        assert_eq!(store.tracked_ids().unwrap(), vec!["%2".to_string()]);
    }

    #[test]
    fn test_file_store_is_shared_between_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/status.db");
        let writer = StatusStore::open(&path).unwrap();
        writer.register_session(&session("%7")).unwrap();

        let reader = StatusStore::open(&path).unwrap();
        assert_eq!(reader.list_statuses(None).unwrap().len(), 1);
    }
}
