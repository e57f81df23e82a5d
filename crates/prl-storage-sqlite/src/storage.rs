use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use prl_core::{
    AccountId, EpochMs, FileId, PostEvent, PostEventError, PostEventId, PostEventType, PostRecord, PostRecordId,
    PostRecordState, ResumeMode, SubmissionId,
};
use prl_storage::{ChangeFeed, EventFilter, LoadOptions, RecordFilter, Storage, StoreChange};
use tracing::warn;

pub struct SqliteStorage {
    conn: Mutex<Connection>,
    changes: ChangeFeed,
}

const RECORD_COLUMNS: &str = "id, submission_id, state, resume_mode, created_at, completed_at";
const EVENT_COLUMNS: &str =
    "id, post_record_id, event_type, account_id, file_id, source_url, error_json, metadata_json, created_at";

struct RecordRow {
    id: String,
    submission_id: String,
    state: String,
    resume_mode: String,
    created_at: i64,
    completed_at: Option<i64>,
}

impl RecordRow {
    fn read(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            submission_id: r.get(1)?,
            state: r.get(2)?,
            resume_mode: r.get(3)?,
            created_at: r.get(4)?,
            completed_at: r.get(5)?,
        })
    }

    fn into_record(self) -> Result<PostRecord> {
        Ok(PostRecord {
            state: self.state.parse::<PostRecordState>().with_context(|| format!("post record {}", self.id))?,
            resume_mode: self.resume_mode.parse::<ResumeMode>().with_context(|| format!("post record {}", self.id))?,
            id: PostRecordId::from_str(self.id),
            submission_id: SubmissionId::from_str(self.submission_id),
            created_at_ms: self.created_at,
            completed_at_ms: self.completed_at,
            events: vec![],
        })
    }
}

struct EventRow {
    id: String,
    post_record_id: String,
    event_type: String,
    account_id: Option<String>,
    file_id: Option<String>,
    source_url: Option<String>,
    error_json: Option<String>,
    metadata_json: Option<String>,
    created_at: i64,
}

impl EventRow {
    fn read(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            post_record_id: r.get(1)?,
            event_type: r.get(2)?,
            account_id: r.get(3)?,
            file_id: r.get(4)?,
            source_url: r.get(5)?,
            error_json: r.get(6)?,
            metadata_json: r.get(7)?,
            created_at: r.get(8)?,
        })
    }

    fn into_event(self) -> Result<PostEvent> {
        let error = match self.error_json {
            Some(s) => Some(
                serde_json::from_str::<PostEventError>(&s).with_context(|| format!("error_json of event {}", self.id))?,
            ),
            None => None,
        };
        let metadata = match self.metadata_json {
            Some(s) => Some(serde_json::from_str::<serde_json::Value>(&s).with_context(|| format!("metadata_json of event {}", self.id))?),
            None => None,
        };
        Ok(PostEvent {
            event_type: self.event_type.parse::<PostEventType>().with_context(|| format!("post event {}", self.id))?,
            id: PostEventId::from_str(self.id),
            post_record_id: PostRecordId::from_str(self.post_record_id),
            account_id: self.account_id.map(AccountId::from_str),
            file_id: self.file_id.map(FileId::from_str),
            source_url: self.source_url,
            error,
            metadata,
            created_at_ms: self.created_at,
        })
    }
}

/// Decode event rows, dropping the ones this build cannot read.
///
/// An unknown event type or unparsable JSON column must not make the whole
/// history unreadable, so such rows are logged and left out.
fn decode_events(rows: impl Iterator<Item = rusqlite::Result<EventRow>>) -> Result<Vec<PostEvent>> {
    let mut out = vec![];
    for row in rows {
        let row = row?;
        let (id, record_id) = (row.id.clone(), row.post_record_id.clone());
        match row.into_event() {
            Ok(event) => out.push(event),
            Err(e) => warn!(event_id = %id, record_id = %record_id, error = %format!("{:#}", e), "skipping unreadable post event row"),
        }
    }
    Ok(out)
}

/// `?start, ?start+1, ...` for an IN list.
fn placeholders(start: usize, n: usize) -> String {
    (start..start + n).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
}

impl SqliteStorage {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path).with_context(|| format!("open sqlite db {}", db_path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().context("open in-memory sqlite db")?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let init_sql = include_str!("../migrations/0001_init.sql");
        conn.execute_batch(init_sql).context("apply schema")?;
        Ok(Self { conn: Mutex::new(conn), changes: ChangeFeed::new() })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("sqlite connection lock poisoned"))
    }

    fn events_for(conn: &Connection, post_record_id: &str) -> Result<Vec<PostEvent>> {
        let sql = format!("SELECT {} FROM post_events WHERE post_record_id = ?1 ORDER BY seq", EVENT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([post_record_id], EventRow::read)?;
        decode_events(rows)
    }

    fn with_events(conn: &Connection, mut record: PostRecord, load: LoadOptions) -> Result<PostRecord> {
        if load.with_events {
            record.events = Self::events_for(conn, record.id.as_str())?;
        }
        Ok(record)
    }
}

impl Storage for SqliteStorage {
    fn insert_record(&self, mut record: PostRecord) -> Result<PostRecord> {
        record.events.clear();
        {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO post_records(id, submission_id, state, resume_mode, created_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id.0,
                    record.submission_id.0,
                    record.state.as_str(),
                    record.resume_mode.as_str(),
                    record.created_at_ms,
                    record.completed_at_ms
                ],
            )
            .with_context(|| format!("insert post record {}", record.id))?;
        }
        self.changes.publish(&StoreChange::RecordInserted(record.clone()));
        Ok(record)
    }

    fn find_record(&self, id: &PostRecordId, load: LoadOptions) -> Result<Option<PostRecord>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM post_records WHERE id = ?1", RECORD_COLUMNS);
        let row = conn.query_row(&sql, [id.as_str()], RecordRow::read).optional()?;
        match row {
            Some(row) => Ok(Some(Self::with_events(&conn, row.into_record()?, load)?)),
            None => Ok(None),
        }
    }

    fn find_records(&self, filter: &RecordFilter, load: LoadOptions) -> Result<Vec<PostRecord>> {
        let conn = self.lock()?;
        let mut values: Vec<String> = vec![filter.submission_id.0.clone()];
        let mut sql = format!("SELECT {} FROM post_records WHERE submission_id = ?1", RECORD_COLUMNS);
        if !filter.states.is_empty() {
            sql.push_str(&format!(" AND state IN ({})", placeholders(2, filter.states.len())));
            values.extend(filter.states.iter().map(|s| s.as_str().to_string()));
        }
        sql.push_str(" ORDER BY created_at DESC, seq DESC");

        let raw = {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), RecordRow::read)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        let mut out = Vec::with_capacity(raw.len());
        for row in raw {
            out.push(Self::with_events(&conn, row.into_record()?, load)?);
        }
        Ok(out)
    }

    fn update_record_state(&self, id: &PostRecordId, state: PostRecordState, now_ms: EpochMs) -> Result<()> {
        let changed = {
            let conn = self.lock()?;
            let completed_at = state.is_terminal().then_some(now_ms);
            conn.execute(
                "UPDATE post_records SET state = ?1, completed_at = COALESCE(?2, completed_at) WHERE id = ?3",
                params![state.as_str(), completed_at, id.0],
            )?
        };
        if changed > 0 {
            self.changes.publish(&StoreChange::RecordStateChanged { id: id.clone(), state });
        }
        Ok(())
    }

    fn insert_event(&self, event: PostEvent) -> Result<PostEvent> {
        let error_json = event.error.as_ref().map(serde_json::to_string).transpose()?;
        let metadata_json = event.metadata.as_ref().map(serde_json::to_string).transpose()?;
        {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO post_events(id, post_record_id, event_type, account_id, file_id, source_url, error_json, metadata_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    event.id.0,
                    event.post_record_id.0,
                    event.event_type.as_str(),
                    event.account_id.as_ref().map(|a| a.as_str()),
                    event.file_id.as_ref().map(|f| f.as_str()),
                    event.source_url,
                    error_json,
                    metadata_json,
                    event.created_at_ms
                ],
            )
            .with_context(|| format!("insert {} event for record {}", event.event_type, event.post_record_id))?;
        }
        self.changes.publish(&StoreChange::EventInserted(event.clone()));
        Ok(event)
    }

    fn find_events(&self, filter: &EventFilter) -> Result<Vec<PostEvent>> {
        let conn = self.lock()?;
        let mut values: Vec<String> = vec![filter.post_record_id.0.clone()];
        let mut sql = format!("SELECT {} FROM post_events WHERE post_record_id = ?1", EVENT_COLUMNS);
        if !filter.event_types.is_empty() {
            sql.push_str(&format!(" AND event_type IN ({})", placeholders(2, filter.event_types.len())));
            values.extend(filter.event_types.iter().map(|t| t.as_str().to_string()));
        }
        sql.push_str(" ORDER BY seq");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), EventRow::read)?;
        decode_events(rows)
    }

    fn changes(&self) -> &ChangeFeed {
        &self.changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(sub: &str, state: PostRecordState, at: i64) -> PostRecord {
        let mut r = PostRecord::pending(SubmissionId::from_str(sub), ResumeMode::ContinueRetry, at);
        r.state = state;
        r
    }

    #[test]
    fn sqlite_open_and_migrate() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("prl.db");
        let _ = SqliteStorage::open(&db_path).unwrap();
        // schema is idempotent
        let _ = SqliteStorage::open(&db_path).unwrap();
    }

    #[test]
    fn records_survive_reopen_with_events() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("prl.db");
        let rid = {
            let store = SqliteStorage::open(&db_path).unwrap();
            let r = store.insert_record(record("s", PostRecordState::Running, 1)).unwrap();
            let mut err = PostEventError::new("rate limited");
            err.retryable = true;
            store
                .insert_event(PostEvent::file_failed(&r.id, &AccountId::from_str("a"), &FileId::from_str("f"), err, 2))
                .unwrap();
            store
                .insert_event(
                    PostEvent::message_posted(&r.id, &AccountId::from_str("b"), Some("https://b/1".into()), 3)
                        .with_metadata(serde_json::json!({"batch": 1})),
                )
                .unwrap();
            r.id
        };

        let store = SqliteStorage::open(&db_path).unwrap();
        let r = store.find_record(&rid, LoadOptions::WITH_EVENTS).unwrap().unwrap();
        assert_eq!(r.state, PostRecordState::Running);
        assert_eq!(r.resume_mode, ResumeMode::ContinueRetry);
        assert_eq!(r.events.len(), 2);
        assert_eq!(r.events[0].event_type, PostEventType::FileFailed);
        assert!(r.events[0].error.as_ref().unwrap().retryable);
        assert_eq!(r.events[1].source_url.as_deref(), Some("https://b/1"));
        assert_eq!(r.events[1].metadata, Some(serde_json::json!({"batch": 1})));
    }

    #[test]
    fn terminal_query_orders_newest_first() {
        let store = SqliteStorage::open_in_memory().unwrap();
        let a = store.insert_record(record("s", PostRecordState::Failed, 100)).unwrap();
        let b = store.insert_record(record("s", PostRecordState::Done, 200)).unwrap();
        let c = store.insert_record(record("s", PostRecordState::Failed, 200)).unwrap();
        store.insert_record(record("s", PostRecordState::Pending, 300)).unwrap();

        let found = store
            .find_records(&RecordFilter::terminal(SubmissionId::from_str("s")), LoadOptions::BARE)
            .unwrap();
        let ids: Vec<_> = found.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![c.id, b.id, a.id]);
    }

    #[test]
    fn event_type_filter() {
        let store = SqliteStorage::open_in_memory().unwrap();
        let r = store.insert_record(record("s", PostRecordState::Running, 1)).unwrap();
        let acct = AccountId::from_str("a");
        store.insert_event(PostEvent::attempt_started(&r.id, &acct, 1)).unwrap();
        store.insert_event(PostEvent::attempt_failed(&r.id, &acct, PostEventError::new("x"), 2)).unwrap();
        store
            .insert_event(PostEvent::message_failed(&r.id, &acct, PostEventError::new("y"), 3))
            .unwrap();

        let failures = store.find_events(&EventFilter::of_types(r.id.clone(), &PostEventType::FAILURES)).unwrap();
        assert_eq!(failures.len(), 2);
        assert_eq!(store.find_events(&EventFilter::record(r.id)).unwrap().len(), 3);
    }

    #[test]
    fn state_update_stamps_completion_once() {
        let store = SqliteStorage::open_in_memory().unwrap();
        let r = store.insert_record(record("s", PostRecordState::Pending, 1)).unwrap();
        store.update_record_state(&r.id, PostRecordState::Running, 2).unwrap();
        assert_eq!(store.find_record(&r.id, LoadOptions::BARE).unwrap().unwrap().completed_at_ms, None);
        store.update_record_state(&r.id, PostRecordState::Failed, 3).unwrap();
        let r = store.find_record(&r.id, LoadOptions::BARE).unwrap().unwrap();
        assert_eq!(r.state, PostRecordState::Failed);
        assert_eq!(r.completed_at_ms, Some(3));
    }

    #[test]
    fn event_for_unknown_record_is_rejected() {
        let store = SqliteStorage::open_in_memory().unwrap();
        let res = store.insert_event(PostEvent::attempt_started(
            &PostRecordId::from_str("ghost"),
            &AccountId::from_str("a"),
            1,
        ));
        assert!(res.is_err());
    }

    #[test]
    fn unreadable_event_rows_do_not_block_history() {
        let store = SqliteStorage::open_in_memory().unwrap();
        let r = store.insert_record(record("s", PostRecordState::Failed, 1)).unwrap();
        store
            .insert_event(PostEvent::attempt_completed(&r.id, &AccountId::from_str("a"), 2))
            .unwrap();
        {
            let conn = store.lock().unwrap();
            conn.execute(
                "INSERT INTO post_events(id, post_record_id, event_type, account_id, created_at)
                 VALUES ('future', ?1, 'FILE_SCHEDULED', 'a', 3)",
                [r.id.as_str()],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO post_events(id, post_record_id, event_type, account_id, metadata_json, created_at)
                 VALUES ('bad-meta', ?1, 'MESSAGE_POSTED', 'b', '{not json', 4)",
                [r.id.as_str()],
            )
            .unwrap();
        }

        let history = store
            .find_records(&RecordFilter::terminal(SubmissionId::from_str("s")), LoadOptions::WITH_EVENTS)
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].events.len(), 1);
        assert_eq!(history[0].events[0].event_type, PostEventType::PostAttemptCompleted);

        let all = store.find_events(&EventFilter::record(r.id)).unwrap();
        assert_eq!(all.len(), 1);
    }
}
