//! SQLite-backed persistence for status engine records, progress flags and
//! Calendly logs.
//!
//! Every write to `progress_status` and `calendly_log` also copies the
//! resulting row into `<table>_history`, so earlier values stay readable.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use hyke_core::error::{HykeError, Result};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params, params_from_iter};

use crate::records::{
    CalendlyEvent, CalendlyLog, HistoryChange, HistoryEntry, NewRecord, Outcome, ProgressField,
    ProgressStatus, RecordFilter, StatusEngineRecord,
};

const RECORD_COLUMNS: &str =
    "id, email, process, formationtype, processstate, outcome, data, created, executed";

const PROGRESS_COLUMNS: &str = "id, email, llcformationstatus, postformationstatus, einstatus, \
     businesslicensestatus, bankaccountstatus, contributionstatus, SOIstatus, FTBstatus, \
     questionnairestatus, bookkeepingsetupstatus, taxsetupstatus, clientsurveystatus, \
     bk_services_setup_status";

const CALENDLY_COLUMNS: &str = "id, created, updated, email, phonenumber, slug, event_name, \
     assignedto, eventtype, scheduledtime, is_canceled, event_id, data";

const HISTORY_COLUMNS: &str = "history_id, history_date, history_type";

/// Column counts of `PROGRESS_COLUMNS` and `CALENDLY_COLUMNS`.
const PROGRESS_WIDTH: usize = 15;
const CALENDLY_WIDTH: usize = 13;

/// SQLite-backed store shared by the scheduler, the handlers and the CLI.
pub struct StatusEngineDb {
    conn: Mutex<Connection>,
    /// `None` for in-memory databases, which are never reopened.
    path: Option<PathBuf>,
    opened_at: Mutex<Instant>,
}

impl StatusEngineDb {
    /// Open or create the status engine database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| HykeError::Database(format!("DB open: {e}")))?;
        let db = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
            opened_at: Mutex::new(Instant::now()),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| HykeError::Database(format!("DB open: {e}")))?;
        let db = Self {
            conn: Mutex::new(conn),
            path: None,
            opened_at: Mutex::new(Instant::now()),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| HykeError::Database(format!("connection lock poisoned: {e}")))
    }

    /// Create tables. Safe to run on every open.
    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            -- Work items, one per client and process step
            CREATE TABLE IF NOT EXISTS status_engine (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL DEFAULT '',
                process TEXT NOT NULL,
                formationtype TEXT,
                processstate INTEGER NOT NULL DEFAULT 1,
                outcome INTEGER NOT NULL DEFAULT -1,
                data TEXT,
                created TEXT NOT NULL,
                executed TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_status_engine_due
                ON status_engine (outcome, processstate, process);
            CREATE INDEX IF NOT EXISTS idx_status_engine_email
                ON status_engine (email);

            -- Per-client progress flags
            CREATE TABLE IF NOT EXISTS progress_status (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT,
                llcformationstatus TEXT,
                postformationstatus TEXT,
                einstatus TEXT,
                businesslicensestatus TEXT,
                bankaccountstatus TEXT,
                contributionstatus TEXT,
                SOIstatus TEXT,
                FTBstatus TEXT,
                questionnairestatus TEXT,
                bookkeepingsetupstatus TEXT,
                taxsetupstatus TEXT,
                clientsurveystatus TEXT,
                bk_services_setup_status TEXT NOT NULL DEFAULT 'pending'
            );

            -- Calendly scheduling events
            CREATE TABLE IF NOT EXISTS calendly_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created TEXT NOT NULL,
                updated TEXT NOT NULL,
                email TEXT NOT NULL,
                phonenumber TEXT,
                slug TEXT,
                event_name TEXT,
                assignedto TEXT,
                eventtype TEXT,
                scheduledtime TEXT,
                is_canceled INTEGER NOT NULL DEFAULT 0,
                event_id TEXT NOT NULL UNIQUE,
                data TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_calendly_log_email ON calendly_log (email);

            -- Row snapshots; history_type is '+' for inserts and '~' for updates
            CREATE TABLE IF NOT EXISTS progress_status_history (
                history_id INTEGER PRIMARY KEY AUTOINCREMENT,
                history_date TEXT NOT NULL,
                history_type TEXT NOT NULL,
                id INTEGER NOT NULL,
                email TEXT,
                llcformationstatus TEXT,
                postformationstatus TEXT,
                einstatus TEXT,
                businesslicensestatus TEXT,
                bankaccountstatus TEXT,
                contributionstatus TEXT,
                SOIstatus TEXT,
                FTBstatus TEXT,
                questionnairestatus TEXT,
                bookkeepingsetupstatus TEXT,
                taxsetupstatus TEXT,
                clientsurveystatus TEXT,
                bk_services_setup_status TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_progress_status_history_id
                ON progress_status_history (id);

            CREATE TABLE IF NOT EXISTS calendly_log_history (
                history_id INTEGER PRIMARY KEY AUTOINCREMENT,
                history_date TEXT NOT NULL,
                history_type TEXT NOT NULL,
                id INTEGER NOT NULL,
                created TEXT NOT NULL,
                updated TEXT NOT NULL,
                email TEXT NOT NULL,
                phonenumber TEXT,
                slug TEXT,
                event_name TEXT,
                assignedto TEXT,
                eventtype TEXT,
                scheduledtime TEXT,
                is_canceled INTEGER NOT NULL,
                event_id TEXT NOT NULL,
                data TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_calendly_log_history_event
                ON calendly_log_history (event_id);
         ",
            )
            .map_err(|e| HykeError::Database(format!("Migration: {e}")))?;
        Ok(())
    }

    /// Reopen a file-backed connection that has been open longer than `max_age`.
    /// Returns true when the connection was replaced.
    pub fn close_stale_connection(&self, max_age: Duration) -> Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        let mut opened_at = self
            .opened_at
            .lock()
            .map_err(|e| HykeError::Database(format!("lock poisoned: {e}")))?;
        if opened_at.elapsed() < max_age {
            return Ok(false);
        }

        let fresh = Connection::open(path).map_err(|e| HykeError::Database(format!("DB reopen: {e}")))?;
        let stale = std::mem::replace(&mut *self.conn()?, fresh);
        if let Err((_, e)) = stale.close() {
            tracing::warn!("⚠️ Failed to close stale connection: {e}");
        }
        *opened_at = Instant::now();
        tracing::debug!("🔌 Reopened database connection to {}", path.display());
        Ok(true)
    }

    // ─── Status engine records ─────────────────────────────────

    /// Insert a record. `created` is set to now.
    pub fn insert_record(&self, record: &NewRecord) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO status_engine
             (email, process, formationtype, processstate, outcome, data, created, executed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.email,
                record.process,
                record.formation_type,
                record.process_stage,
                record.outcome.code(),
                record.data,
                Utc::now().to_rfc3339(),
                record.executed.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(|e| HykeError::Database(format!("Insert record: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    /// Return the first record matching `lookup`, inserting `record` when none does.
    /// The flag is true when a new row was created.
    pub fn get_or_create(&self, lookup: &RecordFilter, record: &NewRecord) -> Result<(i64, bool)> {
        if let Some(existing) = self.find_records(lookup)?.first() {
            return Ok((existing.id, false));
        }
        Ok((self.insert_record(record)?, true))
    }

    pub fn get_record(&self, id: i64) -> Result<Option<StatusEngineRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM status_engine WHERE id = ?1"),
            [id],
            record_from_row,
        )
        .optional()
        .map_err(|e| HykeError::Database(format!("Get record: {e}")))
    }

    /// Records matching every set field of `filter`, in id order.
    pub fn find_records(&self, filter: &RecordFilter) -> Result<Vec<StatusEngineRecord>> {
        let mut clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        let mut push = |column: &str, value: Value| {
            values.push(value);
            clauses.push(format!("{column} = ?{}", values.len()));
        };

        if let Some(email) = &filter.email {
            push("email", Value::Text(email.clone()));
        }
        if let Some(process) = &filter.process {
            push("process", Value::Text(process.clone()));
        }
        if let Some(formation_type) = &filter.formation_type {
            push("formationtype", Value::Text(formation_type.clone()));
        }
        if let Some(stage) = filter.process_stage {
            push("processstate", Value::Integer(stage.into()));
        }
        if let Some(outcome) = filter.outcome {
            push("outcome", Value::Integer(outcome.code().into()));
        }
        if let Some(data) = &filter.data {
            push("data", Value::Text(data.clone()));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!("SELECT {RECORD_COLUMNS} FROM status_engine {where_clause} ORDER BY id");
        self.query_records(&sql, values)
    }

    pub fn exists(&self, filter: &RecordFilter) -> Result<bool> {
        Ok(!self.find_records(filter)?.is_empty())
    }

    /// Scheduled records whose formation type starts with `formation_prefix` and whose
    /// process is one of `processes`. `stage` restricts the process stage when set.
    pub fn due_records(
        &self,
        formation_prefix: &str,
        stage: Option<i32>,
        processes: &[&str],
    ) -> Result<Vec<StatusEngineRecord>> {
        if processes.is_empty() {
            return Ok(Vec::new());
        }

        let mut values = vec![
            Value::Integer(Outcome::Scheduled.code().into()),
            Value::Text(formation_prefix.to_string()),
        ];
        let mut sql = format!(
            "SELECT {RECORD_COLUMNS} FROM status_engine
             WHERE outcome = ?1
               AND substr(formationtype, 1, length(?2)) = ?2"
        );
        if let Some(stage) = stage {
            values.push(Value::Integer(stage.into()));
            sql.push_str(&format!(" AND processstate = ?{}", values.len()));
        }
        let placeholders: Vec<String> = processes
            .iter()
            .map(|p| {
                values.push(Value::Text(p.to_string()));
                format!("?{}", values.len())
            })
            .collect();
        sql.push_str(&format!(" AND process IN ({}) ORDER BY id", placeholders.join(", ")));

        self.query_records(&sql, values)
    }

    /// Most recent records first, optionally restricted to one outcome.
    pub fn recent_records(&self, outcome: Option<Outcome>, limit: usize) -> Result<Vec<StatusEngineRecord>> {
        let (sql, values) = match outcome {
            Some(o) => (
                format!("SELECT {RECORD_COLUMNS} FROM status_engine WHERE outcome = ?1 ORDER BY id DESC LIMIT ?2"),
                vec![Value::Integer(o.code().into()), Value::Integer(limit as i64)],
            ),
            None => (
                format!("SELECT {RECORD_COLUMNS} FROM status_engine ORDER BY id DESC LIMIT ?1"),
                vec![Value::Integer(limit as i64)],
            ),
        };
        self.query_records(&sql, values)
    }

    /// Set the outcome and execution time of a record.
    pub fn settle(&self, id: i64, outcome: Outcome, executed: DateTime<Utc>) -> Result<()> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE status_engine SET outcome = ?1, executed = ?2 WHERE id = ?3",
                params![outcome.code(), executed.to_rfc3339(), id],
            )
            .map_err(|e| HykeError::Database(format!("Settle record: {e}")))?;
        if changed == 0 {
            return Err(HykeError::NotFound(format!("status engine record {id}")));
        }
        Ok(())
    }

    fn query_records(&self, sql: &str, values: Vec<Value>) -> Result<Vec<StatusEngineRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| HykeError::Database(format!("Prepare: {e}")))?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), record_from_row)
            .map_err(|e| HykeError::Database(format!("Query records: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| HykeError::Database(format!("Read record: {e}")))
    }

    // ─── Progress status ───────────────────────────────────────

    /// Return the progress row for `email`, creating an empty one if missing.
    /// The lookup ignores case the way [`find_progress`](Self::find_progress) does.
    pub fn ensure_progress(&self, email: &str) -> Result<i64> {
        if let Some(existing) = self.find_progress(email, true)? {
            return Ok(existing.id);
        }
        let mut conn = self.conn()?;
        let tx = begin(&mut conn)?;
        tx.execute("INSERT INTO progress_status (email) VALUES (?1)", [email])
            .map_err(|e| HykeError::Database(format!("Insert progress: {e}")))?;
        let id = tx.last_insert_rowid();
        snapshot(&tx, "progress_status", PROGRESS_COLUMNS, id, HistoryChange::Created)?;
        commit(tx)?;
        Ok(id)
    }

    /// First progress row for `email`, compared exactly or ignoring case.
    ///
    /// `ignore_case` uses SQLite's `NOCASE` collation, which folds ASCII
    /// letters only: `Élan@x.com` and `élan@x.com` are different clients.
    pub fn find_progress(&self, email: &str, ignore_case: bool) -> Result<Option<ProgressStatus>> {
        let collate = if ignore_case { " COLLATE NOCASE" } else { "" };
        let sql = format!(
            "SELECT {PROGRESS_COLUMNS} FROM progress_status WHERE email = ?1{collate} ORDER BY id LIMIT 1"
        );
        self.conn()?
            .query_row(&sql, [email], progress_from_row)
            .optional()
            .map_err(|e| HykeError::Database(format!("Get progress: {e}")))
    }

    /// Update one or more progress columns of row `id`.
    pub fn set_progress(&self, id: i64, updates: &[(ProgressField, &str)]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut values: Vec<Value> = Vec::with_capacity(updates.len() + 1);
        let assignments: Vec<String> = updates
            .iter()
            .map(|(field, value)| {
                values.push(Value::Text(value.to_string()));
                format!("{} = ?{}", field.column(), values.len())
            })
            .collect();
        values.push(Value::Integer(id));
        let sql = format!(
            "UPDATE progress_status SET {} WHERE id = ?{}",
            assignments.join(", "),
            values.len()
        );

        let mut conn = self.conn()?;
        let tx = begin(&mut conn)?;
        let changed = tx
            .execute(&sql, params_from_iter(values.iter()))
            .map_err(|e| HykeError::Database(format!("Update progress: {e}")))?;
        if changed == 0 {
            return Err(HykeError::NotFound(format!("progress status {id}")));
        }
        snapshot(&tx, "progress_status", PROGRESS_COLUMNS, id, HistoryChange::Changed)?;
        commit(tx)
    }

    /// Every snapshot of progress row `id`, oldest first.
    pub fn progress_history(&self, id: i64) -> Result<Vec<HistoryEntry<ProgressStatus>>> {
        self.query_history(
            &format!(
                "SELECT {PROGRESS_COLUMNS}, {HISTORY_COLUMNS} FROM progress_status_history
                 WHERE id = ?1 ORDER BY history_id"
            ),
            Value::Integer(id),
            PROGRESS_WIDTH,
            progress_from_row,
        )
    }

    // ─── Calendly log ──────────────────────────────────────────

    /// Insert a Calendly event, or update the existing row with the same `event_id`.
    pub fn record_calendly_event(&self, event: &CalendlyEvent) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.conn()?;
        let tx = begin(&mut conn)?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM calendly_log WHERE event_id = ?1",
                [&event.event_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| HykeError::Database(format!("Read calendly id: {e}")))?;
        tx.execute(
            "INSERT INTO calendly_log
             (created, updated, email, phonenumber, slug, event_name, assignedto, eventtype,
              scheduledtime, is_canceled, event_id, data)
             VALUES (?1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10)
             ON CONFLICT(event_id) DO UPDATE SET
                updated = excluded.updated,
                email = excluded.email,
                phonenumber = excluded.phonenumber,
                slug = excluded.slug,
                event_name = excluded.event_name,
                assignedto = excluded.assignedto,
                eventtype = excluded.eventtype,
                scheduledtime = excluded.scheduledtime,
                data = excluded.data",
            params![
                now,
                event.email,
                event.phone_number,
                event.slug,
                event.event_name,
                event.assigned_to,
                event.event_type,
                event.scheduled_time.map(|t| t.to_rfc3339()),
                event.event_id,
                event.data,
            ],
        )
        .map_err(|e| HykeError::Database(format!("Record calendly event: {e}")))?;

        let (id, change) = match existing {
            Some(id) => (id, HistoryChange::Changed),
            None => (tx.last_insert_rowid(), HistoryChange::Created),
        };
        snapshot(&tx, "calendly_log", CALENDLY_COLUMNS, id, change)?;
        commit(tx)?;
        Ok(id)
    }

    /// Mark an event cancelled. Returns false when no such event exists.
    pub fn cancel_calendly_event(&self, event_id: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = begin(&mut conn)?;
        let id: Option<i64> = tx
            .query_row(
                "SELECT id FROM calendly_log WHERE event_id = ?1",
                [event_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| HykeError::Database(format!("Read calendly id: {e}")))?;
        let Some(id) = id else {
            return Ok(false);
        };
        tx.execute(
            "UPDATE calendly_log SET is_canceled = 1, updated = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )
        .map_err(|e| HykeError::Database(format!("Cancel calendly event: {e}")))?;
        snapshot(&tx, "calendly_log", CALENDLY_COLUMNS, id, HistoryChange::Changed)?;
        commit(tx)?;
        Ok(true)
    }

    /// Every snapshot of the event with `event_id`, oldest first.
    pub fn calendly_history(&self, event_id: &str) -> Result<Vec<HistoryEntry<CalendlyLog>>> {
        self.query_history(
            &format!(
                "SELECT {CALENDLY_COLUMNS}, {HISTORY_COLUMNS} FROM calendly_log_history
                 WHERE event_id = ?1 ORDER BY history_id"
            ),
            Value::Text(event_id.to_string()),
            CALENDLY_WIDTH,
            calendly_from_row,
        )
    }

    /// Non-cancelled events for `email`, earliest scheduled first.
    pub fn scheduled_calendly_events(&self, email: &str) -> Result<Vec<CalendlyLog>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CALENDLY_COLUMNS} FROM calendly_log
                 WHERE email = ?1 AND is_canceled = 0
                 ORDER BY scheduledtime, id"
            ))
            .map_err(|e| HykeError::Database(format!("Prepare: {e}")))?;
        let rows = stmt
            .query_map([email], calendly_from_row)
            .map_err(|e| HykeError::Database(format!("Query calendly: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| HykeError::Database(format!("Read calendly: {e}")))
    }

    /// Run a history query whose snapshot columns come first, followed by
    /// [`HISTORY_COLUMNS`] starting at index `width`.
    fn query_history<T>(
        &self,
        sql: &str,
        key: Value,
        width: usize,
        read_snapshot: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<HistoryEntry<T>>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| HykeError::Database(format!("Prepare: {e}")))?;
        let rows = stmt
            .query_map([key], |row| history_from_row(row, width, read_snapshot))
            .map_err(|e| HykeError::Database(format!("Query history: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| HykeError::Database(format!("Read history: {e}")))
    }
}

fn begin<'c>(conn: &'c mut Connection) -> Result<Transaction<'c>> {
    conn.transaction()
        .map_err(|e| HykeError::Database(format!("Begin transaction: {e}")))
}

fn commit(tx: Transaction<'_>) -> Result<()> {
    tx.commit()
        .map_err(|e| HykeError::Database(format!("Commit: {e}")))
}

/// Copy row `id` of `table` into `<table>_history`.
fn snapshot(conn: &Connection, table: &str, columns: &str, id: i64, change: HistoryChange) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO {table}_history (history_date, history_type, {columns})
             SELECT ?1, ?2, {columns} FROM {table} WHERE id = ?3"
        ),
        params![Utc::now().to_rfc3339(), change.symbol(), id],
    )
    .map_err(|e| HykeError::Database(format!("Snapshot {table}: {e}")))?;
    Ok(())
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

fn parse_ts(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("bad timestamp {value:?}: {e}")))
}

fn parse_opt_ts(idx: usize, value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|s| parse_ts(idx, &s)).transpose()
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<StatusEngineRecord> {
    let code: i32 = row.get(5)?;
    let outcome = Outcome::from_code(code)
        .ok_or_else(|| conversion_error(5, format!("unknown outcome code {code}")))?;
    let created: String = row.get(7)?;
    Ok(StatusEngineRecord {
        id: row.get(0)?,
        email: row.get(1)?,
        process: row.get(2)?,
        formation_type: row.get(3)?,
        process_stage: row.get(4)?,
        outcome,
        data: row.get(6)?,
        created: parse_ts(7, &created)?,
        executed: parse_opt_ts(8, row.get(8)?)?,
    })
}

fn progress_from_row(row: &Row<'_>) -> rusqlite::Result<ProgressStatus> {
    Ok(ProgressStatus {
        id: row.get(0)?,
        email: row.get(1)?,
        llc_formation: row.get(2)?,
        post_formation: row.get(3)?,
        ein: row.get(4)?,
        business_license: row.get(5)?,
        bank_account: row.get(6)?,
        contribution: row.get(7)?,
        soi: row.get(8)?,
        ftb: row.get(9)?,
        questionnaire: row.get(10)?,
        bookkeeping_setup: row.get(11)?,
        tax_setup: row.get(12)?,
        client_survey: row.get(13)?,
        bk_services_setup: row.get(14)?,
    })
}

fn history_from_row<T>(
    row: &Row<'_>,
    width: usize,
    read_snapshot: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> rusqlite::Result<HistoryEntry<T>> {
    let date: String = row.get(width + 1)?;
    let symbol: String = row.get(width + 2)?;
    let change = HistoryChange::from_symbol(&symbol)
        .ok_or_else(|| conversion_error(width + 2, format!("unknown history type {symbol:?}")))?;
    Ok(HistoryEntry {
        history_id: row.get(width)?,
        history_date: parse_ts(width + 1, &date)?,
        change,
        snapshot: read_snapshot(row)?,
    })
}

fn calendly_from_row(row: &Row<'_>) -> rusqlite::Result<CalendlyLog> {
    let created: String = row.get(1)?;
    let updated: String = row.get(2)?;
    Ok(CalendlyLog {
        id: row.get(0)?,
        created: parse_ts(1, &created)?,
        updated: parse_ts(2, &updated)?,
        email: row.get(3)?,
        phone_number: row.get(4)?,
        slug: row.get(5)?,
        event_name: row.get(6)?,
        assigned_to: row.get(7)?,
        event_type: row.get(8)?,
        scheduled_time: parse_opt_ts(9, row.get(9)?)?,
        is_canceled: row.get::<_, i32>(10)? != 0,
        event_id: row.get(11)?,
        data: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduled(email: &str, process: &str) -> NewRecord {
        NewRecord::scheduled(email, process, "Hyke System")
    }

    #[test]
    fn test_open_and_migrate() {
        let dir = std::env::temp_dir().join("hyke-db-test-open");
        std::fs::create_dir_all(&dir).ok();
        let db = StatusEngineDb::open(&dir.join("test.db")).unwrap();
        assert!(db.find_records(&RecordFilter::default()).unwrap().is_empty());
        // Migrations are idempotent.
        drop(db);
        StatusEngineDb::open(&dir.join("test.db")).unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_insert_and_get_record() {
        let db = StatusEngineDb::open_in_memory().unwrap();
        let id = db
            .insert_record(&scheduled("a@x.com", "Running flow").with_data("---"))
            .unwrap();
        let rec = db.get_record(id).unwrap().unwrap();
        assert_eq!(rec.email, "a@x.com");
        assert_eq!(rec.outcome, Outcome::Scheduled);
        assert_eq!(rec.process_stage, 1);
        assert_eq!(rec.data.as_deref(), Some("---"));
        assert!(rec.executed.is_none());
        assert!(db.get_record(id + 100).unwrap().is_none());
    }

    #[test]
    fn test_due_records_filters() {
        let db = StatusEngineDb::open_in_memory().unwrap();
        let due = db.insert_record(&scheduled("a@x.com", "Running flow")).unwrap();
        // Wrong stage
        db.insert_record(&scheduled("b@x.com", "Running flow").with_stage(2)).unwrap();
        // Wrong formation type
        db.insert_record(&NewRecord::scheduled("c@x.com", "Running flow", "Hyke Daily"))
            .unwrap();
        // Prefix match
        let prefixed = db
            .insert_record(&NewRecord::scheduled("d@x.com", "Running flow", "Hyke System LLC"))
            .unwrap();
        // Not scheduled
        let done = db.insert_record(&scheduled("e@x.com", "Running flow")).unwrap();
        db.settle(done, Outcome::Completed, Utc::now()).unwrap();
        // Unregistered process
        db.insert_record(&scheduled("f@x.com", "Something else")).unwrap();

        let ids: Vec<i64> = db
            .due_records("Hyke System", Some(1), &["Running flow"])
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![due, prefixed]);

        let any_stage = db.due_records("Hyke System", None, &["Running flow"]).unwrap();
        assert_eq!(any_stage.len(), 3);

        assert!(db.due_records("Hyke System", None, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_get_or_create() {
        let db = StatusEngineDb::open_in_memory().unwrap();
        let rec = NewRecord::scheduled("a@x.com", "Schedule Email", "Hyke Daily").with_data("hi");
        let lookup = RecordFilter::matching(&rec);

        let (first, created) = db.get_or_create(&lookup, &rec).unwrap();
        assert!(created);
        let (second, created) = db.get_or_create(&lookup, &rec).unwrap();
        assert!(!created);
        assert_eq!(first, second);
    }

    #[test]
    fn test_settle_missing_record() {
        let db = StatusEngineDb::open_in_memory().unwrap();
        let err = db.settle(42, Outcome::Completed, Utc::now()).unwrap_err();
        assert!(matches!(err, HykeError::NotFound(_)));
    }

    #[test]
    fn test_unknown_outcome_code_is_error() {
        let db = StatusEngineDb::open_in_memory().unwrap();
        db.conn()
            .unwrap()
            .execute(
                "INSERT INTO status_engine (email, process, outcome, created) VALUES ('a', 'p', 99, ?1)",
                [Utc::now().to_rfc3339()],
            )
            .unwrap();
        assert!(db.find_records(&RecordFilter::default()).is_err());
    }

    #[test]
    fn test_progress_case_insensitive() {
        let db = StatusEngineDb::open_in_memory().unwrap();
        let id = db.ensure_progress("Client@Example.com").unwrap();
        assert_eq!(db.ensure_progress("client@example.com").unwrap(), id);

        assert!(db.find_progress("client@example.com", false).unwrap().is_none());
        let ps = db.find_progress("client@example.com", true).unwrap().unwrap();
        assert_eq!(ps.bk_services_setup, "pending");

        db.set_progress(
            id,
            &[
                (ProgressField::BookkeepingSetup, "completed"),
                (ProgressField::TaxSetup, "completed2"),
            ],
        )
        .unwrap();
        let ps = db.find_progress("Client@Example.com", false).unwrap().unwrap();
        assert_eq!(ps.get(ProgressField::BookkeepingSetup), Some("completed"));
        assert_eq!(ps.get(ProgressField::TaxSetup), Some("completed2"));
        assert_eq!(ps.get(ProgressField::Questionnaire), None);
    }

    #[test]
    fn test_progress_nocase_is_ascii_only() {
        let db = StatusEngineDb::open_in_memory().unwrap();
        let id = db.ensure_progress("Élan@x.com").unwrap();
        assert_eq!(db.find_progress("ÉLAN@X.COM", true).unwrap().unwrap().id, id);
        assert!(db.find_progress("élan@x.com", true).unwrap().is_none());
        assert_ne!(db.ensure_progress("élan@x.com").unwrap(), id);
    }

    #[test]
    fn test_progress_history_keeps_previous_values() {
        let db = StatusEngineDb::open_in_memory().unwrap();
        let id = db.ensure_progress("a@x.com").unwrap();
        db.set_progress(id, &[(ProgressField::Questionnaire, "scheduled")])
            .unwrap();
        db.set_progress(id, &[(ProgressField::Questionnaire, "reschedule")])
            .unwrap();

        let history = db.progress_history(id).unwrap();
        let changes: Vec<HistoryChange> = history.iter().map(|h| h.change).collect();
        assert_eq!(
            changes,
            vec![HistoryChange::Created, HistoryChange::Changed, HistoryChange::Changed]
        );
        let values: Vec<Option<&str>> = history
            .iter()
            .map(|h| h.snapshot.get(ProgressField::Questionnaire))
            .collect();
        assert_eq!(values, vec![None, Some("scheduled"), Some("reschedule")]);
        assert!(history.iter().all(|h| h.snapshot.id == id));

        // Failed updates leave no snapshot behind.
        assert!(db.set_progress(id + 1, &[(ProgressField::Ein, "done")]).is_err());
        assert!(db.progress_history(id + 1).unwrap().is_empty());
    }

    #[test]
    fn test_calendly_upsert_and_cancel() {
        let db = StatusEngineDb::open_in_memory().unwrap();
        let mut event = CalendlyEvent {
            event_id: "evt-1".into(),
            email: "a@x.com".into(),
            slug: Some("kickoff".into()),
            ..Default::default()
        };
        let id = db.record_calendly_event(&event).unwrap();
        event.slug = Some("kickoff-call".into());
        assert_eq!(db.record_calendly_event(&event).unwrap(), id);

        let scheduled = db.scheduled_calendly_events("a@x.com").unwrap();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].slug.as_deref(), Some("kickoff-call"));

        assert!(db.cancel_calendly_event("evt-1").unwrap());
        assert!(!db.cancel_calendly_event("missing").unwrap());
        assert!(db.scheduled_calendly_events("a@x.com").unwrap().is_empty());

        let history = db.calendly_history("evt-1").unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].change, HistoryChange::Created);
        assert_eq!(history[0].snapshot.slug.as_deref(), Some("kickoff"));
        assert_eq!(history[1].change, HistoryChange::Changed);
        assert_eq!(history[1].snapshot.slug.as_deref(), Some("kickoff-call"));
        assert!(!history[1].snapshot.is_canceled);
        assert!(history[2].snapshot.is_canceled);
        assert!(db.calendly_history("missing").unwrap().is_empty());
    }

    #[test]
    fn test_close_stale_connection() {
        let dir = std::env::temp_dir().join("hyke-db-test-stale");
        std::fs::create_dir_all(&dir).ok();
        let db = StatusEngineDb::open(&dir.join("stale.db")).unwrap();
        let id = db.insert_record(&scheduled("a@x.com", "Running flow")).unwrap();

        assert!(!db.close_stale_connection(Duration::from_secs(3600)).unwrap());
        assert!(db.close_stale_connection(Duration::ZERO).unwrap());
        assert!(db.get_record(id).unwrap().is_some());

        let memory = StatusEngineDb::open_in_memory().unwrap();
        assert!(!memory.close_stale_connection(Duration::ZERO).unwrap());
        std::fs::remove_dir_all(&dir).ok();
    }
}
