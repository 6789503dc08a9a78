//! `SqliteStore`: the append-only event store.
//!
//! Schema: `runs` (one row per run, with version provenance), `steps`
//! (ordered by `idx` within a run), `events` (append-only, ordered by
//! rowid). Version columns recorded as NULL by older writers load as the
//! library-defined defaults (the only schema tolerance).

use std::path::Path;

use forkline_core::model::{
    Event, Run, Step, DEFAULT_FORKLINE_VERSION, DEFAULT_SCHEMA_VERSION, FORKLINE_VERSION,
    SCHEMA_VERSION,
};
use forkline_core::redaction::{default_policy, RedactionPolicy};
use forkline_core::value::Value;
use rusqlite::{params, Connection, OptionalExtension};

/// Store failure.
#[derive(Debug)]
pub enum StoreError {
    Database(rusqlite::Error),
    Io(std::io::Error),
    /// A payload could not be serialized to or parsed from its JSON column.
    Payload(serde_json::Error),
    /// An event was recorded outside any step scope.
    NoActiveStep,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Database(e) => write!(f, "database error: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Payload(e) => write!(f, "payload serialization error: {e}"),
            Self::NoActiveStep => write!(f, "no active step; open a step scope first"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Payload(e)
    }
}

/// Summary row for run listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInfo {
    pub run_id: String,
    pub created_at: String,
    pub forkline_version: String,
    pub schema_version: String,
    pub step_count: usize,
}

/// Append-only SQLite-backed run store.
pub struct SqliteStore {
    conn: Connection,
    policy: RedactionPolicy,
}

impl SqliteStore {
    /// Open (or create) a store at the given path. Parent directories are
    /// created as needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on filesystem or database failure.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store (dropped with the value).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Replace the redaction policy applied at the storage boundary.
    #[must_use]
    pub fn with_policy(mut self, policy: RedactionPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS runs (
                 run_id TEXT PRIMARY KEY,
                 created_at TEXT NOT NULL,
                 forkline_version TEXT,
                 schema_version TEXT
             );
             CREATE TABLE IF NOT EXISTS steps (
                 step_id INTEGER PRIMARY KEY AUTOINCREMENT,
                 run_id TEXT NOT NULL,
                 idx INTEGER NOT NULL,
                 name TEXT NOT NULL,
                 started_at TEXT NOT NULL,
                 ended_at TEXT
             );
             CREATE TABLE IF NOT EXISTS events (
                 event_id INTEGER PRIMARY KEY AUTOINCREMENT,
                 run_id TEXT NOT NULL,
                 step_idx INTEGER NOT NULL,
                 type TEXT NOT NULL,
                 payload_json TEXT NOT NULL,
                 created_at TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_events_run_step
                 ON events(run_id, step_idx, event_id);",
        )?;
        Ok(Self {
            conn,
            policy: default_policy(),
        })
    }

    fn utc_now() -> String {
        chrono::Utc::now().to_rfc3339()
    }

    /// Register a run and stamp it with the current versions.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub fn start_run(&self, run_id: &str) -> Result<Run, StoreError> {
        let created_at = Self::utc_now();
        self.conn.execute(
            "INSERT OR REPLACE INTO runs (run_id, created_at, forkline_version, schema_version)
             VALUES (?1, ?2, ?3, ?4)",
            params![run_id, created_at, FORKLINE_VERSION, SCHEMA_VERSION],
        )?;
        Ok(Run {
            run_id: run_id.to_string(),
            created_at,
            steps: Vec::new(),
            forkline_version: FORKLINE_VERSION.to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
        })
    }

    /// Open a step within a run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub fn start_step(&self, run_id: &str, idx: usize, name: &str) -> Result<Step, StoreError> {
        let started_at = Self::utc_now();
        self.conn.execute(
            "INSERT INTO steps (run_id, idx, name, started_at, ended_at)
             VALUES (?1, ?2, ?3, ?4, NULL)",
            params![run_id, idx as i64, name, started_at],
        )?;
        Ok(Step {
            step_id: Some(self.conn.last_insert_rowid()),
            run_id: run_id.to_string(),
            idx,
            name: name.to_string(),
            started_at,
            ended_at: None,
            events: Vec::new(),
        })
    }

    /// Close a step.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub fn end_step(&self, run_id: &str, idx: usize) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE steps SET ended_at = ?1 WHERE run_id = ?2 AND idx = ?3",
            params![Self::utc_now(), run_id, idx as i64],
        )?;
        Ok(())
    }

    /// Append an event to a step.
    ///
    /// The payload is redacted under the store's policy before persistence;
    /// the caller's value is untouched. Returns the event as stored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database or serialization failure.
    pub fn append_event(
        &self,
        run_id: &str,
        step_idx: usize,
        event_type: &str,
        payload: &Value,
    ) -> Result<Event, StoreError> {
        let redacted = self.policy.redact(event_type, payload);
        let payload_json = serde_json::to_string(&redacted.to_json())?;
        let created_at = Self::utc_now();
        self.conn.execute(
            "INSERT INTO events (run_id, step_idx, type, payload_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_id, step_idx as i64, event_type, payload_json, created_at],
        )?;
        Ok(Event {
            event_id: Some(self.conn.last_insert_rowid()),
            run_id: run_id.to_string(),
            step_idx,
            event_type: event_type.to_string(),
            created_at,
            payload: redacted,
        })
    }

    /// Load a run with its steps and events, or `None` if unknown.
    ///
    /// Version columns recorded as NULL load as the library defaults.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database or parse failure.
    pub fn load_run(&self, run_id: &str) -> Result<Option<Run>, StoreError> {
        let header = self
            .conn
            .query_row(
                "SELECT created_at, forkline_version, schema_version
                 FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((created_at, forkline_version, schema_version)) = header else {
            return Ok(None);
        };

        Ok(Some(Run {
            run_id: run_id.to_string(),
            created_at,
            steps: self.load_steps(run_id)?,
            forkline_version: forkline_version
                .unwrap_or_else(|| DEFAULT_FORKLINE_VERSION.to_string()),
            schema_version: schema_version.unwrap_or_else(|| DEFAULT_SCHEMA_VERSION.to_string()),
        }))
    }

    /// List recorded runs, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub fn list_runs(&self) -> Result<Vec<RunInfo>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT r.run_id, r.created_at, r.forkline_version, r.schema_version,
                    (SELECT COUNT(*) FROM steps s WHERE s.run_id = r.run_id)
             FROM runs r
             ORDER BY r.created_at ASC, r.run_id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RunInfo {
                run_id: row.get(0)?,
                created_at: row.get(1)?,
                forkline_version: row
                    .get::<_, Option<String>>(2)?
                    .unwrap_or_else(|| DEFAULT_FORKLINE_VERSION.to_string()),
                schema_version: row
                    .get::<_, Option<String>>(3)?
                    .unwrap_or_else(|| DEFAULT_SCHEMA_VERSION.to_string()),
                step_count: row.get::<_, i64>(4)? as usize,
            })
        })?;
        let mut infos = Vec::new();
        for info in rows {
            infos.push(info?);
        }
        Ok(infos)
    }

    fn load_steps(&self, run_id: &str) -> Result<Vec<Step>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT step_id, idx, name, started_at, ended_at
             FROM steps WHERE run_id = ?1 ORDER BY idx ASC",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut steps = Vec::new();
        for row in rows {
            let (step_id, idx, name, started_at, ended_at) = row?;
            let idx = usize::try_from(idx).unwrap_or(0);
            steps.push(Step {
                step_id: Some(step_id),
                run_id: run_id.to_string(),
                idx,
                name,
                started_at,
                ended_at,
                events: self.load_events(run_id, idx)?,
            });
        }
        Ok(steps)
    }

    fn load_events(&self, run_id: &str, step_idx: usize) -> Result<Vec<Event>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, type, payload_json, created_at
             FROM events WHERE run_id = ?1 AND step_idx = ?2
             ORDER BY event_id ASC",
        )?;
        let rows = stmt.query_map(params![run_id, step_idx as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (event_id, event_type, payload_json, created_at) = row?;
            let parsed: serde_json::Value = serde_json::from_str(&payload_json)?;
            events.push(Event {
                event_id: Some(event_id),
                run_id: run_id.to_string(),
                step_idx,
                event_type,
                created_at,
                payload: Value::from_json(parsed),
            });
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(j: serde_json::Value) -> Value {
        Value::from_json(j)
    }

    #[test]
    fn round_trip_in_memory() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.start_run("r1").unwrap();
        store.start_step("r1", 0, "plan").unwrap();
        store
            .append_event("r1", 0, "input", &payload(json!({"prompt": "hello"})))
            .unwrap();
        store.end_step("r1", 0).unwrap();

        let run = store.load_run("r1").unwrap().expect("run must exist");
        assert_eq!(run.run_id, "r1");
        assert_eq!(run.forkline_version, FORKLINE_VERSION);
        assert_eq!(run.schema_version, SCHEMA_VERSION);
        assert_eq!(run.steps.len(), 1);
        assert_eq!(run.steps[0].name, "plan");
        assert!(run.steps[0].ended_at.is_some());
        assert_eq!(run.steps[0].events.len(), 1);
        assert_eq!(
            run.steps[0].events[0].payload,
            payload(json!({"prompt": "hello"}))
        );
        assert!(run.validate().is_ok());
    }

    #[test]
    fn unknown_run_loads_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.load_run("ghost").unwrap().is_none());
    }

    #[test]
    fn events_keep_insertion_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.start_run("r1").unwrap();
        store.start_step("r1", 0, "work").unwrap();
        for i in 0..5 {
            store
                .append_event("r1", 0, "output", &payload(json!({"seq": i})))
                .unwrap();
        }
        let run = store.load_run("r1").unwrap().unwrap();
        let seqs: Vec<_> = run.steps[0]
            .events
            .iter()
            .map(|e| e.payload.get("seq").cloned().unwrap())
            .collect();
        assert_eq!(seqs, (0..5i64).map(Value::Int).collect::<Vec<_>>());
    }

    #[test]
    fn redaction_applies_at_the_boundary() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.start_run("r1").unwrap();
        store.start_step("r1", 0, "call").unwrap();
        let original = payload(json!({
            "args": {"url": "https://x", "api_key": "sk-1"},
            "result": {"status": 200, "session": "s1"},
        }));
        let stored = store
            .append_event("r1", 0, "tool_call", &original)
            .unwrap();

        // The caller's payload is untouched; the stored one is redacted.
        assert_eq!(
            original,
            payload(json!({
                "args": {"url": "https://x", "api_key": "sk-1"},
                "result": {"status": 200, "session": "s1"},
            }))
        );
        let expected = payload(json!({
            "args": {"url": "https://x", "api_key": "[REDACTED]"},
            "result": {"status": 200, "session": "[REDACTED]"},
        }));
        assert_eq!(stored.payload, expected);

        let loaded = store.load_run("r1").unwrap().unwrap();
        assert_eq!(loaded.steps[0].events[0].payload, expected);
    }

    #[test]
    fn custom_policy_replaces_default() {
        use forkline_core::redaction::RedactionPolicy;
        let store = SqliteStore::open_in_memory()
            .unwrap()
            .with_policy(RedactionPolicy::new(vec![]));
        store.start_run("r1").unwrap();
        store.start_step("r1", 0, "call").unwrap();
        let stored = store
            .append_event("r1", 0, "tool_call", &payload(json!({"api_key": "sk-1"})))
            .unwrap();
        assert_eq!(stored.payload, payload(json!({"api_key": "sk-1"})));
    }

    #[test]
    fn start_run_is_idempotent_per_id() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.start_run("r1").unwrap();
        store.start_run("r1").unwrap();
        let runs = store.list_runs().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, "r1");
    }

    #[test]
    fn list_runs_counts_steps() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.start_run("r1").unwrap();
        store.start_step("r1", 0, "a").unwrap();
        store.start_step("r1", 1, "b").unwrap();
        store.start_run("r2").unwrap();
        let infos = store.list_runs().unwrap();
        assert_eq!(infos.len(), 2);
        let r1 = infos.iter().find(|i| i.run_id == "r1").unwrap();
        assert_eq!(r1.step_count, 2);
        assert_eq!(r1.forkline_version, FORKLINE_VERSION);
    }
}
