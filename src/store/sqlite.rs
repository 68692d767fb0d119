use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::{ContinuationStore, StateUpdate, StrategicState};
use crate::reasoning::ContinuationToken;

/// Async-safe handle to the state database.
///
/// Wraps the SQLite connection behind `Arc<Mutex>` and runs all access on
/// tokio's blocking thread pool via `spawn_blocking`, so synchronous SQLite
/// I/O never ties up async worker threads.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<Mutex<Connection>>,
}

impl StoreHandle {
    /// Run a closure with access to the connection on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| anyhow::anyhow!("Store lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("Store task panicked")?
    }
}

/// SQLite-backed `ContinuationStore`, one row per project.
#[derive(Clone)]
pub struct SqliteStore {
    handle: StoreHandle,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        Self::from_connection(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        run_migrations(&conn).context("Failed to run migrations")?;
        Ok(Self {
            handle: StoreHandle {
                inner: Arc::new(Mutex::new(conn)),
            },
        })
    }
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS strategic_state (
            project_id TEXT PRIMARY KEY,
            strategic_intent TEXT NOT NULL DEFAULT '',
            continuation_token TEXT,
            updated_at INTEGER NOT NULL
        );
        ",
    )
    .context("Failed to create strategic_state table")?;
    Ok(())
}

fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}

fn read_state(conn: &Connection, project_id: &str) -> Result<Option<StrategicState>> {
    conn.query_row(
        "SELECT project_id, strategic_intent, continuation_token, updated_at
         FROM strategic_state WHERE project_id = ?1",
        params![project_id],
        |row| {
            let token: Option<String> = row.get(2)?;
            Ok(StrategicState {
                project_id: row.get(0)?,
                strategic_intent: row.get(1)?,
                continuation_token: token.and_then(ContinuationToken::new),
                updated_at: micros_to_datetime(row.get(3)?),
            })
        },
    )
    .optional()
    .context("Failed to read strategic state")
}

/// Upsert one project row. `updated_at` is `max(now, previous + 1µs)` so it
/// strictly increases per project even when the wall clock stalls or steps back.
fn merge_state(conn: &Connection, project_id: &str, update: &StateUpdate) -> Result<StrategicState> {
    let now = Utc::now().timestamp_micros();
    let token = update.continuation_token.as_ref().map(|t| t.as_str());

    conn.execute(
        "INSERT INTO strategic_state (project_id, strategic_intent, continuation_token, updated_at)
         VALUES (?1, COALESCE(?2, ''), ?3, ?4)
         ON CONFLICT(project_id) DO UPDATE SET
             strategic_intent = COALESCE(?2, strategic_state.strategic_intent),
             continuation_token = COALESCE(?3, strategic_state.continuation_token),
             updated_at = MAX(?4, strategic_state.updated_at + 1)",
        params![project_id, update.strategic_intent, token, now],
    )
    .context("Failed to upsert strategic state")?;

    read_state(conn, project_id)?
        .ok_or_else(|| anyhow::anyhow!("Strategic state for {} vanished after write", project_id))
}

#[async_trait]
impl ContinuationStore for SqliteStore {
    async fn get(&self, project_id: &str) -> Result<Option<StrategicState>> {
        let project_id = project_id.to_string();
        self.handle.call(move |conn| read_state(conn, &project_id)).await
    }

    async fn merge(&self, project_id: &str, update: StateUpdate) -> Result<StrategicState> {
        let project_id = project_id.to_string();
        let state = self
            .handle
            .call(move |conn| merge_state(conn, &project_id, &update))
            .await?;
        tracing::info!(
            project = %state.project_id,
            has_token = state.continuation_token.is_some(),
            updated_at = %state.updated_at,
            "strategic state merged (last write wins)"
        );
        Ok(state)
    }
}
