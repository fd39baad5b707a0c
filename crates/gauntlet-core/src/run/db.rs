//! Run ledger: one row per run in the runner's database file.
//!
//! The same database also holds the prediction cache, so a runner's whole
//! history travels as a single file.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::errors::{CoreError, CoreResult};
use crate::model::{RunStatus, RunnerArgs, RunnerType};
use crate::storage::{open_database, DbBackend, SqlRow, SqlValue};

pub(crate) const RUN_TABLE: &str = "run_table";
pub(crate) const CACHE_TABLE: &str = "cache_table";

const RUN_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS run_table (
    run_id INTEGER PRIMARY KEY AUTOINCREMENT,
    runner_id TEXT NOT NULL,
    runner_type TEXT NOT NULL,
    runner_args TEXT NOT NULL,
    endpoints TEXT NOT NULL,
    results_file TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL,
    duration INTEGER NOT NULL,
    error_messages TEXT NOT NULL,
    raw_results TEXT NOT NULL,
    results TEXT NOT NULL,
    status TEXT NOT NULL
);";

const CACHE_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS cache_table (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    connection_id TEXT NOT NULL,
    recipe_id TEXT NOT NULL,
    dataset_id TEXT NOT NULL,
    prompt_template_id TEXT NOT NULL,
    prompt_index INTEGER NOT NULL,
    prompt TEXT NOT NULL,
    target TEXT NOT NULL,
    predicted_results TEXT NOT NULL,
    duration REAL NOT NULL,
    random_seed INTEGER NOT NULL DEFAULT 0,
    system_prompt TEXT NOT NULL DEFAULT ''
);
CREATE UNIQUE INDEX IF NOT EXISTS cache_identity
    ON cache_table (recipe_id, connection_id, prompt_template_id, prompt, dataset_id);";

const RUN_COLUMNS: &str = "run_id, runner_id, runner_type, runner_args, endpoints, \
     results_file, start_time, end_time, duration, error_messages, raw_results, results, status";

/// Everything the ledger knows about one run.
#[derive(Debug, Clone)]
pub struct RunRecord {
    /// Assigned on insert; `None` until then.
    pub run_id: Option<i64>,
    pub runner_id: String,
    pub runner_type: RunnerType,
    pub runner_args: RunnerArgs,
    pub endpoints: Vec<String>,
    pub results_file: String,
    /// Unix seconds.
    pub start_time: i64,
    pub end_time: i64,
    pub duration: i64,
    pub error_messages: Vec<String>,
    pub raw_results: Value,
    pub results: Value,
    pub status: RunStatus,
}

impl RunRecord {
    /// A fresh pending record clocked at now.
    pub fn started(
        runner_id: impl Into<String>,
        runner_type: RunnerType,
        runner_args: RunnerArgs,
        endpoints: Vec<String>,
        results_file: impl Into<String>,
    ) -> Self {
        let now = Utc::now().timestamp();
        Self {
            run_id: None,
            runner_id: runner_id.into(),
            runner_type,
            runner_args,
            endpoints,
            results_file: results_file.into(),
            start_time: now,
            end_time: now,
            duration: 0,
            error_messages: Vec::new(),
            raw_results: Value::Null,
            results: Value::Null,
            status: RunStatus::Pending,
        }
    }

    /// Refresh `end_time` and `duration` against the wall clock.
    pub fn touch(&mut self) {
        self.end_time = Utc::now().timestamp();
        self.duration = (self.end_time - self.start_time).max(0);
    }

    fn params(&self) -> CoreResult<Vec<SqlValue>> {
        Ok(vec![
            self.runner_id.as_str().into(),
            self.runner_type.as_str().into(),
            serde_json::to_string(&self.runner_args)?.into(),
            serde_json::to_string(&self.endpoints)?.into(),
            self.results_file.as_str().into(),
            self.start_time.into(),
            self.end_time.into(),
            self.duration.into(),
            serde_json::to_string(&self.error_messages)?.into(),
            serde_json::to_string(&self.raw_results)?.into(),
            serde_json::to_string(&self.results)?.into(),
            self.status.as_str().into(),
        ])
    }

    fn from_row(row: &SqlRow) -> CoreResult<Self> {
        if row.len() != 13 {
            return Err(CoreError::validation(format!(
                "run_table row has {} columns, expected 13",
                row.len()
            )));
        }
        Ok(Self {
            run_id: row[0].as_i64(),
            runner_id: row[1].text_or_empty().to_string(),
            runner_type: RunnerType::parse(row[2].text_or_empty())?,
            runner_args: serde_json::from_str(row[3].text_or_empty())?,
            endpoints: serde_json::from_str(row[4].text_or_empty())?,
            results_file: row[5].text_or_empty().to_string(),
            start_time: row[6].as_i64().unwrap_or(0),
            end_time: row[7].as_i64().unwrap_or(0),
            duration: row[8].as_i64().unwrap_or(0),
            error_messages: serde_json::from_str(row[9].text_or_empty())?,
            raw_results: serde_json::from_str(row[10].text_or_empty())?,
            results: serde_json::from_str(row[11].text_or_empty())?,
            status: RunStatus::parse(row[12].text_or_empty())?,
        })
    }
}

/// Handle to a runner's database file.
pub struct RunDb {
    backend: Arc<dyn DbBackend>,
}

impl RunDb {
    /// Open the runner database at `path`, creating tables as needed.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::with_backend(open_database("sqlite", path)?)
    }

    /// Wrap an already-open backend, creating tables as needed.
    pub fn with_backend(backend: Arc<dyn DbBackend>) -> CoreResult<Self> {
        let db = Self { backend };
        db.init_schema()?;
        Ok(db)
    }

    /// Shared backend, for the prediction cache living in the same file.
    pub fn backend(&self) -> Arc<dyn DbBackend> {
        Arc::clone(&self.backend)
    }

    fn init_schema(&self) -> CoreResult<()> {
        self.backend.execute_batch(RUN_TABLE_DDL)?;
        self.backend.execute_batch(CACHE_TABLE_DDL)?;
        // Databases written before seeds and system prompts were recorded
        // lack these two columns.
        self.backend.add_column_if_missing(
            CACHE_TABLE,
            "random_seed",
            "INTEGER NOT NULL DEFAULT 0",
        )?;
        self.backend
            .add_column_if_missing(CACHE_TABLE, "system_prompt", "TEXT NOT NULL DEFAULT ''")?;
        Ok(())
    }

    /// Insert a new run row and return its id.
    pub fn create_run(&self, record: &RunRecord) -> CoreResult<i64> {
        let sql = "INSERT INTO run_table (runner_id, runner_type, runner_args, endpoints, \
             results_file, start_time, end_time, duration, error_messages, raw_results, \
             results, status) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)";
        self.backend.insert(sql, &record.params()?)
    }

    /// Persist the current state of `record` under `run_id`.
    pub fn update_run(&self, run_id: i64, record: &RunRecord) -> CoreResult<()> {
        let sql = "UPDATE run_table SET runner_id = ?1, runner_type = ?2, runner_args = ?3, \
             endpoints = ?4, results_file = ?5, start_time = ?6, end_time = ?7, duration = ?8, \
             error_messages = ?9, raw_results = ?10, results = ?11, status = ?12 \
             WHERE run_id = ?13";
        let mut params = record.params()?;
        params.push(run_id.into());
        let changed = self.backend.execute(sql, &params)?;
        if changed == 0 {
            return Err(CoreError::not_found("runs", run_id.to_string()));
        }
        Ok(())
    }

    pub fn read_run(&self, run_id: i64) -> CoreResult<Option<RunRecord>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM {RUN_TABLE} WHERE run_id = ?1");
        match self.backend.query_one(&sql, &[run_id.into()])? {
            Some(row) => Ok(Some(RunRecord::from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Most recently created run, if any.
    pub fn latest_run(&self) -> CoreResult<Option<RunRecord>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM {RUN_TABLE} ORDER BY run_id DESC LIMIT 1");
        match self.backend.query_one(&sql, &[])? {
            Some(row) => Ok(Some(RunRecord::from_row(&row)?)),
            None => Ok(None),
        }
    }
}
