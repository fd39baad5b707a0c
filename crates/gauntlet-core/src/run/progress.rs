//! Progress bookkeeping for a run in flight.
//!
//! Every state change lands in two places: the run row (so `run_table` always
//! reflects reality, even mid-run) and an optional subscriber (so a CLI can
//! paint a live view). Persistence failures are logged and swallowed; losing
//! a progress write must never take the run down with it.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::model::{RunStatus, RunnerType};
use crate::run::db::{RunDb, RunRecord};

/// Point-in-time view of a run handed to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub run_id: i64,
    pub runner_id: String,
    pub runner_type: RunnerType,
    pub status: RunStatus,
    pub total_cookbooks: usize,
    /// Cookbooks fully finished so far.
    pub cookbook_index: usize,
    pub current_cookbook: Option<String>,
    pub total_recipes: usize,
    /// Recipes fully finished within the current scope.
    pub recipe_index: usize,
    pub current_recipe: Option<String>,
    pub percent: u8,
    pub duration: i64,
    pub error_messages: Vec<String>,
}

/// Receives a snapshot after every state change.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, snapshot: &ProgressSnapshot);
}

/// Live progress state for one run.
pub struct RunProgress {
    db: Arc<RunDb>,
    run_id: i64,
    record: RunRecord,
    sink: Option<Arc<dyn ProgressSink>>,
    total_cookbooks: usize,
    cookbook_index: usize,
    current_cookbook: Option<String>,
    total_recipes: usize,
    recipe_index: usize,
    current_recipe: Option<String>,
}

impl RunProgress {
    /// `total_cookbooks` is zero for recipe runs; `total_recipes` is the
    /// count within the first scope and is rescoped per cookbook.
    pub fn new(
        db: Arc<RunDb>,
        run_id: i64,
        record: RunRecord,
        sink: Option<Arc<dyn ProgressSink>>,
        total_cookbooks: usize,
        total_recipes: usize,
    ) -> Self {
        Self {
            db,
            run_id,
            record,
            sink,
            total_cookbooks,
            cookbook_index: 0,
            current_cookbook: None,
            total_recipes,
            recipe_index: 0,
            current_recipe: None,
        }
    }

    /// Completed-work percentage. Cookbook runs split 100 evenly across
    /// cookbooks and pro-rate the current cookbook by its recipes; recipe
    /// runs split across recipes directly. Each term floors independently.
    pub fn percent(&self) -> u8 {
        let pct = if self.total_cookbooks > 0 {
            let per_cookbook = 100.0 / self.total_cookbooks as f64;
            let done = (self.cookbook_index as f64 * per_cookbook).floor();
            let within = if self.total_recipes > 0 {
                (self.recipe_index as f64 * per_cookbook / self.total_recipes as f64).floor()
            } else {
                0.0
            };
            done + within
        } else if self.total_recipes > 0 {
            (self.recipe_index * 100 / self.total_recipes) as f64
        } else {
            0.0
        };
        pct.clamp(0.0, 100.0) as u8
    }

    /// Re-scope the denominators once the run plan is resolved.
    pub fn set_totals(&mut self, total_cookbooks: usize, total_recipes: usize) {
        self.total_cookbooks = total_cookbooks;
        self.total_recipes = total_recipes;
    }

    /// `completed` cookbooks are done; `current` is starting with
    /// `recipes_in_cookbook` recipes ahead of it.
    pub fn advance_cookbook(
        &mut self,
        completed: usize,
        current: Option<String>,
        recipes_in_cookbook: usize,
    ) {
        self.cookbook_index = completed;
        self.current_cookbook = current;
        self.total_recipes = recipes_in_cookbook;
        self.recipe_index = 0;
        self.current_recipe = None;
        self.notify();
    }

    pub fn advance_recipe(&mut self, completed: usize, current: Option<String>) {
        self.recipe_index = completed;
        self.current_recipe = current;
        self.notify();
    }

    /// Record an error once (repeats are dropped) and shift the run status
    /// to its error-carrying flavor.
    pub fn record_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.record.error_messages.contains(&message) {
            self.record.error_messages.push(message);
        }
        self.record.status = self.record.status.with_errors();
        self.notify();
    }

    pub fn set_status(&mut self, status: RunStatus) {
        // Never forget errors already recorded.
        self.record.status = if self.record.error_messages.is_empty() {
            status
        } else {
            status.with_errors()
        };
        self.notify();
    }

    /// Attach and persist the run's outputs.
    pub fn set_results(&mut self, raw_results: Value, results: Value) {
        self.record.raw_results = raw_results;
        self.record.results = results;
        self.notify();
    }

    pub fn status(&self) -> RunStatus {
        self.record.status
    }

    pub fn record(&self) -> &RunRecord {
        &self.record
    }

    pub fn into_record(self) -> RunRecord {
        self.record
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            run_id: self.run_id,
            runner_id: self.record.runner_id.clone(),
            runner_type: self.record.runner_type,
            status: self.record.status,
            total_cookbooks: self.total_cookbooks,
            cookbook_index: self.cookbook_index,
            current_cookbook: self.current_cookbook.clone(),
            total_recipes: self.total_recipes,
            recipe_index: self.recipe_index,
            current_recipe: self.current_recipe.clone(),
            percent: self.percent(),
            duration: self.record.duration,
            error_messages: self.record.error_messages.clone(),
        }
    }

    fn notify(&mut self) {
        self.record.touch();
        if let Err(e) = self.db.update_run(self.run_id, &self.record) {
            warn!(error = %e, run_id = self.run_id, "failed to persist run progress");
        }
        if let Some(sink) = &self.sink {
            sink.on_progress(&self.snapshot());
        }
    }
}
