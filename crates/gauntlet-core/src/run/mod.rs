//! Run execution: ledger, cache, prompt pipeline, tasks, engine, results.

pub mod cache;
pub mod db;
pub mod engine;
pub mod format;
mod literal;
pub mod progress;
pub mod prompts;
pub mod task;

pub use cache::{CacheHit, PredictionCache};
pub use db::{RunDb, RunRecord};
pub use engine::{
    BucketResult, CookbookRunResult, EngineConfig, RecipeRunResult, RunEngine, RunOutcome,
    RunResults,
};
pub use format::{render, write_document, RunMetadata};
pub use progress::{ProgressSink, ProgressSnapshot, RunProgress};
pub use prompts::{sample_indices, PromptStream, RecipePrompts, NO_TEMPLATE_ID};
pub use task::{TaskProcessor, TaskSetup};
