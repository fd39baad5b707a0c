//! Environment configuration: where each catalog collection lives on disk.
//!
//! All engine components resolve paths through [`EnvConfig`] instead of
//! hard-coding locations, so a whole installation can be relocated by
//! editing one JSON file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{CoreError, CoreResult};

/// Default config file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "gauntlet.json";

/// The catalog collections an installation keeps on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Endpoints,
    Recipes,
    Cookbooks,
    Datasets,
    PromptTemplates,
    Runners,
    Results,
    Databases,
}

impl Collection {
    /// Directory (and error-message) name for the collection.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Endpoints => "endpoints",
            Self::Recipes => "recipes",
            Self::Cookbooks => "cookbooks",
            Self::Datasets => "datasets",
            Self::PromptTemplates => "prompt-templates",
            Self::Runners => "runners",
            Self::Results => "results",
            Self::Databases => "databases",
        }
    }

    /// All collections, in the order `init` creates them.
    pub fn all() -> [Collection; 8] {
        [
            Self::Endpoints,
            Self::Recipes,
            Self::Cookbooks,
            Self::Datasets,
            Self::PromptTemplates,
            Self::Runners,
            Self::Results,
            Self::Databases,
        ]
    }
}

/// Log verbosity, persisted in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error => "error",
        }
    }
}

/// Logging section of the environment config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Base name for the log file when file logging is enabled.
    pub log_name: String,
    pub log_level: LogLevel,
    /// Mirror log lines into `<log_name>.log` next to the config file.
    pub log_to_file: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_name: "gauntlet".to_string(),
            log_level: LogLevel::default(),
            log_to_file: false,
        }
    }
}

/// On-disk layout of one installation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvConfig {
    pub endpoints: PathBuf,
    pub recipes: PathBuf,
    pub cookbooks: PathBuf,
    pub datasets: PathBuf,
    pub prompt_templates: PathBuf,
    pub runners: PathBuf,
    pub results: PathBuf,
    pub databases: PathBuf,
    #[serde(default)]
    pub log: LogConfig,
}

impl EnvConfig {
    /// Standard layout rooted at `root`, one subdirectory per collection.
    pub fn with_root(root: &Path) -> Self {
        Self {
            endpoints: root.join("endpoints"),
            recipes: root.join("recipes"),
            cookbooks: root.join("cookbooks"),
            datasets: root.join("datasets"),
            prompt_templates: root.join("prompt-templates"),
            runners: root.join("runners"),
            results: root.join("results"),
            databases: root.join("databases"),
            log: LogConfig::default(),
        }
    }

    /// Read a config file written by [`EnvConfig::save`].
    pub fn load(path: &Path) -> CoreResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| CoreError::Validation {
            message: format!("cannot read config {}: {e}", path.display()),
        })?;
        let cfg: Self = serde_json::from_str(&raw)?;
        Ok(cfg)
    }

    /// Write the config as pretty JSON.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Create every collection directory that does not exist yet.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        for collection in Collection::all() {
            std::fs::create_dir_all(self.dir(collection))?;
        }
        Ok(())
    }

    /// Directory holding the given collection.
    pub fn dir(&self, collection: Collection) -> &Path {
        match collection {
            Collection::Endpoints => &self.endpoints,
            Collection::Recipes => &self.recipes,
            Collection::Cookbooks => &self.cookbooks,
            Collection::Datasets => &self.datasets,
            Collection::PromptTemplates => &self.prompt_templates,
            Collection::Runners => &self.runners,
            Collection::Results => &self.results,
            Collection::Databases => &self.databases,
        }
    }

    /// Path of the record `id` inside `collection`.
    pub fn record_path(&self, collection: Collection, id: &str) -> PathBuf {
        self.dir(collection).join(format!("{id}.json"))
    }

    /// Path of the SQLite database backing the runner `runner_id`.
    pub fn database_path(&self, runner_id: &str) -> PathBuf {
        self.databases.join(format!("{runner_id}.db"))
    }

    /// Path of the formatted result document for `runner_id`.
    pub fn results_path(&self, runner_id: &str) -> PathBuf {
        self.results.join(format!("{runner_id}.json"))
    }
}
