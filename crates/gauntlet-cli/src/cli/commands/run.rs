use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use gauntlet_core::catalog::CatalogStore;
use gauntlet_core::config::EnvConfig;
use gauntlet_core::model::{RunStatus, RunnerArgs};
use gauntlet_core::run::{EngineConfig, ProgressSink, ProgressSnapshot, RunEngine};
use gauntlet_metrics::builtin_registry;

use crate::cli::args::RunArgs;

/// One progress line per update, to stderr so piped stdout stays clean.
struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        let scope = match (&snapshot.current_cookbook, &snapshot.current_recipe) {
            (Some(cb), Some(recipe)) => format!("{cb}/{recipe}"),
            (Some(cb), None) => cb.clone(),
            (None, Some(recipe)) => recipe.clone(),
            (None, None) => "-".to_string(),
        };
        eprintln!(
            "[{:>3}%] {} {} ({}s)",
            snapshot.percent,
            snapshot.status.as_str(),
            scope,
            snapshot.duration
        );
    }
}

pub async fn run(config_path: &Path, args: RunArgs) -> anyhow::Result<i32> {
    let cfg = EnvConfig::load(config_path)?;
    let store = Arc::new(CatalogStore::new(cfg));
    let runner = store.runner(&args.runner)?;
    let runner_args = RunnerArgs {
        cookbooks: args.cookbooks,
        recipes: args.recipes,
        prompt_selection_percentage: args.percentage,
        random_seed: args.seed,
        system_prompt: args.system_prompt,
    };

    let engine = RunEngine::with_config(
        store,
        Arc::new(builtin_registry()),
        EngineConfig {
            use_cache: !args.no_cache,
            ..EngineConfig::default()
        },
    );

    // Ctrl-C trips the token; in-flight calls finish on their own.
    let cancel = CancellationToken::new();
    let trip = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                eprintln!("cancelling, waiting for in-flight calls");
                trip.cancel();
            }
            Err(e) => warn!(error = %e, "ctrl-c handler unavailable"),
        }
    });

    let outcome = engine
        .run(&runner, runner_args, cancel, Some(Arc::new(ConsoleProgress)), None)
        .await?;

    for message in &outcome.error_messages {
        eprintln!("error: {message}");
    }
    println!(
        "run {} {}: {}",
        outcome.run_id,
        outcome.status.as_str(),
        outcome.results_file.display()
    );
    Ok(match outcome.status {
        RunStatus::Completed => 0,
        RunStatus::Cancelled | RunStatus::CancelledWithErrors => 6,
        _ => 1,
    })
}
