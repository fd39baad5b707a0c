//! Seeded prompt selection and the producer side of the prompt pipeline.
//!
//! A recipe expands to (template x dataset x selected example). Selection is
//! a pure function of the example count, the selection percentage and the run
//! seed, so a rerun of the same recipe regenerates the same prompts and the
//! cache can do its job.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::catalog::{CatalogStore, CompiledTemplate, DatasetExample, DatasetHandle, Recipe};
use crate::errors::{CoreError, CoreResult};
use crate::model::{PromptRequest, RunnerArgs};
use crate::storage::ItemFlow;

/// Template id used when a recipe carries no prompt templates and inputs are
/// sent verbatim.
pub const NO_TEMPLATE_ID: &str = "no-template";

/// How many examples a percentage selects. At least one example survives any
/// non-empty dataset.
fn sample_size(total: usize, percentage: u8) -> usize {
    if total == 0 {
        return 0;
    }
    (total.saturating_mul(percentage as usize) / 100).max(1)
}

/// Pick `percentage` of `total` example indices, seeded and sorted.
pub fn sample_indices(total: usize, percentage: u8, seed: u64) -> Vec<usize> {
    let n = sample_size(total, percentage);
    if n == 0 {
        return Vec::new();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, total, n).into_vec();
    picked.sort_unstable();
    picked
}

/// A recipe's prompt space, resolved and ready to stream.
#[derive(Debug)]
pub struct RecipePrompts {
    recipe_id: String,
    /// `(template_id, compiled)`; `None` means verbatim passthrough.
    templates: Vec<(String, Option<CompiledTemplate>)>,
    /// Handles paired with their example counts, taken once up front.
    datasets: Vec<(DatasetHandle, usize)>,
    percentage: u8,
    seed: u64,
}

impl RecipePrompts {
    /// Resolve every template and dataset the recipe names. Fails before any
    /// prompt is spent if something is missing or does not compile.
    pub fn prepare(catalog: &CatalogStore, recipe: &Recipe, args: &RunnerArgs) -> CoreResult<Self> {
        let mut templates = Vec::new();
        if recipe.prompt_templates.is_empty() {
            templates.push((NO_TEMPLATE_ID.to_string(), None));
        } else {
            for id in &recipe.prompt_templates {
                let record = catalog.template(id)?;
                let compiled = record.compile()?;
                templates.push((record.id.clone(), Some(compiled)));
            }
        }
        let mut datasets = Vec::new();
        for id in &recipe.datasets {
            let handle = catalog.dataset(id)?;
            let count = handle.count()?;
            datasets.push((handle, count));
        }
        Ok(Self {
            recipe_id: recipe.id.clone(),
            templates,
            datasets,
            percentage: args.prompt_selection_percentage,
            seed: args.random_seed,
        })
    }

    /// How many prompts the stream will yield (malformed examples aside).
    pub fn total(&self) -> usize {
        let per_template: usize = self
            .datasets
            .iter()
            .map(|(_, count)| sample_size(*count, self.percentage))
            .sum();
        per_template * self.templates.len()
    }

    /// Start producing batches on a blocking thread.
    pub fn spawn(
        self,
        cancel: CancellationToken,
        batch_size: usize,
        queue_depth: usize,
    ) -> PromptStream {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let producer = tokio::task::spawn_blocking(move || self.produce(&tx, &cancel, batch_size));
        PromptStream { rx, producer }
    }

    fn produce(
        self,
        tx: &mpsc::Sender<Vec<PromptRequest>>,
        cancel: &CancellationToken,
        batch_size: usize,
    ) -> CoreResult<()> {
        let batch_size = batch_size.max(1);
        let mut batch: Vec<PromptRequest> = Vec::with_capacity(batch_size);
        for (template_id, compiled) in &self.templates {
            for (dataset, count) in &self.datasets {
                let picked = sample_indices(*count, self.percentage, self.seed);
                let Some(&last) = picked.last() else {
                    continue;
                };
                let mut cursor = 0usize;
                let mut failure: Option<CoreError> = None;
                let mut closed = false;
                dataset.for_each(&mut |index, example| {
                    if cancel.is_cancelled() || closed {
                        return ItemFlow::Stop;
                    }
                    let done = if index >= last {
                        ItemFlow::Stop
                    } else {
                        ItemFlow::Continue
                    };
                    if picked.get(cursor) != Some(&index) {
                        return done;
                    }
                    cursor += 1;
                    let DatasetExample { input, target } = match example {
                        Ok(ex) => ex,
                        Err(e) => {
                            warn!(error = %e, "skipping malformed example");
                            return done;
                        }
                    };
                    let prompt = match compiled {
                        Some(t) => match t.render(&input) {
                            Ok(p) => p,
                            Err(e) => {
                                failure = Some(e);
                                return ItemFlow::Stop;
                            }
                        },
                        None => input,
                    };
                    batch.push(PromptRequest {
                        recipe_id: self.recipe_id.clone(),
                        dataset_id: dataset.id().to_string(),
                        prompt_template_id: template_id.clone(),
                        prompt_index: index,
                        prompt,
                        target,
                    });
                    if batch.len() >= batch_size
                        && tx.blocking_send(std::mem::take(&mut batch)).is_err()
                    {
                        // Consumer is gone; nothing left to do.
                        closed = true;
                        return ItemFlow::Stop;
                    }
                    done
                })?;
                if let Some(e) = failure {
                    return Err(e);
                }
                if closed || cancel.is_cancelled() {
                    return Ok(());
                }
            }
        }
        if !batch.is_empty() {
            let _ = tx.blocking_send(batch);
        }
        Ok(())
    }
}

/// Consumer side of a running prompt producer.
pub struct PromptStream {
    rx: mpsc::Receiver<Vec<PromptRequest>>,
    producer: tokio::task::JoinHandle<CoreResult<()>>,
}

impl PromptStream {
    /// Next batch, or `None` once the producer is done.
    pub async fn next_batch(&mut self) -> Option<Vec<PromptRequest>> {
        self.rx.recv().await
    }

    /// Reap the producer and surface any error it hit.
    pub async fn finish(self) -> CoreResult<()> {
        drop(self.rx);
        match self.producer.await {
            Ok(result) => result,
            Err(e) => Err(CoreError::fatal_run(format!("prompt producer panicked: {e}"))),
        }
    }
}
