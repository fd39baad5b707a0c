use std::path::Path;

use serde_json::Value;

use gauntlet_core::catalog::CatalogStore;
use gauntlet_core::config::EnvConfig;
use gauntlet_core::errors::CoreError;
use gauntlet_core::storage::ObjectBackend;

use crate::cli::args::{CollectionArg, ShowArgs};

pub fn run(config_path: &Path, args: ShowArgs) -> anyhow::Result<i32> {
    let cfg = EnvConfig::load(config_path)?;
    let store = CatalogStore::new(cfg);
    let value: Value = match args.collection {
        CollectionArg::Endpoints => serde_json::to_value(store.endpoint(&args.id)?)?,
        CollectionArg::Recipes => serde_json::to_value(store.recipe(&args.id)?)?,
        CollectionArg::Cookbooks => serde_json::to_value(store.cookbook(&args.id)?)?,
        CollectionArg::PromptTemplates => serde_json::to_value(store.template(&args.id)?)?,
        CollectionArg::Runners => serde_json::to_value(store.runner(&args.id)?)?,
        // Meta only; a dataset body can hold hundreds of thousands of rows.
        CollectionArg::Datasets => serde_json::to_value(store.dataset_meta(&args.id)?)?,
        CollectionArg::Results => {
            let path = store.config().results_path(&args.id);
            if !path.is_file() {
                return Err(CoreError::not_found("results", &args.id).into());
            }
            ObjectBackend::JsonEager.build().read(&path)?
        }
    };
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(0)
}
