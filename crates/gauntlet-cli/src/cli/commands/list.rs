use std::path::Path;

use gauntlet_core::catalog::CatalogStore;
use gauntlet_core::config::EnvConfig;

use crate::cli::args::ListArgs;

pub fn run(config_path: &Path, args: ListArgs) -> anyhow::Result<i32> {
    let cfg = EnvConfig::load(config_path)?;
    let store = CatalogStore::new(cfg);
    let ids = store.list_ids(args.collection.into())?;
    if ids.is_empty() {
        println!("(none)");
    } else {
        for id in ids {
            println!("{id}");
        }
    }
    Ok(0)
}
