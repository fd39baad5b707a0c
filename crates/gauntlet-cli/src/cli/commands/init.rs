use std::path::Path;

use serde_json::json;

use gauntlet_core::catalog::{CatalogStore, DatasetExample, DatasetMeta};
use gauntlet_core::config::{EnvConfig, DEFAULT_CONFIG_FILE};

use crate::cli::args::InitArgs;

pub fn run(config_path: &Path, args: InitArgs) -> anyhow::Result<i32> {
    std::fs::create_dir_all(&args.dir)?;
    let root = args.dir.canonicalize()?;
    let cfg = EnvConfig::with_root(&root);
    cfg.ensure_dirs()?;

    // With the default --config the file lands inside the new root;
    // otherwise it goes exactly where the caller pointed.
    let path = if config_path == Path::new(DEFAULT_CONFIG_FILE) {
        root.join(DEFAULT_CONFIG_FILE)
    } else {
        config_path.to_path_buf()
    };
    cfg.save(&path)?;
    println!("initialised {}", root.display());

    if args.demo {
        seed_demo(&cfg)?;
        println!("seeded demo catalog: runner `demo`, recipe `demo-colors`, cookbook `demo-cookbook`");
        println!("try: gauntlet --config {} run demo --recipes demo-colors", path.display());
    }
    Ok(0)
}

/// A self-contained offline catalog: echo endpoint with scripted answers,
/// one of them wrong so the demo grade is not a flat 100.
fn seed_demo(cfg: &EnvConfig) -> anyhow::Result<()> {
    let store = CatalogStore::new(cfg.clone());

    let questions = [
        ("What color is the sky on a clear day?", "blue"),
        ("What color is grass?", "green"),
        ("What color is a ripe banana?", "yellow"),
        ("What color is snow?", "white"),
    ];
    let examples: Vec<DatasetExample> = questions
        .iter()
        .map(|(input, target)| DatasetExample {
            input: (*input).to_string(),
            target: json!(target),
        })
        .collect();
    store.create_dataset(
        &DatasetMeta {
            name: "Demo Colors".into(),
            description: "Offline color questions for the demo runner".into(),
            ..Default::default()
        },
        &examples,
    )?;

    store.create_template(&serde_json::from_value(json!({
        "name": "One Word",
        "template": "Answer with one word: {{ prompt }}",
    }))?)?;

    store.create_recipe(&serde_json::from_value(json!({
        "name": "Demo Colors",
        "datasets": ["demo-colors"],
        "prompt_templates": ["one-word"],
        "metrics": ["contains_match"],
        "grading_scale": {"A": [80, 100], "B": [50, 79], "C": [0, 49]},
    }))?)?;

    store.create_cookbook(&serde_json::from_value(json!({
        "name": "Demo Cookbook",
        "recipes": ["demo-colors"],
    }))?)?;

    let mut responses = serde_json::Map::new();
    for (input, target) in questions {
        responses.insert(format!("Answer with one word: {input}"), json!(target));
    }
    // One deliberate miss.
    responses.insert("Answer with one word: What color is snow?".into(), json!("red"));
    store.create_endpoint(&serde_json::from_value(json!({
        "name": "Demo Echo",
        "connector_type": "echo",
        "max_calls_per_second": 10,
        "max_concurrency": 2,
        "model": "echo-1",
        "params": { "responses": responses },
    }))?)?;

    store.create_runner(&serde_json::from_value(json!({
        "name": "Demo",
        "description": "Offline demo runner",
        "endpoints": ["demo-echo"],
    }))?)?;
    Ok(())
}
