use std::path::Path;

use serde_json::Value;

use gauntlet_core::config::EnvConfig;
use gauntlet_core::errors::CoreError;
use gauntlet_core::storage::ObjectBackend;

use crate::cli::args::ShowResultArgs;

pub fn run(config_path: &Path, args: ShowResultArgs) -> anyhow::Result<i32> {
    let cfg = EnvConfig::load(config_path)?;
    let path = cfg.results_path(&args.runner);
    if !path.is_file() {
        return Err(CoreError::not_found("results", &args.runner).into());
    }
    let doc = ObjectBackend::JsonEager.build().read(&path)?;
    if args.full {
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(0);
    }
    print_summary(&doc);
    Ok(0)
}

fn print_summary(doc: &Value) {
    let meta = &doc["metadata"];
    println!(
        "run {} {} in {}s ({} prompts)",
        meta["id"].as_str().unwrap_or("?"),
        meta["status"].as_str().unwrap_or("?"),
        meta["duration"].as_i64().unwrap_or(0),
        meta["num_of_prompts"].as_u64().unwrap_or(0),
    );

    if let Some(recipes) = doc.pointer("/results/recipes").and_then(Value::as_array) {
        for recipe in recipes {
            print_recipe(recipe, "");
        }
    }
    if let Some(cookbooks) = doc.pointer("/results/cookbooks").and_then(Value::as_array) {
        for cookbook in cookbooks {
            println!("cookbook {}", cookbook["id"].as_str().unwrap_or("?"));
            if let Some(recipes) = cookbook["recipes"].as_array() {
                for recipe in recipes {
                    print_recipe(recipe, "  ");
                }
            }
            if let Some(overall) = cookbook["overall_evaluation_summary"].as_array() {
                for row in overall {
                    println!(
                        "  overall {}: {}",
                        row["model_id"].as_str().unwrap_or("?"),
                        row["overall_grade"].as_str().unwrap_or("-"),
                    );
                }
            }
        }
    }
}

fn print_recipe(recipe: &Value, indent: &str) {
    println!(
        "{indent}recipe {} ({} prompts)",
        recipe["id"].as_str().unwrap_or("?"),
        recipe["total_num_of_prompts"].as_u64().unwrap_or(0),
    );
    if let Some(summary) = recipe["evaluation_summary"].as_array() {
        for row in summary {
            let avg = match row["avg_grade_value"].as_f64() {
                Some(v) => format!("{v:.2}"),
                None => "-".to_string(),
            };
            println!(
                "{indent}  {}: grade {} (avg {avg})",
                row["model_id"].as_str().unwrap_or("?"),
                row["grade"].as_str().unwrap_or("-"),
            );
        }
    }
}
