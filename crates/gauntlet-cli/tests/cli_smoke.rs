#![allow(deprecated)] // cargo_bin is deprecated but still supported by assert_cmd
//! End-to-end smoke tests over the demo catalog. Everything here runs
//! offline against the echo connector seeded by `init --demo`.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::{tempdir, TempDir};

fn gauntlet(workspace: &Path) -> Command {
    let mut cmd = Command::cargo_bin("gauntlet").expect("gauntlet binary");
    cmd.current_dir(workspace);
    cmd
}

/// `init --demo` in a fresh tempdir; later commands rely on the default
/// `gauntlet.json` in the same directory.
fn demo_workspace() -> TempDir {
    let temp = tempdir().expect("temp dir");
    gauntlet(temp.path())
        .arg("init")
        .arg("--demo")
        .assert()
        .success()
        .stdout(predicate::str::contains("initialised"));
    temp
}

fn read_results(workspace: &Path) -> Value {
    let path = workspace.join("results/demo.json");
    assert!(path.is_file(), "results document missing for runner demo");
    let content = fs::read_to_string(&path).expect("read results");
    serde_json::from_str(&content).expect("results must be valid JSON")
}

#[test]
fn init_demo_scaffolds_catalog_and_config() {
    let temp = demo_workspace();

    assert!(temp.path().join("gauntlet.json").is_file());
    assert!(temp.path().join("recipes/demo-colors.json").is_file());
    assert!(temp.path().join("cookbooks/demo-cookbook.json").is_file());
    assert!(temp.path().join("endpoints/demo-echo.json").is_file());
    assert!(temp.path().join("runners/demo.json").is_file());
    assert!(temp.path().join("datasets/demo-colors.json").is_file());
}

#[test]
fn list_and_show_surface_the_demo_records() {
    let temp = demo_workspace();

    gauntlet(temp.path())
        .args(["list", "recipes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("demo-colors"));

    gauntlet(temp.path())
        .args(["list", "runners"])
        .assert()
        .success()
        .stdout(predicate::str::contains("demo"));

    gauntlet(temp.path())
        .args(["show", "recipes", "demo-colors"])
        .assert()
        .success()
        .stdout(predicate::str::contains("grading_scale"));

    // Datasets print meta only, never the example rows.
    gauntlet(temp.path())
        .args(["show", "datasets", "demo-colors"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Demo Colors"))
        .stdout(predicate::str::contains("blue").not());
}

#[test]
fn demo_recipe_run_completes_and_grades_b() {
    let temp = demo_workspace();

    gauntlet(temp.path())
        .args(["run", "demo", "--recipes", "demo-colors"])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"));

    let doc = read_results(temp.path());
    assert_eq!(doc["metadata"]["status"], "completed");
    assert_eq!(doc["metadata"]["num_of_prompts"], 4);

    // Three of four scripted answers match, so contains_match lands at 75.
    let summary = &doc["results"]["recipes"][0]["evaluation_summary"][0];
    assert_eq!(summary["model_id"], "demo-echo");
    assert_eq!(summary["avg_grade_value"], 75.0);
    assert_eq!(summary["grade"], "B");

    gauntlet(temp.path())
        .args(["show-result", "demo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("grade B"));

    // --full must emit the whole document as parseable JSON.
    let full = gauntlet(temp.path())
        .args(["show-result", "demo", "--full"])
        .assert()
        .success();
    let stdout = String::from_utf8(full.get_output().stdout.clone()).expect("utf-8 stdout");
    let parsed: Value = serde_json::from_str(&stdout).expect("--full prints JSON");
    assert_eq!(parsed["metadata"]["id"], "demo");
}

#[test]
fn demo_cookbook_run_reports_the_overall_grade() {
    let temp = demo_workspace();

    gauntlet(temp.path())
        .args(["run", "demo", "--cookbooks", "demo-cookbook"])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"));

    let doc = read_results(temp.path());
    let cookbook = &doc["results"]["cookbooks"][0];
    assert_eq!(cookbook["id"], "demo-cookbook");
    assert_eq!(cookbook["total_num_of_prompts"], 4);
    assert_eq!(cookbook["overall_evaluation_summary"][0]["model_id"], "demo-echo");
    assert_eq!(cookbook["overall_evaluation_summary"][0]["overall_grade"], "B");

    gauntlet(temp.path())
        .args(["show-result", "demo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("overall demo-echo: B"));
}

#[test]
fn rerun_overwrites_the_results_document() {
    let temp = demo_workspace();

    gauntlet(temp.path())
        .args(["run", "demo", "--recipes", "demo-colors"])
        .assert()
        .success();
    gauntlet(temp.path())
        .args(["run", "demo", "--cookbooks", "demo-cookbook"])
        .assert()
        .success();

    // The second run replaces the document, so only cookbooks remain.
    let doc = read_results(temp.path());
    assert!(doc["results"]["cookbooks"].is_array());
    assert!(doc["results"].get("recipes").is_none());
}

#[test]
fn conflicting_selection_flags_fail_at_parse_time() {
    let temp = demo_workspace();

    gauntlet(temp.path())
        .args(["run", "demo", "--recipes", "a", "--cookbooks", "b"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn show_result_for_unknown_runner_exits_not_found() {
    let temp = demo_workspace();

    gauntlet(temp.path())
        .args(["show-result", "ghost"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("not found: results/ghost"));
}

#[test]
fn unknown_runner_fails_before_any_run_state_exists() {
    let temp = demo_workspace();

    gauntlet(temp.path())
        .args(["run", "ghost", "--recipes", "demo-colors"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("not found"));
    assert!(!temp.path().join("results/demo.json").exists());
}
