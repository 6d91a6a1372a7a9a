//! Integration tests for the `fedrlhf rlhf` commands against the mock hub.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn setup(temp: &TempDir) {
    let dir = temp.path().join("data").join("reddit-tldr-comparison");
    fs::create_dir_all(&dir).unwrap();
    let lines: Vec<String> = (0..3)
        .map(|i| format!(r#"{{"subreddit":"cats","title":"t{i}","post":"my cat did thing {i}"}}"#))
        .collect();
    fs::write(dir.join("rlhf_prompts.jsonl"), lines.join("\n")).unwrap();

    let config = r#"
seed = 1
outdir = "exp"

[model]
type = "org/gpt@mock"

[data]
root = "data"

[federate]
total_round_num = 2
save_freq = 1
save_to = "ckpt/m.ckpt"

[trainer]
batch_size = 2
local_update_steps = 1
"#;
    fs::write(temp.path().join("fedrlhf.toml"), config).unwrap();
}

fn fedrlhf(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("fedrlhf").unwrap();
    cmd.current_dir(dir.path());
    cmd
}

#[test]
fn test_label_only_stops_then_training_resumes() {
    let temp = TempDir::new().unwrap();
    setup(&temp);

    fedrlhf(&temp)
        .args(["rlhf", "train", "--label-only"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Preference labels written"));
    assert!(temp.path().join("data/reddit-tldr-comparison/generated_choose_m.ckpt.json").exists());
    assert!(!temp.path().join("ckpt/final_m.ckpt").exists());

    fedrlhf(&temp)
        .args(["rlhf", "train", "--label-only"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Training complete (2 rounds)"));
    assert!(temp.path().join("ckpt/final_m.ckpt").exists());
    assert!(temp.path().join("ckpt/training_manifest.json").exists());
}

#[test]
fn test_train_json_summary() {
    let temp = TempDir::new().unwrap();
    setup(&temp);

    let output = fedrlhf(&temp)
        .args(["rlhf", "train", "--json", "--opt", "federate.total_round_num=1"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["rounds"].as_array().unwrap().len(), 1);
}

#[test]
fn test_dpo_label_writes_pairs() {
    let temp = TempDir::new().unwrap();
    setup(&temp);

    fedrlhf(&temp)
        .args(["rlhf", "dpo-label", "--output", "labels.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Pairs:       3"));
    let pairs: serde_json::Value = serde_json::from_str(&fs::read_to_string(temp.path().join("labels.json")).unwrap()).unwrap();
    assert_eq!(pairs.as_array().unwrap().len(), 3);
}

#[test]
fn test_invalid_override_fails() {
    let temp = TempDir::new().unwrap();
    setup(&temp);

    fedrlhf(&temp)
        .args(["--opt", "federate.save_freq=0", "rlhf", "train"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("save_freq"));
}
