//! RLHF training command implementation.

use crate::commands::types::RlhfCommand;
use crate::progress::BarProgressSink;
use anyhow::{Context, Result};
use colored::Colorize;
use comfy_table::{Cell, Table};
use fedrlhf_training::rlhf::write_labeled_pairs;
use fedrlhf_training::{ExperimentConfig, RlhfFinetuning, TrainOutcome, TrainingSummary};
use serde_json::json;
use std::path::PathBuf;

pub async fn execute(command: RlhfCommand, config: &ExperimentConfig) -> Result<()> {
    match command {
        RlhfCommand::Train { saveto, label_only, json } => train(config, saveto, label_only, json).await,
        RlhfCommand::DpoLabel { output } => dpo_label(config, output).await,
    }
}

async fn train(config: &ExperimentConfig, saveto: Option<String>, label_only: bool, json_output: bool) -> Result<()> {
    let progress = BarProgressSink::new();
    let mut rlhf =
        RlhfFinetuning::from_config(config, &progress).context("Failed to set up RLHF fine-tuning")?;

    match rlhf.train(saveto.as_deref(), label_only).await? {
        TrainOutcome::LabelsWritten { path, samples } => {
            println!();
            println!("{}", "Preference labels written".bold().green());
            println!("  File:    {}", path.display().to_string().cyan());
            println!("  Samples: {samples}");
            println!();
            std::process::exit(0);
        }
        TrainOutcome::Trained(summary) => {
            if json_output {
                println!("{}", serde_json::to_string_pretty(&summary_json(&summary))?);
            } else {
                print_summary(&summary);
            }
        }
    }
    Ok(())
}

fn summary_json(summary: &TrainingSummary) -> serde_json::Value {
    json!({
        "rounds": summary.rounds,
        "checkpoints": summary.checkpoints,
        "final_checkpoint": summary.final_checkpoint,
        "manifest": summary.manifest,
    })
}

fn print_summary(summary: &TrainingSummary) {
    println!();
    println!("{}", format!("Training complete ({} rounds)", summary.rounds.len()).bold().green());
    println!();

    let mut table = Table::new();
    table.set_header(vec!["Round", "Pairs", "Loss", "Reward acc", "Margin"]);
    for (idx, report) in summary.rounds.iter().enumerate() {
        let metric = |key: &str| report.metrics.get(key).map_or_else(|| "-".to_string(), |v| format!("{v:.4}"));
        table.add_row(vec![
            Cell::new(idx + 1),
            Cell::new(report.sample_size),
            Cell::new(metric("train_loss")),
            Cell::new(metric("train_reward_acc")),
            Cell::new(metric("train_reward_margin")),
        ]);
    }
    println!("{table}");
    println!();
    for path in &summary.checkpoints {
        println!("  Checkpoint: {}", path.display().to_string().dimmed());
    }
    println!("  Final:      {}", summary.final_checkpoint.display().to_string().cyan());
    println!("  Manifest:   {}", summary.manifest.display().to_string().cyan());
    println!();
}

async fn dpo_label(config: &ExperimentConfig, output: Option<PathBuf>) -> Result<()> {
    let progress = BarProgressSink::new();
    let mut rlhf =
        RlhfFinetuning::from_config(config, &progress).context("Failed to set up RLHF fine-tuning")?;

    let samples = rlhf.dpo_better_response().await?;
    let path = output.unwrap_or_else(|| config.outdir.join("dpo_better_response.json"));
    write_labeled_pairs(&path, &samples)?;

    let preferred_a = samples.iter().filter(|s| s.choice == Some(0)).count();
    println!();
    println!("{}", "DPO-labeled pairs written".bold().green());
    println!("  File:        {}", path.display().to_string().cyan());
    println!("  Pairs:       {}", samples.len());
    println!("  A preferred: {preferred_a}");
    println!();
    Ok(())
}
