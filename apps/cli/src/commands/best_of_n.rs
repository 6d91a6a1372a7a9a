//! Best-of-N command implementation.

use crate::commands::types::BestOfNCommand;
use crate::config::generation_config;
use crate::progress::BarProgressSink;
use anyhow::{Context, Result};
use colored::Colorize;
use fedrlhf_eval::{AutoJudge, rate_best_of_n_dataset};
use fedrlhf_training::{BestOfNLayout, BestOfNPolicy, ExperimentConfig, best_of_n_dataset, select_best_of_n};
use std::path::PathBuf;

pub async fn execute(command: BestOfNCommand, config: &ExperimentConfig) -> Result<()> {
    match command {
        BestOfNCommand::Generate { gen_config, n } => generate(config, gen_config, n).await,
        BestOfNCommand::Select { gen_config, n, limit } => select(config, gen_config, n, limit).await,
        BestOfNCommand::Rate { gen_config, n } => rate(config, gen_config, n).await,
    }
}

async fn generate(config: &ExperimentConfig, gen_config: Option<PathBuf>, n: usize) -> Result<()> {
    let gen_config = generation_config(config, gen_config.as_deref())?;
    let progress = BarProgressSink::new();
    let samples = best_of_n_dataset(config, &gen_config, n, false, &progress)
        .await
        .context("Failed to build the best-of-n dataset")?;

    let short = gen_config.model.spec()?.short_name().to_string();
    let cache = BestOfNLayout::new(config.data.root.clone()).candidates_cache(n, &short);
    println!();
    println!("{}", "Best-of-N dataset ready".bold().green());
    println!("  Samples:    {}", samples.len());
    println!("  Candidates: {n}");
    println!("  Cache:      {}", cache.display().to_string().cyan());
    println!();
    Ok(())
}

fn policy_label(policy: &BestOfNPolicy) -> String {
    match policy {
        BestOfNPolicy::Tournament => "tournament".to_string(),
        BestOfNPolicy::Reward => "reward".to_string(),
        BestOfNPolicy::MultiAdapter => "multi-adapter vote".to_string(),
        BestOfNPolicy::Federated { client_num } => format!("federated vote ({client_num} clients)"),
    }
}

async fn select(config: &ExperimentConfig, gen_config: Option<PathBuf>, n: usize, limit: usize) -> Result<()> {
    let gen_config = generation_config(config, gen_config.as_deref())?;
    let progress = BarProgressSink::new();
    let report = select_best_of_n(config, &gen_config, n, limit, &progress)
        .await
        .context("Best-of-n selection failed")?;

    println!();
    println!("{}", "Best-of-N selection complete".bold().green());
    println!("  Policy:     {}", policy_label(&report.policy).cyan());
    println!("  Samples:    {}", report.outcome.selected.len());
    if let Some(checkpoint) = &report.checkpoint {
        println!("  Checkpoint: {}", checkpoint.display().to_string().dimmed());
    }
    println!("  Results:    {}", report.results_txt.display().to_string().cyan());
    println!("  JSON:       {}", report.results_json.display().to_string().cyan());
    println!();
    Ok(())
}

async fn rate(config: &ExperimentConfig, gen_config: Option<PathBuf>, n: usize) -> Result<()> {
    let gen_config = generation_config(config, gen_config.as_deref())?;
    let short = gen_config.model.spec()?.short_name().to_string();
    let cache = BestOfNLayout::new(config.data.root.clone()).candidates_cache(n, &short);

    let judge = AutoJudge::from_config(&config.judge).context("Failed to create the Auto-J judge")?;
    let output = rate_best_of_n_dataset(&judge, &cache).await?;

    println!();
    println!("{}", "Best-of-N candidates rated".bold().green());
    println!("  Judge:  {}", judge.model_id().cyan());
    println!("  Output: {}", output.display().to_string().cyan());
    println!();
    Ok(())
}
