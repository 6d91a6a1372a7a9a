//! HPO helper command implementation.

use crate::commands::types::HpoCommand;
use anyhow::{Context, Result};
use colored::Colorize;
use comfy_table::{Cell, Table};
use fedrlhf_autotune::{
    SearchSpace, best_seen_curve, config_to_cmd_args, config_to_str, parse_log_file, read_trials,
    summarize_hpo_results,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::Path;
use tracing::warn;

pub fn execute(command: HpoCommand) -> Result<()> {
    match command {
        HpoCommand::Sample { space, k, seed, json } => sample(&space, k, seed, json),
        HpoCommand::Summarize { results, desc, white_list } => summarize(&results, desc, white_list.as_deref()),
        HpoCommand::Curve { logs } => {
            println!("file,budget_fraction,best_seen");
            for log in &logs {
                curve(log)?;
            }
            Ok(())
        }
    }
}

fn sample(path: &Path, k: usize, seed: u64, json_output: bool) -> Result<()> {
    let space = SearchSpace::from_yaml_file(path)
        .with_context(|| format!("Failed to load search space {}", path.display()))?;
    let mut rng = StdRng::seed_from_u64(seed);

    let mut table = Table::new();
    table.set_header(vec!["#", "Name", "Overrides"]);
    for idx in 0..k {
        let config = space.sample_configuration(&mut rng)?;
        if json_output {
            println!("{}", serde_json::to_string(&config)?);
        } else {
            table.add_row(vec![
                Cell::new(idx),
                Cell::new(config_to_str(&config)),
                Cell::new(config_to_cmd_args(&config).join(" ")),
            ]);
        }
    }
    if !json_output {
        println!("{table}");
    }
    Ok(())
}

fn summarize(path: &Path, desc: bool, white_list: Option<&[String]>) -> Result<()> {
    let trials = read_trials(path).with_context(|| format!("Failed to read trials from {}", path.display()))?;
    let (configs, perfs): (Vec<_>, Vec<_>) = trials.into_iter().map(|t| (t.config, t.performance)).unzip();
    let summary = summarize_hpo_results(&configs, &perfs, white_list, desc)?;

    let mut table = Table::new();
    table.set_header(summary.columns.clone());
    for row in &summary.rows {
        let mut cells: Vec<Cell> = row
            .values
            .iter()
            .map(|v| Cell::new(v.as_ref().map_or_else(|| "None".to_string(), ToString::to_string)))
            .collect();
        cells.push(Cell::new(row.performance));
        table.add_row(cells);
    }
    println!("{}", format!("Trials ({})", summary.rows.len()).bold().cyan());
    println!("{table}");
    Ok(())
}

fn curve(path: &Path) -> Result<()> {
    let report = parse_log_file(path).with_context(|| format!("Failed to read log {}", path.display()))?;
    if !report.malformed.is_empty() {
        warn!(path = %path.display(), skipped = report.malformed.len(), "Skipped non-trial lines");
    }
    for point in best_seen_curve(&report.history)? {
        println!("{},{},{}", path.display(), point.budget_fraction, point.best_seen);
    }
    Ok(())
}
