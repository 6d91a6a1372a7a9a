//! Auto-J evaluation command implementation.

use crate::commands::types::AutojCommand;
use anyhow::{Context, Result};
use colored::Colorize;
use comfy_table::{Cell, Table};
use fedrlhf_eval::{
    AutoJudge, RatingSummary, WinRateSummary, evaluate_clients, evaluate_ratings, evaluate_win_rate, scan_directory,
};
use fedrlhf_training::ExperimentConfig;
use fedrlhf_training::best_of_n::format_rating;

pub async fn execute(command: AutojCommand, config: &ExperimentConfig) -> Result<()> {
    let judge = AutoJudge::from_config(&config.judge).context("Failed to create the Auto-J judge")?;

    match command {
        AutojCommand::Rate { file } => {
            let summary = evaluate_ratings(&judge, &file)
                .await
                .with_context(|| format!("Failed to rate {}", file.display()))?;
            print_rating(&summary);
        }
        AutojCommand::WinRate { file } => {
            let summary = evaluate_win_rate(&judge, &file)
                .await
                .with_context(|| format!("Failed to evaluate {}", file.display()))?;
            print_win_rates(&[summary]);
        }
        AutojCommand::Clients { dir, clients } => {
            let summary = evaluate_clients(&judge, &dir, &clients).await?;
            print_rating(&summary);
        }
        AutojCommand::Scan { dir } => {
            let summaries = scan_directory(&judge, &dir).await?;
            if summaries.is_empty() {
                println!("  {}", "No unevaluated transcripts found.".dimmed());
            } else {
                print_win_rates(&summaries);
            }
        }
    }
    Ok(())
}

fn print_rating(summary: &RatingSummary) {
    println!();
    println!("{}", "Auto-J ratings".bold().cyan());
    println!("  Records: {}", summary.ratings.len());
    println!("  Average: {}", format_rating(summary.average).bold());
    println!("  Output:  {}", summary.output.display().to_string().dimmed());
    println!();
}

fn print_win_rates(summaries: &[WinRateSummary]) {
    let mut table = Table::new();
    table.set_header(vec!["Output", "Win", "Lose", "Tie", "Win rate"]);
    for summary in summaries {
        table.add_row(vec![
            Cell::new(summary.output.display()),
            Cell::new(summary.win),
            Cell::new(summary.lose),
            Cell::new(summary.tie),
            Cell::new(format!("{:.2}%", summary.rate)),
        ]);
    }
    println!();
    println!("{table}");
    println!();
}
