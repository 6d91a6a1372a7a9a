//! FedRLHF CLI - Command-line interface for the federated RLHF pipeline
//!
//! This CLI provides a `fedrlhf` command for preference labeling and DPO training,
//! best-of-N candidate selection, Auto-J judge evaluation and HPO helpers.

mod commands;
mod config;
mod progress;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, shells};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{AutojCommand, BestOfNCommand, HpoCommand, RlhfCommand, autoj, best_of_n, hpo, rlhf};

/// FedRLHF CLI - federated RLHF fine-tuning and evaluation
///
/// Generates and labels preference pairs, trains with DPO rounds, selects best-of-N
/// summaries and rates them with an Auto-J judge.
#[derive(Parser, Debug)]
#[command(
    name = "fedrlhf",
    author,
    version,
    about = "FedRLHF - federated RLHF fine-tuning and evaluation",
    long_about = "FedRLHF drives preference-pair generation, selector labeling and DPO training rounds,\nbest-of-N summary selection and Auto-J judge evaluation."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error); defaults to the config's log_level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Experiment configuration file (TOML); ./fedrlhf.toml is used when present
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Configuration override as key.path=value (repeatable)
    #[arg(long = "opt", global = true, value_name = "KEY=VALUE")]
    opts: Vec<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Preference labeling and DPO training
    ///
    /// Generates candidate pairs with the policy, labels them with the selector and
    /// trains for `federate.total_round_num` rounds.
    #[command(subcommand)]
    Rlhf(RlhfCommand),

    /// Best-of-N summary generation and selection
    #[command(subcommand, name = "best-of-n")]
    BestOfN(BestOfNCommand),

    /// Auto-J judge evaluation of result transcripts
    #[command(subcommand)]
    Autoj(AutojCommand),

    /// Hyperparameter search helpers
    #[command(subcommand)]
    Hpo(HpoCommand),
}

fn parse_level(raw: &str) -> Level {
    match raw.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Handle completion generation
    if let Ok(shell) = std::env::var("FEDRLHF_GENERATE_COMPLETIONS") {
        let mut cmd = Args::command();
        match shell.as_str() {
            "bash" => generate(shells::Bash, &mut cmd, "fedrlhf", &mut std::io::stdout()),
            "zsh" => generate(shells::Zsh, &mut cmd, "fedrlhf", &mut std::io::stdout()),
            "fish" => generate(shells::Fish, &mut cmd, "fedrlhf", &mut std::io::stdout()),
            "powershell" => generate(shells::PowerShell, &mut cmd, "fedrlhf", &mut std::io::stdout()),
            "elvish" => generate(shells::Elvish, &mut cmd, "fedrlhf", &mut std::io::stdout()),
            _ => anyhow::bail!("Unknown shell: {shell}. Supported: bash, zsh, fish, powershell, elvish"),
        }
        return Ok(());
    }

    let args = Args::parse();

    // If no command provided, show help
    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    let experiment = config::load_config(args.config.as_deref(), &args.opts)?;

    let level = parse_level(args.log_level.as_deref().unwrap_or(&experiment.log_level));
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match command {
        Command::Rlhf(cmd) => rlhf::execute(cmd, &experiment).await?,
        Command::BestOfN(cmd) => best_of_n::execute(cmd, &experiment).await?,
        Command::Autoj(cmd) => autoj::execute(cmd, &experiment).await?,
        Command::Hpo(cmd) => hpo::execute(cmd)?,
    }

    Ok(())
}
