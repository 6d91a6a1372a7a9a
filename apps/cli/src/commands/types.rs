//! Clap definitions for the command groups.

use clap::Subcommand;
use fedrlhf_training::best_of_n::{DEFAULT_LIMIT, DEFAULT_N};
use std::path::PathBuf;

#[derive(Subcommand, Debug, Clone)]
pub enum RlhfCommand {
    /// Label preference pairs and train for the configured rounds
    Train {
        /// Tag naming the preference-label cache and checkpoints (defaults to the save_to file name)
        #[arg(long)]
        saveto: Option<String>,

        /// Stop right after freshly written preference labels
        #[arg(long)]
        label_only: bool,

        /// Output the training summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate pairs with the policy and label them by DPO reward
    DpoLabel {
        /// Output file (defaults to <outdir>/dpo_better_response.json)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum BestOfNCommand {
    /// Generate (or load) the best-of-N candidate dataset
    Generate {
        /// Generation config overlay (TOML) naming the generating model
        #[arg(long)]
        gen_config: Option<PathBuf>,

        /// Candidates per prompt
        #[arg(short, default_value_t = DEFAULT_N)]
        n: usize,
    },

    /// Select one candidate per prompt with the configured policy
    Select {
        /// Generation config overlay (TOML) naming the generating model
        #[arg(long)]
        gen_config: Option<PathBuf>,

        /// Candidates per prompt
        #[arg(short, default_value_t = DEFAULT_N)]
        n: usize,

        /// Maximum number of prompts to select for
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
    },

    /// Rate every candidate with the Auto-J judge
    Rate {
        /// Generation config overlay (TOML) naming the generating model
        #[arg(long)]
        gen_config: Option<PathBuf>,

        /// Candidates per prompt
        #[arg(short, default_value_t = DEFAULT_N)]
        n: usize,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum AutojCommand {
    /// Rate the selected summary of every record in a results file
    Rate {
        /// Results transcript (e.g. test_results.txt)
        file: PathBuf,
    },

    /// Compare generated summaries against the human ones
    WinRate {
        /// Summarization transcript
        file: PathBuf,
    },

    /// Majority-vote the clients' selections and rate the winners
    Clients {
        /// Directory holding test_results_client_{k}.txt files
        dir: PathBuf,

        /// Client ids
        #[arg(long, num_args = 1.., required = true)]
        clients: Vec<u32>,
    },

    /// Run the win-rate evaluation for every unevaluated *_summarization.txt
    Scan {
        /// Directory to search recursively
        dir: PathBuf,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum HpoCommand {
    /// Sample configurations from a YAML search space
    Sample {
        /// Search space file
        space: PathBuf,

        /// Number of configurations
        #[arg(short, default_value_t = 1)]
        k: usize,

        /// Random seed
        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Output configurations as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Tabulate trial results sorted by performance
    Summarize {
        /// JSON array of {"config": {...}, "performance": x}
        results: PathBuf,

        /// Sort descending
        #[arg(long)]
        desc: bool,

        /// Columns to show, comma separated
        #[arg(long, value_delimiter = ',')]
        white_list: Option<Vec<String>>,
    },

    /// Print best-seen curves of HPO logs as CSV
    Curve {
        /// Log files
        #[arg(required = true)]
        logs: Vec<PathBuf>,
    },
}
