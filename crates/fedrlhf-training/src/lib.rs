//! FedRLHF Training
//!
//! The RLHF preference pipeline:
//! - Prompt datasets and templates (`RlhfDataset`, `PromptTemplate`), with the TL;DR
//!   test split fetched on first use
//! - Pairwise candidate generation and preference selection
//! - DPO reward labeling and the DPO round trainer
//! - Best-of-N selection policies
//! - Round checkpoints, cache layout and training manifests
//! - The round orchestrator (`RlhfFinetuning`)

pub mod artifacts;
pub mod best_of_n;
pub mod builders;
pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod download;
pub mod dpo;
pub mod error;
pub mod generation;
pub mod layout;
pub mod progress;
pub mod prompts;
pub mod rlhf;
pub mod selection;
pub mod trainer;

pub use artifacts::{ArtifactKind, TrainingArtifact, TrainingJobId, TrainingManifest};
pub use best_of_n::{
    BestOfNOutcome, BestOfNPolicy, BestOfNReport, SelectedSample, best_of_n_dataset, print_results,
    select_best_of_n,
};
pub use builders::{load_jsonl, read_json_cache, write_json_cache};
pub use checkpoint::{Checkpoint, checkpoint_search_order, load_latest_checkpoint, resolve_checkpoint};
pub use config::ExperimentConfig;
pub use dataset::{BestOfNSample, DatasetId, JudgeVerdict, PairwiseSample, PromptRecord};
pub use download::download_url;
pub use dpo::{DpoOutput, dpo_loss};
pub use error::{TrainingError, TrainingResult};
pub use generation::generate_pairwise_data;
pub use layout::{BestOfNLayout, CacheLayout};
pub use progress::{NoopProgressSink, ProgressEvent, ProgressSink, StdoutProgressSink};
pub use prompts::{PromptTemplate, RlhfDataset};
pub use rlhf::{LabelOutcome, RlhfFinetuning, TrainOutcome, TrainingSummary};
pub use selection::{SelectorMode, column_majority, majority_vote};
pub use trainer::{DpoRewardTrainer, RoundReport, RoundTrainer, TrainerStatus};
