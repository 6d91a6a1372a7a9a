//! FedRLHF Autotune
//!
//! Hyperparameter-optimization helpers:
//! - YAML search spaces with conditional hyperparameters (`SearchSpace`)
//! - Configuration rendering for command-line overrides and run names
//! - Sorted trial summaries
//! - HPO log parsing and best-seen curves

pub mod config;
pub mod error;
pub mod logs;
pub mod space;
pub mod summary;

pub use config::{Configuration, ParamValue, config_to_cmd_args, config_to_str, parse_python_dict};
pub use error::{AutotuneError, AutotuneResult};
pub use logs::{CurvePoint, LogParseReport, MalformedLine, best_seen_curve, parse_log, parse_log_file};
pub use space::{Condition, Hyperparameter, SearchSpace};
pub use summary::{HpoSummary, HpoTrial, SummaryRow, read_trials, summarize_hpo_results};
