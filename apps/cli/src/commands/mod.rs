//! Command implementations for the FedRLHF CLI.

pub mod autoj;
pub mod best_of_n;
pub mod hpo;
pub mod rlhf;
pub mod types;

pub use types::{AutojCommand, BestOfNCommand, HpoCommand, RlhfCommand};
