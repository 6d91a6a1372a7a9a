//! FedRLHF Eval
//!
//! Auto-J judge evaluation:
//! - Prompt building for single-response rating and pairwise comparison
//! - Rating and verdict extraction from judge critiques
//! - Parsing of the plain-text result transcripts
//! - Rating, win-rate and client-vote evaluations that write report files

pub mod error;
pub mod evaluate;
pub mod extract;
pub mod judge;
pub mod prompts;
pub mod transcript;

pub use error::{EvalError, EvalResult};
pub use evaluate::{
    RatingSummary, WinRateSummary, evaluate_clients, evaluate_ratings, evaluate_win_rate, rate_best_of_n_dataset,
    scan_directory,
};
pub use extract::{PairwiseDecision, extract_pairwise_result, extract_single_rating};
pub use judge::{AutoJudge, Judgement};
pub use prompts::{Protocol, build_autoj_input};
pub use transcript::{TranscriptRecord, TranscriptReport, parse_transcript, read_transcript};
