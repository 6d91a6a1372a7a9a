//! Round checkpoints.
//!
//! A checkpoint is a JSON file `{ "model": <state>, "cur_round": r }` named by prefixing
//! the file name of `federate.save_to`: `{r}_` for periodic saves and `final_` for the
//! last one.

use crate::builders::ensure_parent;
use crate::error::TrainingResult;
use fedrlhf_abstraction::{ModelState, TrainableModel};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const FINAL_PREFIX: &str = "final_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub model: ModelState,
    pub cur_round: u32,
}

/// `dir/name` becomes `dir/{prefix}name`.
#[must_use]
pub fn add_prefix_to_path(prefix: &str, path: &Path) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let file = format!("{prefix}{name}");
    match path.parent() {
        Some(dir) => dir.join(file),
        None => PathBuf::from(file),
    }
}

/// Path of the checkpoint written after round index `round` (0-based).
///
/// The tag is left out of the name when `save_to` already contains it.
#[must_use]
pub fn round_checkpoint_path(save_to: &str, tag: &str, round: u32) -> PathBuf {
    let prefix = if save_to.contains(tag) {
        format!("{}_", round + 1)
    } else {
        format!("{}_{tag}_", round + 1)
    };
    add_prefix_to_path(&prefix, Path::new(save_to))
}

/// Candidate checkpoint paths, most preferred first: `final_`, then every multiple of
/// `save_freq` from the last one down to 0, then the bare `save_to`.
#[must_use]
pub fn checkpoint_search_order(save_to: &Path, total_round_num: u32, save_freq: u32) -> Vec<PathBuf> {
    let save_freq = save_freq.max(1);
    let num_ckpt = total_round_num / save_freq;

    let mut prefixes = vec![FINAL_PREFIX.to_string()];
    prefixes.extend((0..=num_ckpt).rev().map(|i| format!("{}_", i * save_freq)));
    prefixes.push(String::new());

    prefixes.iter().map(|p| add_prefix_to_path(p, save_to)).collect()
}

/// First existing path in [`checkpoint_search_order`].
#[must_use]
pub fn resolve_checkpoint(save_to: &Path, total_round_num: u32, save_freq: u32) -> Option<PathBuf> {
    checkpoint_search_order(save_to, total_round_num, save_freq).into_iter().find(|p| {
        debug!(path = %p.display(), "Checking checkpoint candidate");
        p.exists()
    })
}

pub fn save_checkpoint(path: &Path, model: &dyn TrainableModel, cur_round: u32) -> TrainingResult<()> {
    let checkpoint = Checkpoint { model: model.state_dict()?, cur_round };
    ensure_parent(path)?;
    std::fs::write(path, serde_json::to_vec_pretty(&checkpoint)?)?;
    info!(path = %path.display(), round = cur_round, "Saved checkpoint");
    Ok(())
}

pub fn read_checkpoint(path: &Path) -> TrainingResult<Checkpoint> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Loads the preferred existing checkpoint into `model`.
///
/// Returns the path and stored round, or `None` when no candidate exists.
pub fn load_latest_checkpoint(
    model: &mut dyn TrainableModel,
    save_to: &Path,
    total_round_num: u32,
    save_freq: u32,
) -> TrainingResult<Option<(PathBuf, u32)>> {
    let Some(path) = resolve_checkpoint(save_to, total_round_num, save_freq) else {
        return Ok(None);
    };
    let checkpoint = read_checkpoint(&path)?;
    model.load_state_dict(&checkpoint.model)?;
    info!(
        path = %path.display(),
        round = checkpoint.cur_round,
        "Model of Round {} loads from the checkpoint",
        checkpoint.cur_round
    );
    Ok(Some((path, checkpoint.cur_round)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedrlhf_abstraction::LanguageModel;
    use fedrlhf_models::MockLanguageModel;
    use tempfile::TempDir;

    #[test]
    fn test_add_prefix_to_path() {
        assert_eq!(add_prefix_to_path("5_", Path::new("ckpt/model.ckpt")), PathBuf::from("ckpt/5_model.ckpt"));
        assert_eq!(add_prefix_to_path("final_", Path::new("model.ckpt")), PathBuf::from("final_model.ckpt"));
    }

    #[test]
    fn test_round_checkpoint_path_tagging() {
        assert_eq!(
            round_checkpoint_path("ckpt/rlhf_gpt.ckpt", "rlhf_gpt.ckpt", 9),
            PathBuf::from("ckpt/10_rlhf_gpt.ckpt")
        );
        assert_eq!(
            round_checkpoint_path("ckpt/rlhf_gpt.ckpt", "choice_v2", 4),
            PathBuf::from("ckpt/5_choice_v2_rlhf_gpt.ckpt")
        );
    }

    #[test]
    fn test_search_order() {
        let order = checkpoint_search_order(Path::new("c/m.ckpt"), 25, 10);
        let names: Vec<String> = order.iter().map(|p| p.file_name().unwrap().to_string_lossy().into_owned()).collect();
        assert_eq!(names, vec!["final_m.ckpt", "20_m.ckpt", "10_m.ckpt", "0_m.ckpt", "m.ckpt"]);
    }

    #[test]
    fn test_resolve_prefers_final_then_highest_round() {
        let temp = TempDir::new().unwrap();
        let save_to = temp.path().join("m.ckpt");
        assert!(resolve_checkpoint(&save_to, 30, 10).is_none());

        std::fs::write(temp.path().join("10_m.ckpt"), "{}").unwrap();
        std::fs::write(temp.path().join("20_m.ckpt"), "{}").unwrap();
        std::fs::write(temp.path().join("40_m.ckpt"), "{}").unwrap();
        assert_eq!(resolve_checkpoint(&save_to, 30, 10), Some(temp.path().join("20_m.ckpt")));

        std::fs::write(temp.path().join("final_m.ckpt"), "{}").unwrap();
        assert_eq!(resolve_checkpoint(&save_to, 30, 10), Some(temp.path().join("final_m.ckpt")));
    }

    #[test]
    fn test_save_and_load_latest() {
        let temp = TempDir::new().unwrap();
        let save_to = temp.path().join("ckpt").join("m.ckpt");

        let mut trained = MockLanguageModel::new("m").with_adapters(["Client_1"]);
        trained.load_state_dict(&serde_json::json!({"Client_1": 1.5})).unwrap();
        save_checkpoint(&round_checkpoint_path(save_to.to_str().unwrap(), "m.ckpt", 1), &trained, 1).unwrap();

        let mut fresh = MockLanguageModel::new("m").with_adapters(["Client_1"]);
        let (path, round) = load_latest_checkpoint(&mut fresh, &save_to, 2, 2).unwrap().unwrap();
        assert_eq!(path, temp.path().join("ckpt").join("2_m.ckpt"));
        assert_eq!(round, 1);
        fresh.set_active_adapter("Client_1").unwrap();
        assert!((fresh.active_scale() - 1.5).abs() < f64::EPSILON);
    }
}
