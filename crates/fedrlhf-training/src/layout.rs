use crate::error::TrainingResult;
use std::path::{Path, PathBuf};

/// Filesystem layout of the on-disk caches and result files.
///
/// Cache files are keyed so that reruns skip completed stages:
/// - pairwise generations by base model, dataset and completion count,
/// - preference labels by a caller-chosen tag,
/// - best-of-N candidates by candidate count and model.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    data_root: PathBuf,
}

impl CacheLayout {
    #[must_use]
    pub fn new(data_root: PathBuf) -> Self {
        Self { data_root }
    }

    /// `rlhf_pair_data_{model}_{dataset}_{max(2, n)}.json`
    #[must_use]
    pub fn pairwise_cache(&self, model_short: &str, dataset: &str, num_completions: u32) -> PathBuf {
        self.data_root.join(format!(
            "rlhf_pair_data_{model_short}_{dataset}_{}.json",
            num_completions.max(2)
        ))
    }

    /// `generated_choose_{tag}.json`
    #[must_use]
    pub fn preference_cache(&self, tag: &str) -> PathBuf {
        self.data_root.join(format!("generated_choose_{tag}.json"))
    }

    pub fn ensure_dirs(&self) -> TrainingResult<()> {
        std::fs::create_dir_all(&self.data_root)?;
        Ok(())
    }
}

/// Best-of-N files under the raw data root (not the per-dataset root).
#[derive(Debug, Clone)]
pub struct BestOfNLayout {
    root: PathBuf,
}

impl BestOfNLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Raw test prompts: `reddit-tldr_test.jsonl`.
    #[must_use]
    pub fn test_prompts(&self) -> PathBuf {
        self.root.join("reddit-tldr_test.jsonl")
    }

    /// `reddit-tldr-comparison/reddit-tldr_test_{n}-gen_{model}.json`
    #[must_use]
    pub fn candidates_cache(&self, n: usize, model_short: &str) -> PathBuf {
        self.root
            .join("reddit-tldr-comparison")
            .join(format!("reddit-tldr_test_{n}-gen_{model_short}.json"))
    }

    /// The judged copy of [`candidates_cache`](Self::candidates_cache).
    #[must_use]
    pub fn judged_cache(&self, n: usize, model_short: &str) -> PathBuf {
        with_suffix(&self.candidates_cache(n, model_short), "_autoj_eval.json")
    }
}

/// Appends `suffix` to the full file name (`a.json` + `_x.txt` = `a.json_x.txt`).
#[must_use]
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_paths() {
        let layout = CacheLayout::new(PathBuf::from("data/reddit-tldr-comparison"));
        assert_eq!(
            layout.pairwise_cache("gpt-neo-2.7B", "reddit-tldr-rlhf", 1),
            PathBuf::from("data/reddit-tldr-comparison/rlhf_pair_data_gpt-neo-2.7B_reddit-tldr-rlhf_2.json")
        );
        assert_eq!(
            layout.preference_cache("run.ckpt"),
            PathBuf::from("data/reddit-tldr-comparison/generated_choose_run.ckpt.json")
        );
    }

    #[test]
    fn test_best_of_n_paths() {
        let layout = BestOfNLayout::new(PathBuf::from("data"));
        assert_eq!(
            layout.judged_cache(16, "gpt-neo-2.7B"),
            PathBuf::from("data/reddit-tldr-comparison/reddit-tldr_test_16-gen_gpt-neo-2.7B.json_autoj_eval.json")
        );
    }
}
