//! RLHF round orchestration.
//!
//! `train` moves through three states: no cached preference data, preference data
//! cached, and training round `r`. Preference data is filled once per label tag:
//! pairwise generations are cached per base model, dataset and completion count, and
//! the selector's labels are cached per tag. A run killed halfway leaves no cache file
//! behind and the next run regenerates from scratch.

use crate::artifacts::{ArtifactKind, TrainingJobId, TrainingManifest, make_artifact, manifest_path};
use crate::builders::{read_json_cache, write_json_cache};
use crate::checkpoint::{FINAL_PREFIX, add_prefix_to_path, round_checkpoint_path, save_checkpoint};
use crate::config::ExperimentConfig;
use crate::dataset::{PairwiseSample, compute_dataset_id};
use crate::dpo::{LABEL_BETA, label_by_reward};
use crate::error::TrainingResult;
use crate::generation::{generate_pairwise_data, pairwise_sampling};
use crate::layout::CacheLayout;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::prompts::{PromptSet, RlhfDataset};
use crate::selection::choose_better_response;
use crate::trainer::{DpoRewardTrainer, RoundReport, RoundTrainer};
use chrono::Utc;
use fedrlhf_abstraction::{LanguageModel, TrainableModel};
use fedrlhf_models::{LanguageModelFactory, LlmBackend};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Where the preference labels came from.
#[derive(Debug, Clone, PartialEq)]
pub enum LabelOutcome {
    /// Read from the label cache.
    Cached(Vec<PairwiseSample>),
    /// Produced by the selector in this run and written to `path`.
    Labeled { samples: Vec<PairwiseSample>, path: PathBuf },
}

impl LabelOutcome {
    #[must_use]
    pub fn into_samples(self) -> Vec<PairwiseSample> {
        match self {
            Self::Cached(samples) | Self::Labeled { samples, .. } => samples,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub rounds: Vec<RoundReport>,
    pub checkpoints: Vec<PathBuf>,
    pub final_checkpoint: PathBuf,
    pub manifest: PathBuf,
}

#[derive(Debug, Clone)]
pub enum TrainOutcome {
    /// Labels were written and the caller asked to stop there.
    LabelsWritten { path: PathBuf, samples: usize },
    Trained(TrainingSummary),
}

/// RLHF driver over a trainable policy `P` and a preference selector `S`.
///
/// The policy generates candidate pairs and is trained; the selector only labels pairs.
/// Each label tag gets its own labeling pass, so the selector lives as long as the driver.
pub struct RlhfFinetuning<'a, P, S> {
    config: &'a ExperimentConfig,
    prompts: PromptSet,
    cache: CacheLayout,
    model: P,
    selector: S,
    rng: StdRng,
    progress: &'a dyn ProgressSink,
}

impl<'a> RlhfFinetuning<'a, LlmBackend, LlmBackend> {
    /// Builds policy and selector backends from `[model]` and `[selector]`.
    pub fn from_config(config: &'a ExperimentConfig, progress: &'a dyn ProgressSink) -> TrainingResult<Self> {
        let model = LanguageModelFactory::create(&config.model.spec()?, &config.model.backend_options())?;
        let selector_section = config.selector_section();
        let selector =
            LanguageModelFactory::create(&selector_section.spec()?, &selector_section.backend_options())?;
        Self::new(config, model, selector, progress)
    }
}

impl<'a, P: TrainableModel, S: LanguageModel> RlhfFinetuning<'a, P, S> {
    pub fn new(
        config: &'a ExperimentConfig,
        model: P,
        selector: S,
        progress: &'a dyn ProgressSink,
    ) -> TrainingResult<Self> {
        config.validate()?;
        let dataset: RlhfDataset = config.data.dataset_name().parse()?;
        let prompts = dataset.load(&config.data.root)?;
        let cache = CacheLayout::new(prompts.data_root.clone());
        info!(
            dataset = config.data.dataset_name(),
            prompts = prompts.prompts.len(),
            data_root = %prompts.data_root.display(),
            "Loaded RLHF prompts"
        );

        Ok(Self {
            config,
            prompts,
            cache,
            model,
            selector,
            rng: StdRng::seed_from_u64(config.seed),
            progress,
        })
    }

    /// Pairwise generations of the policy, from cache or generated and cached.
    pub async fn load_pairwise_data(&mut self) -> TrainingResult<Vec<PairwiseSample>> {
        let spec = self.config.model.spec()?;
        let gen_fp = self.cache.pairwise_cache(
            spec.short_name(),
            self.config.data.dataset_name(),
            self.config.llm.num_completions,
        );

        if let Some(data) = read_json_cache::<PairwiseSample>(&gen_fp)? {
            info!(path = %gen_fp.display(), samples = data.len(), "Successfully loaded the generated text");
            return Ok(data);
        }

        info!("The generated text file does not exist. Create a new one.");
        let params = pairwise_sampling(self.config.llm.max_new_token, self.config.llm.num_completions);
        let data = generate_pairwise_data(
            &self.prompts.prompts,
            &mut self.model,
            &self.prompts.generation,
            &params,
            self.progress,
        )
        .await?;

        self.cache.ensure_dirs()?;
        write_json_cache(&gen_fp, &data)?;
        info!(path = %gen_fp.display(), "The generation process is done");
        Ok(data)
    }

    /// Selector-labeled preference data for `saveto`, from cache or labeled and cached.
    pub async fn load_selector_preference_data(&mut self, saveto: &str) -> TrainingResult<LabelOutcome> {
        let fp = self.cache.preference_cache(saveto);
        if let Some(data) = read_json_cache::<PairwiseSample>(&fp)? {
            info!(path = %fp.display(), samples = data.len(), "Loaded selector preference data");
            return Ok(LabelOutcome::Cached(data));
        }

        let mut data = self.load_pairwise_data().await?;

        info!("Select the better response.");
        choose_better_response(&mut data, &mut self.selector, &self.prompts.selector, &mut self.rng, self.progress)
            .await?;
        if let Some(first) = data.first() {
            info!(sample = ?first, "First labeled sample");
        }

        write_json_cache(&fp, &data)?;
        info!(path = %fp.display(), "Save the selection results to file");
        Ok(LabelOutcome::Labeled { samples: data, path: fp })
    }

    /// Ensures preference labels exist, then runs `federate.total_round_num` DPO rounds.
    ///
    /// `saveto` tags the label cache and checkpoints; it defaults to the file name of
    /// `federate.save_to`. With `early_exiting`, freshly written labels end the call with
    /// [`TrainOutcome::LabelsWritten`] before any training.
    pub async fn train(&mut self, saveto: Option<&str>, early_exiting: bool) -> TrainingResult<TrainOutcome> {
        let saveto = saveto.map_or_else(|| self.config.save_to_file_name(), ToString::to_string);

        let labels = self.load_selector_preference_data(&saveto).await?;
        if early_exiting {
            if let LabelOutcome::Labeled { samples, path } = &labels {
                return Ok(TrainOutcome::LabelsWritten { path: path.clone(), samples: samples.len() });
            }
        }
        let train_data = labels.into_samples();
        let dataset_id = compute_dataset_id(&train_data)?;
        let mut trainer = DpoRewardTrainer::new(&train_data, &self.prompts.generation, &self.config.trainer)?;

        let federate = &self.config.federate;
        let save_to = PathBuf::from(&federate.save_to);
        let stage = "train";
        self.progress.on_event(ProgressEvent::Started {
            stage: stage.to_string(),
            total: Some(u64::from(federate.total_round_num)),
        });

        let mut rounds = Vec::with_capacity(federate.total_round_num as usize);
        let mut checkpoints = Vec::new();
        let mut artifacts = Vec::new();

        for r in 0..federate.total_round_num {
            info!("----------- Starting a new RLHF training round (Round #{r}) -------------");
            let report = trainer.train(&mut self.model).await?;
            info!(round = r, role = "Server", sample_size = report.sample_size, metrics = ?report.metrics, "Train results");

            if (r + 1) % federate.save_freq == 0 {
                let path = round_checkpoint_path(&federate.save_to, &saveto, r);
                save_checkpoint(&path, &self.model, r)?;
                artifacts.push(make_artifact(ArtifactKind::RoundCheckpoint, path.clone(), Some(r))?);
                checkpoints.push(path);
            }
            rounds.push(report);
            self.progress.on_event(ProgressEvent::Step {
                stage: stage.to_string(),
                step: u64::from(r) + 1,
                total: Some(u64::from(federate.total_round_num)),
            });
        }

        let last_round = federate.total_round_num.saturating_sub(1);
        let final_checkpoint = add_prefix_to_path(FINAL_PREFIX, &save_to);
        save_checkpoint(&final_checkpoint, &self.model, last_round)?;
        artifacts.push(make_artifact(ArtifactKind::FinalCheckpoint, final_checkpoint.clone(), Some(last_round))?);

        let labels_path = self.cache.preference_cache(&saveto);
        match make_artifact(ArtifactKind::PreferenceData, labels_path, None) {
            Ok(artifact) => artifacts.push(artifact),
            Err(e) => warn!(error = %e, "Preference data not recorded in manifest"),
        }

        let manifest = TrainingManifest {
            job_id: TrainingJobId::new(),
            created_at: Utc::now(),
            base_model: self.config.model.model_type.clone(),
            dataset_id,
            total_round_num: federate.total_round_num,
            metrics: rounds.last().cloned().unwrap_or_default(),
            artifacts,
        };
        let manifest_file = manifest_path(&save_to);
        manifest.write(&manifest_file)?;
        info!(path = %manifest_file.display(), job_id = %manifest.job_id, "Wrote training manifest");

        self.progress.on_event(ProgressEvent::Finished { stage: stage.to_string() });
        Ok(TrainOutcome::Trained(TrainingSummary {
            rounds,
            checkpoints,
            final_checkpoint,
            manifest: manifest_file,
        }))
    }

    /// Generates fresh pairs with the policy and labels each by DPO reward, `output_A`
    /// being the win side.
    pub async fn dpo_better_response(&mut self) -> TrainingResult<Vec<PairwiseSample>> {
        let params = pairwise_sampling(self.config.llm.max_new_token, 2);
        let mut data = generate_pairwise_data(
            &self.prompts.prompts,
            &mut self.model,
            &self.prompts.generation,
            &params,
            self.progress,
        )
        .await?;

        label_by_reward(&mut data, &mut self.model, &self.prompts.generation, LABEL_BETA, self.progress).await?;
        Ok(data)
    }
}

/// Writes labeled pairs produced by [`RlhfFinetuning::dpo_better_response`].
pub fn write_labeled_pairs(path: &Path, samples: &[PairwiseSample]) -> TrainingResult<()> {
    write_json_cache(path, samples)?;
    info!(path = %path.display(), samples = samples.len(), "Wrote DPO-labeled pairs");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::read_checkpoint;
    use crate::error::TrainingError;
    use crate::progress::NoopProgressSink;
    use fedrlhf_models::MockLanguageModel;
    use tempfile::TempDir;

    fn setup(temp: &TempDir, rounds: u32, save_freq: u32) -> ExperimentConfig {
        let dir = temp.path().join("data").join("reddit-tldr-comparison");
        std::fs::create_dir_all(&dir).unwrap();
        let lines: Vec<String> = (0..3)
            .map(|i| format!(r#"{{"subreddit":"cats","title":"t{i}","post":"my cat did thing {i}"}}"#))
            .collect();
        std::fs::write(dir.join("rlhf_prompts.jsonl"), lines.join("\n")).unwrap();

        let mut config = ExperimentConfig::default();
        config.data.root = temp.path().join("data");
        config.model.model_type = "org/gpt@mock".to_string();
        config.federate.total_round_num = rounds;
        config.federate.save_freq = save_freq;
        config.federate.save_to = temp.path().join("ckpt").join("m.ckpt").display().to_string();
        config.trainer.batch_size = 2;
        config.trainer.local_update_steps = 1;
        config
    }

    #[tokio::test]
    async fn test_train_writes_checkpoints_and_manifest() {
        let temp = TempDir::new().unwrap();
        let config = setup(&temp, 4, 2);
        let mut rlhf = RlhfFinetuning::new(
            &config,
            MockLanguageModel::new("org/gpt"),
            MockLanguageModel::new("org/gpt"),
            &NoopProgressSink,
        )
        .unwrap();

        let TrainOutcome::Trained(summary) = rlhf.train(None, false).await.unwrap() else {
            panic!("expected training to run");
        };

        let ckpt = temp.path().join("ckpt");
        assert_eq!(summary.rounds.len(), 4);
        assert_eq!(summary.checkpoints, vec![ckpt.join("2_m.ckpt"), ckpt.join("4_m.ckpt")]);
        assert_eq!(read_checkpoint(&ckpt.join("4_m.ckpt")).unwrap().cur_round, 3);
        assert_eq!(summary.final_checkpoint, ckpt.join("final_m.ckpt"));

        let manifest = TrainingManifest::read(&summary.manifest).unwrap();
        assert_eq!(manifest.base_model, "org/gpt@mock");
        assert_eq!(manifest.artifacts.len(), 4);
        assert!(manifest.artifacts.iter().all(|a| a.sha256.len() == 64));

        let data_root = temp.path().join("data").join("reddit-tldr-comparison");
        assert!(data_root.join("rlhf_pair_data_gpt_reddit-tldr-rlhf_2.json").exists());
        assert!(data_root.join("generated_choose_m.ckpt.json").exists());
    }

    #[tokio::test]
    async fn test_early_exit_only_after_fresh_labels() {
        let temp = TempDir::new().unwrap();
        let config = setup(&temp, 1, 1);

        let mut rlhf = RlhfFinetuning::new(
            &config,
            MockLanguageModel::new("org/gpt"),
            MockLanguageModel::new("org/gpt"),
            &NoopProgressSink,
        )
        .unwrap();
        let outcome = rlhf.train(Some("human"), true).await.unwrap();
        let TrainOutcome::LabelsWritten { path, samples } = outcome else {
            panic!("expected early exit");
        };
        assert_eq!(samples, 3);
        assert!(path.ends_with("generated_choose_human.json"));

        // labels are cached now, so the same call trains
        let outcome = rlhf.train(Some("human"), true).await.unwrap();
        let TrainOutcome::Trained(summary) = outcome else {
            panic!("expected training on cached labels");
        };
        assert_eq!(summary.checkpoints, vec![temp.path().join("ckpt").join("1_human_m.ckpt")]);
    }

    #[tokio::test]
    async fn test_pairwise_cache_is_reused() {
        let temp = TempDir::new().unwrap();
        let mut config = setup(&temp, 1, 1);
        config.llm.num_completions = 3;
        let mut rlhf = RlhfFinetuning::new(
            &config,
            MockLanguageModel::new("org/gpt"),
            MockLanguageModel::new("org/gpt"),
            &NoopProgressSink,
        )
        .unwrap();

        let first = rlhf.load_pairwise_data().await.unwrap();
        assert_eq!(first.len(), 9);
        // the mock varies completions across generate calls; a cache hit returns the same data
        let second = rlhf.load_pairwise_data().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_dpo_better_response_labels_every_pair() {
        let temp = TempDir::new().unwrap();
        let config = setup(&temp, 1, 1);
        let mut rlhf = RlhfFinetuning::new(
            &config,
            MockLanguageModel::new("org/gpt"),
            MockLanguageModel::new("org/gpt"),
            &NoopProgressSink,
        )
        .unwrap();

        let data = rlhf.dpo_better_response().await.unwrap();
        assert_eq!(data.len(), 3);
        assert!(data.iter().all(|s| matches!(s.choice, Some(0 | 1))));
    }

    #[tokio::test]
    async fn test_second_tag_is_labeled_on_same_instance() {
        let temp = TempDir::new().unwrap();
        let config = setup(&temp, 1, 1);
        let mut rlhf = RlhfFinetuning::new(
            &config,
            MockLanguageModel::new("org/gpt"),
            MockLanguageModel::new("org/gpt"),
            &NoopProgressSink,
        )
        .unwrap();

        rlhf.train(Some("a"), false).await.unwrap();
        let TrainOutcome::Trained(summary) = rlhf.train(Some("b"), false).await.unwrap() else {
            panic!("expected training for the second tag");
        };

        let data_root = temp.path().join("data").join("reddit-tldr-comparison");
        assert!(data_root.join("generated_choose_a.json").exists());
        assert!(data_root.join("generated_choose_b.json").exists());
        assert_eq!(summary.rounds.len(), 1);
    }

    #[test]
    fn test_zero_save_freq_is_rejected() {
        let temp = TempDir::new().unwrap();
        let config = setup(&temp, 2, 0);
        let result = RlhfFinetuning::new(
            &config,
            MockLanguageModel::new("org/gpt"),
            MockLanguageModel::new("org/gpt"),
            &NoopProgressSink,
        );
        assert!(matches!(result, Err(TrainingError::InvalidSpec(_))));
    }

    #[test]
    fn test_unknown_dataset_is_unsupported() {
        let temp = TempDir::new().unwrap();
        let mut config = setup(&temp, 1, 1);
        config.data.data_type = "imdb@llm".to_string();
        let result = RlhfFinetuning::new(
            &config,
            MockLanguageModel::new("m"),
            MockLanguageModel::new("m"),
            &NoopProgressSink,
        );
        assert!(matches!(result, Err(TrainingError::UnsupportedSource(_))));
    }
}
