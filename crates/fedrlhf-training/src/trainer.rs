use crate::config::TrainerSection;
use crate::dataset::PairwiseSample;
use crate::dpo::PairLogps;
use crate::error::{TrainingError, TrainingResult};
use crate::prompts::PromptTemplate;
use async_trait::async_trait;
use fedrlhf_abstraction::{PreferencePair, TrainableModel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainerStatus {
    Idle,
    Running,
    Finished,
    Failed(String),
}

/// Outcome of one training round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundReport {
    /// Number of preference pairs processed.
    pub sample_size: usize,
    pub metrics: BTreeMap<String, f64>,
}

/// Runs one local training round per call against a trainable model.
#[async_trait]
pub trait RoundTrainer: Send {
    async fn train(&mut self, model: &mut dyn TrainableModel) -> TrainingResult<RoundReport>;

    fn status(&self) -> TrainerStatus;
}

/// DPO trainer over a fixed set of labeled comparisons.
///
/// Each round takes `local_update_steps` batches of `batch_size` pairs, cycling over the
/// data, and applies one optimizer step per batch.
#[derive(Debug, Clone)]
pub struct DpoRewardTrainer {
    pairs: Vec<PreferencePair>,
    beta: f64,
    batch_size: usize,
    local_update_steps: usize,
    learning_rate: f64,
    cursor: usize,
    status: TrainerStatus,
}

impl DpoRewardTrainer {
    /// Builds the trainer from labeled samples; prompts are rendered with `template`.
    pub fn new(
        samples: &[PairwiseSample],
        template: &PromptTemplate,
        section: &TrainerSection,
    ) -> TrainingResult<Self> {
        if samples.is_empty() {
            return Err(TrainingError::Dataset("no preference data to train on".to_string()));
        }
        if section.batch_size == 0 {
            return Err(TrainingError::InvalidSpec("trainer.batch_size must be >= 1".to_string()));
        }

        let pairs = samples
            .iter()
            .enumerate()
            .map(|(idx, sample)| {
                let (chosen, rejected) = sample.ordered().ok_or_else(|| {
                    TrainingError::Dataset(format!("sample[{idx}] has no preference label"))
                })?;
                Ok(PreferencePair {
                    prompt: template.format_map(&sample.prompt)?,
                    chosen: chosen.to_string(),
                    rejected: rejected.to_string(),
                })
            })
            .collect::<TrainingResult<Vec<_>>>()?;

        Ok(Self {
            pairs,
            beta: section.beta,
            batch_size: section.batch_size,
            local_update_steps: section.local_update_steps.max(1),
            learning_rate: section.learning_rate,
            cursor: 0,
            status: TrainerStatus::Idle,
        })
    }

    fn next_batch(&mut self) -> Vec<PreferencePair> {
        let mut batch = Vec::with_capacity(self.batch_size);
        for _ in 0..self.batch_size.min(self.pairs.len()) {
            batch.push(self.pairs[self.cursor].clone());
            self.cursor = (self.cursor + 1) % self.pairs.len();
        }
        batch
    }

    async fn run_round(&mut self, model: &mut dyn TrainableModel) -> TrainingResult<RoundReport> {
        let mut total = 0usize;
        let mut loss_sum = 0.0;
        let mut acc_sum = 0.0;
        let mut margin_sum = 0.0;

        for step in 0..self.local_update_steps {
            let batch = self.next_batch();
            let triples: Vec<(String, String, String)> = batch
                .iter()
                .map(|p| (p.prompt.clone(), p.chosen.clone(), p.rejected.clone()))
                .collect();

            let out = PairLogps::compute(model, &triples).await?.loss(self.beta)?;
            model.backward_step(&batch, &out.margin_grads, self.learning_rate).await?;

            let n = batch.len() as f64;
            total += batch.len();
            loss_sum += out.mean_loss() * n;
            acc_sum += out.reward_accuracy() * n;
            margin_sum += out.mean_margin() * n;
            debug!(step, loss = out.mean_loss(), acc = out.reward_accuracy(), "DPO step");
        }

        let denom = total.max(1) as f64;
        let metrics = BTreeMap::from([
            ("train_loss".to_string(), loss_sum / denom),
            ("train_reward_acc".to_string(), acc_sum / denom),
            ("train_reward_margin".to_string(), margin_sum / denom),
            ("train_total".to_string(), total as f64),
        ]);
        Ok(RoundReport { sample_size: total, metrics })
    }
}

#[async_trait]
impl RoundTrainer for DpoRewardTrainer {
    async fn train(&mut self, model: &mut dyn TrainableModel) -> TrainingResult<RoundReport> {
        self.status = TrainerStatus::Running;
        match self.run_round(model).await {
            Ok(report) => {
                self.status = TrainerStatus::Finished;
                Ok(report)
            }
            Err(e) => {
                self.status = TrainerStatus::Failed(e.to_string());
                Err(e)
            }
        }
    }

    fn status(&self) -> TrainerStatus {
        self.status.clone()
    }
}
