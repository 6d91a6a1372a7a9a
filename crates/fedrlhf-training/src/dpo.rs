//! DPO loss and reward-based preference labeling.
//!
//! The reward of a completion is `beta * (policy_logp - reference_logp)`, where the
//! reference pass runs with the adapter disabled.

use crate::dataset::PairwiseSample;
use crate::error::{TrainingError, TrainingResult};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::prompts::PromptTemplate;
use crate::selection::SELECT_BATCH;
use fedrlhf_abstraction::{AdapterMode, LanguageModel};
use tracing::info;

/// Beta used when DPO rewards label preference pairs.
pub const LABEL_BETA: f64 = 1.0;

/// Per-pair DPO quantities for one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct DpoOutput {
    /// `-log σ(β·((π_w − π_l) − (ref_w − ref_l)))`.
    pub losses: Vec<f64>,
    pub chosen_rewards: Vec<f64>,
    pub rejected_rewards: Vec<f64>,
    /// Derivative of the mean loss with respect to each pair's `π_w − π_l`.
    pub margin_grads: Vec<f64>,
}

impl DpoOutput {
    #[must_use]
    pub fn mean_loss(&self) -> f64 {
        mean(&self.losses)
    }

    /// Share of pairs whose chosen reward is strictly higher.
    #[must_use]
    pub fn reward_accuracy(&self) -> f64 {
        let hits = self
            .chosen_rewards
            .iter()
            .zip(&self.rejected_rewards)
            .filter(|(w, l)| w > l)
            .count();
        if self.losses.is_empty() { 0.0 } else { hits as f64 / self.losses.len() as f64 }
    }

    #[must_use]
    pub fn mean_margin(&self) -> f64 {
        let margins: Vec<f64> =
            self.chosen_rewards.iter().zip(&self.rejected_rewards).map(|(w, l)| w - l).collect();
        mean(&margins)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() { 0.0 } else { values.iter().sum::<f64>() / values.len() as f64 }
}

/// `ln(1 + e^x)` without overflow.
fn softplus(x: f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// DPO loss over a batch of `(win, lose)` log-probabilities.
pub fn dpo_loss(
    policy_chosen: &[f64],
    policy_rejected: &[f64],
    reference_chosen: &[f64],
    reference_rejected: &[f64],
    beta: f64,
) -> TrainingResult<DpoOutput> {
    let n = policy_chosen.len();
    if policy_rejected.len() != n || reference_chosen.len() != n || reference_rejected.len() != n {
        return Err(TrainingError::Trainer(format!(
            "log-probability batches differ in length ({n}, {}, {}, {})",
            policy_rejected.len(),
            reference_chosen.len(),
            reference_rejected.len()
        )));
    }

    let mut out = DpoOutput {
        losses: Vec::with_capacity(n),
        chosen_rewards: Vec::with_capacity(n),
        rejected_rewards: Vec::with_capacity(n),
        margin_grads: Vec::with_capacity(n),
    };

    for i in 0..n {
        let pi_logratio = policy_chosen[i] - policy_rejected[i];
        let ref_logratio = reference_chosen[i] - reference_rejected[i];
        let z = beta * (pi_logratio - ref_logratio);

        out.losses.push(softplus(-z));
        out.chosen_rewards.push(beta * (policy_chosen[i] - reference_chosen[i]));
        out.rejected_rewards.push(beta * (policy_rejected[i] - reference_rejected[i]));
        out.margin_grads.push(-beta * sigmoid(-z) / n as f64);
    }

    Ok(out)
}

/// 0 when the win side's reward is strictly higher, else 1 (ties go to 1).
#[must_use]
pub fn reward_labels(win_rewards: &[f64], lose_rewards: &[f64]) -> Vec<u8> {
    win_rewards
        .iter()
        .zip(lose_rewards)
        .map(|(w, l)| if w > l { 0 } else { 1 })
        .collect()
}

/// Policy and reference log-probabilities of `(chosen, rejected)` completions.
#[derive(Debug, Clone, Default)]
pub struct PairLogps {
    pub policy_chosen: Vec<f64>,
    pub policy_rejected: Vec<f64>,
    pub reference_chosen: Vec<f64>,
    pub reference_rejected: Vec<f64>,
}

impl PairLogps {
    /// Runs the four forward passes for `pairs` of `(prompt, chosen, rejected)`.
    pub async fn compute<M: LanguageModel + ?Sized>(
        model: &mut M,
        pairs: &[(String, String, String)],
    ) -> TrainingResult<Self> {
        let chosen: Vec<(String, String)> = pairs.iter().map(|(p, w, _)| (p.clone(), w.clone())).collect();
        let rejected: Vec<(String, String)> = pairs.iter().map(|(p, _, l)| (p.clone(), l.clone())).collect();

        Ok(Self {
            reference_chosen: model.sequence_logps(&chosen, AdapterMode::Disabled).await?,
            policy_chosen: model.sequence_logps(&chosen, AdapterMode::Enabled).await?,
            reference_rejected: model.sequence_logps(&rejected, AdapterMode::Disabled).await?,
            policy_rejected: model.sequence_logps(&rejected, AdapterMode::Enabled).await?,
        })
    }

    pub fn loss(&self, beta: f64) -> TrainingResult<DpoOutput> {
        dpo_loss(
            &self.policy_chosen,
            &self.policy_rejected,
            &self.reference_chosen,
            &self.reference_rejected,
            beta,
        )
    }
}

/// Labels `samples` by DPO reward with `output_A` as the win side: `choice = 0` when
/// `output_A` earns the strictly higher reward.
pub async fn label_by_reward<M: LanguageModel + ?Sized>(
    samples: &mut [PairwiseSample],
    model: &mut M,
    template: &PromptTemplate,
    beta: f64,
    progress: &dyn ProgressSink,
) -> TrainingResult<()> {
    let stage = "dpo-label";
    let batches = samples.len().div_ceil(SELECT_BATCH) as u64;
    progress.on_event(ProgressEvent::Started { stage: stage.to_string(), total: Some(batches) });

    for (step, batch) in samples.chunks_mut(SELECT_BATCH).enumerate() {
        let pairs = batch
            .iter()
            .map(|s| Ok((template.format_map(&s.prompt)?, s.output_a.clone(), s.output_b.clone())))
            .collect::<TrainingResult<Vec<_>>>()?;

        let logps = PairLogps::compute(model, &pairs).await?;
        let out = logps.loss(beta)?;
        for (sample, label) in batch.iter_mut().zip(reward_labels(&out.chosen_rewards, &out.rejected_rewards)) {
            sample.choice = Some(label);
        }
        progress.on_event(ProgressEvent::Step {
            stage: stage.to_string(),
            step: step as u64 + 1,
            total: Some(batches),
        });
    }

    info!(samples = samples.len(), "Labeled pairs by DPO reward");
    progress.on_event(ProgressEvent::Finished { stage: stage.to_string() });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::PromptRecord;
    use crate::progress::NoopProgressSink;
    use fedrlhf_abstraction::TrainableModel;
    use fedrlhf_models::MockLanguageModel;

    #[test]
    fn test_dpo_loss_at_reference_is_ln2() {
        let out = dpo_loss(&[-3.0], &[-5.0], &[-3.0], &[-5.0], 1.0).unwrap();
        assert!((out.losses[0] - std::f64::consts::LN_2).abs() < 1e-12);
        assert!(out.chosen_rewards[0].abs() < 1e-12);
        assert!((out.margin_grads[0] + 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_dpo_loss_rewards_and_sign() {
        let out = dpo_loss(&[-1.0, -4.0], &[-3.0, -2.0], &[-2.0, -2.0], &[-2.0, -2.0], 0.5).unwrap();
        assert!((out.chosen_rewards[0] - 0.5).abs() < 1e-12);
        assert!((out.rejected_rewards[0] + 0.5).abs() < 1e-12);
        // preferring the chosen side lowers the loss
        assert!(out.losses[0] < out.losses[1]);
        assert!((out.reward_accuracy() - 0.5).abs() < 1e-12);
        assert!(out.margin_grads.iter().all(|g| *g < 0.0));
    }

    #[test]
    fn test_dpo_loss_is_finite_for_large_margins() {
        let out = dpo_loss(&[0.0, -1000.0], &[-1000.0, 0.0], &[0.0, 0.0], &[0.0, 0.0], 1.0).unwrap();
        assert!(out.losses.iter().all(|l| l.is_finite()));
        assert!(out.losses[0] < 1e-12);
        assert!((out.losses[1] - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_dpo_loss_rejects_ragged_batches() {
        assert!(dpo_loss(&[0.0], &[], &[0.0], &[0.0], 1.0).is_err());
    }

    #[test]
    fn test_reward_labels_tie_goes_to_one() {
        assert_eq!(reward_labels(&[1.0, 0.5, 2.0], &[0.5, 0.5, 3.0]), vec![0, 1, 1]);
    }

    #[tokio::test]
    async fn test_label_by_reward_follows_trained_adapter() {
        let mut model = MockLanguageModel::new("m");
        model.load_state_dict(&serde_json::json!({"default": 2.0})).unwrap();
        let template = PromptTemplate::new("{q}");
        let mut samples: Vec<PairwiseSample> = (0..4)
            .map(|i| {
                PairwiseSample::new(
                    PromptRecord::from([("q", "question")]),
                    format!("answer one {i}"),
                    format!("answer two {i}"),
                )
            })
            .collect();

        label_by_reward(&mut samples, &mut model, &template, LABEL_BETA, &NoopProgressSink)
            .await
            .unwrap();

        for sample in &samples {
            let pairs = vec![
                ("question".to_string(), sample.output_a.clone()),
                ("question".to_string(), sample.output_b.clone()),
            ];
            let policy = model.sequence_logps(&pairs, AdapterMode::Enabled).await.unwrap();
            let reference = model.sequence_logps(&pairs, AdapterMode::Disabled).await.unwrap();
            let expected = u8::from((policy[0] - reference[0]) <= (policy[1] - reference[1]));
            assert_eq!(sample.choice, Some(expected));
        }
    }
}
