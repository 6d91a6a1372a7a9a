//! Causal language model surface used by the RLHF pipeline.

use crate::ModelError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Name of the adapter every adapter-capable model carries; it never takes part in votes.
pub const DEFAULT_ADAPTER: &str = "default";

/// Serialized model parameters (the `state_dict` of a trainable model).
pub type ModelState = serde_json::Value;

/// Sampling configuration for batched generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Nucleus sampling mass.
    pub top_p: f32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Sample (true) or decode greedily (false).
    pub do_sample: bool,
    /// Maximum number of new tokens per sequence.
    pub max_new_tokens: u32,
    /// Number of sequences returned per prompt.
    pub num_return_sequences: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            top_p: 1.0,
            temperature: 0.7,
            do_sample: true,
            max_new_tokens: 60,
            num_return_sequences: 2,
        }
    }
}

/// A comparison prompt together with the placeholder label fed as its forced
/// target. The label is random and never influences the prediction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonQuery {
    pub prompt: String,
    pub target: String,
}

/// Whether the active adapter participates in a forward pass.
///
/// `Disabled` yields the reference model, `Enabled` the policy model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterMode {
    Enabled,
    Disabled,
}

/// One preference-labeled completion pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferencePair {
    pub prompt: String,
    pub chosen: String,
    pub rejected: String,
}

/// A causal language model with optional named adapters.
///
/// Every method takes `&mut self`: switching adapters mutates model state, so a handle
/// must never be shared between concurrent passes. Callers hold exclusive access for the
/// whole duration of a comparison or training pass.
#[async_trait]
pub trait LanguageModel: Send {
    /// Identifier of the underlying base model.
    fn model_id(&self) -> &str;

    /// Samples `params.num_return_sequences` sequences per prompt.
    ///
    /// Returns `prompts.len() * num_return_sequences` decoded sequences in prompt-major
    /// order. Each sequence is the decoded prompt followed by its completion.
    async fn generate(
        &mut self,
        prompts: &[String],
        params: &SamplingParams,
    ) -> Result<Vec<String>, ModelError>;

    /// Next-token logits restricted to `choices`, one row per query.
    async fn choice_logits(
        &mut self,
        queries: &[ComparisonQuery],
        choices: &[String],
    ) -> Result<Vec<Vec<f32>>, ModelError>;

    /// Summed log-probability of each `(prompt, completion)` pair's completion tokens.
    async fn sequence_logps(
        &mut self,
        pairs: &[(String, String)],
        mode: AdapterMode,
    ) -> Result<Vec<f64>, ModelError>;

    /// Scalar reward-head output for each text.
    async fn reward_scores(&mut self, texts: &[String]) -> Result<Vec<f32>, ModelError>;

    /// Names of the adapters this model carries, including [`DEFAULT_ADAPTER`].
    ///
    /// Models without adapter support return an empty list.
    fn adapter_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// The adapter currently used for `AdapterMode::Enabled` passes.
    fn active_adapter(&self) -> Option<&str> {
        None
    }

    /// Activates the named adapter.
    fn set_active_adapter(&mut self, name: &str) -> Result<(), ModelError> {
        Err(ModelError::UnsupportedSource(format!(
            "model {} has no adapters (requested '{name}')",
            self.model_id()
        )))
    }
}

/// A [`LanguageModel`] whose active adapter can be optimized and checkpointed.
#[async_trait]
pub trait TrainableModel: LanguageModel {
    /// Applies one optimizer step.
    ///
    /// `margin_grads[i]` is the derivative of the batch loss with respect to pair `i`'s
    /// policy log-ratio `logp(chosen) - logp(rejected)`. The backend back-propagates it
    /// through the active adapter's parameters.
    async fn backward_step(
        &mut self,
        batch: &[PreferencePair],
        margin_grads: &[f64],
        learning_rate: f64,
    ) -> Result<(), ModelError>;

    /// Snapshot of the trainable parameters.
    fn state_dict(&self) -> Result<ModelState, ModelError>;

    /// Restores parameters from a snapshot produced by [`TrainableModel::state_dict`].
    fn load_state_dict(&mut self, state: &ModelState) -> Result<(), ModelError>;
}
