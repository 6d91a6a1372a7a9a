//! Deterministic in-process language model.
//!
//! Every quantity is derived from SHA-256 digests of the inputs, so runs are reproducible
//! across processes. Each adapter carries one trainable scalar `scale`; the policy
//! log-probability of a completion is the reference log-probability plus
//! `scale * feature(completion)`, which makes the DPO gradient exact.

use async_trait::async_trait;
use fedrlhf_abstraction::{
    AdapterMode, ComparisonQuery, LanguageModel, ModelError, ModelState, PreferencePair,
    SamplingParams, TrainableModel, DEFAULT_ADAPTER,
};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;

const VOCAB: &[&str] = &[
    "the", "post", "author", "asks", "about", "their", "friend", "job", "advice", "moving",
    "relationship", "money", "help", "wants", "to", "know", "if", "should", "quit", "stay",
    "school", "family", "problem", "new", "city", "after", "years", "together", "rent", "cat",
];

#[derive(Debug, Clone)]
pub struct MockLanguageModel {
    id: String,
    adapters: BTreeMap<String, f64>,
    active: String,
    generate_calls: u64,
}

impl MockLanguageModel {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let mut adapters = BTreeMap::new();
        adapters.insert(DEFAULT_ADAPTER.to_string(), 0.0);
        Self { id: id.into(), adapters, active: DEFAULT_ADAPTER.to_string(), generate_calls: 0 }
    }

    /// Adds named adapters next to the default one.
    #[must_use]
    pub fn with_adapters<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.adapters.entry(name.into()).or_insert(0.0);
        }
        self
    }

    /// Current scalar of the active adapter.
    #[must_use]
    pub fn active_scale(&self) -> f64 {
        self.adapters.get(&self.active).copied().unwrap_or(0.0)
    }

    fn digest(parts: &[&str]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        hasher.finalize().into()
    }

    /// Maps text to a stable value in `[-1, 1]`.
    fn feature(text: &str) -> f64 {
        let bytes = Self::digest(&[text]);
        let mut head = [0u8; 8];
        head.copy_from_slice(&bytes[..8]);
        let value = u64::from_le_bytes(head) as f64 / u64::MAX as f64;
        value.mul_add(2.0, -1.0)
    }

    fn reference_logp(completion: &str) -> f64 {
        let words = completion.split_whitespace().count() as f64;
        -0.5f64.mul_add(words, 1.0 + Self::feature(completion))
    }

    fn sample_completion(&self, prompt: &str, k: u32, max_new_tokens: u32) -> String {
        let seed = Self::digest(&[&self.id, prompt, &k.to_string(), &self.generate_calls.to_string()]);
        let budget = (max_new_tokens as usize).clamp(1, 24);
        let len = 4 + usize::from(seed[0]) % 9;
        seed[1..]
            .iter()
            .take(len.min(budget))
            .map(|b| VOCAB[usize::from(*b) % VOCAB.len()])
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    fn model_id(&self) -> &str {
        &self.id
    }

    async fn generate(
        &mut self,
        prompts: &[String],
        params: &SamplingParams,
    ) -> Result<Vec<String>, ModelError> {
        debug!(
            model_id = %self.id,
            prompts = prompts.len(),
            num_return_sequences = params.num_return_sequences,
            "MockLanguageModel generating"
        );
        self.generate_calls += 1;

        let mut out = Vec::with_capacity(prompts.len() * params.num_return_sequences as usize);
        for prompt in prompts {
            for k in 0..params.num_return_sequences {
                let completion = self.sample_completion(prompt, k, params.max_new_tokens);
                out.push(format!("{prompt} {completion}</s>"));
            }
        }
        Ok(out)
    }

    async fn choice_logits(
        &mut self,
        queries: &[ComparisonQuery],
        choices: &[String],
    ) -> Result<Vec<Vec<f32>>, ModelError> {
        Ok(queries
            .iter()
            .map(|q| {
                choices
                    .iter()
                    .map(|c| Self::feature(&format!("{}\u{0}{}\u{0}{c}", q.prompt, self.active)) as f32)
                    .collect()
            })
            .collect())
    }

    async fn sequence_logps(
        &mut self,
        pairs: &[(String, String)],
        mode: AdapterMode,
    ) -> Result<Vec<f64>, ModelError> {
        let scale = match mode {
            AdapterMode::Enabled => self.active_scale(),
            AdapterMode::Disabled => 0.0,
        };
        Ok(pairs
            .iter()
            .map(|(_, completion)| scale.mul_add(Self::feature(completion), Self::reference_logp(completion)))
            .collect())
    }

    async fn reward_scores(&mut self, texts: &[String]) -> Result<Vec<f32>, ModelError> {
        let scale = self.active_scale();
        Ok(texts.iter().map(|t| ((1.0 + scale) * Self::feature(t)) as f32).collect())
    }

    fn adapter_names(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    fn active_adapter(&self) -> Option<&str> {
        Some(&self.active)
    }

    fn set_active_adapter(&mut self, name: &str) -> Result<(), ModelError> {
        if !self.adapters.contains_key(name) {
            return Err(ModelError::InvalidInput(format!("unknown adapter '{name}'")));
        }
        self.active = name.to_string();
        Ok(())
    }
}

#[async_trait]
impl TrainableModel for MockLanguageModel {
    async fn backward_step(
        &mut self,
        batch: &[PreferencePair],
        margin_grads: &[f64],
        learning_rate: f64,
    ) -> Result<(), ModelError> {
        if batch.len() != margin_grads.len() {
            return Err(ModelError::InvalidInput(format!(
                "batch has {} pairs but {} gradients",
                batch.len(),
                margin_grads.len()
            )));
        }

        let grad: f64 = batch
            .iter()
            .zip(margin_grads)
            .map(|(pair, g)| g * (Self::feature(&pair.chosen) - Self::feature(&pair.rejected)))
            .sum();

        let scale = self.adapters.entry(self.active.clone()).or_insert(0.0);
        *scale -= learning_rate * grad;
        Ok(())
    }

    fn state_dict(&self) -> Result<ModelState, ModelError> {
        serde_json::to_value(&self.adapters).map_err(|e| ModelError::SerializationError(e.to_string()))
    }

    fn load_state_dict(&mut self, state: &ModelState) -> Result<(), ModelError> {
        let adapters: BTreeMap<String, f64> = serde_json::from_value(state.clone())
            .map_err(|e| ModelError::SerializationError(e.to_string()))?;
        self.adapters.extend(adapters);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(n: u32) -> SamplingParams {
        SamplingParams { num_return_sequences: n, ..SamplingParams::default() }
    }

    #[tokio::test]
    async fn test_generate_contains_prompt_verbatim() {
        let mut model = MockLanguageModel::new("mock/tiny");
        let prompts = vec!["TL;DR one:".to_string(), "TL;DR two:".to_string()];
        let out = model.generate(&prompts, &params(3)).await.unwrap();

        assert_eq!(out.len(), 6);
        assert!(out[..3].iter().all(|s| s.starts_with("TL;DR one:")));
        assert!(out[3..].iter().all(|s| s.starts_with("TL;DR two:")));
    }

    #[tokio::test]
    async fn test_disabled_adapter_ignores_scale() {
        let mut model = MockLanguageModel::new("mock/tiny").with_adapters(["Client_1"]);
        model.set_active_adapter("Client_1").unwrap();
        model.load_state_dict(&serde_json::json!({"Client_1": 3.0})).unwrap();

        let pairs = vec![("p".to_string(), "some completion".to_string())];
        let policy = model.sequence_logps(&pairs, AdapterMode::Enabled).await.unwrap();
        let reference = model.sequence_logps(&pairs, AdapterMode::Disabled).await.unwrap();
        let expected = 3.0 * MockLanguageModel::feature("some completion");
        assert!((policy[0] - reference[0] - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_backward_step_increases_chosen_margin() {
        let mut model = MockLanguageModel::new("mock/tiny");
        let (chosen, rejected) = ("alpha beta".to_string(), "gamma delta".to_string());
        let (chosen, rejected) = if MockLanguageModel::feature(&chosen) > MockLanguageModel::feature(&rejected) {
            (chosen, rejected)
        } else {
            (rejected, chosen)
        };
        let batch = vec![PreferencePair { prompt: "p".to_string(), chosen: chosen.clone(), rejected: rejected.clone() }];

        let margin = |m: &MockLanguageModel| {
            let f = |s: &str| m.active_scale() * MockLanguageModel::feature(s);
            f(&chosen) - f(&rejected)
        };
        let before = margin(&model);
        model.backward_step(&batch, &[-0.5], 0.1).await.unwrap();
        assert!(margin(&model) > before);
    }

    #[test]
    fn test_set_unknown_adapter_fails() {
        let mut model = MockLanguageModel::new("mock/tiny");
        assert!(model.set_active_adapter("Client_9").is_err());
        assert_eq!(model.active_adapter(), Some(DEFAULT_ADAPTER));
    }
}
