//! Model implementations for FedRLHF.
//!
//! This crate provides concrete implementations of the `Model` and `LanguageModel` traits.
//!
//! # Supported Backends
//!
//! - **Universal**: any OpenAI-compatible inference server (vLLM with LoRA modules served
//!   as named models). Used for generation, comparison logits, log-probabilities and as
//!   the Auto-J judge.
//! - **Mock**: deterministic in-process backends for testing and dry runs.

pub mod factory;
pub mod mock;
pub mod universal;

use async_trait::async_trait;
use fedrlhf_abstraction::{ChatMessage, Model, ModelError, ModelParameters, ModelResponse, ModelUsage};
use tracing::debug;

pub use factory::{
    BackendOptions, LanguageModelFactory, LlmBackend, ModelConfig, ModelFactory, ModelHub,
    ModelSpec, ModelType,
};
pub use mock::MockLanguageModel;
pub use universal::UniversalModel;

/// A mock judge implementing `Model` for testing and demonstration.
///
/// Answers single-response prompts with an Auto-J style rating and pairwise prompts with
/// a final decision, both derived from the prompt length so runs are reproducible.
#[derive(Debug, Default)]
pub struct MockModel {
    id: String,
}

impl MockModel {
    /// Creates a new `MockModel` with the given ID.
    #[must_use]
    pub const fn new(id: String) -> Self {
        Self { id }
    }

    fn verdict(prompt: &str) -> String {
        let words = count_tokens(prompt);
        if prompt.contains("[Response 2]") {
            let decision = match words % 3 {
                0 => "Response 1",
                1 => "Response 2",
                _ => "Tie",
            };
            format!("Both responses address the query.\n\nSo, the final decision is {decision}")
        } else {
            let rating = 1 + words % 10;
            format!("The response covers the main points.\n\nRating: [[{rating}]]")
        }
    }
}

#[async_trait]
impl Model for MockModel {
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        debug!(
            model_id = %self.id,
            prompt_len = prompt.len(),
            parameters = ?parameters,
            "MockModel generating text"
        );

        let response_content = Self::verdict(prompt);
        let prompt_tokens = count_tokens(prompt);
        let completion_tokens = count_tokens(&response_content);

        Ok(ModelResponse {
            content: response_content,
            model_id: Some(self.id.clone()),
            usage: Some(ModelUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
        })
    }

    async fn generate_chat_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        let prompt = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.generate_text(&prompt, parameters).await
    }

    fn model_id(&self) -> &str {
        &self.id
    }
}

/// Count tokens in a string (simplified: word count).
fn count_tokens(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_judge_single_rating_format() {
        let judge = MockModel::new("mock-judge".to_string());
        let response = judge.generate_text("[Response]: hello world", None).await.unwrap();
        assert!(response.content.contains("Rating: [["));
        assert_eq!(response.model_id.as_deref(), Some("mock-judge"));
    }

    #[tokio::test]
    async fn test_mock_judge_pairwise_decision_format() {
        let judge = MockModel::new("mock-judge".to_string());
        let response = judge
            .generate_text("[Response 1]: a\n[Response 2]: b", None)
            .await
            .unwrap();
        assert!(response.content.contains("final decision is "));
    }
}
