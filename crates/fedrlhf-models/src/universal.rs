//! Universal OpenAI-compatible model implementation.
//!
//! This module talks to any server that implements the OpenAI Chat Completions and
//! Completions APIs. The main target is **vLLM**, which serves LoRA adapters as extra
//! model names next to the base model:
//!
//! ```text
//! vllm serve EleutherAI/gpt-neo-2.7B --enable-lora \
//!     --lora-modules Client_1=./client_1 Client_2=./client_2
//! ```
//!
//! - `Model` (chat) is used by judge models such as Auto-J.
//! - `LanguageModel` uses `/completions` with `n`, `logprobs` and `echo` to sample
//!   candidates, read comparison-token logits and score completions. The active adapter
//!   selects the request's `model` field; `AdapterMode::Disabled` targets the base model.
//!
//! Reward heads and gradient steps are not exposed by inference servers and report
//! `ModelError::UnsupportedSource`.

use async_trait::async_trait;
use fedrlhf_abstraction::{
    AdapterMode, ChatMessage, ComparisonQuery, LanguageModel, Model, ModelError, ModelParameters,
    ModelResponse, ModelState, ModelUsage, PreferencePair, SamplingParams, TrainableModel,
    DEFAULT_ADAPTER,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use tracing::{debug, error};

/// Number of alternatives requested per position when reading comparison logits.
const TOP_LOGPROBS: u32 = 20;

/// Universal OpenAI-compatible model implementation.
#[derive(Debug, Clone)]
pub struct UniversalModel {
    /// The base model identifier served by the endpoint.
    model_id: String,
    /// Base URL for the API endpoint (e.g., "http://localhost:8000/v1").
    base_url: String,
    /// Optional API key (local servers usually don't require auth).
    api_key: Option<String>,
    /// Adapter names served by the endpoint, excluding the default one.
    adapters: Vec<String>,
    /// Adapter used for `AdapterMode::Enabled` passes.
    active: String,
    /// HTTP client for requests.
    client: Client,
}

impl UniversalModel {
    /// Creates a new `UniversalModel`, loading the API key from `UNIVERSAL_API_KEY` or
    /// `OPENAI_COMPATIBLE_API_KEY` when either is set.
    #[allow(clippy::disallowed_methods)] // env::var is needed for API key loading
    #[must_use]
    pub fn new(model_id: String, base_url: String) -> Self {
        let api_key = env::var("UNIVERSAL_API_KEY")
            .or_else(|_| env::var("OPENAI_COMPATIBLE_API_KEY"))
            .ok();
        Self::build(model_id, base_url, api_key)
    }

    /// Creates a new `UniversalModel` with an explicit API key.
    #[must_use]
    pub fn with_api_key(model_id: String, base_url: String, api_key: String) -> Self {
        Self::build(model_id, base_url, Some(api_key))
    }

    /// Creates a new `UniversalModel` without authentication.
    #[must_use]
    pub fn without_auth(model_id: String, base_url: String) -> Self {
        Self::build(model_id, base_url, None)
    }

    /// Declares the adapters (LoRA modules) the endpoint serves.
    #[must_use]
    pub fn with_adapters(mut self, adapters: Vec<String>) -> Self {
        self.adapters = adapters.into_iter().filter(|a| a != DEFAULT_ADAPTER).collect();
        self
    }

    fn build(model_id: String, base_url: String, api_key: Option<String>) -> Self {
        Self {
            model_id,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            adapters: Vec::new(),
            active: DEFAULT_ADAPTER.to_string(),
            client: Client::builder()
                .timeout(Duration::from_secs(600))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Served model name for a pass in the given adapter mode.
    fn target_model(&self, mode: AdapterMode) -> &str {
        match mode {
            AdapterMode::Enabled if self.active != DEFAULT_ADAPTER => &self.active,
            _ => &self.model_id,
        }
    }

    async fn post<B: Serialize + Sync, R: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<R, ModelError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let mut request = self.client.post(&url).json(body);
        if let Some(ref api_key) = self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| {
            error!(error = %e, url = %url, "Failed to send request to OpenAI-compatible API");
            ModelError::RequestError(format!("Network error: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                status = %status,
                error = %error_text,
                url = %url,
                "OpenAI-compatible API returned error status"
            );
            return Err(map_status_error(status, error_text));
        }

        response.json::<R>().await.map_err(|e| {
            error!(error = %e, url = %url, "Failed to parse OpenAI-compatible API response");
            ModelError::SerializationError(format!("Failed to parse response: {}", e))
        })
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<Vec<CompletionChoice>, ModelError> {
        let response: CompletionResponse = self.post("completions", request).await?;
        let mut choices = response.choices;
        choices.sort_by_key(|c| c.index);

        let expected = request.prompt.len() * request.n.unwrap_or(1) as usize;
        if choices.len() != expected {
            return Err(ModelError::ModelResponseError(format!(
                "expected {expected} completion choices, got {}",
                choices.len()
            )));
        }
        Ok(choices)
    }
}

/// Maps a non-success HTTP status to a `ModelError`.
fn map_status_error(status: StatusCode, error_text: String) -> ModelError {
    // Map authentication errors (401, 403) to UnsupportedSource
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return ModelError::UnsupportedSource(format!(
            "Authentication failed ({}): {}",
            status, error_text
        ));
    }

    // Map quota/rate limit errors (402, 429) to QuotaExceeded
    if status == StatusCode::PAYMENT_REQUIRED || status == StatusCode::TOO_MANY_REQUESTS {
        return ModelError::QuotaExceeded { provider: "universal".to_string(), message: Some(error_text) };
    }

    if status.is_server_error() {
        return ModelError::ModelResponseError(format!("Server error ({}): {}", status, error_text));
    }

    ModelError::ModelResponseError(format!("API error ({}): {}", status, error_text))
}

#[async_trait]
impl Model for UniversalModel {
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        let messages = vec![ChatMessage { role: "user".to_string(), content: prompt.to_string() }];
        self.generate_chat_completion(&messages, parameters).await
    }

    async fn generate_chat_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        debug!(
            model_id = %self.model_id,
            message_count = messages.len(),
            parameters = ?parameters,
            "UniversalModel generating chat completion"
        );

        let mut request_body = OpenAIRequest {
            model: self.model_id.clone(),
            messages: messages
                .iter()
                .map(|m| OpenAIMessage { role: m.role.clone(), content: m.content.clone() })
                .collect(),
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop: None,
        };

        if let Some(params) = parameters {
            request_body.temperature = params.temperature;
            request_body.top_p = params.top_p;
            request_body.max_tokens = params.max_tokens;
            request_body.stop = params.stop_sequences;
        }

        let openai_response: OpenAIResponse = self.post("chat/completions", &request_body).await?;

        let content = openai_response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| ModelError::ModelResponseError("No content in API response".to_string()))?;

        let usage = openai_response.usage.map(|u| ModelUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ModelResponse { content, model_id: Some(self.model_id.clone()), usage })
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[async_trait]
impl LanguageModel for UniversalModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(
        &mut self,
        prompts: &[String],
        params: &SamplingParams,
    ) -> Result<Vec<String>, ModelError> {
        debug!(
            model = %self.target_model(AdapterMode::Enabled),
            prompts = prompts.len(),
            n = params.num_return_sequences,
            "UniversalModel sampling completions"
        );

        let request = CompletionRequest {
            model: self.target_model(AdapterMode::Enabled),
            prompt: prompts,
            n: Some(params.num_return_sequences),
            temperature: Some(if params.do_sample { params.temperature } else { 0.0 }),
            top_p: Some(params.top_p),
            max_tokens: params.max_new_tokens,
            logprobs: None,
            echo: false,
        };
        let choices = self.complete(&request).await?;

        let n = params.num_return_sequences.max(1) as usize;
        Ok(choices
            .into_iter()
            .enumerate()
            .map(|(i, c)| format!("{}{}", prompts[i / n], c.text))
            .collect())
    }

    async fn choice_logits(
        &mut self,
        queries: &[ComparisonQuery],
        choices: &[String],
    ) -> Result<Vec<Vec<f32>>, ModelError> {
        let prompts: Vec<String> = queries.iter().map(|q| q.prompt.clone()).collect();
        let request = CompletionRequest {
            model: self.target_model(AdapterMode::Enabled),
            prompt: &prompts,
            n: Some(1),
            temperature: Some(0.0),
            top_p: Some(1.0),
            max_tokens: 1,
            logprobs: Some(TOP_LOGPROBS),
            echo: false,
        };
        let response = self.complete(&request).await?;

        Ok(response
            .iter()
            .map(|c| {
                let top = c
                    .logprobs
                    .as_ref()
                    .and_then(|lp| lp.top_logprobs.first())
                    .and_then(Option::as_ref);
                choices
                    .iter()
                    .map(|choice| {
                        top.and_then(|t| t.get(choice).or_else(|| t.get(choice.trim())))
                            .map_or(f32::NEG_INFINITY, |lp| *lp as f32)
                    })
                    .collect()
            })
            .collect())
    }

    async fn sequence_logps(
        &mut self,
        pairs: &[(String, String)],
        mode: AdapterMode,
    ) -> Result<Vec<f64>, ModelError> {
        let texts: Vec<String> = pairs.iter().map(|(p, c)| format!("{p}{c}")).collect();
        let request = CompletionRequest {
            model: self.target_model(mode),
            prompt: &texts,
            n: Some(1),
            temperature: Some(0.0),
            top_p: Some(1.0),
            max_tokens: 1,
            logprobs: Some(0),
            echo: true,
        };
        let response = self.complete(&request).await?;

        response
            .iter()
            .zip(pairs)
            .map(|(choice, (prompt, completion))| {
                let lp = choice.logprobs.as_ref().ok_or_else(|| {
                    ModelError::ModelResponseError("completion returned no logprobs".to_string())
                })?;
                let start = prompt.len();
                let end = start + completion.len();
                // Echoed tokens cover prompt + completion; the trailing sampled token lies past `end`.
                Ok(lp
                    .text_offset
                    .iter()
                    .zip(&lp.token_logprobs)
                    .filter(|(offset, _)| **offset >= start && **offset < end)
                    .filter_map(|(_, logp)| *logp)
                    .sum::<f64>())
            })
            .collect()
    }

    async fn reward_scores(&mut self, _texts: &[String]) -> Result<Vec<f32>, ModelError> {
        Err(ModelError::UnsupportedSource(format!(
            "{} is served for generation only; reward heads are not exposed by OpenAI-compatible servers",
            self.model_id
        )))
    }

    fn adapter_names(&self) -> Vec<String> {
        std::iter::once(DEFAULT_ADAPTER.to_string()).chain(self.adapters.iter().cloned()).collect()
    }

    fn active_adapter(&self) -> Option<&str> {
        Some(&self.active)
    }

    fn set_active_adapter(&mut self, name: &str) -> Result<(), ModelError> {
        if name != DEFAULT_ADAPTER && !self.adapters.iter().any(|a| a == name) {
            return Err(ModelError::InvalidInput(format!(
                "adapter '{name}' is not served by {} (known: {:?})",
                self.base_url, self.adapters
            )));
        }
        self.active = name.to_string();
        Ok(())
    }
}

#[async_trait]
impl TrainableModel for UniversalModel {
    async fn backward_step(
        &mut self,
        _batch: &[PreferencePair],
        _margin_grads: &[f64],
        _learning_rate: f64,
    ) -> Result<(), ModelError> {
        Err(ModelError::UnsupportedSource(format!(
            "{} is an inference endpoint and cannot be trained",
            self.model_id
        )))
    }

    fn state_dict(&self) -> Result<ModelState, ModelError> {
        Err(ModelError::UnsupportedSource(format!(
            "{} is an inference endpoint and has no local parameters",
            self.model_id
        )))
    }

    fn load_state_dict(&mut self, _state: &ModelState) -> Result<(), ModelError> {
        Err(ModelError::UnsupportedSource(format!(
            "{} is an inference endpoint; load adapters on the server instead",
            self.model_id
        )))
    }
}

// OpenAI-compatible API request/response structures

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Deserialize)]
#[allow(clippy::struct_field_names)] // Matches API naming
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    logprobs: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    echo: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    index: usize,
    text: String,
    #[serde(default)]
    logprobs: Option<CompletionLogprobs>,
}

#[derive(Debug, Deserialize)]
struct CompletionLogprobs {
    #[serde(default)]
    token_logprobs: Vec<Option<f64>>,
    #[serde(default)]
    top_logprobs: Vec<Option<HashMap<String, f64>>>,
    #[serde(default)]
    text_offset: Vec<usize>,
}
