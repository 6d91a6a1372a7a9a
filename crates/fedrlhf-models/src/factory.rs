//! Model factory for creating model instances from configuration.
//!
//! Two families are built here:
//!
//! - judge models (`Model`) from a [`ModelConfig`], used by the Auto-J harness, and
//! - causal language models (`LanguageModel` + `TrainableModel`) from a [`ModelSpec`]
//!   written as `name@hub`, used by the RLHF pipeline.
//!
//! Hub tags form a closed set; anything else fails with `ModelError::UnsupportedSource`.

use crate::{MockLanguageModel, MockModel, UniversalModel};
use async_trait::async_trait;
use fedrlhf_abstraction::{
    AdapterMode, ComparisonQuery, LanguageModel, Model, ModelError, ModelState, PreferencePair,
    SamplingParams, TrainableModel,
};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error};

/// Model type enumeration for judge models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelType {
    /// Mock judge for testing.
    Mock,
    /// Universal OpenAI-compatible model (vLLM, LocalAI, LM Studio, etc.).
    Universal,
}

impl FromStr for ModelType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "universal" | "openai-compatible" | "vllm" | "local" => Ok(Self::Universal),
            _ => Err(()),
        }
    }
}

/// Judge model configuration.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// The type of model to create.
    pub model_type: ModelType,
    /// The model ID (e.g., "GAIR/autoj-13b").
    pub model_id: String,
    /// Optional API key.
    pub api_key: Option<String>,
    /// Base URL for Universal models (required for Universal type).
    pub base_url: Option<String>,
}

impl ModelConfig {
    /// Creates a new `ModelConfig` with the given type and model ID.
    #[must_use]
    pub fn new(model_type: ModelType, model_id: String) -> Self {
        Self { model_type, model_id, api_key: None, base_url: None }
    }

    /// Sets the API key for this configuration.
    #[must_use]
    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }

    /// Sets the base URL for this configuration (required for Universal models).
    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }
}

/// Factory for creating judge model instances.
pub struct ModelFactory;

impl ModelFactory {
    /// Creates a judge model instance from the given configuration.
    ///
    /// # Errors
    /// Returns a `ModelError` if model creation fails (e.g., missing base URL).
    pub fn create(config: ModelConfig) -> Result<Arc<dyn Model + Send + Sync>, ModelError> {
        debug!(
            model_type = ?config.model_type,
            model_id = %config.model_id,
            "Creating judge model instance"
        );

        match config.model_type {
            ModelType::Mock => Ok(Arc::new(MockModel::new(config.model_id))),
            ModelType::Universal => {
                let base_url = config.base_url.ok_or_else(|| {
                    ModelError::UnsupportedSource(
                        "base_url is required for Universal model type. Use ModelConfig::with_base_url() to set it.".to_string(),
                    )
                })?;

                let model = if let Some(api_key) = config.api_key {
                    UniversalModel::with_api_key(config.model_id, base_url, api_key)
                } else {
                    UniversalModel::new(config.model_id, base_url)
                };
                Ok(Arc::new(model))
            }
        }
    }

    /// Creates a judge model from a model type string and model ID.
    ///
    /// # Errors
    /// Returns a `ModelError` if the model type is unrecognized or creation fails.
    pub fn create_from_str(
        model_type_str: &str,
        model_id: String,
        base_url: Option<String>,
    ) -> Result<Arc<dyn Model + Send + Sync>, ModelError> {
        let model_type = ModelType::from_str(model_type_str).map_err(|()| {
            error!(model_type = %model_type_str, "Unrecognized model type");
            ModelError::UnsupportedSource(format!("Unrecognized model type: {}", model_type_str))
        })?;

        let mut config = ModelConfig::new(model_type, model_id);
        config.base_url = base_url;
        Self::create(config)
    }
}

/// Where a causal language model is loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelHub {
    /// An OpenAI-compatible inference server such as vLLM.
    Vllm,
    /// The deterministic in-process mock.
    Mock,
    /// Hugging Face checkpoints loaded in-process.
    HuggingFace,
    /// ModelScope checkpoints loaded in-process.
    ModelScope,
}

impl FromStr for ModelHub {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vllm" | "openai-compatible" => Ok(Self::Vllm),
            "mock" => Ok(Self::Mock),
            "huggingface_llm" => Ok(Self::HuggingFace),
            "modelscope_llm" => Ok(Self::ModelScope),
            other => Err(ModelError::UnsupportedSource(format!("Not support LLM {other} in hub"))),
        }
    }
}

impl fmt::Display for ModelHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::Vllm => "vllm",
            Self::Mock => "mock",
            Self::HuggingFace => "huggingface_llm",
            Self::ModelScope => "modelscope_llm",
        };
        f.write_str(tag)
    }
}

/// A model reference written as `name@hub`, e.g. `EleutherAI/gpt-neo-2.7B@vllm`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub hub: ModelHub,
}

impl ModelSpec {
    /// Parses `name@hub`; the hub is the text after the last `@`.
    ///
    /// # Errors
    /// Returns `ModelError::InvalidInput` if there is no `@` or the name is empty, and
    /// `ModelError::UnsupportedSource` for an unknown hub tag.
    pub fn parse(spec: &str) -> Result<Self, ModelError> {
        let (name, hub) = spec.rsplit_once('@').ok_or_else(|| {
            ModelError::InvalidInput(format!("model type '{spec}' must be written as name@hub"))
        })?;
        if name.is_empty() {
            return Err(ModelError::InvalidInput(format!("model type '{spec}' has an empty name")));
        }
        Ok(Self { name: name.to_string(), hub: hub.parse()? })
    }

    /// The part of the name after the first `/`, or the whole name.
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.name.split_once('/').map_or(self.name.as_str(), |(_, short)| short)
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.hub)
    }
}

/// Connection and adapter settings for a causal language model backend.
#[derive(Debug, Clone, Default)]
pub struct BackendOptions {
    /// Endpoint for `ModelHub::Vllm`.
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// Adapter names carried next to the default one.
    pub adapters: Vec<String>,
}

/// A causal language model backend selected at runtime.
#[derive(Debug)]
pub enum LlmBackend {
    Mock(MockLanguageModel),
    Universal(UniversalModel),
}

macro_rules! delegate {
    ($self:ident, $model:ident => $body:expr) => {
        match $self {
            LlmBackend::Mock($model) => $body,
            LlmBackend::Universal($model) => $body,
        }
    };
}

#[async_trait]
impl LanguageModel for LlmBackend {
    fn model_id(&self) -> &str {
        delegate!(self, m => LanguageModel::model_id(m))
    }

    async fn generate(
        &mut self,
        prompts: &[String],
        params: &SamplingParams,
    ) -> Result<Vec<String>, ModelError> {
        delegate!(self, m => m.generate(prompts, params).await)
    }

    async fn choice_logits(
        &mut self,
        queries: &[ComparisonQuery],
        choices: &[String],
    ) -> Result<Vec<Vec<f32>>, ModelError> {
        delegate!(self, m => m.choice_logits(queries, choices).await)
    }

    async fn sequence_logps(
        &mut self,
        pairs: &[(String, String)],
        mode: AdapterMode,
    ) -> Result<Vec<f64>, ModelError> {
        delegate!(self, m => m.sequence_logps(pairs, mode).await)
    }

    async fn reward_scores(&mut self, texts: &[String]) -> Result<Vec<f32>, ModelError> {
        delegate!(self, m => m.reward_scores(texts).await)
    }

    fn adapter_names(&self) -> Vec<String> {
        delegate!(self, m => m.adapter_names())
    }

    fn active_adapter(&self) -> Option<&str> {
        delegate!(self, m => m.active_adapter())
    }

    fn set_active_adapter(&mut self, name: &str) -> Result<(), ModelError> {
        delegate!(self, m => m.set_active_adapter(name))
    }
}

#[async_trait]
impl TrainableModel for LlmBackend {
    async fn backward_step(
        &mut self,
        batch: &[PreferencePair],
        margin_grads: &[f64],
        learning_rate: f64,
    ) -> Result<(), ModelError> {
        delegate!(self, m => m.backward_step(batch, margin_grads, learning_rate).await)
    }

    fn state_dict(&self) -> Result<ModelState, ModelError> {
        delegate!(self, m => m.state_dict())
    }

    fn load_state_dict(&mut self, state: &ModelState) -> Result<(), ModelError> {
        delegate!(self, m => m.load_state_dict(state))
    }
}

/// Factory for causal language models.
pub struct LanguageModelFactory;

impl LanguageModelFactory {
    /// Builds the backend named by `spec`.
    ///
    /// # Errors
    /// Returns `ModelError::UnsupportedSource` for hubs that need an in-process tensor
    /// runtime, and when `ModelHub::Vllm` has no `base_url`.
    pub fn create(spec: &ModelSpec, options: &BackendOptions) -> Result<LlmBackend, ModelError> {
        debug!(
            model = %spec.name,
            hub = %spec.hub,
            adapters = options.adapters.len(),
            "Creating language model instance"
        );

        match spec.hub {
            ModelHub::Mock => Ok(LlmBackend::Mock(
                MockLanguageModel::new(spec.name.clone()).with_adapters(options.adapters.iter().cloned()),
            )),
            ModelHub::Vllm => {
                let base_url = options.base_url.clone().ok_or_else(|| {
                    ModelError::UnsupportedSource(format!(
                        "base_url is required to reach {spec}; set model.base_url"
                    ))
                })?;
                let model = match options.api_key.clone() {
                    Some(key) => UniversalModel::with_api_key(spec.name.clone(), base_url, key),
                    None => UniversalModel::new(spec.name.clone(), base_url),
                };
                Ok(LlmBackend::Universal(model.with_adapters(options.adapters.clone())))
            }
            ModelHub::HuggingFace | ModelHub::ModelScope => {
                error!(model = %spec, "Hub requires an in-process tensor runtime");
                Err(ModelError::UnsupportedSource(format!(
                    "{spec}: no in-process tensor runtime is available; serve the model with vLLM and use {}@vllm",
                    spec.name
                )))
            }
        }
    }
}
