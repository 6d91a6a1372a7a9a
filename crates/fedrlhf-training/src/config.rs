//! Experiment configuration.
//!
//! One `ExperimentConfig` is loaded per process and passed by reference. Layering:
//! base file, optional overlay file, then `key.path=value` overrides.

use crate::download::TLDR_TEST_URL;
use crate::error::{TrainingError, TrainingResult};
use fedrlhf_models::{BackendOptions, ModelSpec};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use toml::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub seed: u64,
    pub outdir: PathBuf,
    pub log_level: String,
    pub model: ModelSection,
    /// Model used to label preference pairs; defaults to `model`.
    pub selector: Option<ModelSection>,
    pub data: DataSection,
    pub llm: LlmSection,
    pub federate: FederateSection,
    pub trainer: TrainerSection,
    pub judge: JudgeSection,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            outdir: PathBuf::from("exp"),
            log_level: "info".to_string(),
            model: ModelSection::default(),
            selector: None,
            data: DataSection::default(),
            llm: LlmSection::default(),
            federate: FederateSection::default(),
            trainer: TrainerSection::default(),
            judge: JudgeSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    /// `name@hub`, e.g. `EleutherAI/gpt-neo-2.7B@vllm`.
    #[serde(rename = "type")]
    pub model_type: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub adapters: Vec<String>,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            model_type: "gpt2@mock".to_string(),
            base_url: None,
            api_key: None,
            adapters: Vec::new(),
        }
    }
}

impl ModelSection {
    pub fn spec(&self) -> TrainingResult<ModelSpec> {
        Ok(ModelSpec::parse(&self.model_type)?)
    }

    #[must_use]
    pub fn backend_options(&self) -> BackendOptions {
        BackendOptions {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            adapters: self.adapters.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSection {
    pub root: PathBuf,
    /// `dataset@loader`, e.g. `reddit-tldr-rlhf@llm`.
    #[serde(rename = "type")]
    pub data_type: String,
    /// Source of `reddit-tldr_test.jsonl` when it is missing; empty disables the download.
    pub tldr_test_url: String,
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            data_type: "reddit-tldr-rlhf@llm".to_string(),
            tldr_test_url: TLDR_TEST_URL.to_string(),
        }
    }
}

impl DataSection {
    /// Dataset tag before the `@`.
    #[must_use]
    pub fn dataset_name(&self) -> &str {
        self.data_type.split('@').next().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub num_completions: u32,
    pub max_new_token: u32,
    pub adapter: AdapterSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self { num_completions: 2, max_new_token: 60, adapter: AdapterSection::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterSection {
    pub count: u32,
    /// Every client keeps its own adapter (`Client_{k}`).
    pub local_only: bool,
}

impl Default for AdapterSection {
    fn default() -> Self {
        Self { count: 1, local_only: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FederateSection {
    pub total_round_num: u32,
    pub save_freq: u32,
    pub save_to: String,
    pub client_num: u32,
}

impl Default for FederateSection {
    fn default() -> Self {
        Self {
            total_round_num: 10,
            save_freq: 5,
            save_to: "checkpoints/rlhf.ckpt".to_string(),
            client_num: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerSection {
    #[serde(rename = "type")]
    pub trainer_type: String,
    pub beta: f64,
    pub batch_size: usize,
    pub local_update_steps: usize,
    pub learning_rate: f64,
}

impl Default for TrainerSection {
    fn default() -> Self {
        Self {
            trainer_type: "dpo".to_string(),
            beta: 0.1,
            batch_size: 4,
            local_update_steps: 10,
            learning_rate: 1e-2,
        }
    }
}

impl TrainerSection {
    /// Whether the trained model is a reward head rather than a comparison policy.
    #[must_use]
    pub fn is_reward_trainer(&self) -> bool {
        matches!(self.trainer_type.to_lowercase().as_str(), "ppo_reward" | "llmpporewardtrainer")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeSection {
    /// `mock` or `vllm`.
    pub hub: String,
    pub model_id: String,
    pub base_url: Option<String>,
    pub max_tokens: u32,
}

impl Default for JudgeSection {
    fn default() -> Self {
        Self {
            hub: "vllm".to_string(),
            model_id: "GAIR/autoj-13b".to_string(),
            base_url: Some("http://localhost:8000/v1".to_string()),
            max_tokens: 1024,
        }
    }
}

impl ExperimentConfig {
    /// Load configuration from a single TOML file.
    pub fn load_from_file(path: &Path) -> TrainingResult<Self> {
        Self::from_value(read_toml(path)?)
    }

    /// Load `base`, merge `overlay` over it, then apply `key.path=value` overrides.
    ///
    /// A missing `base` starts from defaults.
    pub fn load_layered(
        base: Option<&Path>,
        overlay: Option<&Path>,
        overrides: &[String],
    ) -> TrainingResult<Self> {
        let mut tree = match base {
            Some(path) => read_toml(path)?,
            None => Value::Table(toml::map::Map::new()),
        };
        if let Some(path) = overlay {
            merge_values(&mut tree, read_toml(path)?);
        }
        for item in overrides {
            apply_override(&mut tree, item)?;
        }
        Self::from_value(tree)
    }

    /// Returns a copy with `path` merged over this configuration.
    pub fn with_overlay(&self, path: &Path) -> TrainingResult<Self> {
        let mut tree = Value::try_from(self)
            .map_err(|e| TrainingError::InvalidSpec(format!("failed to serialize config: {e}")))?;
        merge_values(&mut tree, read_toml(path)?);
        Self::from_value(tree)
    }

    fn from_value(tree: Value) -> TrainingResult<Self> {
        let config: Self = tree
            .try_into()
            .map_err(|e: toml::de::Error| TrainingError::InvalidSpec(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TrainingResult<()> {
        if self.federate.save_freq == 0 {
            return Err(TrainingError::InvalidSpec("federate.save_freq must be >= 1".to_string()));
        }
        if self.federate.save_to.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("federate.save_to is required".to_string()));
        }
        if self.llm.adapter.local_only && self.federate.client_num == 0 {
            return Err(TrainingError::InvalidSpec(
                "federate.client_num must be >= 1 with llm.adapter.local_only".to_string(),
            ));
        }
        if self.trainer.batch_size == 0 {
            return Err(TrainingError::InvalidSpec("trainer.batch_size must be >= 1".to_string()));
        }
        if !self.trainer.beta.is_finite() || self.trainer.beta <= 0.0 {
            return Err(TrainingError::InvalidSpec("trainer.beta must be > 0".to_string()));
        }
        if !self.trainer.learning_rate.is_finite() || self.trainer.learning_rate <= 0.0 {
            return Err(TrainingError::InvalidSpec("trainer.learning_rate must be > 0".to_string()));
        }
        if !self.model.model_type.contains('@') {
            return Err(TrainingError::InvalidSpec(format!(
                "model.type '{}' must be written as name@hub",
                self.model.model_type
            )));
        }
        Ok(())
    }

    /// The selector model section, falling back to the trained model.
    #[must_use]
    pub fn selector_section(&self) -> &ModelSection {
        self.selector.as_ref().unwrap_or(&self.model)
    }

    /// File name of `federate.save_to`, the default preference-label tag.
    #[must_use]
    pub fn save_to_file_name(&self) -> String {
        Path::new(&self.federate.save_to)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

fn read_toml(path: &Path) -> TrainingResult<Value> {
    if !path.exists() {
        return Err(TrainingError::missing(path, "configuration file not found"));
    }
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| TrainingError::InvalidSpec(format!("{}: {}", path.display(), e)))
}

/// Recursively merges `other` into `base`; tables merge key by key, other values replace.
fn merge_values(base: &mut Value, other: Value) {
    match (base, other) {
        (Value::Table(base), Value::Table(other)) => {
            for (key, value) in other {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, other) => *base = other,
    }
}

/// Applies one `a.b.c=value` override. The value is parsed as a TOML literal and kept
/// as a string when it is not one.
fn apply_override(tree: &mut Value, item: &str) -> TrainingResult<()> {
    let (key, raw) = item
        .split_once('=')
        .ok_or_else(|| TrainingError::InvalidSpec(format!("override '{item}' must be key=value")))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(TrainingError::InvalidSpec(format!("override '{item}' has an empty key")));
    }

    let raw = raw.trim();
    let value = toml::from_str::<toml::Table>(&format!("v = {raw}"))
        .ok()
        .and_then(|mut t| t.remove("v"))
        .unwrap_or_else(|| Value::String(raw.to_string()));

    let mut node = tree;
    let parts: Vec<&str> = key.split('.').collect();
    for (i, part) in parts.iter().enumerate() {
        let Value::Table(table) = node else {
            return Err(TrainingError::InvalidSpec(format!(
                "override '{key}': '{}' is not a table",
                parts[..i].join(".")
            )));
        };
        if i + 1 == parts.len() {
            table.insert((*part).to_string(), value);
            return Ok(());
        }
        node = table
            .entry((*part).to_string())
            .or_insert_with(|| Value::Table(toml::map::Map::new()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const BASE: &str = r#"
seed = 7
outdir = "exp/tldr"

[model]
type = "EleutherAI/gpt-neo-2.7B@mock"
adapters = ["Client_1", "Client_2"]

[data]
root = "data"
type = "reddit-tldr-rlhf@llm"

[federate]
total_round_num = 20
save_freq = 10
save_to = "checkpoints/gpt_neo_dpo.ckpt"

[trainer]
type = "dpo"
beta = 0.5
"#;

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("exp.toml");
        std::fs::write(&path, BASE).unwrap();

        let config = ExperimentConfig::load_from_file(&path).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.model.adapters.len(), 2);
        assert_eq!(config.data.dataset_name(), "reddit-tldr-rlhf");
        assert_eq!(config.federate.save_freq, 10);
        assert!((config.trainer.beta - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.trainer.batch_size, 4);
        assert_eq!(config.save_to_file_name(), "gpt_neo_dpo.ckpt");
        assert_eq!(config.selector_section().model_type, config.model.model_type);
    }

    #[test]
    fn test_overlay_then_overrides() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("base.toml");
        let overlay = temp.path().join("gen.toml");
        std::fs::write(&base, BASE).unwrap();
        std::fs::write(&overlay, "[model]\ntype = \"org/other@mock\"\n").unwrap();

        let config = ExperimentConfig::load_layered(
            Some(&base),
            Some(&overlay),
            &["federate.save_freq=5".to_string(), "llm.adapter.local_only=true".to_string()],
        )
        .unwrap();

        assert_eq!(config.model.model_type, "org/other@mock");
        // overlay leaves untouched keys of the same table alone
        assert_eq!(config.model.adapters, vec!["Client_1", "Client_2"]);
        assert_eq!(config.federate.save_freq, 5);
        assert!(config.llm.adapter.local_only);
    }

    #[test]
    fn test_override_plain_string_value() {
        let config =
            ExperimentConfig::load_layered(None, None, &["outdir=exp/run-3".to_string()]).unwrap();
        assert_eq!(config.outdir, PathBuf::from("exp/run-3"));
    }

    #[test]
    fn test_validate_rejects_zero_save_freq() {
        let result = ExperimentConfig::load_layered(None, None, &["federate.save_freq=0".to_string()]);
        assert!(matches!(result, Err(TrainingError::InvalidSpec(_))));
    }

    #[test]
    fn test_validate_rejects_local_only_without_clients() {
        let overrides = ["llm.adapter.local_only=true".to_string(), "federate.client_num=0".to_string()];
        let result = ExperimentConfig::load_layered(None, None, &overrides);
        assert!(matches!(result, Err(TrainingError::InvalidSpec(_))));

        // client_num only matters for per-client adapters
        let result = ExperimentConfig::load_layered(None, None, &["federate.client_num=0".to_string()]);
        assert!(result.is_ok());
    }

    #[test]
    fn test_override_requires_equals() {
        let result = ExperimentConfig::load_layered(None, None, &["seed".to_string()]);
        assert!(result.is_err());
    }

    #[test]
    fn test_reward_trainer_detection() {
        let mut trainer = TrainerSection::default();
        assert!(!trainer.is_reward_trainer());
        trainer.trainer_type = "llmpporewardtrainer".to_string();
        assert!(trainer.is_reward_trainer());
    }
}
