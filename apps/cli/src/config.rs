//! Experiment configuration loading for the CLI.

use anyhow::{Context, Result};
use fedrlhf_training::ExperimentConfig;
use std::path::Path;

/// Picked up from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "fedrlhf.toml";

/// Load the experiment configuration.
///
/// Precedence:
/// 1. `--opt key.path=value` overrides
/// 2. `--config` file, or `./fedrlhf.toml` when present
/// 3. Defaults
pub fn load_config(path: Option<&Path>, overrides: &[String]) -> Result<ExperimentConfig> {
    let fallback = Path::new(DEFAULT_CONFIG_FILE);
    let base = path.or_else(|| fallback.exists().then_some(fallback));
    ExperimentConfig::load_layered(base, None, overrides).with_context(|| match base {
        Some(p) => format!("Failed to load configuration from {}", p.display()),
        None => "Failed to build the default configuration".to_string(),
    })
}

/// The best-of-N generation config: `overlay` merged over `base` when given.
pub fn generation_config(base: &ExperimentConfig, overlay: Option<&Path>) -> Result<ExperimentConfig> {
    match overlay {
        Some(path) => base
            .with_overlay(path)
            .with_context(|| format!("Failed to load generation config {}", path.display())),
        None => Ok(base.clone()),
    }
}
