use fedrlhf_abstraction::ModelError;
use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid experiment config: {0}")]
    InvalidSpec(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    /// A cached artifact a stage depends on has not been produced yet.
    #[error("missing artifact {path}: {hint}")]
    MissingArtifact { path: String, hint: String },

    #[error("download failed: {0}")]
    Download(String),

    #[error("unsupported source: {0}")]
    UnsupportedSource(String),

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("trainer error: {0}")]
    Trainer(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrainingError {
    pub(crate) fn missing(path: &std::path::Path, hint: impl Into<String>) -> Self {
        Self::MissingArtifact { path: path.display().to_string(), hint: hint.into() }
    }
}
