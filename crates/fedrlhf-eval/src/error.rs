use fedrlhf_abstraction::ModelError;
use fedrlhf_training::TrainingError;
use thiserror::Error;

pub type EvalResult<T> = std::result::Result<T, EvalError>;

#[derive(Debug, Error)]
pub enum EvalError {
    /// A judge answer carried a rating that is not a number.
    #[error("unparsable rating '{0}'")]
    Rating(String),

    #[error("missing artifact {path}: {hint}")]
    MissingArtifact { path: String, hint: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Training(#[from] TrainingError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Walk(#[from] walkdir::Error),
}

impl EvalError {
    pub(crate) fn missing(path: &std::path::Path, hint: impl Into<String>) -> Self {
        Self::MissingArtifact { path: path.display().to_string(), hint: hint.into() }
    }
}
