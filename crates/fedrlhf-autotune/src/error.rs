use thiserror::Error;

pub type AutotuneResult<T> = std::result::Result<T, AutotuneError>;

#[derive(Debug, Error)]
pub enum AutotuneError {
    #[error("unsupported hyper type '{kind}' for '{name}'")]
    UnsupportedType { name: String, kind: String },

    #[error("unknown condition type '{0}'")]
    UnknownCondition(String),

    #[error("unknown hyperparameter '{0}'")]
    UnknownHyperparameter(String),

    #[error("conditions form a cycle through '{0}'")]
    Cycle(String),

    #[error("invalid search space: {0}")]
    InvalidSpace(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
