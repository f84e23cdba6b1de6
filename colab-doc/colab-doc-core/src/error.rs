use loro::{ContainerID, LoroError};
use thiserror::Error;

/// Structural failures raised by the document controllers.
///
/// Authorization failures are not errors: controllers log them and return
/// `Ok(false)`.
#[derive(Debug, Error)]
pub enum ColabError {
    #[error("language '{0}' does not exist on this statement")]
    LanguageNotFound(String),

    #[error("container {0} not found in document")]
    ContainerNotFound(ContainerID),

    #[error("path to container {0} could not be resolved")]
    PathUnresolved(ContainerID),

    #[error("expected {expected} at '{key}'")]
    UnexpectedValue { key: String, expected: &'static str },

    #[error("document is a '{found}', expected a '{expected}'")]
    WrongDocumentType { expected: &'static str, found: String },

    #[error("loro error: {0}")]
    Loro(#[from] LoroError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ColabError>;
