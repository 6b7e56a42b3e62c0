use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("GOVERNANCE_DISABLED: indicator '{indicator}' requires governance flag '{flag}'")]
    GovernanceDisabled { indicator: String, flag: String },
    #[error("DUPLICATE_BINDING: {0}")]
    DuplicateBinding(String),
    #[error("VALIDATION: {0}")]
    Validation(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl From<std::io::Error> for EngineError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
