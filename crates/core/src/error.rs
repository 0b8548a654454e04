use thiserror::Error;

pub type CampaignResult<T> = Result<T, CampaignError>;

#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// Validation failure for an id that does not exist.
    #[error("Validation error: {0} not found")]
    NotFound(String),

    #[error("State conflict: {0}")]
    StateConflict(String),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Setup error: {0}")]
    Setup(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Failure to build the message for one recipient. Recovered by the
/// dispatcher and recorded against that recipient only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("content payload is not an object")]
    NotAnObject,

    #[error("missing required field `{0}`")]
    MissingField(String),

    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("recipient has no unsubscribe token")]
    MissingUnsubscribeToken,
}

/// Per-recipient transport failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("address rejected: {0}")]
    Rejected(String),

    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("provider error: {0}")]
    Provider(String),
}
