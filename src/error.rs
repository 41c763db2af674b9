use thiserror::Error;

use crate::classifier::{classify, ErrorClass};

/// Failure of a single outbound quote lookup
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    /// Network, timeout, throttling or unrecognised API error
    #[error("{0}")]
    Transient(String),
    /// The message matches a known "ticker no longer exists" signature
    #[error("{0}")]
    Delisted(String),
}

impl LookupError {
    /// Build an error from a raw message, letting the classifier decide its kind
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        match classify(&message) {
            ErrorClass::PermanentDelisted => LookupError::Delisted(message),
            ErrorClass::Transient => LookupError::Transient(message),
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, LookupError::Delisted(_))
    }

    pub fn message(&self) -> &str {
        match self {
            LookupError::Transient(message) | LookupError::Delisted(message) => message,
        }
    }
}

impl From<reqwest::Error> for LookupError {
    fn from(err: reqwest::Error) -> Self {
        LookupError::from_message(err.to_string())
    }
}

/// Deep lookup failure, with the number of calls that went out before it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error}")]
pub struct DeepFailure {
    pub requests: u64,
    pub error: LookupError,
}

impl DeepFailure {
    pub fn after(requests: u64, error: LookupError) -> Self {
        Self { requests, error }
    }
}

/// Persistence failures of the ticker store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("batch commit failed: {0}")]
    Commit(#[source] sqlx::Error),
}

/// Errors that abort a whole revalidation run
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to load revalidation candidates: {0}")]
    Candidates(#[source] StoreError),
}
