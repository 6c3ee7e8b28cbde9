use thiserror::Error;

/// Failure of a single call to an external service (comparator or embedder).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Rate limiting, network hiccups, 5xx responses and timeouts.
    #[error("transient service error: {0}")]
    Transient(String),
    /// The service answered but the payload could not be understood.
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("service error: {0}")]
    Fatal(String),
}

impl CallError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CallError::Transient(_))
    }
}

#[derive(Error, Debug)]
pub enum CritError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("comparison of {left} vs {right} failed after {attempts} attempt(s): {source}")]
    Comparison {
        left: String,
        right: String,
        attempts: u32,
        #[source]
        source: CallError,
    },
    #[error("embedding failed: {0}")]
    Embedding(CallError),
    #[error("finding references unknown chunk {0}")]
    UnknownChunk(String),
    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, CritError>;
