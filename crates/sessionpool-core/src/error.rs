//! Error types for sessionpool

use thiserror::Error;

/// Error type shared by the pool, its collaborators and the cursor layer
#[derive(Error, Debug)]
pub enum PoolError {
    /// Invalid pool parameters, missing credentials, or conflicting options
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No session could be handed out under the pool's get mode
    #[error("Pool exhausted: {0}")]
    Exhausted(String),

    /// Logon or proxy authorization rejected by the session collaborator
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Malformed tag or failed session fix-up
    #[error("Value error: {0}")]
    Value(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    /// The pool has been closed
    #[error("Pool closed: {0}")]
    Closed(String),

    /// An operation was attempted on an object in the wrong state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl PoolError {
    /// Whether this error means the pool was full rather than misused.
    ///
    /// Capacity errors are the only ones a caller can expect to clear up
    /// by retrying later.
    pub fn is_capacity(&self) -> bool {
        matches!(self, PoolError::Exhausted(_))
    }

    /// Whether this error came from the configuration checks
    pub fn is_configuration(&self) -> bool {
        matches!(self, PoolError::Configuration(_) | PoolError::Toml(_))
    }
}

/// Result type alias for sessionpool operations
pub type Result<T> = std::result::Result<T, PoolError>;
