use thiserror::Error;

/// Main error type for the graph retriever
#[derive(Error, Debug)]
pub enum RetrieverError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors (malformed edge rules, out-of-range options)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Embedding API errors
    #[error("Embedding API error: {0}")]
    Embedding(String),

    /// Transient store failure; safe to retry
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A store call kept failing after every retry
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: usize,
        #[source]
        source: Box<RetrieverError>,
    },

    /// Node not found
    #[error("Node not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl RetrieverError {
    /// Whether retrying the failed call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RetrieverError::Unavailable(_) => true,
            RetrieverError::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Convenient Result type using RetrieverError
pub type Result<T> = std::result::Result<T, RetrieverError>;
