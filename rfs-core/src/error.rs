//! Error taxonomy for the synchronization core

/// Result type for core operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors reported to the synchronization layer
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A byte stream could not be fully read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A signature set is malformed (non-contiguous, zero-length blocks, bad length)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Version metadata is missing or cannot be parsed
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    /// The storage collaborator failed to execute a batch
    #[error("Storage transaction failed: {0}")]
    StorageTransaction(String),

    #[error("Signature repository error: {0}")]
    SignatureRepository(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        SyncError::StorageTransaction(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for SyncError {
    fn from(e: bincode::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}
