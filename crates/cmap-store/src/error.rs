/// Errors from backing-store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A statement referenced a row that does not exist.
    #[error("row not found in {table}: {key}")]
    MissingRow { table: &'static str, key: String },

    /// An insert collided with an existing row.
    #[error("duplicate row in {table}: {key}")]
    DuplicateRow { table: &'static str, key: String },

    /// The backend cannot serve requests right now.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal lock was poisoned by a panicking writer.
    #[error("lock poisoned: {0}")]
    Poisoned(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
