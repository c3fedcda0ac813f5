use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Status written for a key this store never allocated.
    #[error("unknown store key: {0}")]
    UnknownStoreKey(String),
}
