use thiserror::Error;
use winlist_core::CoreError;
use winlist_storage::StorageError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("invalid query config: {0}")]
    InvalidConfig(String),
}
