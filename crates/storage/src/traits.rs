use winlist_core::ids::StoreKey;

use crate::error::StorageError;

/// Where a record's data stands in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordPhase {
    #[default]
    Empty,
    Ready,
    Destroyed,
    NonExistent,
}

impl RecordPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Ready => "ready",
            Self::Destroyed => "destroyed",
            Self::NonExistent => "non_existent",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StorageError> {
        match s {
            "empty" => Ok(Self::Empty),
            "ready" => Ok(Self::Ready),
            "destroyed" => Ok(Self::Destroyed),
            "non_existent" => Ok(Self::NonExistent),
            _ => Err(StorageError::Serialization(format!("unknown record phase: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordStatus {
    pub phase: RecordPhase,
    pub loading: bool,
    pub obsolete: bool,
}

impl RecordStatus {
    pub const EMPTY: RecordStatus = RecordStatus {
        phase: RecordPhase::Empty,
        loading: false,
        obsolete: false,
    };

    pub fn ready() -> Self {
        Self {
            phase: RecordPhase::Ready,
            ..Self::EMPTY
        }
    }

    /// The record's data is materialized and current.
    pub fn is_fetched(&self) -> bool {
        self.phase != RecordPhase::Empty && !self.obsolete
    }
}

/// The record store a query reads through: maps server ids to stable local
/// keys and reports per-record fetch status.
pub trait Store {
    /// The key for `(type_name, id)`, allocating one on first sight.
    fn get_store_key(&mut self, type_name: &str, id: &str) -> Result<StoreKey, StorageError>;

    /// The server id a key was allocated for.
    fn get_id(&self, key: StoreKey) -> Result<Option<String>, StorageError>;

    /// Unknown keys report [`RecordStatus::EMPTY`].
    fn get_status(&self, key: StoreKey) -> Result<RecordStatus, StorageError>;

    fn set_status(&mut self, key: StoreKey, status: RecordStatus) -> Result<(), StorageError>;
}
