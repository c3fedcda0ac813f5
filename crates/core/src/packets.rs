use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::StateToken;

/// A contiguous slice of server ids, as returned for an id fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdListPacket {
    pub sort: String,
    pub filter: String,
    pub state: StateToken,
    pub position: usize,
    pub ids: Vec<String>,
    pub total: usize,
}

/// A server delta between two list states, expressed in server ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePacket {
    pub sort: String,
    pub filter: String,
    pub old_state: StateToken,
    pub new_state: StateToken,
    pub removed: Vec<String>,
    pub added: Vec<(usize, String)>,
    pub total: usize,
    pub up_to_id: Option<String>,
}

impl IdListPacket {
    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    /// Reject slices that reach past the total they claim.
    pub fn validate(&self) -> Result<(), CoreError> {
        let end = self.position.checked_add(self.ids.len()).ok_or_else(|| {
            CoreError::InvalidUpdate(format!("id slice at {} overflows", self.position))
        })?;
        if end > self.total {
            return Err(CoreError::InvalidUpdate(format!(
                "id slice {}..{end} exceeds total {}",
                self.position, self.total
            )));
        }
        Ok(())
    }
}

impl UpdatePacket {
    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    /// Insertions must land inside the new total.
    pub fn validate(&self) -> Result<(), CoreError> {
        if let Some((index, id)) = self.added.iter().find(|(index, _)| *index >= self.total) {
            return Err(CoreError::InvalidUpdate(format!(
                "{id} added at {index} past total {}",
                self.total
            )));
        }
        Ok(())
    }
}
