use std::collections::HashMap;

use tracing::trace;
use winlist_core::ids::StoreKey;

use crate::error::StorageError;
use crate::traits::{RecordStatus, Store};

/// Process-local [`Store`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    keys: HashMap<(String, String), StoreKey>,
    ids: HashMap<StoreKey, String>,
    statuses: HashMap<StoreKey, RecordStatus>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }
}

impl Store for MemoryStore {
    fn get_store_key(&mut self, type_name: &str, id: &str) -> Result<StoreKey, StorageError> {
        if let Some(key) = self.keys.get(&(type_name.to_string(), id.to_string())) {
            return Ok(*key);
        }
        let key = StoreKey::new();
        trace!(type_name, id, ?key, "allocated store key");
        self.keys.insert((type_name.to_string(), id.to_string()), key);
        self.ids.insert(key, id.to_string());
        Ok(key)
    }

    fn get_id(&self, key: StoreKey) -> Result<Option<String>, StorageError> {
        Ok(self.ids.get(&key).cloned())
    }

    fn get_status(&self, key: StoreKey) -> Result<RecordStatus, StorageError> {
        Ok(self.statuses.get(&key).copied().unwrap_or_default())
    }

    fn set_status(&mut self, key: StoreKey, status: RecordStatus) -> Result<(), StorageError> {
        if !self.ids.contains_key(&key) {
            return Err(StorageError::UnknownStoreKey(key.to_string()));
        }
        self.statuses.insert(key, status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_stable_per_type_and_id() -> Result<(), StorageError> {
        let mut store = MemoryStore::new();
        let a = store.get_store_key("Message", "m1")?;
        assert_eq!(store.get_store_key("Message", "m1")?, a);
        assert_ne!(store.get_store_key("Thread", "m1")?, a);
        assert_eq!(store.get_id(a)?, Some("m1".to_string()));
        assert_eq!(store.key_count(), 2);
        Ok(())
    }

    #[test]
    fn status_defaults_to_empty() -> Result<(), StorageError> {
        let mut store = MemoryStore::new();
        let key = store.get_store_key("Message", "m1")?;
        assert_eq!(store.get_status(key)?, RecordStatus::EMPTY);
        assert!(!store.get_status(key)?.is_fetched());

        store.set_status(key, RecordStatus::ready())?;
        assert!(store.get_status(key)?.is_fetched());

        let stranger = StoreKey::new();
        assert!(matches!(
            store.set_status(stranger, RecordStatus::ready()),
            Err(StorageError::UnknownStoreKey(_))
        ));
        Ok(())
    }
}
