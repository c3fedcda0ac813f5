use rusqlite::{Connection, OptionalExtension};
use tracing::trace;

use winlist_core::ids::StoreKey;

use crate::error::StorageError;
use crate::traits::{RecordPhase, RecordStatus, Store};

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

/// [`Store`] that persists the id ↔ key map and record statuses, so keys stay
/// stable across restarts.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn key_count(&self) -> Result<u64, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM store_keys", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl Store for SqliteStore {
    fn get_store_key(&mut self, type_name: &str, id: &str) -> Result<StoreKey, StorageError> {
        let existing: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT store_key FROM store_keys WHERE type_name = ?1 AND record_id = ?2",
                rusqlite::params![type_name, id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(bytes) = existing {
            return Ok(StoreKey::from_bytes(to_array::<16>(bytes, "store_key")?));
        }

        let key = StoreKey::new();
        self.conn.execute(
            "INSERT INTO store_keys (store_key, type_name, record_id) VALUES (?1, ?2, ?3)",
            rusqlite::params![key.as_bytes().as_slice(), type_name, id],
        )?;
        trace!(type_name, id, ?key, "allocated store key");
        Ok(key)
    }

    fn get_id(&self, key: StoreKey) -> Result<Option<String>, StorageError> {
        let id = self
            .conn
            .query_row(
                "SELECT record_id FROM store_keys WHERE store_key = ?1",
                rusqlite::params![key.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn get_status(&self, key: StoreKey) -> Result<RecordStatus, StorageError> {
        let row: Option<(String, bool, bool)> = self
            .conn
            .query_row(
                "SELECT phase, loading, obsolete FROM record_status WHERE store_key = ?1",
                rusqlite::params![key.as_bytes().as_slice()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        match row {
            None => Ok(RecordStatus::EMPTY),
            Some((phase, loading, obsolete)) => Ok(RecordStatus {
                phase: RecordPhase::parse(&phase)?,
                loading,
                obsolete,
            }),
        }
    }

    fn set_status(&mut self, key: StoreKey, status: RecordStatus) -> Result<(), StorageError> {
        if self.get_id(key)?.is_none() {
            return Err(StorageError::UnknownStoreKey(key.to_string()));
        }
        self.conn.execute(
            "INSERT INTO record_status (store_key, phase, loading, obsolete) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (store_key) DO UPDATE SET
                phase = excluded.phase, loading = excluded.loading, obsolete = excluded.obsolete",
            rusqlite::params![
                key.as_bytes().as_slice(),
                status.phase.as_str(),
                status.loading,
                status.obsolete
            ],
        )?;
        Ok(())
    }
}
