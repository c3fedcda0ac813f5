use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS store_keys (
    store_key BLOB PRIMARY KEY CHECK (length(store_key) = 16),
    type_name TEXT NOT NULL,
    record_id TEXT NOT NULL,
    UNIQUE (type_name, record_id)
);

CREATE TABLE IF NOT EXISTS record_status (
    store_key BLOB PRIMARY KEY REFERENCES store_keys (store_key),
    phase TEXT NOT NULL,
    loading INTEGER NOT NULL DEFAULT 0,
    obsolete INTEGER NOT NULL DEFAULT 0
);
";
