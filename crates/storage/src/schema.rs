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

-- Append-only ledger. Rows never change after insert except the single
-- rolled_back transition 0 -> 1. AUTOINCREMENT keeps ids strictly
-- increasing even across deletes (there are none) and reflects commit
-- order under sqlite's serialized write path.
CREATE TABLE IF NOT EXISTS change_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    actor_id BLOB NOT NULL CHECK (length(actor_id) = 16),
    op TEXT NOT NULL CHECK (op IN ('create', 'update', 'delete')),
    entity_kind TEXT NOT NULL,
    entity_id BLOB NOT NULL CHECK (length(entity_id) = 16),
    before BLOB,
    after BLOB,
    rolled_back INTEGER NOT NULL DEFAULT 0 CHECK (rolled_back IN (0, 1)),
    created_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER))
);
CREATE INDEX IF NOT EXISTS idx_change_log_actor ON change_log (actor_id, id);
CREATE INDEX IF NOT EXISTS idx_change_log_entity ON change_log (entity_kind, entity_id, id);

-- The entity repository. One row per live record; fields live in
-- record_fields so a snapshot read is a plain keyed scan.
CREATE TABLE IF NOT EXISTS records (
    entity_kind TEXT NOT NULL,
    entity_id BLOB NOT NULL CHECK (length(entity_id) = 16),
    created_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER)),
    PRIMARY KEY (entity_kind, entity_id)
);

CREATE TABLE IF NOT EXISTS record_fields (
    entity_kind TEXT NOT NULL,
    entity_id BLOB NOT NULL CHECK (length(entity_id) = 16),
    field_key TEXT NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (entity_kind, entity_id, field_key)
);
";
