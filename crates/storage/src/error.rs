use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("duplicate entity: {entity_id}")]
    DuplicateEntity { entity_id: String },

    #[error("core error: {0}")]
    Core(#[from] trackback_core::CoreError),
}
