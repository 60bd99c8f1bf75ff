use trackback_core::{ChangeId, CoreError};
use trackback_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("change record not found: {0}")]
    ChangeNotFound(ChangeId),

    #[error("change record already rolled back: {0}")]
    AlreadyRolledBack(ChangeId),

    #[error("undo target no longer exists: {0}")]
    EntityGone(String),

    #[error("conflicting concurrent write on {0}")]
    Conflict(String),

    /// The mutation committed but the change log append failed. The write
    /// stands; the ledger has a gap for it. Reported once, never retried.
    #[error("mutation succeeded, audit trail incomplete: {0}")]
    AuditTrailIncomplete(StorageError),
}
