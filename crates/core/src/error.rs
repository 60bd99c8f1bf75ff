use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid change record: {0}")]
    InvalidRecord(String),

    #[error("unknown entity kind: {0}")]
    UnknownEntityKind(String),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),
}
