use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainDbError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("schema version mismatch: on-disk {on_disk}, expected {expected}")]
    SchemaVersion { on_disk: u8, expected: u8 },

    #[error("flag upgrade rejected: {0}")]
    FlagUpgrade(String),

    #[error("a write batch is already open")]
    BatchAlreadyOpen,

    #[error("no open write batch")]
    NoOpenBatch,

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<redb::TransactionError> for ChainDbError {
    fn from(e: redb::TransactionError) -> Self {
        ChainDbError::Backend(e.to_string())
    }
}

impl From<redb::TableError> for ChainDbError {
    fn from(e: redb::TableError) -> Self {
        ChainDbError::Backend(e.to_string())
    }
}

impl From<redb::StorageError> for ChainDbError {
    fn from(e: redb::StorageError) -> Self {
        ChainDbError::Backend(e.to_string())
    }
}

impl From<redb::CommitError> for ChainDbError {
    fn from(e: redb::CommitError) -> Self {
        ChainDbError::Backend(e.to_string())
    }
}

impl From<redb::DatabaseError> for ChainDbError {
    fn from(e: redb::DatabaseError) -> Self {
        ChainDbError::Backend(e.to_string())
    }
}

pub type ChainDbResult<T> = Result<T, ChainDbError>;
