pub mod schema;
pub mod store;
pub mod merge;
pub mod split;
pub mod context;
pub mod errorlog;

pub use schema::*;
pub use store::*;
pub use merge::*;
pub use split::*;
pub use context::*;
pub use errorlog::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StudiesError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Ser(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Fold count must be at least 1, got {0}")]
    InvalidFolds(u32),
}

impl From<kvstore::StorageError> for StudiesError {
    fn from(e: kvstore::StorageError) -> Self {
        StudiesError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StudiesError>;
