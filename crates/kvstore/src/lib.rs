//! Key-Value Storage
//!
//! Byte-oriented storage backends shared by the document store. Keys are
//! namespaced by callers (`<collection>:<id>`); this crate knows nothing
//! about what the values mean.

mod storage;
mod file;

pub use storage::{Storage, InMemoryStorage};
pub use file::FileBackedStorage;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage lock poisoned")]
    Poisoned,
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
