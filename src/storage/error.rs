//! Storage layer error types.

use crate::storage::page::PageId;
use crate::storage::page::cell::Key;
use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Page overflow: requires {required} bytes but only {available} available")]
    PageOverflow { required: usize, available: usize },

    #[error("Key not found: {0}")]
    KeyNotFound(Key),

    #[error("Duplicate key: {0}")]
    DuplicateKey(Key),

    #[error("Corrupt page {page_id}: {reason}")]
    CorruptPage { page_id: PageId, reason: String },

    #[error("Corrupt cell at offset {offset}: {reason}")]
    CorruptCell { offset: usize, reason: String },

    #[error("Invalid file header: {0}")]
    InvalidFileHeader(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub(crate) fn corrupt_page(page_id: PageId, reason: impl Into<String>) -> Self {
        StorageError::CorruptPage {
            page_id,
            reason: reason.into(),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
