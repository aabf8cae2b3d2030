//! Storage error types
//!
//! Defines all errors that can occur in the metric store.

use thiserror::Error;

/// Errors that can occur in the metric store
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite operation failed
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Data corruption detected (checksum mismatch, unreadable record, etc.)
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// Date cannot be encoded as a fixed-width sortable key
    #[error("Date {0} is outside the sortable key range (years 0000-9999)")]
    KeyOutOfRange(String),

    /// Store was already closed
    #[error("Store is closed")]
    Closed,

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Attach the failing operation and metric to an error message
    pub fn context(self, operation: &str, metric: &str) -> Self {
        match self {
            StorageError::Serialization(msg) => {
                StorageError::Serialization(format!("{} {:?}: {}", operation, metric, msg))
            }
            StorageError::Corruption(msg) => {
                StorageError::Corruption(format!("{} {:?}: {}", operation, metric, msg))
            }
            other => other,
        }
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<chrono::ParseError> for StorageError {
    fn from(err: chrono::ParseError) -> Self {
        StorageError::Corruption(format!("stored date unreadable: {}", err))
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::Closed;
        assert_eq!(err.to_string(), "Store is closed");

        let err = StorageError::KeyOutOfRange("+10000-01-01".to_string());
        assert_eq!(
            err.to_string(),
            "Date +10000-01-01 is outside the sortable key range (years 0000-9999)"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let storage_err: StorageError = io_err.into();
        assert!(matches!(storage_err, StorageError::Io(_)));
    }

    #[test]
    fn test_context_prefixes_message() {
        let err = StorageError::Corruption("bad crc".into()).context("get", "fitbit.steps");
        assert_eq!(err.to_string(), "Corrupt data: get \"fitbit.steps\": bad crc");
    }
}
