use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForensicError {
    #[error("Not a SQLite database: {}", .0.display())]
    NotASqliteDatabase(PathBuf),
    #[error("Invalid WAL: {0}")]
    InvalidWal(String),
    #[error("WAL file not found: {}", .0.display())]
    MissingWal(PathBuf),
    #[error("Failed to copy {} into scratch space: {source}", path.display())]
    PathCopyFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Query rejected: {0}")]
    QueryValidationError(String),
    #[error("Query failed: {0}")]
    QueryExecutionError(String),
    #[error("Schema enumeration failed for {table}: {reason}")]
    SchemaEnumerationPartialFailure { table: String, reason: String },
    #[error("Freelist chain corrupt: {0}")]
    FreelistChainCorrupt(String),
    #[error("Corrupt database: {0}")]
    Corrupt(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Engine messages are kept verbatim so callers see what SQLite said.
impl From<rusqlite::Error> for ForensicError {
    fn from(value: rusqlite::Error) -> Self {
        Self::QueryExecutionError(value.to_string())
    }
}

#[macro_export]
macro_rules! bail_corrupt_error {
    ($($arg:tt)*) => {
        return Err($crate::error::ForensicError::Corrupt(format!($($arg)*)))
    }
}
