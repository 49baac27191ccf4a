//! Forensic reading and recovery for SQLite database files.
//!
//! The evidence file is never opened write-capable: SQL access goes through a
//! scratch [`accessor::Snapshot`], and the recovery engines read raw bytes
//! through [`File`].

use crate::error::ForensicError;

pub mod accessor;
pub mod config;
pub mod error;
pub mod io;
pub mod recovery;
pub mod storage;
pub mod types;

pub use accessor::{read_header, DatabaseHandle, ForensicAccessor, QueryParams, QueryResult, SchemaInfo};
pub use config::{AccessorConfig, ForensicConfig, RecoveryConfig, WalConfig};
pub use io::File;
pub use recovery::{carve_file, FreelistRecoveryEngine, WalAnalyzer};
pub use storage::sqlite3_ondisk::DatabaseHeader;
pub use types::Value;

pub type Result<T, E = ForensicError> = std::result::Result<T, E>;
