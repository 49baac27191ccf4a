//! Read-only access to evidence databases through the SQL engine, plus direct
//! header parsing that never goes through it.

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tracing::{debug, info, instrument};

use crate::{
    config::AccessorConfig,
    error::ForensicError,
    io::EvidenceFile,
    storage::sqlite3_ondisk::{has_sqlite_magic, DatabaseHeader, DATABASE_HEADER_SIZE_BYTES},
    File, Result,
};

pub mod discovery;
pub mod query;
pub mod schema;
pub mod snapshot;

pub use discovery::{find_databases, is_sqlite_database, DiscoveredDatabase};
pub use query::{QueryParams, QueryResult, QueryValidator};
pub use schema::{ColumnInfo, SchemaInfo, SchemaObject, TableInfo};
pub use snapshot::{journal_inventory, sidecar_path, wal_path, JournalInventory, Sidecars, Snapshot};

/// A validated evidence database. Holds no open file; every operation works
/// on its own fresh snapshot.
#[derive(Debug, Clone)]
pub struct DatabaseHandle {
    path: PathBuf,
    header: DatabaseHeader,
}

impl DatabaseHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &DatabaseHeader {
        &self.header
    }
}

/// Counters as the SQL engine reports them.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct EngineStats {
    pub page_size: u32,
    pub page_count: u32,
    pub freelist_count: u32,
    pub encoding: String,
    pub journal_mode: String,
}

/// A field where the engine and the raw header disagree. The header value is
/// the one recovery uses.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct HeaderDiscrepancy {
    pub field: String,
    pub header: String,
    pub engine: String,
}

/// Reads and validates the 100-byte header without involving the SQL engine.
pub fn read_header(path: impl AsRef<Path>) -> Result<DatabaseHeader> {
    read_header_from(&EvidenceFile::open(path)?)
}

/// Validates the magic and parses the header of an already opened file.
pub fn read_header_from(file: &EvidenceFile) -> Result<DatabaseHeader> {
    let mut buf = [0u8; DATABASE_HEADER_SIZE_BYTES];
    let n = file.pread(0, &mut buf)?;
    if !has_sqlite_magic(&buf[..n]) {
        return Err(ForensicError::NotASqliteDatabase(file.path().to_path_buf()));
    }
    DatabaseHeader::parse(&buf[..n])
}

pub struct ForensicAccessor {
    config: AccessorConfig,
    validator: QueryValidator,
}

impl ForensicAccessor {
    pub fn new(config: AccessorConfig) -> Result<Self> {
        let validator = QueryValidator::new(&config)?;
        Ok(Self { config, validator })
    }

    pub fn config(&self) -> &AccessorConfig {
        &self.config
    }

    /// Validates the file magic and parses the header.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<DatabaseHandle> {
        let path = path.as_ref();
        let header = read_header(path)?;
        info!(
            path = %path.display(),
            page_size = header.page_size,
            freelist_pages = header.freelist_page_count,
            "opened evidence database"
        );
        Ok(DatabaseHandle {
            path: path.to_path_buf(),
            header,
        })
    }

    /// Copies the database and its sidecars into a fresh scratch directory.
    pub fn snapshot(&self, path: impl AsRef<Path>) -> Result<Snapshot> {
        Snapshot::capture(path.as_ref(), &self.config)
    }

    /// Runs one read-only statement against a fresh snapshot.
    #[instrument(skip(self, handle, params), fields(path = %handle.path.display()))]
    pub fn execute_query(
        &self,
        handle: &DatabaseHandle,
        sql: &str,
        params: &QueryParams,
    ) -> Result<QueryResult> {
        let sql = self.validator.validate(sql)?;
        self.with_connection(handle, |conn| {
            query::run_query(conn, sql, params, self.config.max_query_rows)
        })
    }

    /// One page of rows from a table, `SELECT *` in storage order.
    pub fn table_page(
        &self,
        handle: &DatabaseHandle,
        table: &str,
        limit: usize,
        offset: usize,
    ) -> Result<QueryResult> {
        let sql = format!("SELECT * FROM {} LIMIT ?1 OFFSET ?2", query::quote_ident(table));
        let params = QueryParams::Positional(vec![
            crate::types::Value::Integer(limit.min(self.config.max_query_rows) as i64),
            crate::types::Value::Integer(offset as i64),
        ]);
        self.execute_query(handle, &sql, &params)
    }

    pub fn describe_schema(&self, handle: &DatabaseHandle) -> Result<SchemaInfo> {
        let mut info = self.with_connection(handle, schema::enumerate)?;
        let present = journal_inventory(&handle.path).present();
        info.has_wal = present.contains(Sidecars::WAL);
        info.has_shm = present.contains(Sidecars::SHM);
        debug!(tables = info.tables.len(), "schema enumerated");
        Ok(info)
    }

    pub fn engine_stats(&self, handle: &DatabaseHandle) -> Result<EngineStats> {
        self.with_connection(handle, |conn| {
            let pragma_u32 = |name: &str| -> Result<u32> {
                Ok(conn.pragma_query_value(None, name, |row| row.get::<_, i64>(0))? as u32)
            };
            let pragma_string = |name: &str| -> Result<String> {
                Ok(conn.pragma_query_value(None, name, |row| row.get::<_, String>(0))?)
            };
            Ok(EngineStats {
                page_size: pragma_u32("page_size")?,
                page_count: pragma_u32("page_count")?,
                freelist_count: pragma_u32("freelist_count")?,
                encoding: pragma_string("encoding")?,
                journal_mode: pragma_string("journal_mode")?,
            })
        })
    }

    /// Compares engine-reported counters against the raw header.
    pub fn cross_check_header(&self, handle: &DatabaseHandle) -> Result<Vec<HeaderDiscrepancy>> {
        let stats = self.engine_stats(handle)?;
        let header = &handle.header;
        let header_encoding = match header.text_encoding {
            Some(crate::storage::text::TextEncoding::Utf16Le) => "UTF-16le",
            Some(crate::storage::text::TextEncoding::Utf16Be) => "UTF-16be",
            _ => "UTF-8",
        };

        let mut discrepancies = Vec::new();
        let mut compare = |field: &str, header: String, engine: String| {
            if header != engine {
                discrepancies.push(HeaderDiscrepancy {
                    field: field.to_string(),
                    header,
                    engine,
                });
            }
        };
        compare("page_size", header.page_size.to_string(), stats.page_size.to_string());
        compare(
            "page_count",
            header.database_size_pages.to_string(),
            stats.page_count.to_string(),
        );
        compare(
            "freelist_count",
            header.freelist_page_count.to_string(),
            stats.freelist_count.to_string(),
        );
        compare("encoding", header_encoding.to_string(), stats.encoding);
        if !discrepancies.is_empty() {
            info!(count = discrepancies.len(), "engine disagrees with raw header");
        }
        Ok(discrepancies)
    }

    // Snapshot lives for exactly one call.
    fn with_connection<T>(
        &self,
        handle: &DatabaseHandle,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        let snapshot = self.snapshot(&handle.path)?;
        let conn = snapshot.connect()?;
        let result = f(&conn);
        drop(conn);
        drop(snapshot);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evidence.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE contacts(id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO contacts(name) VALUES ('ada'), ('grace'), ('edsger');",
        )
        .unwrap();
        (dir, path)
    }

    #[test]
    fn test_open_rejects_non_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"definitely not a database").unwrap();
        let accessor = ForensicAccessor::new(AccessorConfig::default()).unwrap();
        assert!(matches!(
            accessor.open(&path),
            Err(ForensicError::NotASqliteDatabase(p)) if p == path
        ));
    }

    #[test]
    fn test_read_header() {
        let (_dir, path) = fixture();
        let header = read_header(&path).unwrap();
        assert!(header.page_size >= 512);
        assert_eq!(header.freelist_page_count, 0);
    }

    #[test]
    fn test_query_and_table_page() {
        let (_dir, path) = fixture();
        let accessor = ForensicAccessor::new(AccessorConfig::default()).unwrap();
        let handle = accessor.open(&path).unwrap();

        let result = accessor
            .execute_query(&handle, "SELECT name FROM contacts ORDER BY id", &QueryParams::None)
            .unwrap();
        assert_eq!(result.row_count, 3);
        assert!(!result.truncated);

        let page = accessor.table_page(&handle, "contacts", 2, 1).unwrap();
        assert_eq!(page.row_count, 2);
        assert_eq!(page.rows[0][1], crate::types::Value::Text("grace".into()));
    }

    #[test]
    fn test_row_cap_sets_truncated() {
        let (_dir, path) = fixture();
        let config = AccessorConfig {
            max_query_rows: 2,
            ..AccessorConfig::default()
        };
        let accessor = ForensicAccessor::new(config).unwrap();
        let handle = accessor.open(&path).unwrap();
        let result = accessor
            .execute_query(&handle, "SELECT * FROM contacts", &QueryParams::None)
            .unwrap();
        assert_eq!(result.row_count, 2);
        assert!(result.truncated);
    }

    #[test]
    fn test_validation_happens_before_io() {
        let (dir, path) = fixture();
        let accessor = ForensicAccessor::new(AccessorConfig::default()).unwrap();
        let handle = accessor.open(&path).unwrap();
        drop(dir);
        // the file is gone, yet the error is the validation one
        assert!(matches!(
            accessor.execute_query(&handle, "DROP TABLE contacts", &QueryParams::None),
            Err(ForensicError::QueryValidationError(_))
        ));
    }

    #[test]
    fn test_describe_schema_and_stats() {
        let (_dir, path) = fixture();
        let accessor = ForensicAccessor::new(AccessorConfig::default()).unwrap();
        let handle = accessor.open(&path).unwrap();
        let schema = accessor.describe_schema(&handle).unwrap();
        assert_eq!(schema.tables[0].name, "contacts");
        assert_eq!(schema.tables[0].row_count, Some(3));
        assert!(!schema.has_wal);

        let stats = accessor.engine_stats(&handle).unwrap();
        assert_eq!(stats.page_size, handle.header().page_size);
        assert_eq!(stats.encoding, "UTF-8");
        assert!(accessor.cross_check_header(&handle).unwrap().is_empty());
    }
}
