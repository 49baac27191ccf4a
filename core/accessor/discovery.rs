//! Locating SQLite databases under a directory tree.

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::{
    accessor::snapshot::Snapshot,
    config::AccessorConfig,
    io::EvidenceFile,
    storage::sqlite3_ondisk::{has_sqlite_magic, SQLITE_MAGIC},
    File, Result,
};

/// File extensions considered when searching, compared case-insensitively.
pub const DATABASE_EXTENSIONS: [&str; 5] = ["db", "sqlite", "sqlitedb", "sqlite3", "db3"];

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DiscoveredDatabase {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    /// `None` when the schema could not be read; see `error`.
    pub table_count: Option<usize>,
    pub tables: Vec<String>,
    pub error: Option<String>,
}

/// True for a regular file starting with the 16-byte SQLite magic.
pub fn is_sqlite_database(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    let mut magic = [0u8; SQLITE_MAGIC.len()];
    match EvidenceFile::open(path).and_then(|file| file.pread(0, &mut magic)) {
        Ok(n) => has_sqlite_magic(&magic[..n]),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read file magic");
            false
        }
    }
}

fn has_database_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| DATABASE_EXTENSIONS.iter().any(|c| c.eq_ignore_ascii_case(ext)))
}

/// Walks `base` recursively and describes every candidate file that carries
/// the SQLite magic. Table names come from a snapshot of each database.
///
/// Unreadable directory entries are skipped. A schema that cannot be read is
/// reported on the entry instead of failing the search.
pub fn find_databases(base: &Path, config: &AccessorConfig) -> Result<Vec<DiscoveredDatabase>> {
    if !base.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a directory", base.display()),
        )
        .into());
    }
    info!(base = %base.display(), "searching for databases");

    let mut databases = Vec::new();
    for entry in WalkDir::new(base).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "skipped unreadable entry");
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || !has_database_extension(path) || !is_sqlite_database(path) {
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let (table_count, tables, error) = match table_names(path, config) {
            Ok(tables) => (Some(tables.len()), tables, None),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read schema");
                (None, Vec::new(), Some(e.to_string()))
            }
        };
        databases.push(DiscoveredDatabase {
            path: path.to_path_buf(),
            name: entry.file_name().to_string_lossy().into_owned(),
            size,
            table_count,
            tables,
            error,
        });
    }

    info!(found = databases.len(), "database search finished");
    Ok(databases)
}

fn table_names(path: &Path, config: &AccessorConfig) -> Result<Vec<String>> {
    let snapshot = Snapshot::capture(path, config)?;
    let conn = snapshot.connect()?;
    list_tables(&conn)
}

fn list_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY rowid")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}
