use std::{
    fs,
    path::{Path, PathBuf},
};

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::{config::AccessorConfig, error::ForensicError, Result};

bitflags! {
    /// Sibling files that travel with a database.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Sidecars: u8 {
        const WAL = 0b001;
        const SHM = 0b010;
        const JOURNAL = 0b100;
    }
}

const SIDECAR_SUFFIXES: [(&str, Sidecars); 3] = [
    ("-wal", Sidecars::WAL),
    ("-shm", Sidecars::SHM),
    ("-journal", Sidecars::JOURNAL),
];

/// `<db>-wal`, `<db>-shm` or `<db>-journal` next to `db_path`.
pub fn sidecar_path(db_path: &Path, suffix: &str) -> PathBuf {
    let mut os = db_path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

pub fn wal_path(db_path: &Path) -> PathBuf {
    sidecar_path(db_path, "-wal")
}

/// Sizes of the sibling files present next to a database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct JournalInventory {
    pub journal: Option<u64>,
    pub wal: Option<u64>,
    pub shm: Option<u64>,
}

impl JournalInventory {
    pub fn present(&self) -> Sidecars {
        let mut present = Sidecars::empty();
        present.set(Sidecars::JOURNAL, self.journal.is_some());
        present.set(Sidecars::WAL, self.wal.is_some());
        present.set(Sidecars::SHM, self.shm.is_some());
        present
    }
}

pub fn journal_inventory(db_path: &Path) -> JournalInventory {
    let size = |suffix| fs::metadata(sidecar_path(db_path, suffix)).ok().map(|m| m.len());
    JournalInventory {
        journal: size("-journal"),
        wal: size("-wal"),
        shm: size("-shm"),
    }
}

/// A scratch copy of a database and its sidecars.
///
/// Everything the SQL engine touches is the copy. The scratch directory is
/// removed when the snapshot is dropped, including during unwinding.
#[derive(Debug)]
pub struct Snapshot {
    dir: TempDir,
    db_path: PathBuf,
    source: PathBuf,
    sidecars: Sidecars,
    captured_at: DateTime<Utc>,
    source_len: u64,
    source_modified: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn capture(source: &Path, config: &AccessorConfig) -> Result<Self> {
        let metadata = fs::metadata(source).map_err(|e| copy_failure(source, e))?;
        let dir = match &config.scratch_root {
            Some(root) => tempfile::Builder::new().prefix("sqlite-recover-").tempdir_in(root),
            None => tempfile::Builder::new().prefix("sqlite-recover-").tempdir(),
        }?;

        let file_name = source
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "evidence.db".into());
        let db_path = dir.path().join(file_name);
        copy_into_scratch(source, &db_path)?;

        let mut sidecars = Sidecars::empty();
        if config.copy_sidecars {
            for (suffix, flag) in SIDECAR_SUFFIXES {
                let from = sidecar_path(source, suffix);
                if !from.exists() {
                    continue;
                }
                copy_into_scratch(&from, &sidecar_path(&db_path, suffix))?;
                sidecars |= flag;
            }
        }

        debug!(
            source = %source.display(),
            scratch = %dir.path().display(),
            ?sidecars,
            "captured snapshot"
        );

        Ok(Self {
            dir,
            db_path,
            source: source.to_path_buf(),
            sidecars,
            captured_at: Utc::now(),
            source_len: metadata.len(),
            source_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn scratch_dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn sidecars(&self) -> Sidecars {
        self.sidecars
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn source_len(&self) -> u64 {
        self.source_len
    }

    pub fn source_modified(&self) -> Option<DateTime<Utc>> {
        self.source_modified
    }

    /// Opens the copy read-only with automatic checkpointing disabled.
    pub fn connect(&self) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&self.db_path, flags)?;
        conn.pragma_update(None, "wal_autocheckpoint", 0)?;
        Ok(conn)
    }
}

fn copy_failure(path: &Path, source: std::io::Error) -> ForensicError {
    ForensicError::PathCopyFailure {
        path: path.to_path_buf(),
        source,
    }
}

fn copy_into_scratch(from: &Path, to: &Path) -> Result<()> {
    fs::copy(from, to).map_err(|e| copy_failure(from, e))?;
    // read-only evidence keeps its mode through the copy; the engine needs to
    // map the copied -shm writable
    let mut perms = fs::metadata(to).map_err(|e| copy_failure(from, e))?.permissions();
    if perms.readonly() {
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        if let Err(e) = fs::set_permissions(to, perms) {
            warn!(path = %to.display(), error = %e, "could not make scratch copy writable");
        }
    }
    Ok(())
}
