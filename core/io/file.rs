use std::{
    fs::OpenOptions,
    io::{ErrorKind, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::debug;

use crate::{error::ForensicError, File, Result};

/// An evidence file opened strictly read-only.
#[derive(Debug)]
pub struct EvidenceFile {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl EvidenceFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).open(path)?;
        debug!(path = %path.display(), "opened evidence file read-only");
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl File for EvidenceFile {
    fn size(&self) -> Result<u64> {
        let file = self.lock()?;
        Ok(file.metadata()?.len())
    }

    fn pread(&self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        let mut file = self.lock()?;
        file.seek(SeekFrom::Start(pos))?;
        let mut total = 0;
        while total < buf.len() {
            match file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }
}

impl EvidenceFile {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, std::fs::File>> {
        self.file.lock().map_err(|_| {
            ForensicError::Io(std::io::Error::new(
                ErrorKind::Other,
                format!("file handle poisoned: {}", self.path.display()),
            ))
        })
    }
}
