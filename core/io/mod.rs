use std::fmt::Debug;

use crate::{bail_corrupt_error, Result};

pub mod file;
pub mod memory;

pub use file::EvidenceFile;
pub use memory::MemoryFile;

/// Read-only positional access to a database or WAL image.
///
/// There is no write path.
pub trait File: Send + Sync + Debug {
    fn size(&self) -> Result<u64>;

    /// Reads into `buf` starting at `pos`, returning the number of bytes read.
    /// Fewer bytes than requested means end of file.
    fn pread(&self, pos: u64, buf: &mut [u8]) -> Result<usize>;

    /// Reads a whole 1-based page. A page cut short by end of file is
    /// returned short; a page starting past the end is an error.
    fn read_page(&self, page_number: u32, page_size: usize) -> Result<Vec<u8>> {
        if page_number == 0 {
            bail_corrupt_error!("page numbers start at 1");
        }
        let pos = (page_number as u64 - 1) * page_size as u64;
        if pos >= self.size()? {
            bail_corrupt_error!("page {page_number} lies beyond the end of the file");
        }
        let mut buf = vec![0u8; page_size];
        let n = self.pread(pos, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn read_all(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.size()? as usize];
        let n = self.pread(0, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Number of whole or partial pages in the file.
    fn page_count(&self, page_size: usize) -> Result<u32> {
        let size = self.size()?;
        Ok(size.div_ceil(page_size as u64) as u32)
    }
}
