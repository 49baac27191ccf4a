use std::fmt::Debug;

use crate::{File, Result};

/// An in-memory image, owned or borrowed. Used for WAL/database buffers
/// already read and for crafted images in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryFile<B = Vec<u8>> {
    data: B,
}

impl<B: AsRef<[u8]>> MemoryFile<B> {
    pub fn new(data: B) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_ref()
    }
}

impl<B> File for MemoryFile<B>
where
    B: AsRef<[u8]> + Send + Sync + Debug,
{
    fn size(&self) -> Result<u64> {
        Ok(self.as_bytes().len() as u64)
    }

    fn pread(&self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        let data = self.as_bytes();
        let Ok(start) = usize::try_from(pos) else {
            return Ok(0);
        };
        if start >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }
}
