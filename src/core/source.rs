use super::error::{ErrorCode, RasterError, RasterResult};
use std::io;
use std::sync::Arc;

/// Random-access byte source supplied by the caller.
///
/// The reader never assumes anything about a source beyond these three
/// operations. Reads are blocking; a slow source blocks the calling thread.
pub trait ByteSource {
    /// Reads up to `buf.len()` bytes starting at `offset`.
    ///
    /// Returns the number of bytes actually read. Zero means `offset` is at
    /// or beyond the end of the source.
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Returns the total length of the source in bytes.
    fn size(&mut self) -> io::Result<u64>;

    /// Releases the source. Called once when an open reader is closed.
    fn close(&mut self) {}
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(offset, buf)
    }

    fn size(&mut self) -> io::Result<u64> {
        (**self).size()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Reads into `buf` until it is full or the source ends.
///
/// Returns the number of bytes read. Sources may return short reads, so
/// this loops; a zero-length read marks the end.
pub fn read_fully(source: &mut dyn ByteSource, offset: u64, buf: &mut [u8]) -> RasterResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let at = offset + filled as u64;
        let count = source
            .read(at, &mut buf[filled..])
            .map_err(|_| RasterError::new(ErrorCode::ReadFailed, at))?;
        if count == 0 {
            break;
        }
        filled += count.min(buf.len() - filled);
    }
    Ok(filled)
}

/// A byte source over bytes already in memory.
///
/// The bytes are shared through an `Arc`, so clones are cheap and several
/// readers can work over the same document.
#[derive(Debug, Clone)]
pub struct MemorySource {
    bytes: Arc<[u8]>,
}

impl MemorySource {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        MemorySource {
            bytes: bytes.into(),
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl ByteSource for MemorySource {
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.bytes.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let count = buf.len().min(self.bytes.len() - start);
        buf[..count].copy_from_slice(&self.bytes[start..start + count]);
        Ok(count)
    }

    fn size(&mut self) -> io::Result<u64> {
        Ok(self.bytes.len() as u64)
    }
}
