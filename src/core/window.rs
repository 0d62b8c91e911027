use super::error::{ErrorCode, RasterError, RasterResult};
use super::source::{ByteSource, read_fully};

/// Size of the cached block, in bytes.
pub const BLOCK_SIZE: usize = 1024;

/// Returned by [`Window::peek`] and [`Window::next`] past the end of the source.
pub const END_OF_SOURCE: i32 = -1;

/// A single-block cache over a [`ByteSource`].
///
/// Parsing jumps between unrelated offsets (xref → object, /Length →
/// endstream, /Kids → child), so the window is refilled at whatever offset is
/// requested rather than read sequentially. Any access outside the cached
/// block costs exactly one read call.
pub struct Window {
    source: Box<dyn ByteSource>,
    block: Box<[u8; BLOCK_SIZE]>,
    /// Absolute offset of `block[0]`
    start: u64,
    /// Number of valid bytes in `block`
    len: usize,
    /// Total source length, queried once
    size: u64,
}

impl Window {
    /// Wraps a source, querying its size once.
    pub fn new(mut source: Box<dyn ByteSource>) -> RasterResult<Self> {
        let size = source
            .size()
            .map_err(|_| RasterError::new(ErrorCode::SizeFailed, 0))?;

        Ok(Window {
            source,
            block: Box::new([0u8; BLOCK_SIZE]),
            start: 0,
            len: 0,
            size,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn source(&self) -> &dyn ByteSource {
        self.source.as_ref()
    }

    pub fn source_mut(&mut self) -> &mut dyn ByteSource {
        self.source.as_mut()
    }

    pub fn into_source(self) -> Box<dyn ByteSource> {
        self.source
    }

    fn contains(&self, offset: u64) -> bool {
        offset >= self.start && offset - self.start < self.len as u64
    }

    /// Makes `offset` addressable in the window.
    ///
    /// Returns `Ok(false)` only when the source has no byte at `offset`.
    pub fn seek_to(&mut self, offset: u64) -> RasterResult<bool> {
        if self.contains(offset) {
            return Ok(true);
        }

        let count = self
            .source
            .read(offset, &mut self.block[..])
            .map_err(|_| RasterError::new(ErrorCode::ReadFailed, offset))?;

        if count == 0 {
            self.len = 0;
            return Ok(false);
        }

        self.start = offset;
        self.len = count.min(BLOCK_SIZE);
        log::trace!("window refilled at {} ({} bytes)", offset, self.len);
        Ok(true)
    }

    /// Returns the byte at `offset`, or [`END_OF_SOURCE`].
    pub fn peek(&mut self, offset: u64) -> RasterResult<i32> {
        if !self.seek_to(offset)? {
            return Ok(END_OF_SOURCE);
        }
        Ok(self.block[(offset - self.start) as usize] as i32)
    }

    /// Returns the byte at `*offset` and advances past it.
    ///
    /// At end of source returns [`END_OF_SOURCE`] and leaves `*offset` alone.
    pub fn next(&mut self, offset: &mut u64) -> RasterResult<i32> {
        let ch = self.peek(*offset)?;
        if ch != END_OF_SOURCE {
            *offset += 1;
        }
        Ok(ch)
    }

    /// Returns true if the bytes at `offset` equal `literal`.
    pub fn matches(&mut self, offset: u64, literal: &[u8]) -> RasterResult<bool> {
        for (i, &expected) in literal.iter().enumerate() {
            if self.peek(offset + i as u64)? != expected as i32 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Reads `buf.len()` bytes at `offset` straight from the source, bypassing
    /// the window.
    ///
    /// Returns the number of bytes read; fewer than requested means the
    /// source ended.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> RasterResult<usize> {
        read_fully(self.source.as_mut(), offset, buf)
    }
}
