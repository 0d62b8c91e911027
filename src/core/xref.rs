use super::error::{ErrorCode, RasterError, RasterResult};
use super::lexer::Lexer;

/// Largest entry count accepted in the single xref subsection.
pub const MAX_XREF_ENTRIES: u64 = 8_388_607;

/// Every xref record is exactly this many bytes.
pub const RECORD_SIZE: usize = 20;

/// Generation number carried by the free head of the list, entry 0.
const FREE_HEAD_GENERATION: u64 = 65535;

/// Status byte of a cross-reference record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// 'n': the object is stored at the recorded offset
    InUse,
    /// 'f': the object number is unused
    Free,
}

/// One 20-byte cross-reference record.
///
/// Layout: 10-digit offset, space, 5-digit generation, space, status byte,
/// 2-byte end-of-line.
/// ```text
/// 0000000000 65535 f\r\n
/// 0000000017 00000 n\r\n
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XrefRecord([u8; RECORD_SIZE]);

impl XrefRecord {
    pub fn from_bytes(bytes: [u8; RECORD_SIZE]) -> Self {
        XrefRecord(bytes)
    }

    fn digits(&self, start: usize, end: usize) -> Option<u64> {
        let field = &self.0[start..end];
        if !field.iter().all(u8::is_ascii_digit) {
            return None;
        }
        Some(field.iter().fold(0, |acc, &b| acc * 10 + u64::from(b - b'0')))
    }

    /// Returns the byte offset (in-use) or next free object (free).
    pub fn offset(&self) -> Option<u64> {
        self.digits(0, 10)
    }

    pub fn generation(&self) -> Option<u64> {
        self.digits(11, 16)
    }

    pub fn status(&self) -> Option<EntryStatus> {
        match self.0[17] {
            b'n' => Some(EntryStatus::InUse),
            b'f' => Some(EntryStatus::Free),
            _ => None,
        }
    }

    /// Checks every field boundary: digits, separators, status and EOL.
    pub fn is_well_formed(&self) -> bool {
        let eol = matches!(&self.0[18..20], b" \r" | b" \n" | b"\r\n");
        self.0[10] == b' '
            && self.0[16] == b' '
            && eol
            && self.offset().is_some()
            && self.generation().is_some()
            && self.status().is_some()
    }
}

/// The document's cross-reference table.
///
/// Only a single subsection starting at object 0 is allowed, which lets the
/// records be read in one go and indexed directly by object number.
#[derive(Debug)]
pub struct XrefTable {
    records: Vec<[u8; RECORD_SIZE]>,
    /// Offset of the first record in the source
    start: u64,
}

impl XrefTable {
    /// Loads the table whose `xref` keyword is at `offset`.
    ///
    /// Reads the "`first count`" header, then all `count × 20` record bytes
    /// with a single bulk read.
    pub fn load(lexer: &mut Lexer, offset: u64) -> RasterResult<Self> {
        let mut pos = offset;
        if !lexer.expect_token(&mut pos, b"xref")? {
            return Err(RasterError::new(ErrorCode::NoXref, offset));
        }

        let header = pos;
        let first = lexer
            .parse_uint(&mut pos)?
            .ok_or_else(|| RasterError::new(ErrorCode::XrefHeader, header))?;
        if first != 0 {
            return Err(RasterError::new(ErrorCode::XrefFirstNotZero, header));
        }

        let count_at = pos;
        let count = lexer
            .parse_uint(&mut pos)?
            .ok_or_else(|| RasterError::new(ErrorCode::XrefHeader, count_at))?;
        if count == 0 {
            return Err(RasterError::new(ErrorCode::XrefCount, count_at));
        }
        if count > MAX_XREF_ENTRIES {
            return Err(RasterError::new(ErrorCode::XrefTooLarge, count_at));
        }

        // The records must fit in the source before anything is allocated
        let size = lexer.window().size();
        let fits = (count * RECORD_SIZE as u64)
            .checked_add(pos)
            .is_some_and(|end| end <= size);
        if !fits {
            return Err(RasterError::new(ErrorCode::XrefTruncated, size));
        }

        // count is bounded above, so this fits in usize
        let count = count as usize;
        let mut records = Vec::new();
        records
            .try_reserve_exact(count)
            .map_err(|_| RasterError::new(ErrorCode::OutOfMemory, count_at))?;
        records.resize(count, [0u8; RECORD_SIZE]);

        let wanted = count * RECORD_SIZE;
        let read = lexer.window().read_at(pos, records.as_flattened_mut())?;
        if read < wanted {
            return Err(RasterError::new(ErrorCode::XrefTruncated, pos + read as u64));
        }

        log::debug!("xref table loaded: {} entries at offset {}", count, offset);
        Ok(XrefTable {
            records,
            start: pos,
        })
    }

    /// Checks the free-list head and the generation of every in-use entry.
    pub fn validate(&self) -> RasterResult<()> {
        for (index, bytes) in self.records.iter().enumerate() {
            let record = XrefRecord(*bytes);
            let at = self.record_offset(index);

            if !record.is_well_formed() {
                return Err(RasterError::new(ErrorCode::XrefRecord, at));
            }

            if index == 0 {
                if record.status() != Some(EntryStatus::Free)
                    || record.generation() != Some(FREE_HEAD_GENERATION)
                {
                    return Err(RasterError::new(ErrorCode::XrefZeroEntry, at));
                }
            } else if record.status() == Some(EntryStatus::InUse) && record.generation() != Some(0) {
                return Err(RasterError::new(ErrorCode::XrefGeneration, at));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record(&self, num: u64) -> Option<XrefRecord> {
        let index = usize::try_from(num).ok()?;
        self.records.get(index).map(|bytes| XrefRecord(*bytes))
    }

    fn record_offset(&self, index: usize) -> u64 {
        self.start + (index * RECORD_SIZE) as u64
    }

    /// Offset just past the last record, where `trailer` must follow.
    pub fn end(&self) -> u64 {
        self.record_offset(self.records.len())
    }

    /// Locates the body of object `num`.
    ///
    /// The object at the recorded offset must start with "`num 0 obj`";
    /// returns the offset of the first token after that header.
    pub fn lookup(&self, lexer: &mut Lexer, num: u64, generation: u64, at: u64) -> RasterResult<u64> {
        if generation != 0 {
            return Err(RasterError::new(ErrorCode::ReferenceGeneration, at));
        }

        let record = self
            .record(num)
            .ok_or_else(|| RasterError::new(ErrorCode::ObjectNumber, at))?;
        if record.status() != Some(EntryStatus::InUse) {
            return Err(RasterError::new(ErrorCode::FreeObject, at));
        }
        let offset = record
            .offset()
            .ok_or_else(|| RasterError::new(ErrorCode::XrefRecord, at))?;

        let mut pos = offset;
        let header_ok = lexer.parse_uint(&mut pos)? == Some(num)
            && lexer.parse_uint(&mut pos)? == Some(0)
            && lexer.expect_token(&mut pos, b"obj")?;
        if !header_ok {
            return Err(RasterError::new(ErrorCode::ObjectHeader, offset));
        }

        log::trace!("object {} resolved to offset {}", num, offset);
        Ok(pos)
    }
}
