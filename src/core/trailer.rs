use super::error::{Dispatcher, ErrorCode, RasterError, RasterResult};
use super::lexer::Lexer;
use super::page_tree;
use super::parser::Parser;
use super::source::{ByteSource, read_fully};
use super::xref::XrefTable;
use std::fmt;

/// Highest PDF/raster major version this library reads.
pub const MAX_MAJOR_VERSION: u32 = 1;

/// Highest PDF/raster minor version this library knows about.
pub const MAX_MINOR_VERSION: u32 = 0;

/// Bytes at the end of the source searched for the trailer keywords.
pub const TAIL_SIZE: usize = 1024;

/// Bytes at the start of the source inspected by recognition.
pub const HEADER_SIZE: usize = 32;

const VERSION_TAG: &[u8] = b"%PDF-raster-";

/// A PDF/raster version, as found in the `%PDF-raster-<major>.<minor>` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32) -> Self {
        Version { major, minor }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// What the tail of the source says about the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tail {
    pub version: Version,
    /// Offset of the version tag's `%`
    pub version_offset: u64,
    /// Offset given by `startxref`
    pub xref_offset: u64,
}

/// Outcome of a pre-flight check on an unknown source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recognition {
    /// Version from the tag, whenever the tag was well-formed
    pub version: Option<Version>,
    /// Why the source cannot be read, or `None` if it can
    pub error: Option<RasterError>,
}

impl Recognition {
    pub fn is_supported(&self) -> bool {
        self.error.is_none()
    }
}

/// Tables built when a document is opened.
#[derive(Debug)]
pub struct DocumentIndex {
    pub version: Version,
    pub xref: XrefTable,
    /// Offset of each page object's body, in document order
    pub pages: Vec<u64>,
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .rposition(|window| window == needle)
}

/// Parses a run of ASCII digits starting at `start`; returns the value and
/// the index just past the run.
fn parse_digits(bytes: &[u8], start: usize) -> Option<(u64, usize)> {
    let mut end = start;
    let mut value: u64 = 0;
    while let Some(&b) = bytes.get(end) {
        if !b.is_ascii_digit() {
            break;
        }
        value = value.checked_mul(10)?.checked_add(u64::from(b - b'0'))?;
        end += 1;
    }
    (end > start).then_some((value, end))
}

fn skip_ascii_whitespace(bytes: &[u8], mut index: usize) -> usize {
    while bytes.get(index).is_some_and(u8::is_ascii_whitespace) {
        index += 1;
    }
    index
}

fn read_tail_bytes(source: &mut dyn ByteSource, size: u64) -> RasterResult<(u64, Vec<u8>)> {
    if size == 0 {
        return Err(RasterError::new(ErrorCode::EmptySource, 0));
    }

    let start = size.saturating_sub(TAIL_SIZE as u64);
    let mut buf = vec![0u8; (size - start) as usize];
    let read = read_fully(source, start, &mut buf)?;
    if read < buf.len() {
        return Err(RasterError::new(ErrorCode::ShortRead, start + read as u64));
    }
    Ok((start, buf))
}

/// Parses the last `%PDF-raster-<major>.<minor><EOL>` tag in
/// `buf[..end]`, where `buf` holds the source from offset `start`.
///
/// Returns the version and the offset of the tag's `%`.
fn parse_version_tag(
    source: &mut dyn ByteSource,
    buf: &[u8],
    start: u64,
    end: usize,
    missing_at: u64,
) -> RasterResult<(Version, u64)> {
    let region = &buf[..end];
    let tag = rfind(region, VERSION_TAG)
        .ok_or_else(|| RasterError::new(ErrorCode::NoVersionTag, missing_at))?;
    let version_offset = start + tag as u64;
    let bad_tag = || RasterError::new(ErrorCode::BadVersionTag, version_offset);

    let previous = if tag > 0 {
        Some(buf[tag - 1])
    } else if start > 0 {
        let mut byte = [0u8; 1];
        read_fully(source, start - 1, &mut byte)?;
        Some(byte[0])
    } else {
        None
    };
    if !matches!(previous, None | Some(b'\r') | Some(b'\n')) {
        return Err(bad_tag());
    }

    let (major, dot) = parse_digits(region, tag + VERSION_TAG.len()).ok_or_else(bad_tag)?;
    if region.get(dot) != Some(&b'.') {
        return Err(bad_tag());
    }
    let (minor, eol) = parse_digits(region, dot + 1).ok_or_else(bad_tag)?;
    if !(region[eol..].starts_with(b"\r\n") || region[eol..].starts_with(b"\n")) {
        return Err(bad_tag());
    }

    let version = Version::new(
        u32::try_from(major).map_err(|_| bad_tag())?,
        u32::try_from(minor).map_err(|_| bad_tag())?,
    );
    Ok((version, version_offset))
}

/// Finds `%%EOF`, `startxref` and the version tag in the last
/// [`TAIL_SIZE`] bytes, scanning backward.
///
/// The tag must start a line and end with CRLF or LF; `startxref` must come
/// after it and `%%EOF` last.
pub fn read_tail(source: &mut dyn ByteSource, size: u64) -> RasterResult<Tail> {
    let (start, buf) = read_tail_bytes(source, size)?;

    // %%EOF, followed by nothing but whitespace
    let eof = rfind(&buf, b"%%EOF").ok_or_else(|| RasterError::new(ErrorCode::NoEof, size))?;
    if skip_ascii_whitespace(&buf, eof + 5) != buf.len() {
        return Err(RasterError::new(ErrorCode::NoEof, start + eof as u64));
    }

    // startxref <offset>
    let keyword = rfind(&buf[..eof], b"startxref")
        .ok_or_else(|| RasterError::new(ErrorCode::NoStartxref, start + eof as u64))?;
    let keyword_offset = start + keyword as u64;
    let bad_startxref = || RasterError::new(ErrorCode::BadStartxref, keyword_offset);
    let digits = skip_ascii_whitespace(&buf[..eof], keyword + 9);
    let (xref_offset, end) = parse_digits(&buf[..eof], digits).ok_or_else(bad_startxref)?;
    if skip_ascii_whitespace(&buf[..eof], end) != eof || xref_offset >= size {
        return Err(bad_startxref());
    }

    let (version, version_offset) = parse_version_tag(source, &buf, start, keyword, keyword_offset)?;
    log::debug!("PDF/raster {} tag at offset {}", version, version_offset);

    Ok(Tail {
        version,
        version_offset,
        xref_offset,
    })
}

/// Version from the last well-formed tag in the tail, whatever surrounds it.
fn tag_version(source: &mut dyn ByteSource) -> Option<Version> {
    let size = source.size().ok()?;
    let (start, buf) = read_tail_bytes(source, size).ok()?;
    parse_version_tag(source, &buf, start, buf.len(), size)
        .ok()
        .map(|(version, _)| version)
}

/// Rejects an unsupported major version; warns about a newer minor version.
pub fn check_version(tail: &Tail, dispatcher: &Dispatcher) -> RasterResult<()> {
    let version = tail.version;
    if version.major > MAX_MAJOR_VERSION {
        return Err(RasterError::new(
            ErrorCode::MajorVersionUnsupported,
            tail.version_offset,
        ));
    }
    if version.major == MAX_MAJOR_VERSION && version.minor > MAX_MINOR_VERSION {
        dispatcher.warn(ErrorCode::MinorVersionUnsupported, tail.version_offset);
    }
    Ok(())
}

fn locate_tail(source: &mut dyn ByteSource) -> RasterResult<Tail> {
    let size = source
        .size()
        .map_err(|_| RasterError::new(ErrorCode::SizeFailed, 0))?;
    if size == 0 {
        return Err(RasterError::new(ErrorCode::EmptySource, 0));
    }

    let mut header = [0u8; HEADER_SIZE];
    let wanted = (HEADER_SIZE as u64).min(size) as usize;
    let read = read_fully(source, 0, &mut header[..wanted])?;
    if !header[..read].starts_with(b"%PDF-1.") {
        return Err(RasterError::new(ErrorCode::NotPdf, 0));
    }

    read_tail(source, size)
}

/// Classifies a source from its header and tail alone.
///
/// No table is loaded and nothing is retained.
pub fn recognize(source: &mut dyn ByteSource, dispatcher: &Dispatcher) -> Recognition {
    match locate_tail(source) {
        Ok(tail) => Recognition {
            version: Some(tail.version),
            error: check_version(&tail, dispatcher).err(),
        },
        Err(error) => {
            // A broken trailer does not hide a readable tag
            let version = match error.code {
                ErrorCode::NoEof | ErrorCode::NoStartxref | ErrorCode::BadStartxref => {
                    tag_version(source)
                }
                _ => None,
            };
            Recognition {
                version,
                error: Some(error),
            }
        }
    }
}

/// Resolves the trailer and catalog and builds the page table.
///
/// Tail → xref table → `trailer` dictionary → `/Root` catalog → `/Pages`
/// → `/Count` → page tree walk.
pub fn load_document(lexer: &mut Lexer, dispatcher: &Dispatcher) -> RasterResult<DocumentIndex> {
    let size = lexer.window().size();
    let tail = read_tail(lexer.window().source_mut(), size)?;
    check_version(&tail, dispatcher)?;

    let xref = XrefTable::load(lexer, tail.xref_offset)?;
    xref.validate()?;

    let mut pos = xref.end();
    lexer.skip_whitespace(&mut pos)?;
    let keyword = pos;
    if !lexer.expect_token(&mut pos, b"trailer")? {
        return Err(RasterError::new(ErrorCode::NoTrailer, keyword));
    }
    let trailer = pos;

    let mut parser = Parser::new(lexer, Some(&xref), dispatcher);
    parser.parse_dictionary(&mut pos)?;

    if parser.dictionary_lookup_direct(trailer, b"Encrypt")?.is_some() {
        return Err(RasterError::new(ErrorCode::Encrypted, trailer));
    }

    let root = parser
        .dictionary_lookup_direct(trailer, b"Root")?
        .ok_or_else(|| RasterError::new(ErrorCode::NoRoot, trailer))?;
    let mut cursor = root;
    let (num, generation) = parser
        .parse_reference(&mut cursor)?
        .ok_or_else(|| RasterError::new(ErrorCode::RootNotReference, root))?;
    let catalog = parser.resolve_indirect_reference(num, generation, root)?;

    if parser.lookup_name(catalog, b"Type")?.as_deref() != Some(&b"Catalog"[..]) {
        return Err(RasterError::new(ErrorCode::CatalogType, catalog));
    }

    let pages_root = parser
        .dictionary_lookup(catalog, b"Pages")?
        .ok_or_else(|| RasterError::new(ErrorCode::NoPages, catalog))?;
    let count = parser
        .lookup_uint(pages_root, b"Count")?
        .ok_or_else(|| RasterError::new(ErrorCode::NoPageCount, pages_root))?;
    // Every page is its own object, so /Count can never exceed the xref size
    if count >= xref.len() as u64 {
        return Err(RasterError::new(ErrorCode::PageCountMismatch, pages_root));
    }

    let pages = page_tree::build_page_table(&mut parser, pages_root, count as usize)?;
    log::debug!(
        "opened PDF/raster {}: {} xref entries, {} pages",
        tail.version,
        xref.len(),
        pages.len()
    );

    Ok(DocumentIndex {
        version: tail.version,
        xref,
        pages,
    })
}
