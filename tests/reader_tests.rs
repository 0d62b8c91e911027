//! Reader facade tests
//!
//! Every document here is assembled by `RasterPdfBuilder`, then queried (or
//! corrupted and queried) through the public `Reader` API.


use pdf_raster::*;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use test_utils::*;

// ============================================================================
// Page geometry
// ============================================================================

#[test]
fn test_letter_page_at_100_dpi() {
    let (mut reader, seen, result) = open(letter_100dpi());
    result.unwrap();

    assert_eq!(reader.page_count().unwrap(), 1);
    assert_eq!(reader.page_width(0).unwrap(), 850);
    assert_eq!(reader.page_height(0).unwrap(), 1100);
    assert_eq!(reader.page_horizontal_dpi(0).unwrap(), 100.0);
    assert_eq!(reader.page_vertical_dpi(0).unwrap(), 100.0);
    assert_eq!(reader.page_pixel_format(0).unwrap(), PixelFormat::Bitonal);
    assert_eq!(reader.page_bits_per_component(0).unwrap(), 1);
    assert_eq!(reader.page_rotation(0).unwrap(), 0);
    assert_eq!(reader.page_strip_count(0).unwrap(), 1);
    assert_eq!(reader.page_max_strip_size(0).unwrap(), 64);
    assert_eq!(reader.page_media_box(0).unwrap(), [0.0, 0.0, 612.0, 792.0]);
    assert_eq!(reader.strip_compression(0, 0).unwrap(), Compression::CcittG4);
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn test_page_height_is_sum_of_strips() {
    let mut builder = RasterPdfBuilder::new();
    builder.add_page(&PageSpec::letter(vec![
        StripSpec::gray(64, 100, 8),
        StripSpec::gray(64, 250, 8),
        StripSpec::gray(64, 50, 8),
    ]));
    let (mut reader, _, result) = open(builder.build());
    result.unwrap();

    let info = reader.page_info(0).unwrap();
    assert_eq!(info.strip_count, 3);
    assert_eq!(info.height, 400);
    assert_eq!(info.width, 64);
    assert_eq!(info.max_strip_size, 64 * 250);

    let heights: u32 = (0..3).map(|s| reader.strip_height(0, s).unwrap()).sum();
    assert_eq!(heights, info.height);
    assert_eq!(reader.strip_raw_size(0, 2).unwrap(), 64 * 50);
}

#[test]
fn test_multiple_pages_in_document_order() {
    let mut builder = RasterPdfBuilder::new();
    builder.add_page(&PageSpec::letter(vec![StripSpec::gray(10, 10, 8)]));
    builder.add_page(&PageSpec::new("[0 0 300 300]", vec![StripSpec::rgb(20, 20, 8)]));
    builder.add_page(&PageSpec::letter(vec![StripSpec::gray(30, 30, 16)]).with_rotate("270"));
    let (mut reader, _, result) = open(builder.build());
    result.unwrap();

    assert_eq!(reader.page_count().unwrap(), 3);
    assert_eq!(reader.page_width(0).unwrap(), 10);
    assert_eq!(reader.page_width(1).unwrap(), 20);
    assert_eq!(reader.page_pixel_format(1).unwrap(), PixelFormat::Rgb24);
    assert_eq!(reader.page_pixel_format(2).unwrap(), PixelFormat::Gray16);
    assert_eq!(reader.page_rotation(2).unwrap(), 270);
    assert_eq!(reader.page_bits_per_component(2).unwrap(), 16);
}

#[test]
fn test_zero_page_document() {
    let builder = RasterPdfBuilder::new();
    let (reader, seen, result) = open(builder.build());
    result.unwrap();

    assert_eq!(reader.page_count().unwrap(), 0);
    assert!(seen.lock().unwrap().is_empty());
}

// ============================================================================
// Strip consistency
// ============================================================================

fn mismatch(second: StripSpec) -> ErrorCode {
    let mut builder = RasterPdfBuilder::new();
    builder.add_page(&PageSpec::letter(vec![StripSpec::gray(64, 10, 8), second]));
    let (mut reader, seen, result) = open(builder.build());
    result.unwrap();

    let err = reader.page_info(0).unwrap_err();
    assert_eq!(codes(&seen), vec![err.code], "reported exactly once");
    err.code
}

#[test]
fn test_mismatched_strips_fail() {
    assert_eq!(mismatch(StripSpec::gray(65, 10, 8)), ErrorCode::WidthMismatch);
    assert_eq!(mismatch(StripSpec::gray(64, 10, 16)), ErrorCode::FormatMismatch);
    assert_eq!(
        mismatch(
            StripSpec::gray(64, 10, 8).with_colorspace("[/CalGray << /WhitePoint [0.9505 1 1.089] /Gamma 2.2 >>]")
        ),
        ErrorCode::ColorSpaceMismatch
    );
}

#[test]
fn test_mismatched_strip_still_readable_alone() {
    let mut builder = RasterPdfBuilder::new();
    builder.add_page(&PageSpec::letter(vec![
        StripSpec::gray(64, 10, 8),
        StripSpec::gray(65, 10, 8),
    ]));
    let (mut reader, _, result) = open(builder.build());
    result.unwrap();

    assert_eq!(reader.strip_info(0, 1).unwrap().width, 65);
    assert!(reader.page_width(0).is_err());
}

fn icc_stream(components: u8) -> String {
    format!(
        "<< /N {} /Length 16 >>\nstream\n0123456789ABCDEF\nendstream",
        components
    )
}

#[test]
fn test_separately_loaded_icc_profiles_differ() {
    let mut builder = RasterPdfBuilder::new();
    let first = builder.add_object(icc_stream(1));
    let second = builder.add_object(icc_stream(1));
    builder.add_page(&PageSpec::letter(vec![
        StripSpec::gray(64, 10, 8).with_colorspace(&format!("[/ICCBased {} 0 R]", first)),
        StripSpec::gray(64, 10, 8).with_colorspace(&format!("[/ICCBased {} 0 R]", second)),
    ]));
    let (mut reader, _, result) = open(builder.build());
    result.unwrap();

    let a = reader.strip_info(0, 0).unwrap().colorspace;
    let b = reader.strip_info(0, 1).unwrap().colorspace;
    assert_eq!(a, a.clone());
    assert_ne!(a, b);
    assert_ne!(b, a);

    match &a.kind {
        ColorSpaceKind::IccBased(profile) => {
            assert_eq!(profile.data(), b"0123456789ABCDEF");
            assert_eq!(profile.components(), 1);
        }
        other => panic!("unexpected colorspace {:?}", other),
    }

    assert_eq!(reader.page_info(0).unwrap_err().code, ErrorCode::ColorSpaceMismatch);
}

#[test]
fn test_shared_icc_profile_is_one_colorspace() {
    let mut builder = RasterPdfBuilder::new();
    let profile = builder.add_object(icc_stream(3));
    let colorspace = format!("[/ICCBased {} 0 R]", profile);
    builder.add_page(&PageSpec::letter(vec![
        StripSpec::rgb(64, 10, 8).with_colorspace(&colorspace),
        StripSpec::rgb(64, 10, 8).with_colorspace(&colorspace),
    ]));
    let (mut reader, _, result) = open(builder.build());
    result.unwrap();

    assert_eq!(reader.page_pixel_format(0).unwrap(), PixelFormat::Rgb24);
    assert_eq!(reader.page_colorspace(0).unwrap().family_name(), "ICCBased");
}

#[test]
fn test_cal_gray_gamma_warning_does_not_fail() {
    let mut builder = RasterPdfBuilder::new();
    builder.add_page(&PageSpec::letter(vec![
        StripSpec::gray(8, 8, 8).with_colorspace("[/CalGray << /WhitePoint [1 1 1] /Gamma 1.0 >>]"),
    ]));
    let (mut reader, seen, result) = open(builder.build());
    result.unwrap();

    assert_eq!(reader.page_width(0).unwrap(), 8);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].code, ErrorCode::CalGrayGamma);
    assert_eq!(seen[0].severity, Severity::Warning);
}

// ============================================================================
// Reading strip data
// ============================================================================

#[test]
fn test_read_strip_into_exact_buffer() {
    let (mut reader, _, result) = open(letter_100dpi());
    result.unwrap();

    let mut buf = vec![0u8; 64];
    assert_eq!(reader.read_strip(0, 0, &mut buf).unwrap(), 64);
    assert_eq!(buf, (0..64u8).collect::<Vec<_>>());

    let mut larger = vec![0xFFu8; 100];
    assert_eq!(reader.read_strip(0, 0, &mut larger).unwrap(), 64);
    assert_eq!(larger[64], 0xFF);
}

#[test]
fn test_read_strip_into_small_buffer() {
    let (mut reader, seen, result) = open(letter_100dpi());
    result.unwrap();

    let mut buf = vec![0x55u8; 63];
    let err = reader.read_strip(0, 0, &mut buf).unwrap_err();
    assert_eq!(err.code, ErrorCode::BufferTooSmall);
    assert_eq!(err.severity, Severity::Api);
    assert!(buf.iter().all(|&b| b == 0x55));
    assert_eq!(codes(&seen), vec![ErrorCode::BufferTooSmall]);
}

/// Serves bulk reads only up to `limit`; window-sized reads are untouched.
struct StallingSource {
    inner: MemorySource,
    limit: Arc<AtomicU64>,
}

impl ByteSource for StallingSource {
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if buf.len() <= 1024 {
            return self.inner.read(offset, buf);
        }
        let limit = self.limit.load(Ordering::SeqCst);
        if offset >= limit {
            return Ok(0);
        }
        let take = buf.len().min((limit - offset) as usize);
        self.inner.read(offset, &mut buf[..take])
    }

    fn size(&mut self) -> io::Result<u64> {
        self.inner.size()
    }
}

#[test]
fn test_source_ending_early_leaves_buffer_untouched() {
    let mut builder = RasterPdfBuilder::new();
    builder.add_page(&PageSpec::letter(vec![StripSpec::gray(64, 32, 8)]));
    let limit = Arc::new(AtomicU64::new(u64::MAX));
    let source = StallingSource {
        inner: MemorySource::from_bytes(builder.build()),
        limit: Arc::clone(&limit),
    };

    let (mut reader, seen) = capturing_reader();
    reader.open(Box::new(source)).unwrap();
    let info = reader.strip_info(0, 0).unwrap();
    assert_eq!(info.raw_size, 2048);

    // The source now gives up half a kilobyte into the payload
    limit.store(info.data_offset + 512, Ordering::SeqCst);
    let mut buf = vec![0x55u8; 2048];
    let err = reader.read_strip(0, 0, &mut buf).unwrap_err();
    assert_eq!(err.code, ErrorCode::ShortRead);
    assert_eq!(err.offset, info.data_offset + 512);
    assert!(buf.iter().all(|&b| b == 0x55));
    assert_eq!(codes(&seen), vec![ErrorCode::ShortRead]);

    limit.store(u64::MAX, Ordering::SeqCst);
    assert_eq!(reader.read_strip(0, 0, &mut buf).unwrap(), 2048);
    assert!(buf.iter().all(|&b| b == 0xAA));
}

// ============================================================================
// Recognition
// ============================================================================

#[test]
fn test_missing_eof_differs_from_wrong_major() {
    let (reader, seen) = capturing_reader();

    let mut no_eof = letter_100dpi();
    patch(&mut no_eof, b"%%EOF", b"%%EOX");
    let recognition = reader.recognize_source(&mut MemorySource::from_bytes(no_eof.clone()));
    assert!(!recognition.is_supported());
    assert_eq!(recognition.error.unwrap().code, ErrorCode::NoEof);
    assert_eq!(open_error(no_eof), ErrorCode::NoEof);

    let major = RasterPdfBuilder::new().version_tag("%PDF-raster-2.0").build();
    let recognition = reader.recognize_source(&mut MemorySource::from_bytes(major.clone()));
    assert!(!recognition.is_supported());
    assert_eq!(recognition.version, Some(Version::new(2, 0)));
    assert_eq!(recognition.error.unwrap().code, ErrorCode::MajorVersionUnsupported);
    assert_eq!(open_error(major), ErrorCode::MajorVersionUnsupported);

    assert_eq!(
        codes(&seen),
        vec![ErrorCode::NoEof, ErrorCode::MajorVersionUnsupported]
    );
}

#[test]
fn test_broken_trailer_still_reports_tag_version() {
    let (reader, _) = capturing_reader();

    let mut no_eof = letter_100dpi();
    patch(&mut no_eof, b"%%EOF", b"%%EOX");
    let recognition = reader.recognize_source(&mut MemorySource::from_bytes(no_eof));
    assert_eq!(recognition.version, Some(Version::new(1, 0)));
    assert_eq!(recognition.error.unwrap().code, ErrorCode::NoEof);

    let mut no_startxref = RasterPdfBuilder::new().version_tag("%PDF-raster-1.7").build();
    patch(&mut no_startxref, b"startxref", b"startxrex");
    let recognition = reader.recognize_source(&mut MemorySource::from_bytes(no_startxref));
    assert_eq!(recognition.version, Some(Version::new(1, 7)));
    assert_eq!(recognition.error.unwrap().code, ErrorCode::NoStartxref);

    // A malformed tag still yields no version
    let mut bad_tag = letter_100dpi();
    patch(&mut bad_tag, b"%PDF-raster-1.0", b"%PDF-raster-1x0");
    patch(&mut bad_tag, b"%%EOF", b"%%EOX");
    let recognition = reader.recognize_source(&mut MemorySource::from_bytes(bad_tag));
    assert_eq!(recognition.version, None);
    assert_eq!(recognition.error.unwrap().code, ErrorCode::NoEof);
}

#[test]
fn test_newer_minor_version_is_supported() {
    let bytes = RasterPdfBuilder::new().version_tag("%PDF-raster-1.3").build();

    let (reader, seen) = capturing_reader();
    let recognition = reader.recognize_source(&mut MemorySource::from_bytes(bytes.clone()));
    assert!(recognition.is_supported());
    assert_eq!(recognition.version, Some(Version::new(1, 3)));
    assert_eq!(
        codes(&seen),
        vec![ErrorCode::MinorVersionUnsupported, ErrorCode::SourceRecognized]
    );

    let (reader, seen, result) = open(bytes);
    result.unwrap();
    assert_eq!(reader.detected_version().unwrap(), Version::new(1, 3));
    assert_eq!(codes(&seen), vec![ErrorCode::MinorVersionUnsupported]);
}

#[test]
fn test_recognize_rejects_non_pdf() {
    let (reader, _) = capturing_reader();
    let recognition = reader.recognize_source(&mut MemorySource::from_bytes(b"GIF89a....".to_vec()));
    assert_eq!(recognition.version, None);
    assert_eq!(recognition.error.unwrap().code, ErrorCode::NotPdf);

    let recognition = reader.recognize_source(&mut MemorySource::from_bytes(Vec::new()));
    assert_eq!(recognition.error.unwrap().code, ErrorCode::EmptySource);
}

#[test]
fn test_recognize_does_not_open() {
    let (reader, _) = capturing_reader();
    let recognition = reader.recognize_source(&mut MemorySource::from_bytes(letter_100dpi()));
    assert!(recognition.is_supported());
    assert_eq!(recognition.version, Some(Version::new(1, 0)));
    assert!(!reader.is_open());
}

// ============================================================================
// Trailer and catalog
// ============================================================================

#[test]
fn test_xref_zero_entry_must_be_free_head() {
    let mut bytes = letter_100dpi();
    patch(&mut bytes, b"0000000000 65535 f", b"0000000000 65534 f");
    assert_eq!(open_error(bytes), ErrorCode::XrefZeroEntry);

    let mut bytes = letter_100dpi();
    patch(&mut bytes, b"0000000000 65535 f", b"0000000000 65535 n");
    assert_eq!(open_error(bytes), ErrorCode::XrefZeroEntry);
}

#[test]
fn test_indirect_object_stream_type_rejected() {
    let mut builder = RasterPdfBuilder::new();
    let name = builder.add_object("/ObjStm");
    let bytes = builder.trailer_entries(&format!(" /Type {} 0 R", name)).build();
    assert_eq!(open_error(bytes), ErrorCode::ObjectStream);

    let mut builder = RasterPdfBuilder::new();
    let name = builder.add_object("/XRef");
    let bytes = builder.trailer_entries(&format!(" /Type {} 0 R", name)).build();
    let (reader, _, result) = open(bytes);
    result.unwrap();
    assert_eq!(reader.page_count().unwrap(), 0);
}

#[test]
fn test_encrypted_document_rejected() {
    let bytes = {
        let mut builder = RasterPdfBuilder::new().trailer_entries(" /Encrypt << /Filter /Standard >>");
        builder.add_page(&PageSpec::letter(vec![StripSpec::gray(8, 8, 8)]));
        builder.build()
    };
    let err = {
        let (_, seen, result) = open(bytes);
        assert_eq!(seen.lock().unwrap().len(), 1);
        result.unwrap_err()
    };
    assert_eq!(err.code, ErrorCode::Encrypted);
    assert_eq!(err.severity, Severity::Compliance);
}

#[test]
fn test_catalog_errors() {
    let mut builder = RasterPdfBuilder::new();
    builder.set_object(1, "<< /Type /Outlines /Pages 2 0 R >>");
    assert_eq!(open_error(builder.build()), ErrorCode::CatalogType);

    let mut builder = RasterPdfBuilder::new();
    builder.set_object(1, "<< /Type /Catalog >>");
    assert_eq!(open_error(builder.build()), ErrorCode::NoPages);

    let mut bytes = RasterPdfBuilder::new().build();
    patch(&mut bytes, b"/Root 1 0 R", b"/Root  null");
    assert_eq!(open_error(bytes), ErrorCode::RootNotReference);

    let mut bytes = RasterPdfBuilder::new().build();
    patch(&mut bytes, b"/Root 1 0 R", b"/Rood 1 0 R");
    assert_eq!(open_error(bytes), ErrorCode::NoRoot);
}

#[test]
fn test_generation_must_be_zero() {
    let mut bytes = RasterPdfBuilder::new().build();
    patch(&mut bytes, b"/Root 1 0 R", b"/Root 1 1 R");
    let (_, seen, result) = open(bytes);
    assert_eq!(result.unwrap_err().code, ErrorCode::ReferenceGeneration);
    assert_eq!(
        codes(&seen),
        vec![ErrorCode::GenerationNotZero, ErrorCode::ReferenceGeneration]
    );
}

// ============================================================================
// Page errors
// ============================================================================

#[test]
fn test_page_errors_are_reported_per_query() {
    let mut builder = RasterPdfBuilder::new();
    builder.add_page(&PageSpec::new("[0 0 612]", vec![StripSpec::gray(8, 8, 8)]));
    builder.add_page(&PageSpec::letter(vec![StripSpec::gray(8, 8, 8)]).with_rotate("45"));
    builder.add_page(&PageSpec::letter(Vec::new()));
    let (mut reader, seen, result) = open(builder.build());
    result.unwrap();

    assert_eq!(reader.page_count().unwrap(), 3);
    assert_eq!(reader.page_width(0).unwrap_err().code, ErrorCode::MediaBoxSyntax);
    assert_eq!(reader.page_width(1).unwrap_err().code, ErrorCode::Rotate);
    assert_eq!(reader.page_width(2).unwrap_err().code, ErrorCode::NoStrips);
    assert_eq!(
        codes(&seen),
        vec![ErrorCode::MediaBoxSyntax, ErrorCode::Rotate, ErrorCode::NoStrips]
    );
}

#[test]
fn test_index_errors() {
    let (mut reader, _, result) = open(letter_100dpi());
    result.unwrap();

    let err = reader.page_info(1).unwrap_err();
    assert_eq!(err.code, ErrorCode::PageIndex);
    assert_eq!(err.severity, Severity::Api);
    assert_eq!(reader.strip_info(0, 1).unwrap_err().code, ErrorCode::StripIndex);
    assert_eq!(reader.strip_info(1, 0).unwrap_err().code, ErrorCode::PageIndex);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_api_level() {
    let context = Arc::new(RasterContext::new());
    assert_eq!(
        Reader::with_context(0, Arc::clone(&context)).err().map(|e| e.code),
        Some(ErrorCode::ApiLevel)
    );
    assert_eq!(
        Reader::with_context(API_LEVEL + 1, Arc::clone(&context)).err().map(|e| e.code),
        Some(ErrorCode::ApiLevel)
    );
    assert!(Reader::with_context(API_LEVEL, context).is_ok());
}

#[test]
fn test_queries_require_open_reader() {
    let (mut reader, seen) = capturing_reader();
    assert!(!reader.is_open());
    assert!(reader.source().is_none());

    assert_eq!(reader.page_count().unwrap_err().code, ErrorCode::NotOpen);
    assert_eq!(reader.page_width(0).unwrap_err().code, ErrorCode::NotOpen);
    assert_eq!(reader.detected_version().unwrap_err().code, ErrorCode::NotOpen);
    assert_eq!(reader.close().unwrap_err().code, ErrorCode::NotOpen);
    assert_eq!(seen.lock().unwrap().len(), 4);
}

#[test]
fn test_open_twice_fails() {
    let (mut reader, _, result) = open(letter_100dpi());
    result.unwrap();

    let err = reader.open(memory(letter_100dpi())).unwrap_err();
    assert_eq!(err.code, ErrorCode::AlreadyOpen);
    assert!(reader.is_open());
    assert_eq!(reader.page_count().unwrap(), 1);
}

#[test]
fn test_reader_is_reusable_after_close() {
    let (mut reader, _, result) = open(letter_100dpi());
    result.unwrap();
    assert!(reader.source().is_some());
    reader.close().unwrap();
    assert!(!reader.is_open());

    let mut builder = RasterPdfBuilder::new();
    builder.add_page(&PageSpec::letter(vec![StripSpec::gray(8, 8, 8)]));
    builder.add_page(&PageSpec::letter(vec![StripSpec::gray(8, 8, 8)]));
    reader.open(memory(builder.build())).unwrap();
    assert_eq!(reader.page_count().unwrap(), 2);
}

#[test]
fn test_close_calls_source_close_once() {
    let (source, closes) = ClosingSource::new(letter_100dpi());
    let (mut reader, _) = capturing_reader();
    reader.open(Box::new(source)).unwrap();
    reader.close().unwrap();
    drop(reader);
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    let (source, closes) = ClosingSource::new(letter_100dpi());
    {
        let (mut reader, _) = capturing_reader();
        reader.open(Box::new(source)).unwrap();
    }
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_failed_open_does_not_close_source() {
    let mut bytes = letter_100dpi();
    patch(&mut bytes, b"%%EOF", b"%%EOX");
    let (source, closes) = ClosingSource::new(bytes);

    let (mut reader, _) = capturing_reader();
    assert!(reader.open(Box::new(source)).is_err());
    assert!(!reader.is_open());
    drop(reader);
    assert_eq!(closes.load(Ordering::SeqCst), 0);
}

#[test]
fn test_reader_handler_overrides_context_default() {
    let (mut reader, context_seen) = capturing_reader();
    let local: Seen = Default::default();
    let sink = Arc::clone(&local);
    reader.set_error_handler(Some(Arc::new(move |d: &Diagnostic| sink.lock().unwrap().push(*d))));

    assert!(reader.page_count().is_err());
    assert!(context_seen.lock().unwrap().is_empty());
    assert_eq!(codes(&local), vec![ErrorCode::NotOpen]);

    reader.set_error_handler(None);
    assert!(reader.page_count().is_err());
    assert_eq!(codes(&context_seen), vec![ErrorCode::NotOpen]);
}

#[test]
fn test_version_queries() {
    assert_eq!(highest_supported_version(), Version::new(1, 0));
    assert_eq!(highest_supported_version().to_string(), "1.0");
    assert!(!library_version().is_empty());
}
