use super::colorspace::{ColorSpace, PixelFormat, parse_colorspace};
use super::error::{ErrorCode, RasterError, RasterResult};
use super::parser::Parser;

/// PDF user-space units per inch.
pub const POINTS_PER_INCH: f64 = 72.0;

/// Relative distance within which a DPI value snaps to the nearest integer.
const DPI_SNAP_TOLERANCE: f64 = 1e-5;

/// How a strip's payload is encoded.
///
/// The reader never decodes payloads; this only tells the caller which
/// decoder to hand the raw bytes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    /// No `/Filter`
    Uncompressed,
    /// `/CCITTFaxDecode`, bitonal strips only
    CcittG4,
    /// `/DCTDecode`, 8-bit strips only
    Jpeg,
    /// `/FlateDecode`
    Flate,
}

impl Compression {
    fn from_filter(name: &[u8]) -> Option<Self> {
        match name {
            b"CCITTFaxDecode" => Some(Compression::CcittG4),
            b"DCTDecode" => Some(Compression::Jpeg),
            b"FlateDecode" => Some(Compression::Flate),
            _ => None,
        }
    }

    /// Returns the `/Filter` name for this mode, if it has one.
    pub fn filter_name(self) -> Option<&'static str> {
        match self {
            Compression::Uncompressed => None,
            Compression::CcittG4 => Some("CCITTFaxDecode"),
            Compression::Jpeg => Some("DCTDecode"),
            Compression::Flate => Some("FlateDecode"),
        }
    }

    fn accepts(self, format: PixelFormat) -> bool {
        match self {
            Compression::CcittG4 => format == PixelFormat::Bitonal,
            Compression::Jpeg => format.bits_per_component() == 8,
            Compression::Uncompressed | Compression::Flate => true,
        }
    }
}

/// Metadata of one strip image.
///
/// Computed on every query and never cached.
#[derive(Debug, Clone, PartialEq)]
pub struct StripInfo {
    /// Offset of the image stream dictionary
    pub dict_offset: u64,
    /// Offset of the first payload byte
    pub data_offset: u64,
    /// Payload length in bytes, as stored (possibly compressed)
    pub raw_size: u64,
    pub compression: Compression,
    pub format: PixelFormat,
    pub colorspace: ColorSpace,
    pub width: u32,
    pub height: u32,
}

/// Metadata of one page, aggregated over its strips.
///
/// The first strip fixes width, pixel format and colorspace; every other
/// strip must agree with it. Height is the sum of all strip heights.
#[derive(Debug, Clone, PartialEq)]
pub struct PageInfo {
    /// Offset of the page object's body
    pub offset: u64,
    /// `[0, 0, width_pt, height_pt]` after normalization
    pub media_box: [f64; 4],
    pub format: PixelFormat,
    pub colorspace: ColorSpace,
    pub width: u32,
    pub height: u32,
    /// Clockwise rotation: 0, 90, 180 or 270
    pub rotation: u32,
    pub xdpi: f64,
    pub ydpi: f64,
    pub strip_count: u32,
    /// Largest `raw_size` of any strip on the page
    pub max_strip_size: u64,
}

/// A page's `/Resources/XObject` dictionary after its names were checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripDirectory {
    /// Offset of the XObject dictionary
    pub offset: u64,
    pub count: u32,
}

/// Parses `strip<N>`, where N is a decimal number without leading zeros.
fn strip_number(key: &[u8]) -> Option<u32> {
    let digits = key.strip_prefix(b"strip")?;
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    if digits.len() > 1 && digits[0] == b'0' {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// Scans the page's XObject dictionary once, end to end.
///
/// Every key must be `strip<N>` and the numbers must be exactly
/// `0..count`, in any order.
pub fn strip_directory(parser: &mut Parser<'_>, page: u64) -> RasterResult<StripDirectory> {
    let resources = parser
        .dictionary_lookup(page, b"Resources")?
        .ok_or_else(|| RasterError::new(ErrorCode::NoResources, page))?;
    let xobject = parser
        .dictionary_lookup(resources, b"XObject")?
        .ok_or_else(|| RasterError::new(ErrorCode::NoXObject, resources))?;

    let mut numbers: Vec<u32> = Vec::new();
    let mut cursor = xobject;
    parser.open_dictionary(&mut cursor)?;
    loop {
        let key_at = cursor;
        let Some((key, _)) = parser.next_entry(&mut cursor)? else {
            break;
        };
        let number = strip_number(&key).ok_or_else(|| RasterError::new(ErrorCode::StripName, key_at))?;
        numbers
            .try_reserve(1)
            .map_err(|_| RasterError::new(ErrorCode::OutOfMemory, key_at))?;
        numbers.push(number);
    }

    if numbers.is_empty() {
        return Err(RasterError::new(ErrorCode::NoStrips, xobject));
    }
    numbers.sort_unstable();
    if numbers.iter().enumerate().any(|(i, &n)| n as usize != i) {
        return Err(RasterError::new(ErrorCode::StripSequence, xobject));
    }

    let count = u32::try_from(numbers.len()).map_err(|_| RasterError::new(ErrorCode::NumericOverflow, xobject))?;
    Ok(StripDirectory {
        offset: xobject,
        count,
    })
}

/// Returns the body offset of strip `index`, which must be below
/// `directory.count`.
pub fn find_strip(parser: &mut Parser<'_>, directory: &StripDirectory, index: u32) -> RasterResult<u64> {
    let key = format!("strip{}", index);
    let value = parser
        .dictionary_lookup_direct(directory.offset, key.as_bytes())?
        .ok_or_else(|| RasterError::new(ErrorCode::InternalState, directory.offset))?;

    let mut cursor = value;
    let (num, generation) = parser
        .parse_reference(&mut cursor)?
        .ok_or_else(|| RasterError::new(ErrorCode::StripNotReference, value))?;
    parser.resolve_indirect_reference(num, generation, value)
}

fn dimension(parser: &mut Parser<'_>, dict: u64, key: &[u8], code: ErrorCode) -> RasterResult<u32> {
    parser
        .lookup_uint(dict, key)?
        .filter(|&value| value > 0)
        .and_then(|value| u32::try_from(value).ok())
        .ok_or_else(|| RasterError::new(code, dict))
}

fn strip_compression(parser: &mut Parser<'_>, dict: u64, format: PixelFormat) -> RasterResult<Compression> {
    let Some(value) = parser.dictionary_lookup(dict, b"Filter")? else {
        return Ok(Compression::Uncompressed);
    };

    // Filter chains are not part of the profile, so an array never matches
    let compression = parser
        .read_name(value)?
        .and_then(|name| Compression::from_filter(&name))
        .ok_or_else(|| RasterError::new(ErrorCode::UnsupportedFilter, value))?;

    if !compression.accepts(format) {
        return Err(RasterError::new(ErrorCode::FilterFormat, value));
    }
    Ok(compression)
}

/// Validates the image stream whose object body starts at `object`.
pub fn read_strip(parser: &mut Parser<'_>, object: u64) -> RasterResult<StripInfo> {
    let mut cursor = object;
    let span = parser
        .parse_dictionary_or_stream(&mut cursor)?
        .ok_or_else(|| RasterError::new(ErrorCode::StripNotStream, object))?;
    let dict = span.dict;

    if let Some(kind) = parser.lookup_name(dict, b"Type")? {
        if kind.as_slice() != b"XObject" {
            return Err(RasterError::new(ErrorCode::XObjectType, dict));
        }
    }
    if parser.lookup_name(dict, b"Subtype")?.as_deref() != Some(&b"Image"[..]) {
        return Err(RasterError::new(ErrorCode::NotImage, dict));
    }

    let bits_per_component = match parser.lookup_uint(dict, b"BitsPerComponent")? {
        Some(bits @ (1 | 8 | 16)) => bits as u8,
        _ => return Err(RasterError::new(ErrorCode::BitsPerComponent, dict)),
    };
    let width = dimension(parser, dict, b"Width", ErrorCode::StripWidth)?;
    let height = dimension(parser, dict, b"Height", ErrorCode::StripHeight)?;

    let colorspace_at = parser
        .dictionary_lookup(dict, b"ColorSpace")?
        .ok_or_else(|| RasterError::new(ErrorCode::NoColorSpace, dict))?;
    let colorspace = parse_colorspace(parser, colorspace_at, bits_per_component)?;
    let format = colorspace
        .infer_pixel_format()
        .ok_or_else(|| RasterError::new(ErrorCode::PixelFormat, colorspace_at))?;

    let compression = strip_compression(parser, dict, format)?;

    Ok(StripInfo {
        dict_offset: dict,
        data_offset: span.data,
        raw_size: span.length,
        compression,
        format,
        colorspace,
        width,
        height,
    })
}

/// Metadata of strip `index` of the page at `page`.
pub fn strip_info(parser: &mut Parser<'_>, page: u64, index: u32) -> RasterResult<StripInfo> {
    let directory = strip_directory(parser, page)?;
    if index >= directory.count {
        return Err(RasterError::new(ErrorCode::StripIndex, page));
    }
    let object = find_strip(parser, &directory, index)?;
    read_strip(parser, object)
}

fn page_rotation(parser: &mut Parser<'_>, page: u64) -> RasterResult<u32> {
    let Some(value) = parser.dictionary_lookup(page, b"Rotate")? else {
        return Ok(0);
    };
    let degrees = parser
        .read_number(value)?
        .filter(|&d| d >= 0.0 && d.fract() == 0.0 && d % 90.0 == 0.0 && d <= f64::from(u32::MAX))
        .ok_or_else(|| RasterError::new(ErrorCode::Rotate, value))?;
    Ok(degrees as u32 % 360)
}

/// Reads `/MediaBox` and normalizes it to `[0, 0, width, height]`.
fn media_box(parser: &mut Parser<'_>, page: u64) -> RasterResult<[f64; 4]> {
    let value = parser
        .dictionary_lookup(page, b"MediaBox")?
        .ok_or_else(|| RasterError::new(ErrorCode::NoMediaBox, page))?;
    let mut rect = [0.0; 4];
    if !parser.read_number_array(value, &mut rect)? {
        return Err(RasterError::new(ErrorCode::MediaBoxSyntax, value));
    }

    let [x0, y0, x1, y1] = rect;
    let (left, right) = (x0.min(x1), x0.max(x1));
    let (bottom, top) = (y0.min(y1), y0.max(y1));
    if left != 0.0 || bottom != 0.0 {
        return Err(RasterError::new(ErrorCode::MediaBoxOrigin, value));
    }
    if right == 0.0 || top == 0.0 {
        return Err(RasterError::new(ErrorCode::MediaBoxEmpty, value));
    }
    Ok([0.0, 0.0, right, top])
}

/// `pixels` spread over `points`, in dots per inch.
///
/// Values within 0.001% of an integer are snapped to it, so that a page
/// built for 300 DPI reports exactly 300.
pub fn dpi(pixels: u32, points: f64) -> f64 {
    let value = f64::from(pixels) * POINTS_PER_INCH / points;
    let rounded = value.round();
    if (value - rounded).abs() <= rounded.abs() * DPI_SNAP_TOLERANCE {
        rounded
    } else {
        value
    }
}

/// Validates the page at `page` and aggregates its strips.
pub fn page_info(parser: &mut Parser<'_>, page: u64) -> RasterResult<PageInfo> {
    if parser.lookup_name(page, b"Type")?.as_deref() != Some(&b"Page"[..]) {
        return Err(RasterError::new(ErrorCode::PageType, page));
    }
    let rotation = page_rotation(parser, page)?;
    let media_box = media_box(parser, page)?;
    let directory = strip_directory(parser, page)?;

    let object = find_strip(parser, &directory, 0)?;
    let first = read_strip(parser, object)?;
    let mut height = first.height;
    let mut max_strip_size = first.raw_size;

    for index in 1..directory.count {
        let object = find_strip(parser, &directory, index)?;
        let strip = read_strip(parser, object)?;

        if strip.width != first.width {
            return Err(RasterError::new(ErrorCode::WidthMismatch, strip.dict_offset));
        }
        if strip.format != first.format {
            return Err(RasterError::new(ErrorCode::FormatMismatch, strip.dict_offset));
        }
        if strip.colorspace != first.colorspace {
            return Err(RasterError::new(ErrorCode::ColorSpaceMismatch, strip.dict_offset));
        }

        height = height
            .checked_add(strip.height)
            .ok_or_else(|| RasterError::new(ErrorCode::NumericOverflow, strip.dict_offset))?;
        max_strip_size = max_strip_size.max(strip.raw_size);
    }

    log::trace!(
        "page at {}: {}x{} in {} strips",
        page,
        first.width,
        height,
        directory.count
    );

    Ok(PageInfo {
        offset: page,
        media_box,
        format: first.format,
        xdpi: dpi(first.width, media_box[2]),
        ydpi: dpi(height, media_box[3]),
        colorspace: first.colorspace,
        width: first.width,
        height,
        rotation,
        strip_count: directory.count,
        max_strip_size,
    })
}
