//! Colorspace and pixel-format resolution for strip images.
//!
//! Only five colorspace families exist in PDF/raster:
//! - `/DeviceGray` and `/DeviceRGB`
//! - `[/CalGray << ... >>]` and `[/CalRGB << ... >>]`
//! - `[/ICCBased n 0 R]`, whose profile stream is loaded verbatim

use super::error::{ErrorCode, RasterError, RasterResult};
use super::parser::Parser;

/// The only gamma CalGray may carry in this profile.
pub const CAL_GRAY_GAMMA: f64 = 2.2;

/// Numeric tolerance used when comparing calibration values.
const TOLERANCE: f64 = 1e-5;

const IDENTITY_MATRIX: [f64; 9] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

/// Pixel layout of raw (decompressed) strip data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 1-bit gray, 0 = black
    Bitonal,
    Gray8,
    Gray16,
    /// 8-bit RGB
    Rgb24,
    /// 16-bit RGB
    Rgb48,
}

impl PixelFormat {
    pub fn bits_per_component(self) -> u8 {
        match self {
            PixelFormat::Bitonal => 1,
            PixelFormat::Gray8 | PixelFormat::Rgb24 => 8,
            PixelFormat::Gray16 | PixelFormat::Rgb48 => 16,
        }
    }

    pub fn components(self) -> u8 {
        match self {
            PixelFormat::Bitonal | PixelFormat::Gray8 | PixelFormat::Gray16 => 1,
            PixelFormat::Rgb24 | PixelFormat::Rgb48 => 3,
        }
    }

    pub fn bits_per_pixel(self) -> u32 {
        u32::from(self.bits_per_component()) * u32::from(self.components())
    }
}

/// An ICC profile loaded from a stream object.
///
/// The bytes are never parsed. Two profiles are the same profile only if
/// they were loaded from the same object.
#[derive(Debug, Clone)]
pub struct IccProfile {
    data: Vec<u8>,
    /// `/N` of the profile stream: 1 (gray) or 3 (RGB)
    components: u8,
    /// Offset of the object the profile was loaded from
    offset: u64,
}

impl IccProfile {
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn components(&self) -> u8 {
        self.components
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Colorspace family with its per-family parameters.
#[derive(Debug, Clone)]
pub enum ColorSpaceKind {
    DeviceGray,
    DeviceRgb,
    CalGray {
        white_point: [f64; 3],
        black_point: [f64; 3],
        /// Always [`CAL_GRAY_GAMMA`]
        gamma: f64,
    },
    CalRgb {
        white_point: [f64; 3],
        black_point: [f64; 3],
        gamma: [f64; 3],
        matrix: [f64; 9],
    },
    IccBased(IccProfile),
}

fn close_enough(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() <= TOLERANCE)
}

impl PartialEq for ColorSpaceKind {
    fn eq(&self, other: &Self) -> bool {
        use ColorSpaceKind::*;

        match (self, other) {
            (DeviceGray, DeviceGray) | (DeviceRgb, DeviceRgb) => true,
            (
                CalGray {
                    white_point: w1,
                    black_point: b1,
                    gamma: g1,
                },
                CalGray {
                    white_point: w2,
                    black_point: b2,
                    gamma: g2,
                },
            ) => close_enough(w1, w2) && close_enough(b1, b2) && close_enough(&[*g1], &[*g2]),
            (
                CalRgb {
                    white_point: w1,
                    black_point: b1,
                    gamma: g1,
                    matrix: m1,
                },
                CalRgb {
                    white_point: w2,
                    black_point: b2,
                    gamma: g2,
                    matrix: m2,
                },
            ) => {
                close_enough(w1, w2)
                    && close_enough(b1, b2)
                    && close_enough(g1, g2)
                    && close_enough(m1, m2)
            }
            (IccBased(a), IccBased(b)) => a.offset == b.offset,
            _ => false,
        }
    }
}

/// A strip's colorspace together with its bit depth.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorSpace {
    pub kind: ColorSpaceKind,
    pub bits_per_component: u8,
}

impl ColorSpace {
    pub fn new(kind: ColorSpaceKind, bits_per_component: u8) -> Self {
        ColorSpace {
            kind,
            bits_per_component,
        }
    }

    /// Returns true for the single-component families.
    pub fn is_gray(&self) -> bool {
        match &self.kind {
            ColorSpaceKind::DeviceGray | ColorSpaceKind::CalGray { .. } => true,
            ColorSpaceKind::DeviceRgb | ColorSpaceKind::CalRgb { .. } => false,
            ColorSpaceKind::IccBased(profile) => profile.components == 1,
        }
    }

    /// Maps family and depth to a pixel format.
    ///
    /// Gray supports 1, 8 and 16 bits; RGB supports 8 and 16. Anything else
    /// has no format.
    pub fn infer_pixel_format(&self) -> Option<PixelFormat> {
        match (self.is_gray(), self.bits_per_component) {
            (true, 1) => Some(PixelFormat::Bitonal),
            (true, 8) => Some(PixelFormat::Gray8),
            (true, 16) => Some(PixelFormat::Gray16),
            (false, 8) => Some(PixelFormat::Rgb24),
            (false, 16) => Some(PixelFormat::Rgb48),
            _ => None,
        }
    }

    pub fn family_name(&self) -> &'static str {
        match self.kind {
            ColorSpaceKind::DeviceGray => "DeviceGray",
            ColorSpaceKind::DeviceRgb => "DeviceRGB",
            ColorSpaceKind::CalGray { .. } => "CalGray",
            ColorSpaceKind::CalRgb { .. } => "CalRGB",
            ColorSpaceKind::IccBased(_) => "ICCBased",
        }
    }
}

/// Parses the colorspace value at `pos` for a strip of the given depth.
pub fn parse_colorspace(parser: &mut Parser<'_>, pos: u64, bits_per_component: u8) -> RasterResult<ColorSpace> {
    let kind = parse_kind(parser, pos)?;
    Ok(ColorSpace::new(kind, bits_per_component))
}

fn parse_kind(parser: &mut Parser<'_>, pos: u64) -> RasterResult<ColorSpaceKind> {
    if let Some(name) = parser.read_name(pos)? {
        return match name.as_slice() {
            b"DeviceGray" => Ok(ColorSpaceKind::DeviceGray),
            b"DeviceRGB" => Ok(ColorSpaceKind::DeviceRgb),
            _ => Err(RasterError::new(ErrorCode::UnknownColorSpace, pos)),
        };
    }

    let mut cursor = pos;
    if !parser.lexer().expect_token(&mut cursor, b"[")? {
        return Err(RasterError::new(ErrorCode::ColorSpaceSyntax, pos));
    }

    let family_at = cursor;
    let family = parser
        .lexer()
        .read_name(&mut cursor)?
        .ok_or_else(|| RasterError::new(ErrorCode::ColorSpaceSyntax, family_at))?;

    let operand = cursor;
    let kind = match family.as_slice() {
        b"CalGray" => {
            let dict = parser.resolve_value(operand)?;
            parse_cal_gray(parser, dict)?
        }
        b"CalRGB" => {
            let dict = parser.resolve_value(operand)?;
            parse_cal_rgb(parser, dict)?
        }
        b"ICCBased" => parse_icc_based(parser, operand)?,
        _ => return Err(RasterError::new(ErrorCode::UnknownColorSpace, family_at)),
    };

    parser.skip_value(&mut cursor)?;
    if !parser.lexer().expect_token(&mut cursor, b"]")? {
        return Err(RasterError::new(ErrorCode::ColorSpaceSyntax, pos));
    }
    Ok(kind)
}

/// Reads an optional array of exactly `N` numbers; a malformed one fails
/// with `code`.
fn optional_vector<const N: usize>(
    parser: &mut Parser<'_>,
    dict: u64,
    key: &[u8],
    code: ErrorCode,
) -> RasterResult<Option<[f64; N]>> {
    let Some(value) = parser.dictionary_lookup(dict, key)? else {
        return Ok(None);
    };
    let mut numbers = [0.0; N];
    if !parser.read_number_array(value, &mut numbers)? {
        return Err(RasterError::new(code, value));
    }
    Ok(Some(numbers))
}

fn white_point(parser: &mut Parser<'_>, dict: u64) -> RasterResult<[f64; 3]> {
    optional_vector(parser, dict, b"WhitePoint", ErrorCode::WhitePoint)?
        .ok_or_else(|| RasterError::new(ErrorCode::WhitePoint, dict))
}

fn parse_cal_gray(parser: &mut Parser<'_>, dict: u64) -> RasterResult<ColorSpaceKind> {
    let white_point = white_point(parser, dict)?;
    let black_point = optional_vector(parser, dict, b"BlackPoint", ErrorCode::BlackPoint)?.unwrap_or([0.0; 3]);

    if let Some(value) = parser.dictionary_lookup(dict, b"Gamma")? {
        let gamma = parser
            .read_number(value)?
            .ok_or_else(|| RasterError::new(ErrorCode::Gamma, value))?;
        if (gamma - CAL_GRAY_GAMMA).abs() > TOLERANCE {
            parser.dispatcher().warn(ErrorCode::CalGrayGamma, value);
        }
    }

    Ok(ColorSpaceKind::CalGray {
        white_point,
        black_point,
        gamma: CAL_GRAY_GAMMA,
    })
}

fn parse_cal_rgb(parser: &mut Parser<'_>, dict: u64) -> RasterResult<ColorSpaceKind> {
    let white_point = white_point(parser, dict)?;
    let black_point = optional_vector(parser, dict, b"BlackPoint", ErrorCode::BlackPoint)?.unwrap_or([0.0; 3]);

    // A single number applies to all three components
    let gamma = match parser.dictionary_lookup(dict, b"Gamma")? {
        None => [1.0; 3],
        Some(value) => match parser.read_number(value)? {
            Some(gamma) => [gamma; 3],
            None => {
                let mut gamma = [0.0; 3];
                if !parser.read_number_array(value, &mut gamma)? {
                    return Err(RasterError::new(ErrorCode::Gamma, value));
                }
                gamma
            }
        },
    };

    let matrix = optional_vector(parser, dict, b"Matrix", ErrorCode::Matrix)?.unwrap_or(IDENTITY_MATRIX);

    Ok(ColorSpaceKind::CalRgb {
        white_point,
        black_point,
        gamma,
        matrix,
    })
}

fn parse_icc_based(parser: &mut Parser<'_>, operand: u64) -> RasterResult<ColorSpaceKind> {
    let mut cursor = operand;
    let (num, generation) = parser
        .parse_reference(&mut cursor)?
        .ok_or_else(|| RasterError::new(ErrorCode::IccProfile, operand))?;
    let object = parser.resolve_indirect_reference(num, generation, operand)?;

    let mut body = object;
    let span = parser
        .parse_dictionary_or_stream(&mut body)?
        .ok_or_else(|| RasterError::new(ErrorCode::IccProfile, object))?;

    let components = match parser.lookup_uint(span.dict, b"N")? {
        Some(1) => 1,
        Some(3) => 3,
        _ => return Err(RasterError::new(ErrorCode::IccProfile, span.dict)),
    };

    let length = usize::try_from(span.length)
        .map_err(|_| RasterError::new(ErrorCode::OutOfMemory, span.data))?;
    let mut data = Vec::new();
    data.try_reserve_exact(length)
        .map_err(|_| RasterError::new(ErrorCode::OutOfMemory, span.data))?;
    data.resize(length, 0);

    let read = parser.lexer().window().read_at(span.data, &mut data)?;
    if read < length {
        return Err(RasterError::new(ErrorCode::ShortRead, span.data + read as u64));
    }

    log::trace!("ICC profile of {} bytes loaded from object {}", length, num);
    Ok(ColorSpaceKind::IccBased(IccProfile {
        data,
        components,
        offset: object,
    }))
}
