use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

/// Severity of a diagnostic, in ascending order.
///
/// `Info` and `Warning` never fail the call that reported them; every other
/// severity means the current call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    /// The source violates the PDF/raster profile.
    Compliance,
    /// The caller misused the API.
    Api,
    Memory,
    Io,
    /// A built-in capacity was exceeded.
    Limit,
    Internal,
    Other,
}

impl Severity {
    /// Returns true if a diagnostic of this severity fails the current call.
    pub fn is_fatal(self) -> bool {
        self >= Severity::Compliance
    }

    pub fn name(self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Compliance => "COMPLIANCE",
            Severity::Api => "API",
            Severity::Memory => "MEMORY",
            Severity::Io => "IO",
            Severity::Limit => "LIMIT",
            Severity::Internal => "INTERNAL",
            Severity::Other => "OTHER",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

macro_rules! error_codes {
    ($($name:ident = $number:literal, $severity:ident, $text:literal;)*) => {
        /// Stable diagnostic codes.
        ///
        /// Each code has a fixed number, a default severity and a static
        /// description.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum ErrorCode {
            $($name = $number,)*
        }

        impl ErrorCode {
            /// Every code, in table order.
            pub const ALL: &'static [ErrorCode] = &[$(ErrorCode::$name,)*];

            pub fn number(self) -> u16 {
                self as u16
            }

            pub fn severity(self) -> Severity {
                match self {
                    $(ErrorCode::$name => Severity::$severity,)*
                }
            }

            pub fn description(self) -> &'static str {
                match self {
                    $(ErrorCode::$name => $text,)*
                }
            }
        }
    };
}

error_codes! {
    SourceRecognized = 1, Info, "source recognized as PDF/raster";

    MinorVersionUnsupported = 10, Warning, "PDF/raster minor version is newer than this library";
    GenerationNotZero = 11, Warning, "indirect reference has a non-zero generation";
    CalGrayGamma = 12, Warning, "CalGray /Gamma is not 2.2";

    ApiLevel = 100, Api, "requested API level is not supported";
    NotOpen = 101, Api, "reader is not open";
    AlreadyOpen = 102, Api, "reader is already open";
    PageIndex = 103, Api, "page index out of range";
    StripIndex = 104, Api, "strip index out of range";
    BufferTooSmall = 105, Api, "buffer too small for raw strip data";

    OutOfMemory = 200, Memory, "memory allocation failed";

    ReadFailed = 300, Io, "byte source read failed";
    SizeFailed = 301, Io, "byte source size query failed";
    EmptySource = 302, Io, "byte source is empty";
    UnexpectedEnd = 303, Io, "unexpected end of source";
    ShortRead = 304, Io, "byte source returned fewer bytes than requested";

    XrefTooLarge = 400, Limit, "xref table has too many entries";
    PageTreeTooDeep = 401, Limit, "page tree exceeds maximum depth";
    PageTreeCycle = 402, Limit, "page tree revisits a node";
    NestingTooDeep = 403, Limit, "arrays or dictionaries nested too deeply";
    TokenTooLong = 404, Limit, "token exceeds maximum length";
    NumericOverflow = 405, Limit, "numeric value out of range";

    InternalState = 500, Internal, "reader reached an impossible state";

    Unknown = 600, Other, "unclassified failure";

    NotPdf = 1000, Compliance, "source does not begin with a %PDF-1. header";
    NoEof = 1001, Compliance, "%%EOF not found at end of source";
    NoStartxref = 1002, Compliance, "startxref not found in tail";
    BadStartxref = 1003, Compliance, "startxref offset missing or invalid";
    NoVersionTag = 1004, Compliance, "%PDF-raster version tag not found";
    BadVersionTag = 1005, Compliance, "malformed %PDF-raster version tag";
    MajorVersionUnsupported = 1006, Compliance, "PDF/raster major version not supported";

    NoXref = 1010, Compliance, "xref keyword not found at startxref offset";
    XrefHeader = 1011, Compliance, "xref subsection header malformed";
    XrefFirstNotZero = 1012, Compliance, "xref subsection must start at object 0";
    XrefCount = 1013, Compliance, "xref entry count out of range";
    XrefTruncated = 1014, Compliance, "xref table truncated";
    XrefRecord = 1015, Compliance, "xref record malformed";
    XrefZeroEntry = 1016, Compliance, "xref entry 0 must be free with generation 65535";
    XrefGeneration = 1017, Compliance, "in-use xref entry has non-zero generation";
    ObjectNumber = 1018, Compliance, "object number not in xref table";
    FreeObject = 1019, Compliance, "reference to a free object";
    ObjectHeader = 1020, Compliance, "object header does not match xref entry";
    ReferenceGeneration = 1021, Compliance, "object reference must have generation 0";

    NoTrailer = 1030, Compliance, "trailer keyword not found after xref table";
    NoRoot = 1031, Compliance, "trailer has no /Root";
    RootNotReference = 1032, Compliance, "/Root is not an indirect reference";
    CatalogType = 1033, Compliance, "catalog /Type is not /Catalog";
    NoPages = 1034, Compliance, "catalog has no /Pages";
    Encrypted = 1035, Compliance, "encrypted documents are not supported";

    NoPageCount = 1040, Compliance, "/Pages node has no valid /Count";
    PagesType = 1041, Compliance, "page tree node /Type is neither /Pages nor /Page";
    KidsNotArray = 1042, Compliance, "/Kids is missing or not an array";
    KidNotReference = 1043, Compliance, "/Kids element is not an indirect reference";
    TooManyPages = 1044, Compliance, "page tree holds more pages than /Count";
    PageCountMismatch = 1045, Compliance, "page tree page total differs from /Count";

    NumberSyntax = 1050, Compliance, "number expected";
    StringSyntax = 1051, Compliance, "malformed literal string";
    HexStringSyntax = 1052, Compliance, "malformed hex string";
    NameSyntax = 1053, Compliance, "name expected";
    ValueSyntax = 1054, Compliance, "value expected";
    ArraySyntax = 1055, Compliance, "malformed array";
    DictionarySyntax = 1056, Compliance, "malformed dictionary";
    DictionaryKey = 1057, Compliance, "dictionary key must be a name";
    ObjectStream = 1058, Compliance, "object streams are not allowed";
    StreamKeyword = 1059, Compliance, "stream keyword must be followed by CRLF or LF";
    StreamLength = 1060, Compliance, "stream /Length missing or invalid";
    NoEndstream = 1061, Compliance, "endstream not found where /Length places it";

    PageType = 1070, Compliance, "page object /Type is not /Page";
    Rotate = 1071, Compliance, "/Rotate must be a non-negative multiple of 90";
    NoMediaBox = 1072, Compliance, "page has no /MediaBox";
    MediaBoxSyntax = 1073, Compliance, "/MediaBox must be an array of 4 numbers";
    MediaBoxOrigin = 1074, Compliance, "/MediaBox lower-left corner is not (0,0)";
    MediaBoxEmpty = 1075, Compliance, "/MediaBox has zero extent";
    NoResources = 1076, Compliance, "page has no /Resources";
    NoXObject = 1077, Compliance, "page /Resources has no /XObject";
    StripName = 1078, Compliance, "/XObject entry is not named strip<N>";
    StripSequence = 1079, Compliance, "strip names are not contiguous from strip0";
    NoStrips = 1080, Compliance, "page has no strips";
    StripNotReference = 1081, Compliance, "strip is not an indirect reference";
    StripNotStream = 1082, Compliance, "strip object is not a stream";
    XObjectType = 1083, Compliance, "strip /Type is not /XObject";
    NotImage = 1084, Compliance, "strip /Subtype is not /Image";
    BitsPerComponent = 1085, Compliance, "strip /BitsPerComponent must be 1, 8 or 16";
    StripWidth = 1086, Compliance, "strip /Width missing or invalid";
    StripHeight = 1087, Compliance, "strip /Height missing or invalid";
    UnsupportedFilter = 1088, Compliance, "strip /Filter is not supported";
    FilterFormat = 1089, Compliance, "strip /Filter incompatible with its pixel format";
    PixelFormat = 1090, Compliance, "colorspace and bit depth form no supported pixel format";
    WidthMismatch = 1091, Compliance, "strip width differs from the first strip";
    FormatMismatch = 1092, Compliance, "strip pixel format differs from the first strip";
    ColorSpaceMismatch = 1093, Compliance, "strip colorspace differs from the first strip";

    NoColorSpace = 1100, Compliance, "strip has no /ColorSpace";
    ColorSpaceSyntax = 1101, Compliance, "malformed colorspace";
    UnknownColorSpace = 1102, Compliance, "colorspace family not allowed";
    WhitePoint = 1103, Compliance, "/WhitePoint missing or not 3 numbers";
    BlackPoint = 1104, Compliance, "/BlackPoint is not 3 numbers";
    Gamma = 1105, Compliance, "/Gamma is not a number or 3 numbers";
    Matrix = 1106, Compliance, "/Matrix is not 9 numbers";
    IccProfile = 1107, Compliance, "ICCBased colorspace does not reference a stream";
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.number(), self.description())
    }
}

/// One reported event: what happened, how bad it is, and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: ErrorCode,
    /// Byte offset in the source implicated by the diagnostic.
    pub offset: u64,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}: {}", self.severity, self.offset, self.code)
    }
}

/// A failed reader operation.
///
/// Carries the same triple that is handed to error handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{severity} at offset {offset}: {code}")]
pub struct RasterError {
    pub severity: Severity,
    pub code: ErrorCode,
    pub offset: u64,
}

impl RasterError {
    /// Creates an error with the code's default severity.
    pub fn new(code: ErrorCode, offset: u64) -> Self {
        RasterError {
            severity: code.severity(),
            code,
            offset,
        }
    }

    pub fn diagnostic(&self) -> Diagnostic {
        Diagnostic {
            severity: self.severity,
            code: self.code,
            offset: self.offset,
        }
    }
}

/// Result type alias for reader operations
pub type RasterResult<T> = Result<T, RasterError>;

/// Receives every diagnostic a reader reports.
pub type ErrorHandler = Arc<dyn Fn(&Diagnostic) + Send + Sync>;

/// Writes one line per diagnostic to the `log` facade.
pub fn log_diagnostic(diagnostic: &Diagnostic) {
    match diagnostic.severity {
        Severity::Info => log::info!("{}", diagnostic),
        Severity::Warning => log::warn!("{}", diagnostic),
        _ => log::error!("{}", diagnostic),
    }
}

/// Library-wide state shared by readers: the fallback error handler.
///
/// Readers built with [`RasterContext::global`] share one process-wide
/// instance; tests and embedders can inject their own.
pub struct RasterContext {
    default_handler: RwLock<ErrorHandler>,
}

impl RasterContext {
    /// Creates a context whose default handler logs through [`log_diagnostic`].
    pub fn new() -> Self {
        let handler: ErrorHandler = Arc::new(log_diagnostic);
        RasterContext {
            default_handler: RwLock::new(handler),
        }
    }

    /// Returns the process-wide context, creating it on first use.
    pub fn global() -> Arc<RasterContext> {
        static GLOBAL: OnceLock<Arc<RasterContext>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(RasterContext::new())))
    }

    /// Replaces the default handler, returning the previous one.
    pub fn set_default_handler(&self, handler: ErrorHandler) -> ErrorHandler {
        let mut slot = self
            .default_handler
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *slot, handler)
    }

    pub fn default_handler(&self) -> ErrorHandler {
        let slot = self
            .default_handler
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&slot)
    }
}

impl Default for RasterContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes diagnostics to a reader's own handler, or to its context's default.
pub(crate) struct Dispatcher {
    context: Arc<RasterContext>,
    handler: Option<ErrorHandler>,
}

impl Dispatcher {
    pub(crate) fn new(context: Arc<RasterContext>) -> Self {
        Dispatcher {
            context,
            handler: None,
        }
    }

    pub(crate) fn set_handler(&mut self, handler: Option<ErrorHandler>) {
        self.handler = handler;
    }

    /// Reports a diagnostic.
    pub(crate) fn report(&self, severity: Severity, code: ErrorCode, offset: u64) {
        let diagnostic = Diagnostic {
            severity,
            code,
            offset,
        };
        match &self.handler {
            Some(handler) => handler(&diagnostic),
            None => (self.context.default_handler())(&diagnostic),
        }
    }

    /// Reports a non-fatal event with the code's default severity.
    pub(crate) fn warn(&self, code: ErrorCode, offset: u64) {
        self.report(code.severity(), code, offset);
    }

    pub(crate) fn report_error(&self, error: &RasterError) {
        self.report(error.severity, error.code, error.offset);
    }
}
