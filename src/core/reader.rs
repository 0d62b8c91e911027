use super::colorspace::{ColorSpace, PixelFormat};
use super::error::{Dispatcher, ErrorCode, ErrorHandler, RasterContext, RasterError, RasterResult};
use super::lexer::Lexer;
use super::page::{self, Compression, PageInfo, StripInfo};
use super::parser::Parser;
use super::source::ByteSource;
use super::trailer::{self, MAX_MAJOR_VERSION, MAX_MINOR_VERSION, Recognition, Version};
use super::window::Window;
use super::xref::XrefTable;
use std::sync::Arc;

/// Highest API level this library implements.
pub const API_LEVEL: u32 = 1;

/// Tables kept while a document is open.
struct Session {
    lexer: Lexer,
    version: Version,
    xref: XrefTable,
    /// Page object offsets in document order
    pages: Vec<u64>,
}

impl Session {
    fn load(source: Box<dyn ByteSource>, dispatcher: &Dispatcher) -> RasterResult<Self> {
        let window = Window::new(source)?;
        let mut lexer = Lexer::new(window);
        let index = trailer::load_document(&mut lexer, dispatcher)?;

        Ok(Session {
            lexer,
            version: index.version,
            xref: index.xref,
            pages: index.pages,
        })
    }

    fn parser<'a>(&'a mut self, dispatcher: &'a Dispatcher) -> Parser<'a> {
        Parser::new(&mut self.lexer, Some(&self.xref), dispatcher)
    }

    fn page_offset(&self, page: usize) -> RasterResult<u64> {
        self.pages
            .get(page)
            .copied()
            .ok_or_else(|| RasterError::new(ErrorCode::PageIndex, 0))
    }

    fn page_info(&mut self, page: usize, dispatcher: &Dispatcher) -> RasterResult<PageInfo> {
        let offset = self.page_offset(page)?;
        let mut parser = self.parser(dispatcher);
        page::page_info(&mut parser, offset)
    }

    fn strip_info(&mut self, page: usize, strip: usize, dispatcher: &Dispatcher) -> RasterResult<StripInfo> {
        let offset = self.page_offset(page)?;
        let index = u32::try_from(strip).map_err(|_| RasterError::new(ErrorCode::StripIndex, offset))?;
        let mut parser = self.parser(dispatcher);
        page::strip_info(&mut parser, offset, index)
    }
}

/// Reads PDF/raster documents from a caller-supplied [`ByteSource`].
///
/// A reader is either closed or holds one open document. Opening validates
/// the tail, the xref table, the trailer and the whole page tree; page and
/// strip queries afterwards re-parse what they need on every call, so
/// nothing per page is cached.
///
/// Every failure is reported exactly once through the reader's error
/// handler (or the context's default handler) before the `Err` is returned.
///
/// # Example
///
/// ```no_run
/// use pdf_raster::{MemorySource, Reader};
///
/// let bytes = std::fs::read("scan.pdf").unwrap();
/// let mut reader = Reader::new(1).unwrap();
/// reader.open(Box::new(MemorySource::from_bytes(bytes))).unwrap();
///
/// for page in 0..reader.page_count().unwrap() {
///     let info = reader.page_info(page).unwrap();
///     println!("{}x{} at {} DPI", info.width, info.height, info.xdpi);
/// }
/// ```
pub struct Reader {
    dispatcher: Dispatcher,
    session: Option<Session>,
}

impl Reader {
    /// Creates a reader that uses the process-wide [`RasterContext`].
    pub fn new(api_level: u32) -> RasterResult<Self> {
        Self::with_context(api_level, RasterContext::global())
    }

    /// Creates a reader bound to `context`.
    ///
    /// Fails with an API diagnostic if `api_level` is 0 or newer than
    /// [`API_LEVEL`].
    pub fn with_context(api_level: u32, context: Arc<RasterContext>) -> RasterResult<Self> {
        let dispatcher = Dispatcher::new(context);
        if api_level == 0 || api_level > API_LEVEL {
            let error = RasterError::new(ErrorCode::ApiLevel, 0);
            dispatcher.report_error(&error);
            return Err(error);
        }

        Ok(Reader {
            dispatcher,
            session: None,
        })
    }

    /// Sets this reader's handler; `None` falls back to the context default.
    pub fn set_error_handler(&mut self, handler: Option<ErrorHandler>) {
        self.dispatcher.set_handler(handler);
    }

    fn fail<T>(&self, error: RasterError) -> RasterResult<T> {
        self.dispatcher.report_error(&error);
        Err(error)
    }

    fn with_session<T>(
        &mut self,
        query: impl FnOnce(&mut Session, &Dispatcher) -> RasterResult<T>,
    ) -> RasterResult<T> {
        let result = match self.session.as_mut() {
            Some(session) => query(session, &self.dispatcher),
            None => Err(RasterError::new(ErrorCode::NotOpen, 0)),
        };
        result.inspect_err(|error| self.dispatcher.report_error(error))
    }

    fn session(&self) -> RasterResult<&Session> {
        match self.session.as_ref() {
            Some(session) => Ok(session),
            None => self.fail(RasterError::new(ErrorCode::NotOpen, 0)),
        }
    }

    /// Opens a document.
    ///
    /// On failure the reader stays closed and the source is dropped without
    /// its `close` being called.
    pub fn open(&mut self, source: Box<dyn ByteSource>) -> RasterResult<()> {
        if self.session.is_some() {
            return self.fail(RasterError::new(ErrorCode::AlreadyOpen, 0));
        }

        match Session::load(source, &self.dispatcher) {
            Ok(session) => {
                self.session = Some(session);
                Ok(())
            }
            Err(error) => self.fail(error),
        }
    }

    fn release(&mut self) -> bool {
        match self.session.take() {
            Some(session) => {
                let mut source = session.lexer.into_window().into_source();
                source.close();
                log::debug!("reader closed");
                true
            }
            None => false,
        }
    }

    /// Closes the open document, calling the source's `close` once.
    pub fn close(&mut self) -> RasterResult<()> {
        if self.release() {
            Ok(())
        } else {
            self.fail(RasterError::new(ErrorCode::NotOpen, 0))
        }
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Returns the source of the open document.
    pub fn source(&self) -> Option<&dyn ByteSource> {
        self.session.as_ref().map(|session| session.lexer.source())
    }

    /// Checks an unknown source's header and tail without opening it.
    ///
    /// Success is reported as an INFO diagnostic. The reader's state is not
    /// touched and nothing is retained.
    pub fn recognize_source(&self, source: &mut dyn ByteSource) -> Recognition {
        let recognition = trailer::recognize(source, &self.dispatcher);
        match &recognition.error {
            Some(error) => self.dispatcher.report_error(error),
            None => self.dispatcher.warn(ErrorCode::SourceRecognized, 0),
        }
        recognition
    }

    /// Version named by the open document's `%PDF-raster` tag.
    pub fn detected_version(&self) -> RasterResult<Version> {
        self.session().map(|session| session.version)
    }

    /// Number of pages; 0 is a valid count.
    pub fn page_count(&self) -> RasterResult<usize> {
        self.session().map(|session| session.pages.len())
    }

    // ========== Page queries ==========

    /// Validates page `page` (0-based) and all of its strips.
    pub fn page_info(&mut self, page: usize) -> RasterResult<PageInfo> {
        self.with_session(|session, dispatcher| session.page_info(page, dispatcher))
    }

    pub fn page_width(&mut self, page: usize) -> RasterResult<u32> {
        self.page_info(page).map(|info| info.width)
    }

    /// Sum of the page's strip heights.
    pub fn page_height(&mut self, page: usize) -> RasterResult<u32> {
        self.page_info(page).map(|info| info.height)
    }

    pub fn page_pixel_format(&mut self, page: usize) -> RasterResult<PixelFormat> {
        self.page_info(page).map(|info| info.format)
    }

    pub fn page_bits_per_component(&mut self, page: usize) -> RasterResult<u8> {
        self.page_info(page).map(|info| info.format.bits_per_component())
    }

    pub fn page_rotation(&mut self, page: usize) -> RasterResult<u32> {
        self.page_info(page).map(|info| info.rotation)
    }

    pub fn page_horizontal_dpi(&mut self, page: usize) -> RasterResult<f64> {
        self.page_info(page).map(|info| info.xdpi)
    }

    pub fn page_vertical_dpi(&mut self, page: usize) -> RasterResult<f64> {
        self.page_info(page).map(|info| info.ydpi)
    }

    pub fn page_strip_count(&mut self, page: usize) -> RasterResult<u32> {
        self.page_info(page).map(|info| info.strip_count)
    }

    pub fn page_max_strip_size(&mut self, page: usize) -> RasterResult<u64> {
        self.page_info(page).map(|info| info.max_strip_size)
    }

    pub fn page_colorspace(&mut self, page: usize) -> RasterResult<ColorSpace> {
        self.page_info(page).map(|info| info.colorspace)
    }

    pub fn page_media_box(&mut self, page: usize) -> RasterResult<[f64; 4]> {
        self.page_info(page).map(|info| info.media_box)
    }

    // ========== Strip queries ==========

    pub fn strip_info(&mut self, page: usize, strip: usize) -> RasterResult<StripInfo> {
        self.with_session(|session, dispatcher| session.strip_info(page, strip, dispatcher))
    }

    pub fn strip_raw_size(&mut self, page: usize, strip: usize) -> RasterResult<u64> {
        self.strip_info(page, strip).map(|info| info.raw_size)
    }

    pub fn strip_height(&mut self, page: usize, strip: usize) -> RasterResult<u32> {
        self.strip_info(page, strip).map(|info| info.height)
    }

    pub fn strip_pixel_format(&mut self, page: usize, strip: usize) -> RasterResult<PixelFormat> {
        self.strip_info(page, strip).map(|info| info.format)
    }

    pub fn strip_compression(&mut self, page: usize, strip: usize) -> RasterResult<Compression> {
        self.strip_info(page, strip).map(|info| info.compression)
    }

    /// Copies the strip's raw payload into `buf` and returns its length.
    ///
    /// `buf` is written only when the whole payload was read: a short buffer
    /// or a source that ends early leaves it untouched.
    pub fn read_strip(&mut self, page: usize, strip: usize, buf: &mut [u8]) -> RasterResult<usize> {
        self.with_session(|session, dispatcher| {
            let info = session.strip_info(page, strip, dispatcher)?;
            let length = usize::try_from(info.raw_size)
                .ok()
                .filter(|&length| length <= buf.len())
                .ok_or_else(|| RasterError::new(ErrorCode::BufferTooSmall, info.data_offset))?;

            let mut payload = Vec::new();
            payload
                .try_reserve_exact(length)
                .map_err(|_| RasterError::new(ErrorCode::OutOfMemory, info.data_offset))?;
            payload.resize(length, 0);

            let read = session.lexer.window().read_at(info.data_offset, &mut payload)?;
            if read < length {
                return Err(RasterError::new(ErrorCode::ShortRead, info.data_offset + read as u64));
            }
            buf[..length].copy_from_slice(&payload);
            Ok(length)
        })
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.release();
    }
}

/// Highest PDF/raster version this library reads.
pub fn highest_supported_version() -> Version {
    Version::new(MAX_MAJOR_VERSION, MAX_MINOR_VERSION)
}

pub fn library_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Replaces the process-wide default handler, returning the previous one.
pub fn set_global_error_handler(handler: ErrorHandler) -> ErrorHandler {
    RasterContext::global().set_default_handler(handler)
}

pub fn global_error_handler() -> ErrorHandler {
    RasterContext::global().default_handler()
}
