pub mod colorspace;
pub mod error;
pub mod lexer;
pub mod page;
pub mod page_tree;
pub mod parser;
pub mod reader;
pub mod source;
pub mod trailer;
pub mod window;
pub mod xref;

pub use colorspace::{ColorSpace, ColorSpaceKind, IccProfile, PixelFormat};
pub use error::{Diagnostic, ErrorCode, ErrorHandler, RasterContext, RasterError, RasterResult, Severity};
pub use lexer::{Lexer, Token};
pub use page::{Compression, PageInfo, StripInfo};
pub use parser::Parser;
pub use reader::{
    API_LEVEL, Reader, global_error_handler, highest_supported_version, library_version,
    set_global_error_handler,
};
pub use source::{ByteSource, MemorySource};
pub use trailer::{Recognition, Version};
pub use window::Window;
pub use xref::XrefTable;
