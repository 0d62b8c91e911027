pub mod core;

// Re-export main types for convenience
pub use core::{
    API_LEVEL, ByteSource, ColorSpace, ColorSpaceKind, Compression, Diagnostic, ErrorCode,
    ErrorHandler, IccProfile, MemorySource, PageInfo, PixelFormat, RasterContext, RasterError,
    RasterResult, Reader, Recognition, Severity, StripInfo, Version, global_error_handler,
    highest_supported_version, library_version, set_global_error_handler,
};
