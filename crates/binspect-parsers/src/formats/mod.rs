//! Built-in format parsers

pub mod gzip;
pub mod png;

use std::sync::Arc;

use crate::registry::FormatRef;

pub use gzip::GzipParser;
pub use png::PngParser;

/// Every parser shipped with the crate, registered in the global registry
pub fn builtin_parsers() -> Vec<FormatRef> {
    vec![Arc::new(GzipParser::new()), Arc::new(PngParser::new())]
}
