//! binspect core library
//!
//! This crate provides the pieces shared by every binspect layer: the
//! unified error type, the process-wide configuration, bit-level integer
//! and float decoding, charsets, and the display helpers used by fields.

pub mod bits;
pub mod charset;
pub mod config;
pub mod endian;
pub mod error;
pub mod text_handler;
pub mod types;

pub use charset::Charset;
pub use config::Config;
pub use endian::Endian;
pub use error::{Error, Result, ResultExt};
pub use text_handler::DisplayFn;
pub use types::Value;

/// Re-export commonly used items
pub mod prelude {
    pub use crate::charset::Charset;
    pub use crate::endian::Endian;
    pub use crate::error::{Error, Result, ResultExt};
    pub use crate::types::Value;
}
