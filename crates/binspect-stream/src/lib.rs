//! binspect streams
//!
//! Provides the bit-addressed sources the field tree reads from:
//! - in-memory and file-backed streams
//! - sub-streams and field streams (views over a parent range)
//! - fragmented streams (discontiguous parent ranges read as one)
//! - byte and regex search
//!
//! and [`OutputStream`], the append-only sink the editor serializes into.
//!
//! # Example
//! ```
//! use binspect_stream::{InputStream, MemoryStream, SubStream};
//! use binspect_core::Endian;
//!
//! let stream = MemoryStream::new(b"\x1f\x8b\x08\x00".to_vec()).into_shared();
//! assert_eq!(stream.read_bits(0, 16, Endian::Big).unwrap(), 0x1f8b);
//!
//! let tail = SubStream::new(stream, 16, None);
//! assert_eq!(tail.read_bytes(0, 1).unwrap(), vec![0x08]);
//! ```

pub mod file;
pub mod fragment;
pub mod input;
pub mod output;
pub mod search;
pub mod sub;

pub use file::FileStream;
pub use fragment::{FragmentSource, FragmentedStream};
pub use input::{InputStream, MemoryStream, ReadResult, StreamTag};
pub use output::OutputStream;
pub use sub::{FieldStream, SubStream};
