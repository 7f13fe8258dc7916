//! binspect-parsers
//!
//! The field tree engine and the format parsers built on it.
//!
//! A [`Parser`] owns a lazily-populated [`Tree`] of fields over an input
//! stream. Fields are produced on demand by the [`FieldGenerator`] of their
//! parent set, so reading `/header/width` only decodes what precedes it.
//!
//! # Supported Formats
//!
//! | Format | Extension | MIME |
//! |--------|-----------|------|
//! | gzip   | `.gz`     | `application/x-gzip` |
//! | PNG    | `.png`    | `image/png` |
//!
//! # Example
//!
//! ```rust,no_run
//! use binspect_parsers::{create_parser, CreateOptions};
//!
//! let parser = create_parser("picture.png", &CreateOptions::default())?
//!     .expect("unknown format");
//! println!("{}", parser.description());
//! println!("{}", parser.value("/header/width")?);
//! # Ok::<(), binspect_core::Error>(())
//! ```

pub mod events;
pub mod explore;
pub mod field;
pub mod formats;
pub mod grep;
pub mod guess;
pub mod logging;
pub mod parser;
pub mod path;
pub mod registry;
pub mod tree;

// Re-export main types
pub use events::{Event, EventBus, EventKind, HandlerId};
pub use explore::{format_field_line, leaves, list_fields, walk, FieldInfo, ListOptions};
pub use field::{BytesKind, EnumTable, FieldGenerator, FieldSpec, Leaf, StringFormat, TimestampKind};
pub use grep::{Grep, GrepMatch, GrepOptions};
pub use guess::{create_parser, guess_parser, guess_parser_with, CreateOptions, GuessOptions};
pub use parser::{FormatParser, Parser, ROOT_NAME};
pub use registry::{
    Category, FormatRef, ParserInfo, ParserRegistry, ParserTags, ParserTagsBuilder, RegistryError, Subfile,
    GLOBAL_REGISTRY,
};
pub use tree::{FieldIter, FieldRef, FieldSetCursor, NodeId, Tree, ROOT};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
