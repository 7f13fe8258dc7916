//! # binspect-editor
//!
//! Mutable overlay over a parsed file. Fields can be changed, deleted,
//! inserted or replaced without touching the parser; writing the overlay
//! re-serializes the file, bit-copying every region that was not edited.
//!
//! ```no_run
//! use binspect_editor::Editor;
//! use binspect_parsers::{create_parser, CreateOptions};
//!
//! # fn main() -> binspect_core::Result<()> {
//! let Some(parser) = create_parser("archive.gz", &CreateOptions::default())? else {
//!     return Ok(());
//! };
//! let mut editor = Editor::new(&parser);
//! editor.delete("/filename")?;
//! editor.set_value("/has_filename", false)?;
//! editor.save("archive-anonymous.gz")?;
//! # Ok(())
//! # }
//! ```

pub mod editor;
pub mod fieldset;
pub mod leaf;

pub use editor::Editor;
pub use fieldset::{EditableField, EditableSet};
pub use leaf::{EditableLeaf, LeafKind, NewField};
