//! Parser base
//!
//! A [`FormatParser`] describes one file format: its tags, its default byte
//! order, the generator of its root fields and a validation routine. A
//! [`Parser`] binds a format to an input stream and owns the resulting
//! field tree.

use std::fmt;
use std::sync::Arc;

use binspect_core::{Endian, Error, Result, Value};
use binspect_stream::InputStream;

use crate::field::FieldGenerator;
use crate::guess::{guess_parser_with, GuessOptions};
use crate::registry::{ParserTags, GLOBAL_REGISTRY};
use crate::tree::{FieldRef, Tree};

/// Name of the root field set of every parser
pub const ROOT_NAME: &str = "root";

/// Contract implemented by every format parser
pub trait FormatParser: Send + Sync {
    fn tags(&self) -> &ParserTags;

    /// Default byte order of the format's fields
    fn endian(&self) -> Endian {
        Endian::Big
    }

    /// Generator of the root fields
    fn create_fields(&self) -> Box<dyn FieldGenerator>;

    /// Check that the stream holds this format
    ///
    /// Runs on a freshly created parser; no field is generated before it.
    fn validate(&self, parser: &Parser) -> std::result::Result<(), String>;

    fn create_mime_type(&self, _parser: &Parser) -> Option<String> {
        None
    }

    /// Size in bits of the content, when it can be smaller than the stream
    fn create_content_size(&self, _parser: &Parser) -> Option<u64> {
        None
    }

    fn create_description(&self, _parser: &Parser) -> Option<String> {
        None
    }
}

/// A format bound to a stream
pub struct Parser {
    format: Arc<dyn FormatParser>,
    tree: Tree,
}

impl fmt::Debug for Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parser")
            .field("id", &self.id())
            .field("source", &self.tree.stream().source())
            .finish()
    }
}

impl Parser {
    /// Create a parser, running its validation when `validate` is set
    ///
    /// A stream shorter than the format's minimum size is always refused.
    pub fn new(format: Arc<dyn FormatParser>, stream: Arc<dyn InputStream>, validate: bool) -> Result<Self> {
        let tags = format.tags();
        if !stream.size_ge(tags.min_size) {
            return Err(Error::Validate(format!(
                "stream is smaller than {} bits",
                tags.min_size
            )));
        }
        let tree = Tree::new(stream, ROOT_NAME, format.create_fields(), format.endian(), None);
        let parser = Self { format, tree };
        if validate {
            parser.format.validate(&parser).map_err(Error::Validate)?;
        }
        Ok(parser)
    }

    pub fn root(&self) -> FieldRef<'_> {
        self.tree.root()
    }

    /// Field at `path`; relative paths start at the root
    pub fn get(&self, path: &str) -> Result<FieldRef<'_>> {
        self.root().get(path)
    }

    pub fn value(&self, path: &str) -> Result<Value> {
        self.get(path)?.value()
    }

    pub fn format(&self) -> &Arc<dyn FormatParser> {
        &self.format
    }

    pub fn tags(&self) -> &ParserTags {
        self.format.tags()
    }

    pub fn id(&self) -> &str {
        &self.format.tags().id
    }

    pub fn stream(&self) -> &Arc<dyn InputStream> {
        self.tree.stream()
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn endian(&self) -> Endian {
        self.format.endian()
    }

    /// MIME type of the content: computed, else the first `mime` tag
    pub fn mime_type(&self) -> String {
        self.format
            .create_mime_type(self)
            .or_else(|| self.tags().mime.first().cloned())
            .unwrap_or_else(|| "application/octet-stream".to_string())
    }

    /// Size of the content in bits, the stream size by default
    pub fn content_size(&self) -> Option<u64> {
        self.format.create_content_size(self).or_else(|| self.stream().size())
    }

    pub fn description(&self) -> String {
        self.format
            .create_description(self)
            .unwrap_or_else(|| self.tags().description.clone())
    }

    /// Size of the parsed tree in bits (materializes the root)
    pub fn size(&self) -> u64 {
        self.root().size()
    }

    /// Guess a parser for the content of the field at `path`
    ///
    /// The field's stream tags act as hints; formats tagged
    /// [`Subfile::Skip`](crate::registry::Subfile::Skip) are not tried.
    pub fn create_sub_parser(&self, path: &str) -> Result<Option<Parser>> {
        let field = self.get(path)?;
        let stream: Arc<dyn InputStream> = field.sub_stream();
        let options = GuessOptions {
            subfile: true,
            ..GuessOptions::default()
        };
        Ok(guess_parser_with(&GLOBAL_REGISTRY, stream, &options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldSpec;
    use crate::registry::Category;
    use crate::tree::FieldSetCursor;
    use binspect_stream::MemoryStream;

    struct Pair(ParserTags);

    impl FormatParser for Pair {
        fn tags(&self) -> &ParserTags {
            &self.0
        }

        fn create_fields(&self) -> Box<dyn FieldGenerator> {
            let mut step = 0;
            Box::new(move |_: &FieldSetCursor<'_>| -> Result<Option<FieldSpec>> {
                step += 1;
                Ok(match step {
                    1 => Some(FieldSpec::bytes("magic", 2)),
                    2 => Some(FieldSpec::uint16("count")),
                    _ => None,
                })
            })
        }

        fn validate(&self, parser: &Parser) -> std::result::Result<(), String> {
            match parser.value("magic") {
                Ok(value) if value == b"PR".as_slice() => Ok(()),
                _ => Err("Invalid magic".to_string()),
            }
        }
    }

    fn format() -> Arc<dyn FormatParser> {
        Arc::new(Pair(
            ParserTags::builder("pair")
                .description("Pair test format")
                .category(Category::Misc)
                .min_size(32)
                .build(),
        ))
    }

    #[test]
    fn test_validation() {
        let good = MemoryStream::new(b"PR\x00\x02".to_vec()).into_shared();
        let parser = Parser::new(format(), good, true).unwrap();
        assert_eq!(parser.value("count").unwrap(), Value::UInt(2));
        assert_eq!(parser.size(), 32);

        let bad = MemoryStream::new(b"XX\x00\x02".to_vec()).into_shared();
        assert!(matches!(Parser::new(format(), bad.clone(), true), Err(Error::Validate(_))));
        assert!(Parser::new(format(), bad, false).is_ok());
    }

    #[test]
    fn test_min_size() {
        let short = MemoryStream::new(b"PR".to_vec()).into_shared();
        assert!(matches!(Parser::new(format(), short, false), Err(Error::Validate(_))));
    }

    #[test]
    fn test_defaults() {
        let stream = MemoryStream::new(b"PR\x00\x02rest".to_vec()).into_shared();
        let parser = Parser::new(format(), stream, true).unwrap();
        assert_eq!(parser.mime_type(), "application/octet-stream");
        assert_eq!(parser.content_size(), Some(64));
        assert_eq!(parser.description(), "Pair test format");
        assert_eq!(parser.root().path(), "/");
        assert_eq!(parser.root().name(), ROOT_NAME);
    }
}
