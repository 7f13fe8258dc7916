//! Parser guessing
//!
//! Picks the parser of a stream from the registry. Candidates are tried in
//! a fixed order and the first one whose validation passes wins:
//!
//! 1. formats whose minimum size fits the stream (and, on sub-streams,
//!    that accept sub-files);
//! 2. formats declaring the forced MIME type;
//! 3. the format named by a `Parser` stream tag, then formats declaring
//!    the MIME type of a `Mime` tag;
//! 4. formats declaring the file extension (from the caller or from a
//!    `Filename` stream tag);
//! 5. every remaining format, by id.
//!
//! From step 3 on, a format declaring magic is only tried when its magic
//! matches. `autofix` is disabled while candidates are instantiated.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use binspect_core::{config, Error, Result};
use binspect_stream::{FileStream, InputStream, StreamTag, SubStream};

use crate::parser::Parser;
use crate::path::file_extension;
use crate::registry::{FormatRef, ParserRegistry, Subfile, GLOBAL_REGISTRY};

/// Hints for [`guess_parser_with`]
#[derive(Debug, Clone, Default)]
pub struct GuessOptions {
    /// Name of the file, for its extension
    pub filename: Option<String>,
    /// Only formats declaring this MIME type are tried first
    pub force_mime: Option<String>,
    /// The stream is a sub-file of another parse
    pub subfile: bool,
}

/// Guess the parser of `stream` from the global registry
pub fn guess_parser(stream: Arc<dyn InputStream>, filename: Option<&str>, force_mime: Option<&str>) -> Option<Parser> {
    let options = GuessOptions {
        filename: filename.map(str::to_string),
        force_mime: force_mime.map(str::to_string),
        subfile: false,
    };
    guess_parser_with(&GLOBAL_REGISTRY, stream, &options)
}

struct Guesser<'r> {
    registry: &'r ParserRegistry,
    stream: Arc<dyn InputStream>,
    candidates: Vec<FormatRef>,
    tried: HashSet<String>,
    debug: bool,
}

impl Guesser<'_> {
    fn try_format(&mut self, format: &FormatRef, check_magic: bool) -> Option<Parser> {
        let id = format.tags().id.clone();
        if !self.tried.insert(id.clone()) {
            return None;
        }
        if check_magic && self.registry.magic_matches(format.as_ref(), self.stream.as_ref()) == Some(false) {
            if self.debug {
                tracing::info!(parser = %id, "Skip parser: magic mismatch");
            }
            return None;
        }
        if self.debug {
            tracing::info!(parser = %id, "Try parser");
        }
        match Parser::new(format.clone(), self.stream.clone(), true) {
            Ok(parser) => {
                tracing::debug!(parser = %id, source = %self.stream.source(), "Parser validated");
                Some(parser)
            }
            Err(Error::Validate(reason)) => {
                tracing::info!(parser = %id, reason = %reason, "Skip parser");
                None
            }
            Err(err) if err.is_not_found() => {
                tracing::info!(parser = %id, error = %err, "Skip parser: missing field");
                None
            }
            Err(err) => {
                tracing::warn!(parser = %id, error = %err, "Parser failed");
                None
            }
        }
    }

    fn try_all(&mut self, formats: Vec<FormatRef>, check_magic: bool) -> Option<Parser> {
        formats
            .iter()
            .find_map(|format| self.try_format(format, check_magic))
    }

    fn is_candidate(&self, format: &FormatRef) -> bool {
        self.candidates.iter().any(|c| c.tags().id == format.tags().id)
    }

    fn by_mime(&self, mime: &str) -> Vec<FormatRef> {
        let mime = mime.to_lowercase();
        self.candidates
            .iter()
            .filter(|c| c.tags().mime.iter().any(|m| m.to_lowercase() == mime))
            .cloned()
            .collect()
    }
}

/// Guess the parser of `stream` from `registry`
///
/// Returns `None` when no candidate validates.
pub fn guess_parser_with(
    registry: &ParserRegistry,
    stream: Arc<dyn InputStream>,
    options: &GuessOptions,
) -> Option<Parser> {
    let _autofix = config::override_autofix(false);

    let mut candidates = registry.filter_stream(stream.as_ref());
    if options.subfile {
        candidates.retain(|c| c.tags().subfile == Subfile::Accept);
    }
    let mut guesser = Guesser {
        registry,
        stream: stream.clone(),
        candidates,
        tried: HashSet::new(),
        debug: config::get().debug,
    };

    if let Some(mime) = &options.force_mime {
        let formats = guesser.by_mime(mime);
        if let Some(parser) = guesser.try_all(formats, false) {
            return Some(parser);
        }
    }

    let mut filename = options.filename.clone();
    for tag in stream.tags() {
        match tag {
            StreamTag::Parser(id) => {
                let Ok(format) = registry.get(id) else {
                    tracing::warn!(parser = %id, "Unknown parser in stream tag");
                    continue;
                };
                if guesser.is_candidate(&format) {
                    if let Some(parser) = guesser.try_format(&format, true) {
                        return Some(parser);
                    }
                }
            }
            StreamTag::Mime(mime) => {
                let formats = guesser.by_mime(mime);
                if let Some(parser) = guesser.try_all(formats, true) {
                    return Some(parser);
                }
            }
            StreamTag::Filename(name) => {
                filename.get_or_insert_with(|| name.clone());
            }
        }
    }

    if let Some(ext) = filename.as_deref().and_then(file_extension) {
        let formats: Vec<FormatRef> = registry
            .by_extension(&ext)
            .into_iter()
            .filter(|f| guesser.is_candidate(f))
            .collect();
        if let Some(parser) = guesser.try_all(formats, true) {
            return Some(parser);
        }
    }

    let remaining = guesser.candidates.clone();
    let found = guesser.try_all(remaining, true);
    if found.is_none() {
        tracing::debug!(source = %stream.source(), tried = guesser.tried.len(), "No parser found");
    }
    found
}

/// Options of [`create_parser`]
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub force_mime: Option<String>,
    /// Parser id used without guessing nor validation
    pub force_parser: Option<String>,
    /// Start of the content in the file, in bits
    pub offset: u64,
    /// Size of the content in bits, up to the end of the file by default
    pub size: Option<u64>,
    /// Name to use instead of the path for hints and diagnostics
    pub real_filename: Option<String>,
    /// Map the file instead of reading it through a buffer
    pub mmap: bool,
}

/// Open a file and guess its parser
///
/// Errors are reserved for I/O and unknown forced parsers; an unrecognized
/// file gives `Ok(None)`.
pub fn create_parser(path: impl AsRef<Path>, options: &CreateOptions) -> Result<Option<Parser>> {
    let path: PathBuf = path.as_ref().to_path_buf();
    let mut file = if options.mmap {
        FileStream::open_mmap(&path)?
    } else {
        FileStream::open(&path)?
    };
    if let Some(name) = &options.real_filename {
        file = file.with_real_filename(name.clone());
    }
    let filename = options
        .real_filename
        .clone()
        .or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()));

    let mut stream = file.into_shared();
    if options.offset != 0 || options.size.is_some() {
        stream = Arc::new(SubStream::new(stream, options.offset, options.size));
    }

    if let Some(id) = &options.force_parser {
        let format = GLOBAL_REGISTRY
            .get(id)
            .map_err(|err| Error::Validate(err.to_string()))?;
        return Parser::new(format, stream, false).map(Some);
    }

    let guess = GuessOptions {
        filename,
        force_mime: options.force_mime.clone(),
        subfile: false,
    };
    Ok(guess_parser_with(&GLOBAL_REGISTRY, stream, &guess))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldGenerator, FieldSpec};
    use crate::parser::FormatParser;
    use crate::registry::{Category, ParserTags};
    use crate::tree::FieldSetCursor;
    use binspect_stream::MemoryStream;

    /// Format accepting any stream starting with `prefix`
    struct Prefix {
        tags: ParserTags,
        prefix: &'static [u8],
    }

    impl FormatParser for Prefix {
        fn tags(&self) -> &ParserTags {
            &self.tags
        }

        fn create_fields(&self) -> Box<dyn FieldGenerator> {
            let len = self.prefix.len() as u64;
            let mut emitted = false;
            Box::new(move |_: &FieldSetCursor<'_>| -> Result<Option<FieldSpec>> {
                if emitted {
                    return Ok(None);
                }
                emitted = true;
                Ok(Some(FieldSpec::bytes("prefix", len)))
            })
        }

        fn validate(&self, parser: &Parser) -> std::result::Result<(), String> {
            let value = parser.value("prefix").map_err(|e| e.to_string())?;
            if value == self.prefix {
                Ok(())
            } else {
                Err("wrong prefix".to_string())
            }
        }
    }

    fn prefix(id: &str, prefix: &'static [u8], ext: &str, mime: &str, magic: bool, subfile: Subfile) -> FormatRef {
        let mut tags = ParserTags::builder(id)
            .description(format!("{} format", id))
            .category(Category::Misc)
            .min_size(prefix.len() as u64 * 8)
            .extensions(&[ext])
            .mime(&[mime])
            .subfile(subfile);
        if magic {
            tags = tags.magic(prefix, 0);
        }
        Arc::new(Prefix { tags: tags.build(), prefix })
    }

    fn registry() -> ParserRegistry {
        let registry = ParserRegistry::new();
        registry.register(prefix("aaa", b"AB", "aaa", "x/aaa", false, Subfile::Accept)).unwrap();
        registry.register(prefix("bbb", b"AB", "bbb", "x/bbb", false, Subfile::Skip)).unwrap();
        registry.register(prefix("ccc", b"ABCD", "ccc", "x/ccc", true, Subfile::Accept)).unwrap();
        registry
    }

    fn guess(stream: Arc<dyn InputStream>, options: &GuessOptions) -> Option<String> {
        guess_parser_with(&registry(), stream, options).map(|p| p.id().to_string())
    }

    #[test]
    fn test_order_by_id() {
        let stream = MemoryStream::new(b"ABCD".to_vec()).into_shared();
        assert_eq!(guess(stream, &GuessOptions::default()).as_deref(), Some("aaa"));
    }

    #[test]
    fn test_extension_first() {
        let stream = MemoryStream::new(b"ABCD".to_vec()).into_shared();
        let options = GuessOptions {
            filename: Some("file.CCC".to_string()),
            ..GuessOptions::default()
        };
        assert_eq!(guess(stream, &options).as_deref(), Some("ccc"));
    }

    #[test]
    fn test_filename_tag() {
        let stream = MemoryStream::new(b"ABCD".to_vec())
            .with_tag(StreamTag::Filename("data.bbb".to_string()))
            .into_shared();
        assert_eq!(guess(stream, &GuessOptions::default()).as_deref(), Some("bbb"));
    }

    #[test]
    fn test_parser_tag() {
        let stream = MemoryStream::new(b"ABCD".to_vec())
            .with_tag(StreamTag::Parser("ccc".to_string()))
            .into_shared();
        assert_eq!(guess(stream, &GuessOptions::default()).as_deref(), Some("ccc"));
    }

    #[test]
    fn test_force_mime() {
        let stream = MemoryStream::new(b"ABCD".to_vec()).into_shared();
        let options = GuessOptions {
            force_mime: Some("x/bbb".to_string()),
            ..GuessOptions::default()
        };
        assert_eq!(guess(stream, &options).as_deref(), Some("bbb"));
    }

    #[test]
    fn test_subfile_skip() {
        let stream = MemoryStream::new(b"ABCD".to_vec()).into_shared();
        let options = GuessOptions {
            filename: Some("x.bbb".to_string()),
            subfile: true,
            ..GuessOptions::default()
        };
        assert_eq!(guess(stream, &options).as_deref(), Some("aaa"));
    }

    #[test]
    fn test_magic_and_min_size_filters() {
        // too short for ccc, wrong prefix for the others
        let stream = MemoryStream::new(b"XYZ".to_vec()).into_shared();
        assert_eq!(guess(stream, &GuessOptions::default()), None);

        // ccc's magic doesn't match
        let stream = MemoryStream::new(b"ABXX".to_vec())
            .with_tag(StreamTag::Parser("ccc".to_string()))
            .into_shared();
        assert_eq!(guess(stream, &GuessOptions::default()).as_deref(), Some("aaa"));
    }

    #[test]
    fn test_create_parser_missing_file() {
        let result = create_parser("/nonexistent/file.gz", &CreateOptions::default());
        assert!(matches!(result, Err(Error::FileNotFound(_))));
    }

    #[test]
    fn test_create_parser_forced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, vec![0u8; 64]).unwrap();
        let options = CreateOptions {
            force_parser: Some("gzip".to_string()),
            ..CreateOptions::default()
        };
        let parser = create_parser(&path, &options).unwrap().unwrap();
        assert_eq!(parser.id(), "gzip");
        assert!(create_parser(&path, &CreateOptions::default()).unwrap().is_none());
    }
}
