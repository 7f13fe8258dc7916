//! Parser registry for format discovery
//!
//! Every format parser declares a [`ParserTags`] record. The registry
//! validates the tags on registration, indexes parsers by id, category,
//! extension and MIME type, and is frozen once the built-in parsers are
//! registered so the guesser works from an immutable table.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use regex::bytes::Regex;
use serde::Serialize;

use binspect_stream::InputStream;

use crate::parser::FormatParser;

/// Magic regexes only look at the start of a stream
const MAGIC_REGEX_WINDOW: u64 = 64 * 8;

/// Ids are at least three characters of `[a-z0-9_]`, not starting with `_`
fn is_valid_id(id: &str) -> bool {
    let valid_char = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_';
    id.len() >= 3 && !id.starts_with('_') && id.chars().all(valid_char)
}

/// Broad family of a file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Archive,
    Audio,
    Container,
    FileSystem,
    Game,
    Image,
    Misc,
    Program,
    Video,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Archive,
        Category::Audio,
        Category::Container,
        Category::FileSystem,
        Category::Game,
        Category::Image,
        Category::Misc,
        Category::Program,
        Category::Video,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Category::Archive => "archive",
            Category::Audio => "audio",
            Category::Container => "container",
            Category::FileSystem => "file_system",
            Category::Game => "game",
            Category::Image => "image",
            Category::Misc => "misc",
            Category::Program => "program",
            Category::Video => "video",
        }
    }

    /// Heading used by [`ParserRegistry::print_list`]
    pub fn title(&self) -> &'static str {
        match self {
            Category::Archive => "Archive",
            Category::Audio => "Audio",
            Category::Container => "Container",
            Category::FileSystem => "File system",
            Category::Game => "Game",
            Category::Image => "Image",
            Category::Misc => "Misc",
            Category::Program => "Program",
            Category::Video => "Video",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.name() == s.to_lowercase())
            .ok_or_else(|| format!("Unknown category: {}", s))
    }
}

/// Whether a parser may be tried on sub-streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Subfile {
    #[default]
    Accept,
    Skip,
}

/// Identification tags of a format parser
#[derive(Debug, Clone)]
pub struct ParserTags {
    /// Unique snake_case identifier
    pub id: String,
    pub description: String,
    pub category: Category,
    /// Minimum stream size in bits
    pub min_size: u64,
    /// `(bytes, bit offset)` pairs, one of which must match
    pub magic: Vec<(Vec<u8>, u64)>,
    /// Replaces `magic` when set; matched at the start of the stream
    pub magic_regex: Option<String>,
    /// Lowercase extensions without the dot
    pub file_ext: Vec<String>,
    pub mime: Vec<String>,
    pub subfile: Subfile,
}

impl ParserTags {
    pub fn builder(id: impl Into<String>) -> ParserTagsBuilder {
        ParserTagsBuilder {
            tags: ParserTags {
                id: id.into(),
                description: String::new(),
                category: Category::Misc,
                min_size: 0,
                magic: Vec::new(),
                magic_regex: None,
                file_ext: Vec::new(),
                mime: Vec::new(),
                subfile: Subfile::Accept,
            },
        }
    }

    /// Check the tags, returning the first problem found
    pub fn validate(&self) -> Result<(), RegistryError> {
        if !is_valid_id(&self.id) {
            return Err(RegistryError::InvalidId(self.id.clone()));
        }
        if self.description.trim().is_empty() {
            return Err(RegistryError::EmptyDescription(self.id.clone()));
        }
        if self.min_size == 0 {
            return Err(RegistryError::ZeroMinSize(self.id.clone()));
        }
        if let Some(ext) = self
            .file_ext
            .iter()
            .find(|ext| ext.is_empty() || ext.starts_with('.') || ext.chars().any(|c| c.is_ascii_uppercase()))
        {
            return Err(RegistryError::InvalidExtension {
                id: self.id.clone(),
                ext: ext.clone(),
            });
        }
        if let Some(mime) = self.mime.iter().find(|mime| !mime.contains('/')) {
            return Err(RegistryError::InvalidMime {
                id: self.id.clone(),
                mime: mime.clone(),
            });
        }
        if self.magic.iter().any(|(bytes, _)| bytes.is_empty()) {
            return Err(RegistryError::InvalidMagic {
                id: self.id.clone(),
                message: "empty magic".to_string(),
            });
        }
        if let Some(pattern) = &self.magic_regex {
            Regex::new(pattern).map_err(|err| RegistryError::InvalidMagic {
                id: self.id.clone(),
                message: err.to_string(),
            })?;
        }
        Ok(())
    }

    /// `true` when the format declares any magic
    pub fn has_magic(&self) -> bool {
        !self.magic.is_empty() || self.magic_regex.is_some()
    }
}

/// Builder for [`ParserTags`]
pub struct ParserTagsBuilder {
    tags: ParserTags,
}

impl ParserTagsBuilder {
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.tags.description = desc.into();
        self
    }

    pub fn category(mut self, category: Category) -> Self {
        self.tags.category = category;
        self
    }

    /// Minimum size in bits
    pub fn min_size(mut self, bits: u64) -> Self {
        self.tags.min_size = bits;
        self
    }

    /// Magic `bytes` expected at bit `offset`
    pub fn magic(mut self, bytes: &[u8], offset: u64) -> Self {
        self.tags.magic.push((bytes.to_vec(), offset));
        self
    }

    pub fn magic_regex(mut self, pattern: impl Into<String>) -> Self {
        self.tags.magic_regex = Some(pattern.into());
        self
    }

    pub fn extensions(mut self, exts: &[&str]) -> Self {
        self.tags.file_ext = exts.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn mime(mut self, mimes: &[&str]) -> Self {
        self.tags.mime = mimes.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn subfile(mut self, subfile: Subfile) -> Self {
        self.tags.subfile = subfile;
        self
    }

    pub fn build(self) -> ParserTags {
        self.tags
    }
}

/// Registered format parser
pub type FormatRef = Arc<dyn FormatParser>;

/// Parser registry
pub struct ParserRegistry {
    /// Parser id to parser, sorted by id
    parsers: RwLock<BTreeMap<String, FormatRef>>,
    /// Lowercase extension to parser ids
    extension_map: RwLock<HashMap<String, Vec<String>>>,
    mime_map: RwLock<HashMap<String, Vec<String>>>,
    /// Compiled magic regexes by parser id
    magic_regex: RwLock<HashMap<String, Regex>>,
    frozen: AtomicBool,
}

impl ParserRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            parsers: RwLock::new(BTreeMap::new()),
            extension_map: RwLock::new(HashMap::new()),
            mime_map: RwLock::new(HashMap::new()),
            magic_regex: RwLock::new(HashMap::new()),
            frozen: AtomicBool::new(false),
        }
    }

    /// Register a new parser after validating its tags
    pub fn register(&self, format: FormatRef) -> Result<(), RegistryError> {
        if self.is_frozen() {
            return Err(RegistryError::Frozen);
        }
        let tags = format.tags();
        tags.validate()?;
        let id = tags.id.clone();
        let regex = tags
            .magic_regex
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|err| RegistryError::InvalidMagic {
                id: id.clone(),
                message: err.to_string(),
            })?;

        let mut parsers = self.parsers.write().map_err(|_| RegistryError::LockPoisoned)?;
        if parsers.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }
        let mut ext_map = self.extension_map.write().map_err(|_| RegistryError::LockPoisoned)?;
        for ext in &tags.file_ext {
            ext_map.entry(ext.to_lowercase()).or_default().push(id.clone());
        }
        let mut mime_map = self.mime_map.write().map_err(|_| RegistryError::LockPoisoned)?;
        for mime in &tags.mime {
            mime_map.entry(mime.to_lowercase()).or_default().push(id.clone());
        }
        if let Some(regex) = regex {
            self.magic_regex
                .write()
                .map_err(|_| RegistryError::LockPoisoned)?
                .insert(id.clone(), regex);
        }
        tracing::debug!(parser = %id, "Registered parser");
        parsers.insert(id, format);
        Ok(())
    }

    /// Register several parsers; rejected ones are logged and skipped
    pub fn register_all(&self, formats: impl IntoIterator<Item = FormatRef>) -> usize {
        let mut count = 0;
        for format in formats {
            let id = format.tags().id.clone();
            match self.register(format) {
                Ok(()) => count += 1,
                Err(err) => tracing::warn!(parser = %id, error = %err, "Parser rejected"),
            }
        }
        count
    }

    /// Refuse further registrations
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.parsers.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a parser by ID
    pub fn get(&self, id: &str) -> Result<FormatRef, RegistryError> {
        let parsers = self.parsers.read().map_err(|_| RegistryError::LockPoisoned)?;
        parsers
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// All parsers, sorted by id
    pub fn parsers(&self) -> Vec<FormatRef> {
        self.parsers
            .read()
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default()
    }

    fn lookup(&self, map: &RwLock<HashMap<String, Vec<String>>>, key: &str) -> Vec<FormatRef> {
        let ids = map
            .read()
            .ok()
            .and_then(|m| m.get(key).cloned())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get(id).ok()).collect()
    }

    pub fn by_category(&self, category: Category) -> Vec<FormatRef> {
        self.parsers()
            .into_iter()
            .filter(|p| p.tags().category == category)
            .collect()
    }

    /// Parsers handling an extension, with or without its dot, any case
    pub fn by_extension(&self, ext: &str) -> Vec<FormatRef> {
        let ext = ext.trim_start_matches('.').to_lowercase();
        self.lookup(&self.extension_map, &ext)
    }

    pub fn by_mime(&self, mime: &str) -> Vec<FormatRef> {
        self.lookup(&self.mime_map, &mime.to_lowercase())
    }

    /// Parsers whose minimum size fits in `available` bits
    pub fn filter(&self, available: u64) -> Vec<FormatRef> {
        self.parsers()
            .into_iter()
            .filter(|p| p.tags().min_size <= available)
            .collect()
    }

    /// Parsers whose minimum size fits in `stream`
    pub fn filter_stream(&self, stream: &dyn InputStream) -> Vec<FormatRef> {
        self.parsers()
            .into_iter()
            .filter(|p| stream.size_ge(p.tags().min_size))
            .collect()
    }

    /// Check the magic of `format` against `stream`
    ///
    /// Returns `None` when the format declares no magic.
    pub fn magic_matches(&self, format: &dyn FormatParser, stream: &dyn InputStream) -> Option<bool> {
        let tags = format.tags();
        if let Some(regex) = self.magic_regex.read().ok().and_then(|m| m.get(&tags.id).cloned()) {
            let end = stream.size().map_or(MAGIC_REGEX_WINDOW, |size| size.min(MAGIC_REGEX_WINDOW));
            let found = stream.search_regex(&regex, 0, end).ok().flatten();
            return Some(matches!(found, Some((0, _))));
        }
        if tags.magic.is_empty() {
            return None;
        }
        Some(tags.magic.iter().any(|(bytes, offset)| {
            stream
                .read_bytes(*offset, bytes.len())
                .is_ok_and(|data| data == *bytes)
        }))
    }

    /// Parsers whose magic matches the start of `stream`
    pub fn by_magic(&self, stream: &dyn InputStream) -> Vec<FormatRef> {
        self.parsers()
            .into_iter()
            .filter(|p| self.magic_matches(p.as_ref(), stream) == Some(true))
            .collect()
    }

    /// List all registered parsers
    pub fn list(&self) -> Vec<ParserInfo> {
        self.parsers().iter().map(|p| ParserInfo::from(p.tags())).collect()
    }

    /// Print the parsers grouped by category
    pub fn print_list(&self, out: &mut dyn Write) -> std::io::Result<()> {
        let mut total = 0;
        for category in Category::ALL {
            let parsers = self.by_category(category);
            if parsers.is_empty() {
                continue;
            }
            writeln!(out, "{}", category.title())?;
            writeln!(out, "{}", "-".repeat(category.title().len()))?;
            writeln!(out)?;
            for parser in &parsers {
                let tags = parser.tags();
                writeln!(out, "- {}: {}", tags.id, tags.description)?;
            }
            writeln!(out)?;
            total += parsers.len();
        }
        writeln!(out, "Total: {} parsers", total)
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Parser information for display
#[derive(Debug, Clone, Serialize)]
pub struct ParserInfo {
    pub id: String,
    pub description: String,
    pub category: Category,
    pub min_size: u64,
    pub extensions: Vec<String>,
    pub mime: Vec<String>,
    pub subfile: Subfile,
}

impl From<&ParserTags> for ParserInfo {
    fn from(tags: &ParserTags) -> Self {
        Self {
            id: tags.id.clone(),
            description: tags.description.clone(),
            category: tags.category,
            min_size: tags.min_size,
            extensions: tags.file_ext.clone(),
            mime: tags.mime.clone(),
            subfile: tags.subfile,
        }
    }
}

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Parser with ID '{0}' already registered")]
    DuplicateId(String),

    #[error("Parser with ID '{0}' not found")]
    NotFound(String),

    #[error("Invalid parser ID '{0}'")]
    InvalidId(String),

    #[error("Parser '{0}' has no description")]
    EmptyDescription(String),

    #[error("Parser '{0}' has a zero minimum size")]
    ZeroMinSize(String),

    #[error("Parser '{id}' has an invalid extension '{ext}'")]
    InvalidExtension { id: String, ext: String },

    #[error("Parser '{id}' has an invalid MIME type '{mime}'")]
    InvalidMime { id: String, mime: String },

    #[error("Parser '{id}' has an invalid magic: {message}")]
    InvalidMagic { id: String, message: String },

    #[error("Registry is frozen")]
    Frozen,

    #[error("Registry lock poisoned")]
    LockPoisoned,
}

/// Global registry instance, frozen after the built-in parsers
pub static GLOBAL_REGISTRY: Lazy<ParserRegistry> = Lazy::new(|| {
    let registry = ParserRegistry::new();
    let count = registry.register_all(crate::formats::builtin_parsers());
    tracing::debug!(parsers = count, "Built-in parsers registered");
    registry.freeze();
    registry
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldGenerator;
    use crate::parser::Parser;
    use binspect_stream::MemoryStream;

    struct MockFormat(ParserTags);

    impl FormatParser for MockFormat {
        fn tags(&self) -> &ParserTags {
            &self.0
        }

        fn create_fields(&self) -> Box<dyn FieldGenerator> {
            Box::new(|_: &crate::tree::FieldSetCursor<'_>| -> binspect_core::Result<Option<crate::field::FieldSpec>> { Ok(None) })
        }

        fn validate(&self, _parser: &Parser) -> Result<(), String> {
            Ok(())
        }
    }

    fn mock(tags: ParserTagsBuilder) -> FormatRef {
        Arc::new(MockFormat(tags.build()))
    }

    fn valid(id: &str) -> ParserTagsBuilder {
        ParserTags::builder(id)
            .description("Mock format")
            .category(Category::Misc)
            .min_size(16)
            .extensions(&["mock", "test"])
            .mime(&["application/x-mock"])
    }

    #[test]
    fn test_registry_registration() {
        let registry = ParserRegistry::new();
        registry.register(mock(valid("mock"))).unwrap();

        let parser = registry.get("mock").unwrap();
        assert_eq!(parser.tags().description, "Mock format");
        assert!(matches!(registry.register(mock(valid("mock"))), Err(RegistryError::DuplicateId(_))));
    }

    #[test]
    fn test_extension_lookup() {
        let registry = ParserRegistry::new();
        registry.register(mock(valid("mock"))).unwrap();

        assert_eq!(registry.by_extension("MOCK").len(), 1);
        assert_eq!(registry.by_extension(".test").len(), 1);
        assert!(registry.by_extension("png").is_empty());
        assert_eq!(registry.by_mime("application/x-mock").len(), 1);
    }

    #[test]
    fn test_tag_validation() {
        let registry = ParserRegistry::new();
        let rejected = [
            mock(valid("X")),
            mock(valid("ok_id").description("")),
            mock(valid("zero_size").min_size(0)),
            mock(valid("bad_ext").extensions(&[".gz"])),
            mock(valid("bad_mime").mime(&["nothing"])),
            mock(valid("bad_regex").magic_regex("(")),
        ];
        assert_eq!(registry.register_all(rejected), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_frozen_registry() {
        let registry = ParserRegistry::new();
        registry.freeze();
        assert!(matches!(registry.register(mock(valid("mock"))), Err(RegistryError::Frozen)));
    }

    #[test]
    fn test_filter_is_monotone() {
        let registry = ParserRegistry::new();
        registry.register(mock(valid("small").min_size(8))).unwrap();
        registry.register(mock(valid("large").min_size(64))).unwrap();
        assert_eq!(registry.filter(0).len(), 0);
        assert_eq!(registry.filter(8).len(), 1);
        assert_eq!(registry.filter(1000).len(), 2);
    }

    #[test]
    fn test_magic() {
        let registry = ParserRegistry::new();
        registry.register(mock(valid("with_magic").magic(b"MZ", 0))).unwrap();
        registry.register(mock(valid("late_magic").magic(b"ok", 16))).unwrap();
        registry.register(mock(valid("regex_magic").magic_regex("GIF8[79]a"))).unwrap();
        registry.register(mock(valid("no_magic"))).unwrap();

        let stream = MemoryStream::new(b"MZok".to_vec());
        let ids: Vec<String> = registry.by_magic(&stream).iter().map(|p| p.tags().id.clone()).collect();
        assert_eq!(ids, vec!["late_magic", "with_magic"]);

        let gif = MemoryStream::new(b"GIF89a....".to_vec());
        let regex = registry.get("regex_magic").unwrap();
        assert_eq!(registry.magic_matches(regex.as_ref(), &gif), Some(true));
        // a match later in the stream does not count
        let shifted = MemoryStream::new(b"xGIF89a...".to_vec());
        assert_eq!(registry.magic_matches(regex.as_ref(), &shifted), Some(false));
        let none = registry.get("no_magic").unwrap();
        assert_eq!(registry.magic_matches(none.as_ref(), &gif), None);
    }

    #[test]
    fn test_print_list() {
        let registry = ParserRegistry::new();
        registry.register(mock(valid("mock"))).unwrap();
        let mut out = Vec::new();
        registry.print_list(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Misc\n----\n"));
        assert!(text.contains("- mock: Mock format"));
        assert!(text.ends_with("Total: 1 parsers\n"));
    }

    #[test]
    fn test_global_registry_is_frozen() {
        assert!(GLOBAL_REGISTRY.is_frozen());
        assert!(GLOBAL_REGISTRY.get("gzip").is_ok());
        assert!(GLOBAL_REGISTRY.get("png").is_ok());
    }
}
