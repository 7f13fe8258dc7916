//! Search field values of a parse tree
//!
//! The pattern is matched literally against the value of text leaves, or
//! against the display of every leaf with [`GrepOptions::all_fields`].
//! Matching is case-insensitive unless [`GrepOptions::case_sensitive`].

use regex::{Regex, RegexBuilder};
use serde::Serialize;

use binspect_core::{Error, Result};

use crate::explore::walk;
use crate::logging::{percent, progress_span};
use crate::tree::FieldRef;

/// Matching and output options
#[derive(Debug, Clone)]
pub struct GrepOptions {
    pub case_sensitive: bool,
    /// Match every leaf, not only text leaves
    pub all_fields: bool,
    /// Print the byte offset of matches
    pub show_addr: bool,
    /// Print the matched value
    pub show_value: bool,
    /// Print the field path
    pub show_path: bool,
    /// Prefix lines with the file name
    pub show_filename: bool,
}

impl Default for GrepOptions {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            all_fields: false,
            show_addr: true,
            show_value: true,
            show_path: false,
            show_filename: true,
        }
    }
}

/// One matching field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GrepMatch {
    /// Absolute address in bits
    pub address: u64,
    pub path: String,
    /// Matched text
    pub value: String,
}

/// Compiled search
#[derive(Debug, Clone)]
pub struct Grep {
    regex: Regex,
    options: GrepOptions,
}

impl Grep {
    pub fn new(pattern: &str, options: GrepOptions) -> Result<Self> {
        if pattern.is_empty() {
            return Err(Error::internal("empty grep pattern"));
        }
        let regex = RegexBuilder::new(&regex::escape(pattern))
            .case_insensitive(!options.case_sensitive)
            .build()
            .map_err(|err| Error::internal(err.to_string()))?;
        Ok(Self { regex, options })
    }

    pub fn options(&self) -> &GrepOptions {
        &self.options
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// Text to match for `field`, `None` when the field is not searched
    fn candidate(&self, field: FieldRef<'_>) -> Option<String> {
        let leaf = field.leaf()?;
        if leaf.is_text() {
            return match field.value() {
                Ok(value) => value.as_str().map(str::to_string),
                Err(err) => {
                    tracing::warn!(path = %field.path(), error = %err, "Unable to read field value");
                    None
                }
            };
        }
        self.options.all_fields.then(|| field.display())
    }

    /// Walk `root` and collect the matching leaves
    ///
    /// `progress` receives the percentage of the stream covered so far,
    /// each time it changes.
    pub fn search(&self, root: FieldRef<'_>, mut progress: Option<&mut dyn FnMut(u32)>) -> Vec<GrepMatch> {
        let total = root.tree().stream().size().unwrap_or(0);
        let _span = progress_span("grep", total).entered();
        let mut last_percent = None;
        let mut matches = Vec::new();
        walk(root, &mut |field, _| {
            if let Some(report) = progress.as_deref_mut() {
                let current = percent(field.absolute_address(), total);
                if last_percent != Some(current) {
                    last_percent = Some(current);
                    report(current);
                }
            }
            if let Some(text) = self.candidate(field) {
                if self.is_match(&text) {
                    matches.push(GrepMatch {
                        address: field.absolute_address(),
                        path: field.path(),
                        value: text,
                    });
                }
            }
            true
        });
        matches
    }

    /// Output line `FILE:OFFSET:PATH:VALUE`, keeping the enabled columns
    pub fn format_line(&self, filename: &str, found: &GrepMatch) -> String {
        let mut columns = Vec::with_capacity(4);
        if self.options.show_filename {
            columns.push(filename.to_string());
        }
        if self.options.show_addr {
            columns.push((found.address / 8).to_string());
        }
        if self.options.show_path {
            columns.push(found.path.clone());
        }
        if self.options.show_value {
            columns.push(binspect_core::charset::escape_text(&found.value, None));
        }
        columns.join(":")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldSpec;
    use crate::tree::{FieldSetCursor, Tree};
    use binspect_core::Endian;
    use binspect_stream::MemoryStream;

    fn tree() -> Tree {
        let stream = MemoryStream::new(b"README.txt\0Hello readme\x07\x00".to_vec()).into_shared();
        let mut step = 0;
        let generator = move |_: &FieldSetCursor<'_>| -> Result<Option<FieldSpec>> {
            step += 1;
            Ok(match step {
                1 => Some(FieldSpec::cstring("name")),
                2 => Some(FieldSpec::string("text", 12)),
                3 => Some(FieldSpec::uint16("readme_count")),
                _ => None,
            })
        };
        Tree::new(stream, "root", Box::new(generator), Endian::Little, None)
    }

    #[test]
    fn test_case_insensitive_text_only() {
        let tree = tree();
        let grep = Grep::new("readme", GrepOptions::default()).unwrap();
        let found = grep.search(tree.root(), None);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].path, "/name");
        assert_eq!(found[1].address, 88);
        assert_eq!(grep.format_line("f.bin", &found[1]), "f.bin:11:Hello readme");
    }

    #[test]
    fn test_case_sensitive_with_path() {
        let tree = tree();
        let options = GrepOptions {
            case_sensitive: true,
            show_path: true,
            show_filename: false,
            ..GrepOptions::default()
        };
        let grep = Grep::new("README", options).unwrap();
        let found = grep.search(tree.root(), None);
        assert_eq!(found.len(), 1);
        assert_eq!(grep.format_line("f.bin", &found[0]), "0:/name:README.txt");
    }

    #[test]
    fn test_all_fields_and_literal_pattern() {
        let tree = tree();
        let options = GrepOptions {
            all_fields: true,
            ..GrepOptions::default()
        };
        let grep = Grep::new("7", options).unwrap();
        let found = grep.search(tree.root(), None);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, "/readme_count");

        // regex metacharacters are literal
        let dot = Grep::new(".", GrepOptions::default()).unwrap();
        assert_eq!(dot.search(tree.root(), None).len(), 1);
        assert!(Grep::new("", GrepOptions::default()).is_err());
    }

    #[test]
    fn test_progress() {
        let tree = tree();
        let grep = Grep::new("zzz", GrepOptions::default()).unwrap();
        let mut reports = Vec::new();
        let mut report = |p: u32| reports.push(p);
        grep.search(tree.root(), Some(&mut report));
        assert_eq!(reports.first(), Some(&0));
        assert!(reports.windows(2).all(|w| w[0] <= w[1]));
    }
}
