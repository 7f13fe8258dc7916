//! Editor over a parsed file
//!
//! Paths given to the editor name fields from the root of the parser, with
//! or without a leading `/`. Every mutation is announced on the editor's
//! [`EventBus`].

use std::path::Path;

use binspect_core::{Error, Result, ResultExt, Value};
use binspect_parsers::path::{child_path, parse_path};
use binspect_parsers::{Event, EventBus, EventKind, Parser};
use binspect_stream::OutputStream;

use crate::fieldset::{EditableField, EditableSet};

/// Split `path` into its parent set path and the child name
fn split_path(path: &str) -> Result<(String, String)> {
    let parsed = parse_path(path);
    let invalid = || Error::InvalidPath { path: path.to_string() };
    if parsed.segments.contains(&"..") {
        return Err(invalid());
    }
    let (name, parents) = parsed.segments.split_last().ok_or_else(invalid)?;
    Ok((parents.join("/"), name.to_string()))
}

/// Field set at `path` below `root`, the root itself for an empty path
fn locate_set<'a, 't>(root: &'a mut EditableSet<'t>, path: &str) -> Result<&'a mut EditableSet<'t>> {
    if parse_path(path).segments.is_empty() {
        return Ok(root);
    }
    let container = root.path();
    match root.field_mut(path)? {
        EditableField::Set(set) => Ok(set),
        EditableField::Leaf(leaf) => Err(Error::editor(format!(
            "{} is not a field set",
            child_path(&container, leaf.name())
        ))),
    }
}

/// Mutable overlay over a [`Parser`]
///
/// The parser is never modified; edits live in the overlay until written
/// with [`Editor::write_into`], [`Editor::to_bytes`] or [`Editor::save`].
#[derive(Debug)]
pub struct Editor<'t> {
    parser: &'t Parser,
    root: EditableSet<'t>,
    events: EventBus,
}

impl<'t> Editor<'t> {
    pub fn new(parser: &'t Parser) -> Self {
        Self {
            parser,
            root: EditableSet::new(parser.root()),
            events: EventBus::new(),
        }
    }

    pub fn parser(&self) -> &'t Parser {
        self.parser
    }

    pub fn root(&self) -> &EditableSet<'t> {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut EditableSet<'t> {
        &mut self.root
    }

    /// Bus used to subscribe to edit events
    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    pub fn field_mut(&mut self, path: &str) -> Result<&mut EditableField<'t>> {
        self.root.field_mut(path)
    }

    pub fn set_mut(&mut self, path: &str) -> Result<&mut EditableSet<'t>> {
        locate_set(&mut self.root, path)
    }

    /// Current value of the leaf at `path`, edits included
    pub fn value(&mut self, path: &str) -> Result<Value> {
        let (parent, name) = split_path(path)?;
        locate_set(&mut self.root, &parent)?.value_of(&name)
    }

    /// Change the value of the leaf at `path`
    ///
    /// Events are only emitted once the value is accepted.
    pub fn set_value(&mut self, path: &str, value: impl Into<Value>) -> Result<()> {
        let (parent, name) = split_path(path)?;
        let set = locate_set(&mut self.root, &parent)?;
        let set_path = set.path();
        let seekable = set.is_seekable();
        let field = set.get_mut(&name)?;
        let old_size = field.size();
        let previous = seekable.then(|| field.clone());

        field.set_value(value)?;
        let new_size = field.size();
        if let Some(previous) = previous.filter(|_| new_size != old_size) {
            *field = previous;
            return Err(Error::editor(format!(
                "{}: size of \"{}\" cannot change in a seekable set",
                set_path, name
            )));
        }
        tracing::debug!(set = %set_path, field = %name, old_size, new_size, "Field value changed");

        self.events
            .emit(&Event::new(EventKind::SetFieldValue, set_path.as_str(), name.as_str()));
        self.events
            .emit(&Event::new(EventKind::FieldValueChanged, set_path.as_str(), name.as_str()));
        if new_size != old_size {
            self.events
                .emit(&Event::new(EventKind::FieldResized, set_path.as_str(), name.as_str()));
        }
        Ok(())
    }

    /// Remove the field at `path`
    pub fn delete(&mut self, path: &str) -> Result<()> {
        let (parent, name) = split_path(path)?;
        let set = locate_set(&mut self.root, &parent)?;
        set.delete(&name)?;
        tracing::debug!(set = %set.path(), field = %name, "Field deleted");
        self.events
            .emit(&Event::new(EventKind::FieldDeleted, set.path(), name));
        Ok(())
    }

    /// Insert `fields` right before the field at `path`
    pub fn insert_before(&mut self, path: &str, fields: Vec<EditableField<'t>>) -> Result<Vec<String>> {
        let (parent, name) = split_path(path)?;
        let set = locate_set(&mut self.root, &parent)?;
        let names = set.insert_before(&name, fields)?;
        let set_path = set.path();
        self.announce_inserted(&set_path, &names);
        Ok(names)
    }

    /// Insert `fields` right after the field at `path`
    pub fn insert_after(&mut self, path: &str, fields: Vec<EditableField<'t>>) -> Result<Vec<String>> {
        let (parent, name) = split_path(path)?;
        let set = locate_set(&mut self.root, &parent)?;
        let names = set.insert_after(&name, fields)?;
        let set_path = set.path();
        self.announce_inserted(&set_path, &names);
        Ok(names)
    }

    /// Append `fields` to the field set at `set_path`
    pub fn insert(&mut self, set_path: &str, fields: Vec<EditableField<'t>>) -> Result<Vec<String>> {
        let set = locate_set(&mut self.root, set_path)?;
        let names = set.insert(fields)?;
        let set_path = set.path();
        self.announce_inserted(&set_path, &names);
        Ok(names)
    }

    fn announce_inserted(&mut self, set_path: &str, names: &[String]) {
        tracing::debug!(set = %set_path, fields = ?names, "Fields inserted");
        for name in names {
            self.events
                .emit(&Event::new(EventKind::FieldInserted, set_path, name.as_str()));
        }
    }

    /// Put `field` in place of the field at `path`; returns its final name
    pub fn replace(&mut self, path: &str, field: EditableField<'t>) -> Result<String> {
        let (parent, name) = split_path(path)?;
        let set = locate_set(&mut self.root, &parent)?;
        let new_name = set.replace(&name, field)?;
        self.events
            .emit(&Event::new(EventKind::FieldReplaced, set.path(), name));
        Ok(new_name)
    }

    /// Size in bits of the edited file
    pub fn size(&self) -> u64 {
        self.root.size()
    }

    pub fn is_altered(&self) -> bool {
        self.root.is_altered()
    }

    pub fn write_into(&self, output: &mut OutputStream) -> Result<()> {
        self.root.write_into(output)
    }

    /// Edited file as bytes; a trailing partial byte is zero padded
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut output = OutputStream::new();
        self.write_into(&mut output)?;
        output.into_bytes()
    }

    /// Write the edited file to `path`; returns the number of bytes written
    pub fn save(&self, path: impl AsRef<Path>) -> Result<u64> {
        let path = path.as_ref();
        let mut output =
            OutputStream::create(path).with_context(|| format!("Unable to create {}", path.display()))?;
        self.write_into(&mut output)?;
        let written = output.finish()?;
        tracing::info!(path = %path.display(), bytes = written, "Saved edited file");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("/a/b").unwrap(), ("a".to_string(), "b".to_string()));
        assert_eq!(split_path("name").unwrap(), (String::new(), "name".to_string()));
        assert_eq!(split_path("/x/y/z").unwrap().0, "x/y");
        assert!(matches!(split_path("/"), Err(Error::InvalidPath { .. })));
        assert!(matches!(split_path("a/../b"), Err(Error::InvalidPath { .. })));
    }
}
