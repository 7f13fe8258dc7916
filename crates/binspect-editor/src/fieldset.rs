//! Editable field sets
//!
//! An [`EditableSet`] records edits against one parsed field set without
//! touching it: deleted child names, groups of inserted fields, and a lazy
//! cache of editable shadows of the original children. Its effective
//! children are the originals in order, each preceded by the group of new
//! fields anchored before it, minus the deleted ones, then the group
//! anchored at the end.

use std::collections::{HashMap, HashSet, VecDeque};

use binspect_core::{Endian, Error, Result, Value};
use binspect_parsers::path::{auto_index_base, child_path, parse_path, split_index};
use binspect_parsers::FieldRef;
use binspect_stream::OutputStream;

use crate::leaf::EditableLeaf;

/// Editable field: a leaf or a nested set
#[derive(Debug, Clone)]
pub enum EditableField<'t> {
    Leaf(EditableLeaf<'t>),
    Set(EditableSet<'t>),
}

impl<'t> EditableField<'t> {
    fn shadow(field: FieldRef<'t>) -> Self {
        if field.is_field_set() {
            EditableField::Set(EditableSet::new(field))
        } else {
            EditableField::Leaf(EditableLeaf::from_field(field))
        }
    }

    pub fn name(&self) -> String {
        match self {
            EditableField::Leaf(leaf) => leaf.name().to_string(),
            EditableField::Set(set) => set.name(),
        }
    }

    fn rename(&mut self, name: String) {
        if let EditableField::Leaf(leaf) = self {
            leaf.rename(name);
        }
    }

    pub fn is_field_set(&self) -> bool {
        matches!(self, EditableField::Set(_))
    }

    pub fn is_altered(&self) -> bool {
        match self {
            EditableField::Leaf(leaf) => leaf.is_altered(),
            EditableField::Set(set) => set.is_altered(),
        }
    }

    /// Size in bits of the serialized field
    pub fn size(&self) -> u64 {
        match self {
            EditableField::Leaf(leaf) => leaf.size(),
            EditableField::Set(set) => set.size(),
        }
    }

    pub fn value(&self) -> Result<Value> {
        match self {
            EditableField::Leaf(leaf) => leaf.value(),
            EditableField::Set(set) => Err(Error::editor(format!("Field set \"{}\" has no value", set.path()))),
        }
    }

    pub fn set_value(&mut self, value: impl Into<Value>) -> Result<()> {
        match self {
            EditableField::Leaf(leaf) => leaf.set_value(value),
            EditableField::Set(set) => Err(Error::editor(format!(
                "Field set \"{}\" value is read only",
                set.path()
            ))),
        }
    }

    pub fn as_leaf(&self) -> Option<&EditableLeaf<'t>> {
        match self {
            EditableField::Leaf(leaf) => Some(leaf),
            EditableField::Set(_) => None,
        }
    }

    pub fn as_set_mut(&mut self) -> Option<&mut EditableSet<'t>> {
        match self {
            EditableField::Set(set) => Some(set),
            EditableField::Leaf(_) => None,
        }
    }

    pub fn write_into(&self, output: &mut OutputStream) -> Result<()> {
        match self {
            EditableField::Leaf(leaf) => leaf.write_into(output),
            EditableField::Set(set) => set.write_into(output),
        }
    }

    fn adopt_endian(&mut self, endian: Endian) {
        if let EditableField::Leaf(leaf) = self {
            leaf.adopt_endian(endian);
        }
    }
}

/// One effective child: an edited field or an untouched original
enum Child<'a, 't> {
    Edited(&'a EditableField<'t>),
    Original(FieldRef<'t>),
}

impl Child<'_, '_> {
    fn name(&self) -> String {
        match self {
            Child::Edited(field) => field.name(),
            Child::Original(field) => field.name(),
        }
    }

    fn size(&self) -> u64 {
        match self {
            Child::Edited(field) => field.size(),
            Child::Original(field) => field.size(),
        }
    }

    fn write_into(&self, output: &mut OutputStream) -> Result<()> {
        match self {
            Child::Edited(field) => field.write_into(output),
            Child::Original(field) => copy_original(*field, output),
        }
    }
}

fn copy_original(field: FieldRef<'_>, output: &mut OutputStream) -> Result<()> {
    let stream = field.tree().stream();
    output.copy_bits_from(&**stream, field.absolute_address(), field.size(), field.endian())
}

/// Where a name lives in the inserted groups: anchor and position
type GroupPosition = (Option<String>, usize);

/// Editable overlay of a parsed field set
#[derive(Debug, Clone)]
pub struct EditableSet<'t> {
    input: FieldRef<'t>,
    /// Lazy cache of editable shadows of original children
    fields: HashMap<String, EditableField<'t>>,
    deleted: HashSet<String>,
    /// New fields keyed by the original child they precede, `None` for the end
    inserted: HashMap<Option<String>, VecDeque<EditableField<'t>>>,
}

impl<'t> EditableSet<'t> {
    pub fn new(input: FieldRef<'t>) -> Self {
        Self {
            input,
            fields: HashMap::new(),
            deleted: HashSet::new(),
            inserted: HashMap::new(),
        }
    }

    /// Parsed field set this overlay edits
    pub fn input(&self) -> FieldRef<'t> {
        self.input
    }

    pub fn name(&self) -> String {
        self.input.name()
    }

    pub fn path(&self) -> String {
        self.input.path()
    }

    pub fn endian(&self) -> Endian {
        self.input.endian()
    }

    fn original(&self, name: &str) -> Option<FieldRef<'t>> {
        self.input.get(name).ok().filter(|f| f.parent() == Some(self.input))
    }

    fn original_names(&self) -> Vec<String> {
        self.input.iter().map(|f| f.name()).collect()
    }

    fn find_inserted(&self, name: &str) -> Option<GroupPosition> {
        self.inserted.iter().find_map(|(anchor, group)| {
            group
                .iter()
                .position(|f| f.name() == name)
                .map(|pos| (anchor.clone(), pos))
        })
    }

    fn effective(&self) -> Vec<Child<'_, 't>> {
        let mut children = Vec::new();
        for field in self.input.iter() {
            let name = field.name();
            if let Some(group) = self.inserted.get(&Some(name.clone())) {
                children.extend(group.iter().map(Child::Edited));
            }
            if self.deleted.contains(&name) {
                continue;
            }
            match self.fields.get(&name) {
                Some(shadow) => children.push(Child::Edited(shadow)),
                None => children.push(Child::Original(field)),
            }
        }
        if let Some(group) = self.inserted.get(&None) {
            children.extend(group.iter().map(Child::Edited));
        }
        children
    }

    /// Names of the effective children, in order
    pub fn names(&self) -> Vec<String> {
        self.effective().iter().map(Child::name).collect()
    }

    pub fn len(&self) -> usize {
        self.input.len() - self.deleted.len() + self.inserted.values().map(VecDeque::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find_inserted(name).is_some() || (!self.deleted.contains(name) && self.original(name).is_some())
    }

    /// Whether children sit at explicit addresses of the parsed set
    pub fn is_seekable(&self) -> bool {
        self.input.is_seekable()
    }

    fn check_layout_editable(&self) -> Result<()> {
        if self.is_seekable() {
            return Err(Error::editor(format!(
                "Fields of seekable set \"{}\" cannot be added or removed",
                self.path()
            )));
        }
        Ok(())
    }

    pub fn is_altered(&self) -> bool {
        !self.inserted.is_empty() || !self.deleted.is_empty() || self.fields.values().any(EditableField::is_altered)
    }

    /// Size in bits: the sum of the effective children once altered
    ///
    /// A seekable set keeps its parsed size, its layout being fixed.
    pub fn size(&self) -> u64 {
        if self.is_altered() && !self.is_seekable() {
            self.effective().iter().map(Child::size).sum()
        } else {
            self.input.size()
        }
    }

    /// Address of child `name` relative to the set, after edits
    pub fn address_of(&self, name: &str) -> Result<u64> {
        if self.is_seekable() {
            return self
                .original(name)
                .map(|field| field.address())
                .ok_or_else(|| Error::missing_field(self.path(), name));
        }
        let mut address = 0;
        for child in self.effective() {
            if child.name() == name {
                return Ok(address);
            }
            address += child.size();
        }
        Err(Error::missing_field(self.path(), name))
    }

    /// Current value of child `name`
    pub fn value_of(&self, name: &str) -> Result<Value> {
        if let Some((anchor, pos)) = self.find_inserted(name) {
            return self.inserted[&anchor][pos].value();
        }
        if self.deleted.contains(name) {
            return Err(Error::missing_field(self.path(), name));
        }
        match self.fields.get(name) {
            Some(field) => field.value(),
            None => self
                .original(name)
                .ok_or_else(|| Error::missing_field(self.path(), name))?
                .value(),
        }
    }

    /// Editable child `name`, creating its shadow on first access
    pub fn get_mut(&mut self, name: &str) -> Result<&mut EditableField<'t>> {
        if let Some((anchor, pos)) = self.find_inserted(name) {
            return self
                .inserted
                .get_mut(&anchor)
                .and_then(|group| group.get_mut(pos))
                .ok_or_else(|| Error::internal("inserted field vanished"));
        }
        let path = self.path();
        if self.deleted.contains(name) {
            return Err(Error::missing_field(path, name));
        }
        if !self.fields.contains_key(name) {
            let field = self
                .original(name)
                .ok_or_else(|| Error::missing_field(path.as_str(), name))?;
            self.fields.insert(name.to_string(), EditableField::shadow(field));
        }
        self.fields
            .get_mut(name)
            .ok_or_else(|| Error::missing_field(path, name))
    }

    /// Descendant at a path relative to this set
    pub fn field_mut(&mut self, path: &str) -> Result<&mut EditableField<'t>> {
        let parsed = parse_path(path);
        let invalid = || Error::InvalidPath { path: path.to_string() };
        if parsed.segments.contains(&"..") {
            return Err(invalid());
        }
        let (first, rest) = parsed.segments.split_first().ok_or_else(invalid)?;
        let mut container = child_path(&self.path(), first);
        let mut field = self.get_mut(first)?;
        for segment in rest {
            field = match field {
                EditableField::Set(set) => set.get_mut(segment)?,
                EditableField::Leaf(_) => return Err(Error::missing_field(container, *segment)),
            };
            container = child_path(&container, segment);
        }
        Ok(field)
    }

    /// Give `[]`-suffixed names an index and reject duplicates
    fn prepare(&self, fields: &mut [EditableField<'t>]) -> Result<Vec<String>> {
        let originals = self.original_names();
        let inserted: Vec<String> = self
            .inserted
            .values()
            .flat_map(|group| group.iter().map(EditableField::name))
            .collect();

        let mut names: Vec<String> = Vec::with_capacity(fields.len());
        for field in fields.iter_mut() {
            let name = field.name();
            let name = match auto_index_base(&name) {
                Some(base) => {
                    let next = originals
                        .iter()
                        .chain(inserted.iter())
                        .chain(names.iter())
                        .filter_map(|existing| match split_index(existing) {
                            (b, Some(index)) if b == base => Some(index + 1),
                            _ => None,
                        })
                        .max()
                        .unwrap_or(0);
                    let indexed = format!("{}[{}]", base, next);
                    field.rename(indexed.clone());
                    indexed
                }
                None => name,
            };
            if names.contains(&name) {
                return Err(Error::DuplicateField { name });
            }
            let live_original = originals.contains(&name) && !self.deleted.contains(&name);
            if live_original || inserted.contains(&name) {
                return Err(Error::DuplicateField { name });
            }
            names.push(name);
        }
        let endian = self.endian();
        for field in fields.iter_mut() {
            field.adopt_endian(endian);
        }
        Ok(names)
    }

    /// Insert `fields` right before child `name`; returns their final names
    pub fn insert_before(&mut self, name: &str, fields: Vec<EditableField<'t>>) -> Result<Vec<String>> {
        self.insert_at(Some(name), fields, false)
    }

    /// Insert `fields` right after child `name`; returns their final names
    pub fn insert_after(&mut self, name: &str, fields: Vec<EditableField<'t>>) -> Result<Vec<String>> {
        self.insert_at(Some(name), fields, true)
    }

    /// Append `fields` at the end of the set; returns their final names
    pub fn insert(&mut self, fields: Vec<EditableField<'t>>) -> Result<Vec<String>> {
        self.insert_at(None, fields, true)
    }

    fn insert_at(&mut self, key: Option<&str>, mut fields: Vec<EditableField<'t>>, after: bool) -> Result<Vec<String>> {
        self.check_layout_editable()?;
        let names = self.prepare(&mut fields)?;

        let Some(key) = key else {
            self.inserted.entry(None).or_default().extend(fields);
            return Ok(names);
        };

        // Next to a field inserted earlier: splice into its group
        if let Some((anchor, pos)) = self.find_inserted(key) {
            let group = self.inserted.entry(anchor).or_default();
            let at = if after { pos + 1 } else { pos };
            for (offset, field) in fields.into_iter().enumerate() {
                group.insert(at + offset, field);
            }
            return Ok(names);
        }

        let originals = self.original_names();
        let index = originals
            .iter()
            .position(|n| n == key)
            .ok_or_else(|| Error::missing_field(self.path(), key))?;
        if after {
            let anchor = originals.get(index + 1).cloned();
            let group = self.inserted.entry(anchor).or_default();
            for field in fields.into_iter().rev() {
                group.push_front(field);
            }
        } else {
            self.inserted
                .entry(Some(key.to_string()))
                .or_default()
                .extend(fields);
        }
        Ok(names)
    }

    /// Remove child `name`
    ///
    /// Deleting a field inserted earlier drops it; deleting an original hides
    /// it. Deleting twice is a [`Error::MissingField`].
    pub fn delete(&mut self, name: &str) -> Result<()> {
        if let Some((anchor, pos)) = self.find_inserted(name) {
            if let Some(group) = self.inserted.get_mut(&anchor) {
                group.remove(pos);
                if group.is_empty() {
                    self.inserted.remove(&anchor);
                }
            }
            return Ok(());
        }
        if self.deleted.contains(name) || self.original(name).is_none() {
            return Err(Error::missing_field(self.path(), name));
        }
        self.check_layout_editable()?;
        self.deleted.insert(name.to_string());
        self.fields.remove(name);
        Ok(())
    }

    /// Put `field` in place of child `name`
    pub fn replace(&mut self, name: &str, mut field: EditableField<'t>) -> Result<String> {
        if let Some((anchor, pos)) = self.find_inserted(name) {
            let removed = self
                .inserted
                .get_mut(&anchor)
                .and_then(|group| group.remove(pos))
                .ok_or_else(|| Error::internal("inserted field vanished"))?;
            let names = match self.prepare(std::slice::from_mut(&mut field)) {
                Ok(names) => names,
                Err(err) => {
                    self.inserted.entry(anchor).or_default().insert(pos, removed);
                    return Err(err);
                }
            };
            self.inserted.entry(anchor).or_default().insert(pos, field);
            return Ok(names.into_iter().next().unwrap_or_default());
        }
        let shadow = self.fields.get(name).cloned();
        self.delete(name)?;
        match self.insert_before(name, vec![field]) {
            Ok(names) => Ok(names.into_iter().next().unwrap_or_default()),
            Err(err) => {
                self.deleted.remove(name);
                if let Some(shadow) = shadow {
                    self.fields.insert(name.to_string(), shadow);
                }
                Err(err)
            }
        }
    }

    /// Serialize the set
    ///
    /// An unaltered set is copied bit for bit from its original range.
    pub fn write_into(&self, output: &mut OutputStream) -> Result<()> {
        if !self.is_altered() {
            return copy_original(self.input, output);
        }
        if self.is_seekable() {
            return self.write_seekable(output);
        }
        let start = output.size_bits();
        for child in self.effective() {
            child.write_into(output)?;
        }
        let written = output.size_bits() - start;
        let expected = self.size();
        if written != expected {
            return Err(Error::internal(format!(
                "{}: wrote {} bits instead of {}",
                self.path(),
                written,
                expected
            )));
        }
        Ok(())
    }

    /// Write each child at its parsed address, copying the gaps between
    /// children from the input
    fn write_seekable(&self, output: &mut OutputStream) -> Result<()> {
        let stream = self.input.tree().stream();
        let base = self.input.absolute_address();
        let endian = self.endian();

        let mut children: Vec<(u64, Child<'_, 't>, u64)> = self
            .input
            .iter()
            .map(|field| {
                let child = match self.fields.get(&field.name()) {
                    Some(shadow) => Child::Edited(shadow),
                    None => Child::Original(field),
                };
                (field.address(), child, field.size())
            })
            .collect();
        children.sort_by_key(|(address, _, _)| *address);

        let mut cursor = 0;
        for (address, child, original_size) in children {
            if child.size() != original_size {
                return Err(Error::editor(format!(
                    "{}: size of \"{}\" cannot change in a seekable set",
                    self.path(),
                    child.name()
                )));
            }
            if address < cursor {
                return Err(Error::editor(format!(
                    "{}: overlapping field \"{}\" cannot be written back",
                    self.path(),
                    child.name()
                )));
            }
            output.copy_bits_from(&**stream, base + cursor, address - cursor, endian)?;
            child.write_into(output)?;
            cursor = address + original_size;
        }
        let size = self.input.size();
        if cursor < size {
            output.copy_bits_from(&**stream, base + cursor, size - cursor, endian)?;
        }
        Ok(())
    }
}
