//! Field tree walking and listing
//!
//! [`walk`] visits a field and its descendants depth-first in child order,
//! generating children on demand. [`list_fields`] collects a flat
//! [`FieldInfo`] record per visited field, for text or JSON output.

use serde::Serialize;

use crate::path::glob_match;
use crate::tree::FieldRef;

/// Visit `field` and its descendants depth-first
///
/// `visit` receives each field with its depth below `field` (0 for `field`
/// itself) and returns whether to descend into it.
pub fn walk<'t, F>(field: FieldRef<'t>, visit: &mut F)
where
    F: FnMut(FieldRef<'t>, usize) -> bool,
{
    walk_at(field, 0, visit);
}

fn walk_at<'t, F>(field: FieldRef<'t>, depth: usize, visit: &mut F)
where
    F: FnMut(FieldRef<'t>, usize) -> bool,
{
    if !visit(field, depth) || !field.is_field_set() {
        return;
    }
    for child in field.iter() {
        walk_at(child, depth + 1, visit);
    }
}

/// Leaves below `field`, in stream order for ordinary sets
pub fn leaves(field: FieldRef<'_>) -> Vec<FieldRef<'_>> {
    let mut out = Vec::new();
    walk(field, &mut |f, _| {
        if !f.is_field_set() {
            out.push(f);
        }
        true
    });
    out
}

/// Summary of one field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldInfo {
    pub path: String,
    pub name: String,
    /// Absolute address in bits
    pub address: u64,
    /// Size in bits
    pub size: u64,
    #[serde(rename = "type")]
    pub type_name: String,
    pub is_field_set: bool,
    pub display: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub depth: usize,
}

impl FieldInfo {
    pub fn from_field(field: FieldRef<'_>, depth: usize) -> Self {
        Self {
            path: field.path(),
            name: field.name(),
            address: field.absolute_address(),
            size: field.size(),
            type_name: field.type_name(),
            is_field_set: field.is_field_set(),
            display: field.display(),
            description: field.description(),
            depth,
        }
    }
}

/// Options of [`list_fields`]
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Don't descend below this depth (the start field is depth 0)
    pub max_depth: Option<usize>,
    /// Only report fields whose path matches this glob
    pub filter: Option<String>,
}

/// Collect the fields below `field`
pub fn list_fields(field: FieldRef<'_>, options: &ListOptions) -> Vec<FieldInfo> {
    let mut out = Vec::new();
    walk(field, &mut |f, depth| {
        let keep = options.filter.as_deref().is_none_or(|pattern| glob_match(pattern, &f.path()));
        if keep {
            out.push(FieldInfo::from_field(f, depth));
        }
        options.max_depth.is_none_or(|max| depth < max)
    });
    out
}

/// One line of a text listing: `byte.bit) path <type> = display`
pub fn format_field_line(info: &FieldInfo) -> String {
    let indent = "  ".repeat(info.depth);
    let mut line = format!(
        "{:>8}.{}) {}{} <{}, {} bits>",
        info.address / 8,
        info.address % 8,
        indent,
        info.name,
        info.type_name,
        info.size
    );
    if !info.display.is_empty() {
        line.push_str(" = ");
        line.push_str(&info.display);
    }
    if !info.description.is_empty() {
        line.push_str(": ");
        line.push_str(&info.description);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldSpec;
    use crate::tree::{FieldSetCursor, Tree};
    use binspect_core::{Endian, Result};
    use binspect_stream::MemoryStream;

    fn tree() -> Tree {
        let stream = MemoryStream::new(b"\x01\x02\x03OK".to_vec()).into_shared();
        let mut step = 0;
        let generator = move |_: &FieldSetCursor<'_>| -> Result<Option<FieldSpec>> {
            step += 1;
            Ok(match step {
                1 => Some(FieldSpec::uint8("version")),
                2 => Some(FieldSpec::vector("pair", 2, "item", FieldSpec::uint8)),
                3 => Some(FieldSpec::string("tag", 2).with_description("Trailer")),
                _ => None,
            })
        };
        Tree::new(stream, "root", Box::new(generator), Endian::Big, None)
    }

    #[test]
    fn test_walk_order() {
        let tree = tree();
        let mut paths = Vec::new();
        walk(tree.root(), &mut |f, _| {
            paths.push(f.path());
            true
        });
        assert_eq!(paths, vec!["/", "/version", "/pair", "/pair/item[0]", "/pair/item[1]", "/tag"]);
        let names: Vec<String> = leaves(tree.root()).iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["version", "item[0]", "item[1]", "tag"]);
    }

    #[test]
    fn test_list_depth_and_filter() {
        let tree = tree();
        let shallow = list_fields(
            tree.root(),
            &ListOptions {
                max_depth: Some(1),
                filter: None,
            },
        );
        assert_eq!(shallow.len(), 4);

        let items = list_fields(
            tree.root(),
            &ListOptions {
                max_depth: None,
                filter: Some("/pair/*".to_string()),
            },
        );
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].address, 16);
        assert_eq!(items[1].display, "3");
    }

    #[test]
    fn test_format_line_and_json() {
        let tree = tree();
        let info = FieldInfo::from_field(tree.root().get("tag").unwrap(), 1);
        assert_eq!(format_field_line(&info), "       3.0)   tag <String, 16 bits> = \"OK\": Trailer");
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["type"], "String");
        assert_eq!(json["description"], "Trailer");
    }
}
