//! Field path utilities
//!
//! Field paths look like `/chunk[2]/content`: `/`-separated child names,
//! anchored at the root when they start with `/`, where `..` names the
//! parent. Empty segments are ignored, so `a///b` and `a/b` are the same
//! path.

use smallvec::SmallVec;

/// Parsed form of a field path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath<'a> {
    /// Starts at the tree root
    pub absolute: bool,
    /// Child names and `..` steps, empty segments removed
    pub segments: SmallVec<[&'a str; 8]>,
}

/// Split a field path into its segments
pub fn parse_path(path: &str) -> FieldPath<'_> {
    let path = path.trim();
    FieldPath {
        absolute: path.starts_with('/'),
        segments: path
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .collect(),
    }
}

/// Normalize an absolute path: collapse separators, resolve `.` and `..`
pub fn normalize_path(path: &str) -> String {
    let mut components: Vec<&str> = Vec::new();
    for segment in parse_path(path).segments {
        if segment == ".." {
            components.pop();
        } else {
            components.push(segment);
        }
    }
    if components.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", components.join("/"))
    }
}

/// Path of the child `name` of the set at `parent`
pub fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), name)
    }
}

/// Parent of a normalized path, `None` for the root
pub fn parent_path(path: &str) -> Option<String> {
    let normalized = normalize_path(path);
    if normalized == "/" {
        return None;
    }
    match normalized.rfind('/') {
        Some(0) | None => Some("/".to_string()),
        Some(pos) => Some(normalized[..pos].to_string()),
    }
}

/// Last name of a path
pub fn basename(path: &str) -> &str {
    let path = path.trim_end_matches('/');
    match path.rfind('/') {
        Some(pos) => &path[pos + 1..],
        None => path,
    }
}

/// Base of an auto-indexed name: `"chunk[]"` gives `Some("chunk")`
pub fn auto_index_base(name: &str) -> Option<&str> {
    name.strip_suffix("[]")
}

/// Split an indexed name: `"chunk[12]"` gives `("chunk", Some(12))`
pub fn split_index(name: &str) -> (&str, Option<usize>) {
    if let Some(open) = name.rfind('[') {
        if let Some(index) = name[open + 1..].strip_suffix(']') {
            if let Ok(index) = index.parse() {
                return (&name[..open], Some(index));
            }
        }
    }
    (name, None)
}

/// Check if a path matches a glob pattern
///
/// Supports `*` (any characters, `/` included) and `?` (one character).
pub fn glob_match(pattern: &str, path: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = path.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
                continue;
            }
            Some('?') => {
                p += 1;
                t += 1;
                continue;
            }
            Some(&c) if c == text[t] => {
                p += 1;
                t += 1;
                continue;
            }
            _ => {}
        }
        // Let the last star swallow one more character
        match backtrack {
            Some((star, start)) => {
                p = star + 1;
                t = start + 1;
                backtrack = Some((star, start + 1));
            }
            None => return false,
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

/// Lowercase extension of a file name, without the dot
pub fn file_extension(filename: &str) -> Option<String> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos < name.len() - 1 => Some(name[pos + 1..].to_lowercase()),
        _ => None,
    }
}
