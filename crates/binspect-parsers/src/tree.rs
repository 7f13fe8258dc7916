//! Parse tree arena and the lazy field-set engine
//!
//! Every field of a parse lives in one [`Tree`]: a vector of nodes indexed
//! by [`NodeId`], each child pointing back to its parent by index. Field
//! sets keep their generator in their node and only resume it when a
//! consumer asks for a child that is not materialized yet.
//!
//! The tree is single-threaded: it uses `RefCell` internally and hands out
//! [`FieldRef`] handles that borrow the tree.
//!
//! # Engine rules
//!
//! - A child is placed at the set's current size (or at its explicit
//!   address in a seekable set), and the current size then grows by the
//!   child's size.
//! - Names ending in `[]` become `name[0]`, `name[1]`, ...; a duplicate
//!   explicit name is a [`Error::DuplicateField`].
//! - A set without a declared size is fully materialized before it is
//!   inserted in its parent, so its size is known.
//! - A generator error is logged with the set path and ends the set at its
//!   current size; with `autofix`, a `raw[]` field fills the rest of a
//!   set whose size was declared.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use binspect_core::{config, DisplayFn, Endian, Error, Result, Value};
use binspect_stream::{FieldStream, InputStream, StreamTag};

use crate::field::{resolve_leaf_size, FieldGenerator, FieldSpec, Leaf, SpecBody};
use crate::path::{auto_index_base, parse_path};

/// Index of a node in its [`Tree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// The root of every tree
pub const ROOT: NodeId = NodeId(0);

struct LeafNode {
    leaf: Leaf,
    endian: Endian,
    value: Option<Value>,
    display: Option<String>,
    pattern_ok: bool,
}

struct SetNode {
    children: Vec<NodeId>,
    by_name: HashMap<String, NodeId>,
    /// Next index for each auto-indexed base name
    counters: HashMap<String, u64>,
    current_size: u64,
    /// `None` while the generator runs
    generator: Option<Box<dyn FieldGenerator>>,
    done: bool,
    declared_size: Option<u64>,
    seekable: bool,
    endian: Endian,
    description: Option<String>,
}

impl SetNode {
    fn new(generator: Box<dyn FieldGenerator>, declared_size: Option<u64>, seekable: bool, endian: Endian) -> Self {
        Self {
            children: Vec::new(),
            by_name: HashMap::new(),
            counters: HashMap::new(),
            current_size: 0,
            generator: Some(generator),
            done: false,
            declared_size,
            seekable,
            endian,
            description: None,
        }
    }
}

enum NodeKind {
    Leaf(LeafNode),
    Set(SetNode),
}

struct Node {
    parent: Option<NodeId>,
    name: String,
    /// Bit offset relative to the parent
    address: u64,
    /// `None` for a set whose size is not known yet
    size: Option<u64>,
    description: Option<String>,
    display_fn: Option<DisplayFn>,
    stream_tags: Vec<StreamTag>,
    kind: NodeKind,
}

impl Node {
    fn set(&self) -> Option<&SetNode> {
        match &self.kind {
            NodeKind::Set(set) => Some(set),
            NodeKind::Leaf(_) => None,
        }
    }

    fn set_mut(&mut self) -> Option<&mut SetNode> {
        match &mut self.kind {
            NodeKind::Set(set) => Some(set),
            NodeKind::Leaf(_) => None,
        }
    }
}

/// Arena holding every field of one parse
pub struct Tree {
    stream: Arc<dyn InputStream>,
    nodes: RefCell<Vec<Node>>,
    sub_streams: RefCell<HashMap<NodeId, Weak<FieldStream>>>,
    /// Overrides the global `autofix` option when set
    autofix: Cell<Option<bool>>,
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field("source", &self.stream.source())
            .field("nodes", &self.nodes.borrow().len())
            .finish()
    }
}

impl Tree {
    /// Create a tree whose root set is produced by `generator`
    pub fn new(
        stream: Arc<dyn InputStream>,
        root_name: impl Into<String>,
        generator: Box<dyn FieldGenerator>,
        endian: Endian,
        size: Option<u64>,
    ) -> Self {
        let root = Node {
            parent: None,
            name: root_name.into(),
            address: 0,
            size,
            description: None,
            display_fn: None,
            stream_tags: Vec::new(),
            kind: NodeKind::Set(SetNode::new(generator, size, false, endian)),
        };
        Self {
            stream,
            nodes: RefCell::new(vec![root]),
            sub_streams: RefCell::new(HashMap::new()),
            autofix: Cell::new(None),
        }
    }

    /// Force `autofix` on or off for this tree; `None` follows the global option
    pub fn set_autofix(&self, autofix: Option<bool>) {
        self.autofix.set(autofix);
    }

    fn autofix(&self) -> bool {
        self.autofix.get().unwrap_or_else(|| config::get().autofix)
    }

    pub fn root(&self) -> FieldRef<'_> {
        FieldRef { tree: self, id: ROOT }
    }

    /// The stream every field reads from
    pub fn stream(&self) -> &Arc<dyn InputStream> {
        &self.stream
    }

    /// Handle on a node; `None` for an id of another tree
    pub fn field(&self, id: NodeId) -> Option<FieldRef<'_>> {
        (id.0 < self.nodes.borrow().len()).then_some(FieldRef { tree: self, id })
    }

    /// Number of nodes materialized so far
    pub fn node_count(&self) -> usize {
        self.nodes.borrow().len()
    }

    fn with_node<R>(&self, id: NodeId, f: impl FnOnce(&Node) -> R) -> R {
        f(&self.nodes.borrow()[id.0])
    }

    fn with_node_mut<R>(&self, id: NodeId, f: impl FnOnce(&mut Node) -> R) -> R {
        f(&mut self.nodes.borrow_mut()[id.0])
    }

    fn push(&self, node: Node) -> NodeId {
        let mut nodes = self.nodes.borrow_mut();
        nodes.push(node);
        NodeId(nodes.len() - 1)
    }

    /// Drop a set that was rejected by its parent, with its descendants
    ///
    /// Nodes are only removed when every node created after `id` descends
    /// from it; a generator that reached into other sets keeps them alive.
    fn discard(&self, id: NodeId) {
        let mut nodes = self.nodes.borrow_mut();
        let owned = (id.0 + 1..nodes.len()).all(|index| {
            let mut current = nodes[index].parent;
            while let Some(parent) = current {
                if parent == id {
                    return true;
                }
                if parent < id {
                    return false;
                }
                current = nodes[parent.0].parent;
            }
            false
        });
        if !owned {
            tracing::debug!(node = id.0, "Rejected field set left in the arena");
            return;
        }
        nodes.truncate(id.0);
        drop(nodes);
        self.sub_streams.borrow_mut().retain(|node, _| *node < id);
    }

    fn path(&self, id: NodeId) -> String {
        let nodes = self.nodes.borrow();
        let mut names = Vec::new();
        let mut current = id;
        while let Some(parent) = nodes[current.0].parent {
            names.push(nodes[current.0].name.as_str());
            current = parent;
        }
        if names.is_empty() {
            return "/".to_string();
        }
        names.reverse();
        format!("/{}", names.join("/"))
    }

    fn absolute_address(&self, id: NodeId) -> u64 {
        let nodes = self.nodes.borrow();
        let mut address = 0;
        let mut current = Some(id);
        while let Some(node) = current {
            address += nodes[node.0].address;
            current = nodes[node.0].parent;
        }
        address
    }

    fn size(&self, id: NodeId) -> u64 {
        if let Some(size) = self.with_node(id, |n| n.size) {
            return size;
        }
        self.materialize(id);
        self.with_node(id, |n| n.size.or_else(|| n.set().map(|s| s.current_size)))
            .unwrap_or(0)
    }

    /// Produce one more child of `set`; `false` once no child was added
    fn feed_one(&self, set: NodeId) -> bool {
        let generator = self.with_node_mut(set, |node| match node.set_mut() {
            Some(state) if !state.done => state.generator.take(),
            _ => None,
        });
        // Done, a leaf, or already running further up the stack
        let Some(mut generator) = generator else {
            return false;
        };

        let cursor = FieldSetCursor { tree: self, set };
        let outcome = generator
            .next_field(&cursor)
            .and_then(|spec| spec.map(|spec| self.insert(set, spec)).transpose());
        self.with_node_mut(set, |node| {
            if let Some(state) = node.set_mut() {
                state.generator = Some(generator);
            }
        });

        match outcome {
            Ok(Some(_)) => true,
            Ok(None) => {
                self.stop_feeding(set);
                false
            }
            Err(err) => {
                if err.is_recoverable() {
                    tracing::warn!(path = %self.path(set), error = %err, "Error when getting fields");
                } else {
                    tracing::error!(path = %self.path(set), error = %err, "Unexpected error when getting fields");
                }
                self.stop_feeding(set);
                false
            }
        }
    }

    fn stop_feeding(&self, set: NodeId) {
        let (declared, current) = self.with_node_mut(set, |node| match node.set_mut() {
            Some(state) => {
                state.done = true;
                (state.declared_size, state.current_size)
            }
            None => (None, 0),
        });

        if let Some(declared) = declared {
            if current < declared && self.autofix() {
                self.add_filler(set, current, declared - current);
            }
        }
        let size = declared.unwrap_or_else(|| self.with_node(set, |n| n.set().map_or(0, |s| s.current_size)));
        self.with_node_mut(set, |node| node.size = Some(size));
    }

    /// Cover `gap` bits at the end of a truncated set with a raw field
    fn add_filler(&self, set: NodeId, current: u64, gap: u64) {
        let absolute = self.absolute_address(set) + current;
        let available = match self.stream.size() {
            Some(size) => size.saturating_sub(absolute).min(gap),
            None => gap,
        };
        if available == 0 {
            return;
        }
        let spec = if available % 8 == 0 {
            FieldSpec::raw_bytes("raw[]", available / 8)
        } else {
            FieldSpec::raw_bits("raw[]", available)
        };
        match self.insert(set, spec.with_description("Unparsed data")) {
            Ok(_) => tracing::debug!(path = %self.path(set), bits = available, "[Autofix] added filler field"),
            Err(err) => tracing::debug!(path = %self.path(set), error = %err, "[Autofix] unable to add filler"),
        }
    }

    fn unique_name(&self, set: NodeId, name: &str) -> Result<(String, Option<(String, u64)>)> {
        if name.is_empty() || name.contains('/') || name == ".." || name == "." {
            return Err(Error::InvalidPath { path: name.to_string() });
        }
        self.with_node(set, |node| {
            let state = node
                .set()
                .ok_or_else(|| Error::internal(format!("{} is not a field set", node.name)))?;
            let (name, counter) = match auto_index_base(name) {
                Some(base) => {
                    let index = state.counters.get(base).copied().unwrap_or(0);
                    (format!("{}[{}]", base, index), Some((base.to_string(), index + 1)))
                }
                None => (name.to_string(), None),
            };
            if state.by_name.contains_key(&name) {
                return Err(Error::DuplicateField { name });
            }
            Ok((name, counter))
        })
    }

    fn check_bounds(&self, name: &str, address: u64, size: u64, declared: Option<u64>, absolute: u64) -> Result<()> {
        if let Some(declared) = declared {
            if address + size > declared {
                return Err(Error::parser(format!(
                    "field \"{}\" is too large: {} + {} > {}",
                    name, address, size, declared
                )));
            }
        }
        if !self.stream.size_ge(absolute + size) {
            return Err(Error::BitRead {
                offset: absolute,
                nbits: size,
            });
        }
        Ok(())
    }

    /// Turn a spec into a child of `set`
    fn insert(&self, set: NodeId, spec: FieldSpec) -> Result<NodeId> {
        let set_address = self.absolute_address(set);
        let (current, declared, seekable, set_endian) = self.with_node(set, |node| {
            node.set()
                .map(|s| (s.current_size, s.declared_size, s.seekable, s.endian))
                .ok_or_else(|| Error::internal(format!("{} is not a field set", node.name)))
        })?;

        let FieldSpec {
            name,
            body,
            description,
            display,
            address,
            endian,
            stream_tags,
        } = spec;
        let (name, counter) = self.unique_name(set, &name)?;
        let address = match address {
            Some(address) if seekable => address,
            Some(address) if address != current => {
                return Err(Error::parser(format!(
                    "field \"{}\" expects address {} but the set is at {}",
                    name, address, current
                )));
            }
            _ => current,
        };
        let absolute = set_address + address;
        let endian = endian.unwrap_or(set_endian);

        let (kind, size) = match body {
            SpecBody::Leaf { leaf, size } => {
                let limit = declared.map(|d| set_address + d);
                let size = resolve_leaf_size(&leaf, size, self.stream.as_ref(), absolute, endian, limit)?;
                let leaf = LeafNode {
                    leaf,
                    endian,
                    value: None,
                    display: None,
                    pattern_ok: false,
                };
                (NodeKind::Leaf(leaf), Some(size))
            }
            SpecBody::Set {
                generator,
                size,
                seekable,
            } => (NodeKind::Set(SetNode::new(generator, size, seekable, endian)), size),
        };
        if let Some(size) = size {
            self.check_bounds(&name, address, size, declared, absolute)?;
        }

        let id = self.push(Node {
            parent: Some(set),
            name: name.clone(),
            address,
            size,
            description,
            display_fn: display,
            stream_tags,
            kind,
        });
        let size = match size {
            Some(size) => size,
            None => {
                self.materialize(id);
                let size = self.size(id);
                if let Err(err) = self.check_bounds(&name, address, size, declared, absolute) {
                    self.discard(id);
                    return Err(err);
                }
                size
            }
        };

        self.with_node_mut(set, |node| {
            if let Some(state) = node.set_mut() {
                state.children.push(id);
                state.by_name.insert(name, id);
                if let Some((base, next)) = counter {
                    state.counters.insert(base, next);
                }
                state.current_size = if state.seekable {
                    state.current_size.max(address + size)
                } else {
                    address + size
                };
            }
        });
        self.check_pattern(id);
        Ok(id)
    }

    fn check_pattern(&self, id: NodeId) {
        let leaf = self.with_node(id, |node| match &node.kind {
            NodeKind::Leaf(leaf) if leaf.leaf.has_pattern() => Some((leaf.leaf.clone(), leaf.endian)),
            _ => None,
        });
        let Some((leaf, endian)) = leaf else {
            return;
        };
        if !config::get().check_padding_pattern {
            return;
        }
        let size = self.size(id);
        match leaf.check_pattern(self.stream.as_ref(), self.absolute_address(id), size, endian) {
            Ok(true) => self.with_node_mut(id, |node| {
                if let NodeKind::Leaf(leaf) = &mut node.kind {
                    leaf.pattern_ok = true;
                }
            }),
            Ok(false) => tracing::warn!(path = %self.path(id), "padding contains an invalid pattern"),
            Err(err) => tracing::debug!(path = %self.path(id), error = %err, "unable to check padding"),
        }
    }

    fn materialize(&self, set: NodeId) {
        while self.feed_one(set) {}
    }

    fn lookup(&self, set: NodeId, name: &str) -> Option<NodeId> {
        self.with_node(set, |node| node.set().and_then(|s| s.by_name.get(name).copied()))
    }

    fn child_by_name(&self, set: NodeId, name: &str) -> Option<NodeId> {
        loop {
            if let Some(id) = self.lookup(set, name) {
                return Some(id);
            }
            if !self.feed_one(set) {
                // stop_feeding may have added a filler
                return self.lookup(set, name);
            }
        }
    }

    fn child_at(&self, set: NodeId, index: usize) -> Option<NodeId> {
        loop {
            let child = self.with_node(set, |node| node.set().and_then(|s| s.children.get(index).copied()));
            if child.is_some() {
                return child;
            }
            if !self.feed_one(set) {
                return self.with_node(set, |node| node.set().and_then(|s| s.children.get(index).copied()));
            }
        }
    }

    fn resolve(&self, from: NodeId, path: &str) -> Result<NodeId> {
        let parsed = parse_path(path);
        let mut current = if parsed.absolute { ROOT } else { from };
        for segment in parsed.segments {
            if segment == ".." {
                current = self
                    .with_node(current, |n| n.parent)
                    .ok_or_else(|| Error::missing_field(self.path(current), ".."))?;
                continue;
            }
            let is_set = self.with_node(current, |n| n.set().is_some());
            let child = if is_set { self.child_by_name(current, segment) } else { None };
            current = child.ok_or_else(|| Error::missing_field(self.path(current), segment))?;
        }
        Ok(current)
    }

    fn value(&self, id: NodeId) -> Result<Value> {
        let leaf = self.with_node(id, |node| match &node.kind {
            NodeKind::Leaf(leaf) => Some((leaf.leaf.clone(), leaf.endian, leaf.value.clone())),
            NodeKind::Set(_) => None,
        });
        let Some((leaf, endian, cached)) = leaf else {
            return self.set_value(id);
        };
        if let Some(value) = cached {
            return Ok(value);
        }
        let value = leaf.decode(self.stream.as_ref(), self.absolute_address(id), self.size(id), endian)?;
        self.with_node_mut(id, |node| {
            if let NodeKind::Leaf(leaf) = &mut node.kind {
                leaf.value = Some(value.clone());
            }
        });
        Ok(value)
    }

    /// Run `f` with the set's generator taken out of its node
    fn with_generator<R>(&self, set: NodeId, f: impl FnOnce(&dyn FieldGenerator) -> R) -> Option<R> {
        self.materialize(set);
        let generator = self.with_node_mut(set, |node| node.set_mut().and_then(|s| s.generator.take()))?;
        let result = f(generator.as_ref());
        self.with_node_mut(set, |node| {
            if let Some(state) = node.set_mut() {
                state.generator = Some(generator);
            }
        });
        Some(result)
    }

    fn set_value(&self, set: NodeId) -> Result<Value> {
        let field = FieldRef { tree: self, id: set };
        match self.with_generator(set, |g| g.value(field)) {
            Some(Ok(Some(value))) => Ok(value),
            Some(Err(err)) => Err(err),
            _ => Err(Error::internal(format!("{} has no value", self.path(set)))),
        }
    }

    fn display(&self, id: NodeId) -> String {
        let leaf = self.with_node(id, |node| match &node.kind {
            NodeKind::Leaf(leaf) => Some((leaf.leaf.clone(), leaf.display.clone(), leaf.pattern_ok, node.display_fn)),
            NodeKind::Set(_) => None,
        });
        let Some((leaf, cached, pattern_ok, display_fn)) = leaf else {
            return self.set_value(id).map(|v| v.to_string()).unwrap_or_default();
        };
        if let Some(display) = cached {
            return display;
        }
        let value = match self.value(id) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(path = %self.path(id), error = %err, "Unable to decode field value");
                return String::new();
            }
        };
        let size = self.size(id);
        let display = match display_fn {
            Some(display_fn) => display_fn(&value, size),
            None => leaf.display(&value, size, pattern_ok),
        };
        self.with_node_mut(id, |node| {
            if let NodeKind::Leaf(leaf) = &mut node.kind {
                leaf.display = Some(display.clone());
            }
        });
        display
    }

    fn raw_display(&self, id: NodeId) -> String {
        let leaf = self.with_node(id, |node| match &node.kind {
            NodeKind::Leaf(leaf) => Some(leaf.leaf.clone()),
            NodeKind::Set(_) => None,
        });
        match (leaf, self.value(id)) {
            (Some(leaf), Ok(value)) => leaf.raw_display(&value),
            (None, Ok(value)) => value.to_string(),
            (Some(_), Err(err)) => {
                tracing::warn!(path = %self.path(id), error = %err, "Unable to decode field value");
                String::new()
            }
            (None, Err(_)) => String::new(),
        }
    }

    fn description(&self, id: NodeId) -> String {
        let (fixed, cached, is_set) = self.with_node(id, |node| {
            (
                node.description.clone(),
                node.set().and_then(|s| s.description.clone()),
                node.set().is_some(),
            )
        });
        if let Some(description) = fixed.or(cached) {
            return description;
        }
        if !is_set {
            return String::new();
        }
        let field = FieldRef { tree: self, id };
        let description = match self.with_generator(id, |g| g.describe(field)) {
            Some(Ok(Some(text))) => text,
            Some(Err(err)) => {
                tracing::warn!(path = %self.path(id), error = %err, "Unable to create description");
                String::new()
            }
            _ => String::new(),
        };
        self.with_node_mut(id, |node| {
            if let Some(state) = node.set_mut() {
                state.description = Some(description.clone());
            }
        });
        description
    }
}

/// Handle on one field of a [`Tree`]
#[derive(Clone, Copy)]
pub struct FieldRef<'t> {
    tree: &'t Tree,
    id: NodeId,
}

impl PartialEq for FieldRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.tree, other.tree) && self.id == other.id
    }
}

impl Eq for FieldRef<'_> {}

impl fmt::Debug for FieldRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldRef")
            .field("path", &self.path())
            .field("address", &self.absolute_address())
            .finish()
    }
}

impl<'t> FieldRef<'t> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn tree(&self) -> &'t Tree {
        self.tree
    }

    pub fn name(&self) -> String {
        self.tree.with_node(self.id, |n| n.name.clone())
    }

    /// Absolute path, `/` for the root
    pub fn path(&self) -> String {
        self.tree.path(self.id)
    }

    /// Bit offset relative to the parent
    pub fn address(&self) -> u64 {
        self.tree.with_node(self.id, |n| n.address)
    }

    /// Bit offset in the root stream
    pub fn absolute_address(&self) -> u64 {
        self.tree.absolute_address(self.id)
    }

    /// Size in bits; materializes a set whose size is not declared
    pub fn size(&self) -> u64 {
        self.tree.size(self.id)
    }

    pub fn is_field_set(&self) -> bool {
        self.tree.with_node(self.id, |n| n.set().is_some())
    }

    pub fn parent(&self) -> Option<FieldRef<'t>> {
        self.tree
            .with_node(self.id, |n| n.parent)
            .map(|id| FieldRef { tree: self.tree, id })
    }

    pub fn root(&self) -> FieldRef<'t> {
        self.tree.root()
    }

    /// Decoded value, cached after the first successful decode
    pub fn value(&self) -> Result<Value> {
        self.tree.value(self.id)
    }

    /// Short human rendering; empty when the value can't be decoded
    pub fn display(&self) -> String {
        self.tree.display(self.id)
    }

    pub fn raw_display(&self) -> String {
        self.tree.raw_display(self.id)
    }

    pub fn description(&self) -> String {
        self.tree.description(self.id)
    }

    /// Kind of a leaf, `None` for a set
    pub fn leaf(&self) -> Option<Leaf> {
        self.tree.with_node(self.id, |n| match &n.kind {
            NodeKind::Leaf(leaf) => Some(leaf.leaf.clone()),
            NodeKind::Set(_) => None,
        })
    }

    /// Type name of the field, e.g. `UInt32` or `FieldSet`
    pub fn type_name(&self) -> String {
        match self.leaf() {
            Some(leaf) => leaf.type_name(self.size()),
            None => "FieldSet".to_string(),
        }
    }

    /// Byte order used to decode the field (for sets: their children)
    pub fn endian(&self) -> Endian {
        self.tree.with_node(self.id, |n| match &n.kind {
            NodeKind::Leaf(leaf) => leaf.endian,
            NodeKind::Set(set) => set.endian,
        })
    }

    pub fn display_fn(&self) -> Option<DisplayFn> {
        self.tree.with_node(self.id, |n| n.display_fn)
    }

    pub fn stream_tags(&self) -> Vec<StreamTag> {
        self.tree.with_node(self.id, |n| n.stream_tags.clone())
    }

    /// Resolve a path relative to this field (`/` anchors at the root)
    pub fn get(&self, path: &str) -> Result<FieldRef<'t>> {
        self.tree
            .resolve(self.id, path)
            .map(|id| FieldRef { tree: self.tree, id })
    }

    /// Value of the field at `path`
    pub fn value_of(&self, path: &str) -> Result<Value> {
        self.get(path)?.value()
    }

    /// `true` if `path` resolves from this field
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_ok()
    }

    /// Number of children; materializes the whole set
    pub fn len(&self) -> usize {
        self.tree.materialize(self.id);
        self.current_length()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of children materialized so far
    pub fn current_length(&self) -> usize {
        self.tree.with_node(self.id, |n| n.set().map_or(0, |s| s.children.len()))
    }

    /// Bits covered by the children materialized so far
    pub fn current_size(&self) -> u64 {
        self.tree.with_node(self.id, |n| n.set().map_or(0, |s| s.current_size))
    }

    /// `true` once a set's generator is exhausted (always for leaves)
    pub fn is_done(&self) -> bool {
        self.tree.with_node(self.id, |n| n.set().is_none_or(|s| s.done))
    }

    pub fn declared_size(&self) -> Option<u64> {
        self.tree.with_node(self.id, |n| n.set().and_then(|s| s.declared_size))
    }

    pub fn is_seekable(&self) -> bool {
        self.tree.with_node(self.id, |n| n.set().is_some_and(|s| s.seekable))
    }

    /// Child at `index`, generating children as needed
    pub fn child(&self, index: usize) -> Option<FieldRef<'t>> {
        self.tree
            .child_at(self.id, index)
            .map(|id| FieldRef { tree: self.tree, id })
    }

    /// Lazy iterator over the children
    pub fn iter(&self) -> FieldIter<'t> {
        FieldIter {
            tree: self.tree,
            set: self.id,
            index: 0,
        }
    }

    /// Generate at most `count` more children; returns how many were added
    pub fn read_more_fields(&self, count: usize) -> usize {
        let mut added = 0;
        while added < count && self.tree.feed_one(self.id) {
            added += 1;
        }
        added
    }

    /// View over the bits of this field, shared while someone holds it
    pub fn sub_stream(&self) -> Arc<FieldStream> {
        if let Some(stream) = self.tree.sub_streams.borrow().get(&self.id).and_then(Weak::upgrade) {
            return stream;
        }
        let stream = self.stream_tags().into_iter().fold(
            FieldStream::new(self.tree.stream.clone(), self.path(), self.absolute_address(), self.size()),
            FieldStream::with_tag,
        );
        let stream = Arc::new(stream);
        self.tree
            .sub_streams
            .borrow_mut()
            .insert(self.id, Arc::downgrade(&stream));
        stream
    }

    /// Bytes covered by the field
    pub fn raw_bytes(&self) -> Result<Vec<u8>> {
        let size = self.size();
        if size % 8 != 0 {
            return Err(Error::parser(format!(
                "{} is not a whole number of bytes ({} bits)",
                self.path(),
                size
            )));
        }
        self.tree
            .stream
            .read_bytes(self.absolute_address(), (size / 8) as usize)
    }
}

impl<'t> IntoIterator for FieldRef<'t> {
    type Item = FieldRef<'t>;
    type IntoIter = FieldIter<'t>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the children of a set, generating them on demand
pub struct FieldIter<'t> {
    tree: &'t Tree,
    set: NodeId,
    index: usize,
}

impl<'t> Iterator for FieldIter<'t> {
    type Item = FieldRef<'t>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.tree.child_at(self.set, self.index)?;
        self.index += 1;
        Some(FieldRef { tree: self.tree, id })
    }
}

/// What a generator sees of the set it is filling
pub struct FieldSetCursor<'t> {
    tree: &'t Tree,
    set: NodeId,
}

impl<'t> FieldSetCursor<'t> {
    /// The set being filled
    pub fn field(&self) -> FieldRef<'t> {
        FieldRef {
            tree: self.tree,
            id: self.set,
        }
    }

    pub fn path(&self) -> String {
        self.tree.path(self.set)
    }

    /// Offset where the next child will be placed
    pub fn current_size(&self) -> u64 {
        self.tree.with_node(self.set, |n| n.set().map_or(0, |s| s.current_size))
    }

    pub fn declared_size(&self) -> Option<u64> {
        self.tree.with_node(self.set, |n| n.set().and_then(|s| s.declared_size))
    }

    pub fn absolute_address(&self) -> u64 {
        self.tree.absolute_address(self.set)
    }

    pub fn endian(&self) -> Endian {
        self.tree.with_node(self.set, |n| n.set().map_or(Endian::Big, |s| s.endian))
    }

    pub fn stream(&self) -> &'t Arc<dyn InputStream> {
        &self.tree.stream
    }

    /// `true` when no bit remains for another child
    pub fn eof(&self) -> bool {
        let current = self.current_size();
        match self.declared_size() {
            Some(size) => current >= size,
            None => !self.tree.stream.size_ge(self.absolute_address() + current + 1),
        }
    }

    /// Materialized child or descendant of the set
    pub fn get(&self, path: &str) -> Result<FieldRef<'t>> {
        self.field().get(path)
    }

    pub fn value(&self, path: &str) -> Result<Value> {
        self.get(path)?.value()
    }

    /// Read bits at an offset relative to the start of the set
    pub fn read_bits(&self, offset: u64, nbits: u32) -> Result<u64> {
        self.tree
            .stream
            .read_bits(self.absolute_address() + offset, nbits, self.endian())
    }

    /// Read bytes at a bit offset relative to the start of the set
    pub fn read_bytes(&self, offset: u64, nbytes: usize) -> Result<Vec<u8>> {
        self.tree
            .stream
            .read_bytes(self.absolute_address() + offset, nbytes)
    }

    /// Search a byte pattern; offsets are relative to the start of the set
    pub fn search_bytes(&self, pattern: &[u8], start: u64, end: Option<u64>) -> Result<Option<u64>> {
        let base = self.absolute_address();
        Ok(self
            .tree
            .stream
            .search_bytes(pattern, base + start, end.map(|e| base + e))?
            .map(|found| found - base))
    }

    /// Padding field reaching bit `target`
    ///
    /// With `relative` the target is an offset from the start of the set,
    /// otherwise an absolute stream address. Returns `None` when the set is
    /// already there; seeking backward is a parser error.
    pub fn seek_bit(&self, target: u64, relative: bool) -> Result<Option<FieldSpec>> {
        let target = if relative {
            target
        } else {
            target
                .checked_sub(self.absolute_address())
                .ok_or_else(|| Error::parser(format!("can't seek to {} before {}", target, self.path())))?
        };
        let current = self.current_size();
        if target < current {
            return Err(Error::parser(format!(
                "can't seek backward in {}: {} < {}",
                self.path(),
                target,
                current
            )));
        }
        let gap = target - current;
        Ok(match gap {
            0 => None,
            gap if gap % 8 == 0 => Some(FieldSpec::padding_bytes("padding[]", gap / 8, b"\0")),
            gap => Some(FieldSpec::padding_bits("padding[]", gap)),
        })
    }

    /// Same as [`FieldSetCursor::seek_bit`] with a target in bytes
    pub fn seek_byte(&self, target: u64, relative: bool) -> Result<Option<FieldSpec>> {
        self.seek_bit(target * 8, relative)
    }
}
