//! Arena-based typed tree.
//!
//! Nodes live in a slot arena addressed by stable [`NodeId`]s; parent and
//! sibling-overlay links are indices, never owning references. Freed
//! slots are not reused for the life of the tree, so a stale id held by a
//! pending change record can never alias a newer node: it simply fails
//! the lookup.
//!
//! Every mutation goes through this module so the change log and the
//! per-array version log stay consistent with the data: value setters
//! record `Replace` changes (deduplicated per generation through dirty
//! bits), list edits record `Add`/`Remove` changes plus index shifts that
//! the path resolver later replays to transform stale client indices.

use crate::changelog::{Change, ChangeLog, ViewModelVersion};
use crate::schema::{Input, Kind, Schema};
use serde_json::{Map, Number, Value};
use std::sync::Arc;

/// Stable arena index of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Sentinel for an invalidated cached array index.
pub(crate) const NO_CACHED_INDEX: i64 = -1;

/// One positional edit of an array, in the order it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IndexShift {
    Insert(usize),
    Remove(usize),
}

/// Shifts that were delivered to the remote in batch `version`.
#[derive(Debug)]
pub(crate) struct VersionLogEntry {
    pub version: u64,
    pub shifts: Vec<IndexShift>,
}

/// Storage for one property of an object node.
#[derive(Debug)]
pub(crate) enum Slot {
    Bool(bool),
    Long(i64),
    Double(f64),
    Decimal(f64),
    Str(String),
    Trigger,
    Child(NodeId),
}

#[derive(Debug)]
pub(crate) enum Body {
    Object {
        values: Vec<Slot>,
        dirty: Vec<bool>,
    },
    Array {
        items: Vec<NodeId>,
        /// Edits of the current, not-yet-flushed generation.
        pending: Vec<IndexShift>,
        /// Flushed edits, ascending by version.
        version_log: Vec<VersionLogEntry>,
        dirty: bool,
    },
}

#[derive(Debug)]
pub struct Node {
    /// Object schema; for array nodes, the element schema.
    pub(crate) schema: Arc<Schema>,
    pub(crate) parent: Option<NodeId>,
    /// Property slot in the parent object (unused for array items).
    pub(crate) parent_slot: usize,
    pub(crate) in_array: bool,
    pub(crate) body: Body,
    /// Overlay group this node belongs to, including itself. Empty when
    /// the node is not composed with siblings.
    pub(crate) siblings: Vec<NodeId>,
    /// Namespace tag selecting this node within its overlay group.
    pub(crate) namespace: Option<String>,
    pub(crate) cached_index: i64,
    /// Local version at which this node becomes visible to the remote.
    /// 0 for nodes that existed before the first flush.
    pub(crate) version_stamp: u64,
}

impl Node {
    pub(crate) fn is_array(&self) -> bool {
        matches!(self.body, Body::Array { .. })
    }
}

/// One synchronized view-model instance: the arena, its root, and the
/// change log (with optional versioning) owned by that root.
#[derive(Debug)]
pub struct Tree {
    nodes: Vec<Option<Node>>,
    root: NodeId,
    pub changelog: ChangeLog,
}

impl Tree {
    pub fn new(schema: Arc<Schema>) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            changelog: ChangeLog::new(),
        };
        tree.root = tree.instantiate_object(schema, None, 0, false);
        tree
    }

    /// New tree with the version handshake enabled from the start.
    pub fn with_versioning(schema: Arc<Schema>) -> Self {
        let mut tree = Self::new(schema);
        tree.changelog.version = Some(ViewModelVersion::new());
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub(crate) fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize).and_then(|slot| slot.as_ref())
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes
            .get_mut(id.0 as usize)
            .and_then(|slot| slot.as_mut())
    }

    /// True while the node is still attached to the arena.
    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    // ── construction ──────────────────────────────────────────────────

    fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(node));
        id
    }

    /// Version stamp for a node created right now. Nodes created before
    /// the first flush are part of the bootstrap snapshot (stamp 0);
    /// later creations become visible in the next generated batch.
    fn new_stamp(&self) -> u64 {
        if self.changelog.is_brand_new() {
            0
        } else {
            self.changelog
                .version
                .as_ref()
                .map_or(0, |v| v.local_version + 1)
        }
    }

    fn instantiate_object(
        &mut self,
        schema: Arc<Schema>,
        parent: Option<NodeId>,
        parent_slot: usize,
        in_array: bool,
    ) -> NodeId {
        let stamp = self.new_stamp();
        let prop_count = schema.len();
        let props: Vec<(usize, Kind, Option<Arc<Schema>>)> = schema
            .iter()
            .map(|(slot, p)| (slot, p.kind, p.child.clone()))
            .collect();
        let id = self.alloc(Node {
            schema,
            parent,
            parent_slot,
            in_array,
            body: Body::Object {
                values: Vec::new(),
                dirty: vec![false; prop_count],
            },
            siblings: Vec::new(),
            namespace: None,
            cached_index: NO_CACHED_INDEX,
            version_stamp: stamp,
        });
        let mut values = Vec::with_capacity(prop_count);
        for (slot, kind, child) in props {
            let value = match kind {
                Kind::Bool => Slot::Bool(false),
                Kind::Long => Slot::Long(0),
                Kind::Double => Slot::Double(0.0),
                Kind::Decimal => Slot::Decimal(0.0),
                Kind::String => Slot::Str(String::new()),
                Kind::Trigger => Slot::Trigger,
                Kind::Object => {
                    let child_schema = child.expect("object property carries a child schema");
                    Slot::Child(self.instantiate_object(child_schema, Some(id), slot, false))
                }
                Kind::Array => {
                    let element = child.expect("array property carries an element schema");
                    Slot::Child(self.instantiate_array(element, id, slot))
                }
            };
            values.push(value);
        }
        match &mut self.node_mut(id).expect("freshly allocated").body {
            Body::Object { values: v, .. } => *v = values,
            Body::Array { .. } => unreachable!(),
        }
        id
    }

    fn instantiate_array(&mut self, element: Arc<Schema>, parent: NodeId, parent_slot: usize) -> NodeId {
        let stamp = self.new_stamp();
        self.alloc(Node {
            schema: element,
            parent: Some(parent),
            parent_slot,
            in_array: false,
            body: Body::Array {
                items: Vec::new(),
                pending: Vec::new(),
                version_log: Vec::new(),
                dirty: false,
            },
            siblings: Vec::new(),
            namespace: None,
            cached_index: NO_CACHED_INDEX,
            version_stamp: stamp,
        })
    }

    // ── value access ──────────────────────────────────────────────────

    fn slot_of(&self, node: NodeId, name: &str) -> Option<usize> {
        self.node(node)?.schema.get(name).map(|(slot, _)| slot)
    }

    fn value_slot(&self, node: NodeId, slot: usize) -> Option<&Slot> {
        match &self.node(node)?.body {
            Body::Object { values, .. } => values.get(slot),
            Body::Array { .. } => None,
        }
    }

    pub fn get_bool(&self, node: NodeId, name: &str) -> Option<bool> {
        match self.value_slot(node, self.slot_of(node, name)?)? {
            Slot::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn get_long(&self, node: NodeId, name: &str) -> Option<i64> {
        match self.value_slot(node, self.slot_of(node, name)?)? {
            Slot::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_double(&self, node: NodeId, name: &str) -> Option<f64> {
        match self.value_slot(node, self.slot_of(node, name)?)? {
            Slot::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_decimal(&self, node: NodeId, name: &str) -> Option<f64> {
        match self.value_slot(node, self.slot_of(node, name)?)? {
            Slot::Decimal(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_string(&self, node: NodeId, name: &str) -> Option<&str> {
        match self.value_slot(node, self.slot_of(node, name)?)? {
            Slot::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Child object or array node behind an object/array property.
    pub fn child(&self, node: NodeId, name: &str) -> Option<NodeId> {
        match self.value_slot(node, self.slot_of(node, name)?)? {
            Slot::Child(id) => Some(*id),
            _ => None,
        }
    }

    pub(crate) fn child_by_slot(&self, node: NodeId, slot: usize) -> Option<NodeId> {
        match self.value_slot(node, slot)? {
            Slot::Child(id) => Some(*id),
            _ => None,
        }
    }

    pub(crate) fn array_is_dirty(&self, array: NodeId) -> bool {
        matches!(
            self.node(array).map(|n| &n.body),
            Some(Body::Array { dirty: true, .. })
        )
    }

    // ── mutation ──────────────────────────────────────────────────────

    fn mark_dirty_and_record(&mut self, node: NodeId, slot: usize) {
        let Some(n) = self.node_mut(node) else { return };
        if let Body::Object { dirty, .. } = &mut n.body {
            if dirty[slot] {
                return;
            }
            dirty[slot] = true;
        }
        self.changelog.push(Change::replace(node, Some(slot)));
    }

    /// Writes a typed value without recording a change. Used when
    /// applying remote input: the remote already has this value.
    pub(crate) fn set_input(&mut self, node: NodeId, slot: usize, input: Input) {
        let Some(n) = self.node_mut(node) else { return };
        let Body::Object { values, .. } = &mut n.body else {
            return;
        };
        let Some(target) = values.get_mut(slot) else { return };
        match input {
            Input::Bool(b) => *target = Slot::Bool(b),
            Input::Long(v) => *target = Slot::Long(v),
            Input::Double(v) => *target = Slot::Double(v),
            Input::Decimal(v) => *target = Slot::Decimal(v),
            Input::Str(s) => *target = Slot::Str(s),
            Input::Trigger => {}
        }
    }

    /// Records a replace for a property without touching its value. Used
    /// for the empty-string default coercion, which must re-emit the
    /// default on the next generation.
    pub(crate) fn touch(&mut self, node: NodeId, slot: usize) {
        self.mark_dirty_and_record(node, slot);
    }

    /// Application-side setter: writes the value and records the change.
    /// Returns false when the property does not exist or kinds mismatch.
    pub fn set_value(&mut self, node: NodeId, name: &str, input: Input) -> bool {
        let Some((slot, kind)) = self
            .node(node)
            .and_then(|n| n.schema.get(name).map(|(slot, p)| (slot, p.kind)))
        else {
            return false;
        };
        let matches = matches!(
            (&input, kind),
            (Input::Bool(_), Kind::Bool)
                | (Input::Long(_), Kind::Long)
                | (Input::Double(_), Kind::Double)
                | (Input::Decimal(_), Kind::Decimal)
                | (Input::Str(_), Kind::String)
                | (Input::Trigger, Kind::Trigger)
        );
        if !matches {
            return false;
        }
        self.set_input(node, slot, input);
        self.mark_dirty_and_record(node, slot);
        true
    }

    pub fn set_bool(&mut self, node: NodeId, name: &str, value: bool) -> bool {
        self.set_value(node, name, Input::Bool(value))
    }

    pub fn set_long(&mut self, node: NodeId, name: &str, value: i64) -> bool {
        self.set_value(node, name, Input::Long(value))
    }

    pub fn set_double(&mut self, node: NodeId, name: &str, value: f64) -> bool {
        self.set_value(node, name, Input::Double(value))
    }

    pub fn set_decimal(&mut self, node: NodeId, name: &str, value: f64) -> bool {
        self.set_value(node, name, Input::Decimal(value))
    }

    pub fn set_string(&mut self, node: NodeId, name: &str, value: &str) -> bool {
        self.set_value(node, name, Input::Str(value.to_string()))
    }

    /// Replaces the object behind an object-typed property with a fresh
    /// instance. The old subtree is detached; any remote path that was
    /// captured against it becomes stale.
    pub fn replace_child(&mut self, node: NodeId, name: &str) -> Option<NodeId> {
        let (slot, child_schema) = self.node(node).and_then(|n| {
            n.schema.get(name).and_then(|(slot, p)| match p.kind {
                Kind::Object => p.child.clone().map(|child| (slot, child)),
                _ => None,
            })
        })?;
        if let Some(Slot::Child(old)) = self.value_slot(node, slot) {
            let old = *old;
            self.free_subtree(old);
        }
        let fresh = self.instantiate_object(child_schema, Some(node), slot, false);
        if let Some(n) = self.node_mut(node) {
            if let Body::Object { values, .. } = &mut n.body {
                values[slot] = Slot::Child(fresh);
            }
        }
        self.mark_dirty_and_record(node, slot);
        Some(fresh)
    }

    // ── arrays ────────────────────────────────────────────────────────

    pub fn array_len(&self, array: NodeId) -> usize {
        match self.node(array).map(|n| &n.body) {
            Some(Body::Array { items, .. }) => items.len(),
            _ => 0,
        }
    }

    pub fn array_get(&self, array: NodeId, index: usize) -> Option<NodeId> {
        match self.node(array).map(|n| &n.body) {
            Some(Body::Array { items, .. }) => items.get(index).copied(),
            _ => None,
        }
    }

    pub fn array_push(&mut self, array: NodeId) -> Option<NodeId> {
        let len = self.array_len(array);
        self.array_insert(array, len)
    }

    /// Inserts a fresh element (instantiated from the element schema) at
    /// `index`. Records an `Add` change against the owning object and an
    /// index shift in the array's pending log.
    pub fn array_insert(&mut self, array: NodeId, index: usize) -> Option<NodeId> {
        let (element_schema, owner, owner_slot) = {
            let n = self.node(array)?;
            if !n.is_array() {
                return None;
            }
            (n.schema.clone(), n.parent?, n.parent_slot)
        };
        if index > self.array_len(array) {
            return None;
        }
        let item = self.instantiate_object(element_schema, Some(array), 0, true);
        if let Some(n) = self.node_mut(item) {
            n.cached_index = index as i64;
        }
        if let Some(n) = self.node_mut(array) {
            if let Body::Array {
                items,
                pending,
                dirty,
                ..
            } = &mut n.body
            {
                items.insert(index, item);
                pending.push(IndexShift::Insert(index));
                *dirty = true;
            }
        }
        self.shift_cached_indices(array, index + 1, 1);
        self.changelog.push(Change::add(owner, owner_slot, index, item));
        Some(item)
    }

    /// Removes the element at `index` and frees its subtree. The removed
    /// node is permanently invalid for any pending remote resolution.
    pub fn array_remove(&mut self, array: NodeId, index: usize) -> bool {
        let Some((owner, owner_slot)) = self
            .node(array)
            .filter(|n| n.is_array())
            .and_then(|n| n.parent.map(|p| (p, n.parent_slot)))
        else {
            return false;
        };
        let removed = {
            let Some(n) = self.node_mut(array) else {
                return false;
            };
            let Body::Array {
                items,
                pending,
                dirty,
                ..
            } = &mut n.body
            else {
                return false;
            };
            if index >= items.len() {
                return false;
            }
            pending.push(IndexShift::Remove(index));
            *dirty = true;
            items.remove(index)
        };
        self.free_subtree(removed);
        self.shift_cached_indices(array, index, -1);
        self.changelog.push(Change::remove(owner, owner_slot, index));
        true
    }

    fn shift_cached_indices(&mut self, array: NodeId, from: usize, delta: i64) {
        let items: Vec<NodeId> = match self.node(array).map(|n| &n.body) {
            Some(Body::Array { items, .. }) => items[from.min(items.len())..].to_vec(),
            _ => return,
        };
        for id in items {
            if let Some(n) = self.node_mut(id) {
                if n.cached_index >= 0 {
                    n.cached_index += delta;
                }
            }
        }
    }

    /// Current position of an array item, from its cached index when
    /// valid, otherwise by scanning the parent.
    pub(crate) fn index_in_array(&self, item: NodeId) -> Option<usize> {
        let n = self.node(item)?;
        if !n.in_array {
            return None;
        }
        if n.cached_index >= 0 {
            return Some(n.cached_index as usize);
        }
        let parent = n.parent?;
        match self.node(parent).map(|p| &p.body) {
            Some(Body::Array { items, .. }) => items.iter().position(|&id| id == item),
            _ => None,
        }
    }

    fn free_subtree(&mut self, id: NodeId) {
        let children: Vec<NodeId> = match self.node(id).map(|n| &n.body) {
            Some(Body::Object { values, .. }) => values
                .iter()
                .filter_map(|slot| match slot {
                    Slot::Child(c) => Some(*c),
                    _ => None,
                })
                .collect(),
            Some(Body::Array { items, .. }) => items.clone(),
            None => return,
        };
        for child in children {
            self.free_subtree(child);
        }
        self.nodes[id.0 as usize] = None;
    }

    // ── sibling overlays ──────────────────────────────────────────────

    /// Composes a fresh, independent subtree at the same path position as
    /// `host`, selectable in paths by `tag`. Returns the overlay's root.
    pub fn attach_overlay(&mut self, host: NodeId, schema: Arc<Schema>, tag: &str) -> Option<NodeId> {
        self.node(host)?;
        let overlay = self.instantiate_object(schema, None, 0, false);
        if let Some(n) = self.node_mut(overlay) {
            n.namespace = Some(tag.to_string());
        }
        let mut group = self.node(host)?.siblings.clone();
        if group.is_empty() {
            group.push(host);
        }
        group.push(overlay);
        for member in &group {
            if let Some(n) = self.node_mut(*member) {
                n.siblings = group.clone();
            }
        }
        Some(overlay)
    }

    /// Sets the namespace tag under which a node's own properties are
    /// addressed when namespaced paths are generated.
    pub fn set_namespace(&mut self, node: NodeId, tag: &str) -> bool {
        match self.node_mut(node) {
            Some(n) => {
                n.namespace = Some(tag.to_string());
                true
            }
            None => false,
        }
    }

    // ── versioning support ────────────────────────────────────────────

    /// Maps an index that was valid as of `remote_local` forward through
    /// every shift the remote has not yet seen (flushed entries newer
    /// than `remote_local`, then the pending generation). `None` means
    /// the addressed element was removed.
    pub(crate) fn transform_index(
        &self,
        array: NodeId,
        remote_local: u64,
        index: usize,
    ) -> Option<usize> {
        let Some(Body::Array {
            pending,
            version_log,
            ..
        }) = self.node(array).map(|n| &n.body)
        else {
            return None;
        };
        let mut index = index;
        for entry in version_log.iter().filter(|e| e.version > remote_local) {
            index = apply_shifts(&entry.shifts, index)?;
        }
        apply_shifts(pending, index)
    }

    /// Drops version-log entries the remote has acknowledged.
    pub(crate) fn cleanup_version_logs(&mut self, remote_local: u64) {
        for slot in self.nodes.iter_mut() {
            if let Some(Node {
                body: Body::Array { version_log, .. },
                ..
            }) = slot.as_mut()
            {
                version_log.retain(|e| e.version > remote_local);
            }
        }
    }

    /// Ends the current generation: clears the change list and all dirty
    /// bits. With `new_version`, pending array shifts are promoted into
    /// the version log under that version and the local counter advances;
    /// without it (a discarded synchronization attempt) they are dropped.
    pub(crate) fn checkpoint(&mut self, new_version: Option<u64>) {
        for slot in self.nodes.iter_mut() {
            match slot.as_mut().map(|n| &mut n.body) {
                Some(Body::Object { dirty, .. }) => dirty.fill(false),
                Some(Body::Array {
                    pending,
                    version_log,
                    dirty,
                    ..
                }) => {
                    *dirty = false;
                    if pending.is_empty() {
                        continue;
                    }
                    match new_version {
                        Some(version) => version_log.push(VersionLogEntry {
                            version,
                            shifts: std::mem::take(pending),
                        }),
                        None => pending.clear(),
                    }
                }
                None => {}
            }
        }
        self.changelog.clear();
        if let Some(version) = new_version {
            if let Some(v) = self.changelog.version.as_mut() {
                v.local_version = version;
            }
        }
    }

    /// Discards everything recorded since the last checkpoint without
    /// generating a batch. Also ends the brand-new phase.
    pub fn discard_changes(&mut self) {
        self.checkpoint(None);
    }

    // ── serialization ─────────────────────────────────────────────────

    /// Full JSON view of a subtree.
    pub fn to_value(&self, id: NodeId) -> Value {
        match self.node(id).map(|n| (&n.body, n.schema.clone())) {
            Some((Body::Object { .. }, schema)) => {
                let mut map = Map::new();
                for (slot, prop) in schema.iter() {
                    map.insert(prop.name.clone(), self.property_value(id, slot));
                }
                Value::Object(map)
            }
            Some((Body::Array { items, .. }, _)) => {
                Value::Array(items.iter().map(|&item| self.to_value(item)).collect())
            }
            None => Value::Null,
        }
    }

    /// JSON view of one property slot.
    pub(crate) fn property_value(&self, node: NodeId, slot: usize) -> Value {
        match self.value_slot(node, slot) {
            Some(Slot::Bool(b)) => Value::Bool(*b),
            Some(Slot::Long(v)) => Value::Number((*v).into()),
            Some(Slot::Double(v)) | Some(Slot::Decimal(v)) => Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Some(Slot::Str(s)) => Value::String(s.clone()),
            Some(Slot::Trigger) => Value::Null,
            Some(Slot::Child(c)) => self.to_value(*c),
            None => Value::Null,
        }
    }
}

fn apply_shifts(shifts: &[IndexShift], mut index: usize) -> Option<usize> {
    for shift in shifts {
        match *shift {
            IndexShift::Insert(at) if at <= index => index += 1,
            IndexShift::Remove(at) => {
                if at == index {
                    return None;
                }
                if at < index {
                    index -= 1;
                }
            }
            _ => {}
        }
    }
    Some(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item_schema() -> Arc<Schema> {
        let mut s = Schema::new("Item");
        s.add_string("Description", true);
        Arc::new(s)
    }

    fn list_schema() -> Arc<Schema> {
        let mut s = Schema::new("Root");
        s.add_array("Items", item_schema());
        Arc::new(s)
    }

    #[test]
    fn instantiation_fills_defaults() {
        let mut schema = Schema::new("Simple");
        schema.add_string("name", true);
        schema.add_long("count", true);
        schema.add_bool("done", false);
        let tree = Tree::new(Arc::new(schema));
        let root = tree.root();
        assert_eq!(tree.get_string(root, "name"), Some(""));
        assert_eq!(tree.get_long(root, "count"), Some(0));
        assert_eq!(tree.get_bool(root, "done"), Some(false));
        assert_eq!(
            tree.to_value(root),
            json!({"name": "", "count": 0, "done": false})
        );
    }

    #[test]
    fn set_value_records_once_per_generation() {
        let mut schema = Schema::new("Simple");
        schema.add_long("count", true);
        let mut tree = Tree::new(Arc::new(schema));
        let root = tree.root();
        assert!(tree.set_long(root, "count", 5));
        assert!(tree.set_long(root, "count", 6));
        // Recording is idempotent per generation: one replace entry.
        assert_eq!(tree.changelog.changes().len(), 1);
        assert_eq!(tree.get_long(root, "count"), Some(6));
        tree.discard_changes();
        assert!(tree.set_long(root, "count", 7));
        assert_eq!(tree.changelog.changes().len(), 1);
    }

    #[test]
    fn set_value_rejects_kind_mismatch() {
        let mut schema = Schema::new("Simple");
        schema.add_long("count", true);
        let mut tree = Tree::new(Arc::new(schema));
        let root = tree.root();
        assert!(!tree.set_string(root, "count", "nope"));
        assert!(!tree.set_long(root, "missing", 1));
    }

    #[test]
    fn array_insert_and_remove_keep_cached_indices() {
        let mut tree = Tree::new(list_schema());
        let items = tree.child(tree.root(), "Items").unwrap();
        let a = tree.array_push(items).unwrap();
        let b = tree.array_push(items).unwrap();
        let c = tree.array_insert(items, 0).unwrap();
        assert_eq!(tree.index_in_array(c), Some(0));
        assert_eq!(tree.index_in_array(a), Some(1));
        assert_eq!(tree.index_in_array(b), Some(2));
        assert!(tree.array_remove(items, 1));
        assert!(!tree.contains(a));
        assert_eq!(tree.index_in_array(b), Some(1));
        assert_eq!(tree.array_len(items), 2);
    }

    #[test]
    fn removed_subtree_is_freed() {
        let mut tree = Tree::new(list_schema());
        let items = tree.child(tree.root(), "Items").unwrap();
        let a = tree.array_push(items).unwrap();
        assert!(tree.contains(a));
        assert!(tree.array_remove(items, 0));
        assert!(!tree.contains(a));
    }

    #[test]
    fn transform_index_through_pending_shifts() {
        let mut tree = Tree::new(list_schema());
        let items = tree.child(tree.root(), "Items").unwrap();
        tree.array_push(items);
        tree.array_push(items);
        tree.discard_changes();
        // Pending insert at the head shifts old index 0 to 1.
        tree.array_insert(items, 0);
        assert_eq!(tree.transform_index(items, u64::MAX, 0), Some(1));
        assert_eq!(tree.transform_index(items, u64::MAX, 1), Some(2));
    }

    #[test]
    fn transform_index_detects_removed_element() {
        let mut tree = Tree::new(list_schema());
        let items = tree.child(tree.root(), "Items").unwrap();
        tree.array_push(items);
        tree.array_push(items);
        tree.array_push(items);
        tree.discard_changes();
        tree.array_remove(items, 1);
        assert_eq!(tree.transform_index(items, u64::MAX, 1), None);
        assert_eq!(tree.transform_index(items, u64::MAX, 2), Some(1));
        assert_eq!(tree.transform_index(items, u64::MAX, 0), Some(0));
    }

    #[test]
    fn checkpoint_promotes_pending_shifts_into_version_log() {
        let mut tree = Tree::with_versioning(list_schema());
        let items = tree.child(tree.root(), "Items").unwrap();
        tree.array_push(items);
        tree.checkpoint(Some(1));
        tree.array_insert(items, 0);
        tree.checkpoint(Some(2));
        // A remote that saw version 1 must replay the version-2 insert.
        assert_eq!(tree.transform_index(items, 1, 0), Some(1));
        // A remote that already saw version 2 does not.
        assert_eq!(tree.transform_index(items, 2, 0), Some(0));
        tree.cleanup_version_logs(2);
        assert_eq!(tree.transform_index(items, 1, 0), Some(0));
    }

    #[test]
    fn replace_child_detaches_old_subtree_and_stamps_new() {
        let mut child = Schema::new("Page");
        child.add_string("Description", true);
        let mut schema = Schema::new("Root");
        schema.add_object("Page", Arc::new(child));
        let mut tree = Tree::with_versioning(Arc::new(schema));
        let root = tree.root();
        let old = tree.child(root, "Page").unwrap();
        assert_eq!(tree.node(old).unwrap().version_stamp, 0);
        tree.checkpoint(Some(1));
        let fresh = tree.replace_child(root, "Page").unwrap();
        assert!(!tree.contains(old));
        assert_eq!(tree.node(fresh).unwrap().version_stamp, 2);
    }

    #[test]
    fn overlay_group_links_all_members() {
        let mut schema = Schema::new("Main");
        schema.add_string("Title", true);
        let mut other = Schema::new("Side");
        other.add_string("Note", true);
        let mut tree = Tree::new(Arc::new(schema));
        let root = tree.root();
        let overlay = tree.attach_overlay(root, Arc::new(other), "side").unwrap();
        assert_eq!(tree.node(root).unwrap().siblings.len(), 2);
        assert_eq!(tree.node(overlay).unwrap().siblings.len(), 2);
        assert_eq!(tree.node(overlay).unwrap().namespace.as_deref(), Some("side"));
    }

    #[test]
    fn trigger_serializes_as_null() {
        let mut schema = Schema::new("Simple");
        schema.add_trigger("fire");
        let tree = Tree::new(Arc::new(schema));
        assert_eq!(tree.to_value(tree.root()), json!({"fire": null}));
    }
}
