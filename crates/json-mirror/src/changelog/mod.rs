//! Change records, the per-root change log, and view-model versioning.
//!
//! Every mutation of a [`crate::tree::Tree`] since the last checkpoint is
//! recorded here as a [`Change`]. The patch generator drains the log in
//! order; [`ViewModelVersion`] carries the monotonic counters for the
//! version handshake plus the sparse queue of early remote batches.

use crate::tree::NodeId;

/// Sentinel for "not a list-positional change".
pub const NO_INDEX: i64 = -1;

// ── Change ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Remove,
    Replace,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Add => "add",
            ChangeKind::Remove => "remove",
            ChangeKind::Replace => "replace",
        }
    }
}

/// One recorded mutation. `node` is the object owning the changed
/// property; `property` is its slot (`None` means the whole node was
/// replaced, which happens once per root on first synchronization);
/// `index` is the list position for structural changes, [`NO_INDEX`]
/// otherwise. `item` is the inserted element for list adds, captured at
/// record time so later list edits cannot redirect the serialized value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    pub kind: ChangeKind,
    pub node: NodeId,
    pub property: Option<usize>,
    pub index: i64,
    pub item: Option<NodeId>,
}

impl Change {
    pub fn replace(node: NodeId, property: Option<usize>) -> Self {
        Self {
            kind: ChangeKind::Replace,
            node,
            property,
            index: NO_INDEX,
            item: None,
        }
    }

    pub fn add(node: NodeId, property: usize, index: usize, item: NodeId) -> Self {
        Self {
            kind: ChangeKind::Add,
            node,
            property: Some(property),
            index: index as i64,
            item: Some(item),
        }
    }

    pub fn remove(node: NodeId, property: usize, index: usize) -> Self {
        Self {
            kind: ChangeKind::Remove,
            node,
            property: Some(property),
            index: index as i64,
            item: None,
        }
    }
}

// ── ChangeLog ─────────────────────────────────────────────────────────────

/// Ordered change list for one root. `brand_new` stays true until the
/// first generation is flushed; that first generation emits a single
/// whole-root replace instead of the recorded changes.
#[derive(Debug, Default)]
pub struct ChangeLog {
    changes: Vec<Change>,
    brand_new: bool,
    pub version: Option<ViewModelVersion>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self {
            changes: Vec::new(),
            brand_new: true,
            version: None,
        }
    }

    pub fn is_brand_new(&self) -> bool {
        self.brand_new
    }

    pub(crate) fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Clears the list without reading it and ends the brand-new phase.
    /// Used when a caller discards a synchronization attempt.
    pub(crate) fn clear(&mut self) {
        self.changes.clear();
        self.brand_new = false;
    }
}

// ── ViewModelVersion ──────────────────────────────────────────────────────

/// Default wire field for the server-side (locally generated) version.
pub const LOCAL_VERSION_FIELD: &str = "_ver#s";
/// Default wire field for the client-side (remote) version.
pub const REMOTE_VERSION_FIELD: &str = "_ver#c$";

/// Monotonic version counters for one root, plus the queue of remote
/// batches that arrived ahead of the version they require.
///
/// `local_version` advances once per generated batch, `remote_version`
/// once per accepted incoming batch. `remote_local_version` is the
/// remote's last-acknowledged `local_version`, taken from the `test`
/// header of each incoming batch; the path resolver uses it to detect
/// stale nodes and indices.
#[derive(Debug)]
pub struct ViewModelVersion {
    pub local_version: u64,
    pub remote_version: u64,
    pub remote_local_version: u64,
    local_field: String,
    remote_field: String,
    queue: Vec<Option<Vec<u8>>>,
}

impl Default for ViewModelVersion {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewModelVersion {
    pub fn new() -> Self {
        Self::with_fields(LOCAL_VERSION_FIELD, REMOTE_VERSION_FIELD)
    }

    pub fn with_fields(local_field: &str, remote_field: &str) -> Self {
        Self {
            local_version: 0,
            remote_version: 0,
            remote_local_version: 0,
            local_field: local_field.to_string(),
            remote_field: remote_field.to_string(),
            queue: Vec::new(),
        }
    }

    pub fn local_field(&self) -> &str {
        &self.local_field
    }

    pub fn remote_field(&self) -> &str {
        &self.remote_field
    }

    pub fn queued_batches(&self) -> usize {
        self.queue.iter().filter(|slot| slot.is_some()).count()
    }

    /// Buffer an early batch. Slots are relative to the current
    /// `remote_version`: slot 0 holds the batch that becomes applicable
    /// after the next accept.
    pub(crate) fn enqueue(&mut self, batch: Vec<u8>, slot: usize) {
        if self.queue.len() <= slot {
            self.queue.resize(slot + 1, None);
        }
        self.queue[slot] = Some(batch);
    }

    /// Called exactly once per accepted batch: slides the queue window
    /// forward and yields the batch that is now applicable, if buffered.
    pub(crate) fn shift(&mut self) -> Option<Vec<u8>> {
        if self.queue.is_empty() {
            None
        } else {
            self.queue.remove(0)
        }
    }
}
