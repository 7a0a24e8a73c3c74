//! Patch operation model.
//!
//! Only the operations the synchronization protocol exchanges are
//! represented: `replace` for value changes and version headers, `add`
//! and `remove` for list edits, and `test` for the remote-version
//! header. Anything else on the wire is a malformed batch.

use serde_json::Value;
use std::fmt;

/// Operation kind, as spelled on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Add,
    Remove,
    Replace,
    Test,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Add => "add",
            OpKind::Remove => "remove",
            OpKind::Replace => "replace",
            OpKind::Test => "test",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "add" => Some(OpKind::Add),
            "remove" => Some(OpKind::Remove),
            "replace" => Some(OpKind::Replace),
            "test" => Some(OpKind::Test),
            _ => None,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded operation. The pointer is kept in decoded segments;
/// `remove` carries no value.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchOp {
    pub kind: OpKind,
    pub path: Vec<String>,
    pub value: Option<Value>,
    /// Raw text of this operation's sub-document, kept for diagnostics.
    pub source: String,
}

impl PatchOp {
    pub fn new(kind: OpKind, path: Vec<String>, value: Option<Value>, source: String) -> Self {
        Self {
            kind,
            path,
            value,
            source,
        }
    }
}

/// Outcome of applying one incoming batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStatus {
    /// The batch (and possibly queued successors) was applied.
    Applied,
    /// The batch carried a version at or below the current remote
    /// version; it was dropped without touching the tree.
    AlreadyApplied,
    /// The batch arrived ahead of its turn and was stored for replay.
    Queued,
}

/// Result of a successful apply call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub status: ApplyStatus,
    /// Operations applied across this batch and any batches drained from
    /// the queue behind it, version headers included. Zero for
    /// `Queued` and `AlreadyApplied`.
    pub applied: usize,
    /// Operations rejected with a non-fatal error in lenient mode.
    pub rejected: usize,
}

impl ApplyOutcome {
    pub(crate) fn with_status(status: ApplyStatus) -> Self {
        Self {
            status,
            applied: 0,
            rejected: 0,
        }
    }
}
