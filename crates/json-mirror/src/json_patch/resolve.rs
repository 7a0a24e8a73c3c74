//! Path resolution for incoming operations.
//!
//! Walks decoded pointer segments down the typed tree. Array segments
//! consume the following segment as an index and transform it through
//! any shifts the remote has not yet observed; object descent checks the
//! child's version stamp so a path captured against a replaced subtree
//! fails as stale instead of silently hitting the replacement. Sibling
//! overlays are selected by namespace tag at the segment boundary where
//! a composed node is reached.

use crate::json_patch::types::PatchOp;
use crate::json_patch::ApplyError;
use crate::schema::Kind;
use crate::tree::{NodeId, Tree};

/// A fully resolved operation target: a terminal property slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Target {
    pub node: NodeId,
    pub slot: usize,
}

fn stale(op: &PatchOp) -> ApplyError {
    ApplyError::StalePath {
        source_op: op.source.clone(),
    }
}

/// Resolves an operation path to the terminal property it addresses.
pub(crate) fn resolve(tree: &Tree, op: &PatchOp) -> Result<Target, ApplyError> {
    // Staleness handling is live only while the remote lags behind the
    // local version; once it has acknowledged everything, indices and
    // stamps need no translation.
    let (check_versions, remote_local) = match tree.changelog.version.as_ref() {
        Some(v) if v.remote_local_version < v.local_version => (true, v.remote_local_version),
        _ => (false, 0),
    };

    let mut node = tree.root();
    let mut allow_namespace = true;
    let mut i = 0;
    while i < op.path.len() {
        let segment = op.path[i].as_str();
        let n = tree.node(node).ok_or_else(|| stale(op))?;

        if allow_namespace && !n.siblings.is_empty() {
            let tagged = n.siblings.iter().copied().find(|&member| {
                tree.node(member)
                    .is_some_and(|m| m.namespace.as_deref() == Some(segment))
            });
            if let Some(member) = tagged {
                node = member;
                allow_namespace = false;
                i += 1;
                continue;
            }
            // With a single overlay the host's own properties stay
            // addressable without a tag; with several, a bare segment
            // is ambiguous.
            if n.siblings.len() > 2 {
                return Err(ApplyError::UnknownNamespace {
                    source_op: op.source.clone(),
                });
            }
        }
        allow_namespace = false;

        let Some((slot, prop)) = n.schema.get(segment) else {
            return Err(ApplyError::UnknownProperty {
                source_op: op.source.clone(),
            });
        };
        match prop.kind {
            Kind::Object => {
                let child = tree.child_by_slot(node, slot).ok_or_else(|| stale(op))?;
                if check_versions {
                    let stamp = tree.node(child).ok_or_else(|| stale(op))?.version_stamp;
                    if stamp > remote_local {
                        return Err(stale(op));
                    }
                }
                node = child;
                allow_namespace = true;
                i += 1;
            }
            Kind::Array => {
                let array = tree.child_by_slot(node, slot).ok_or_else(|| stale(op))?;
                i += 1;
                let Some(index_segment) = op.path.get(i) else {
                    return Err(ApplyError::MalformedBatch {
                        detail: "array path without an element index".into(),
                        source_op: op.source.clone(),
                    });
                };
                // Bare digits only: `parse` alone would also take a
                // leading `+` sign.
                let digits = !index_segment.is_empty()
                    && index_segment.bytes().all(|b| b.is_ascii_digit());
                let index: usize = index_segment
                    .parse()
                    .ok()
                    .filter(|_| digits)
                    .ok_or_else(|| ApplyError::MalformedBatch {
                        detail: format!("invalid array index {index_segment:?}"),
                        source_op: op.source.clone(),
                    })?;
                let index = if check_versions {
                    tree.transform_index(array, remote_local, index)
                        .ok_or_else(|| stale(op))?
                } else if tree.array_is_dirty(array) {
                    // No version lag, but this generation already moved
                    // elements the remote addressed by old position.
                    tree.transform_index(array, u64::MAX, index)
                        .ok_or_else(|| stale(op))?
                } else {
                    index
                };
                node = tree.array_get(array, index).ok_or_else(|| stale(op))?;
                allow_namespace = true;
                i += 1;
            }
            _ => {
                if i + 1 != op.path.len() {
                    return Err(ApplyError::UnexpectedTrailingSegment {
                        source_op: op.source.clone(),
                    });
                }
                return Ok(Target { node, slot });
            }
        }
    }
    Err(ApplyError::MalformedBatch {
        detail: "path does not address a terminal property".into(),
        source_op: op.source.clone(),
    })
}
