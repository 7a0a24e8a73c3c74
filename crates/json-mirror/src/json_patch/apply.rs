//! Incoming batch application.
//!
//! Unversioned trees apply content operations directly. Versioned trees
//! first check the batch's version headers: the batch is applied only
//! when it carries exactly the next remote version; older batches are
//! dropped as already applied and newer ones are parked in the replay
//! queue until the missing predecessors arrive. Draining the queue after
//! an accepted batch advances one slot per acceptance, so a hole in the
//! sequence pauses replay until the missing batch fills it.

use crate::json_patch::codec::json::decode_batch;
use crate::json_patch::resolve::resolve;
use crate::json_patch::types::{ApplyOutcome, ApplyStatus, OpKind, PatchOp};
use crate::json_patch::ApplyError;
use crate::schema::convert_input;
use crate::tree::{NodeId, Tree};
use tracing::{debug, warn};

/// Upper bound on queued batches replayed behind one acceptance.
pub const MAX_QUEUE_DRAIN: usize = 64;

/// How non-fatal per-operation errors are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplyMode {
    /// Any error aborts the batch.
    #[default]
    Strict,
    /// Per-operation errors are counted and the rest of the batch is
    /// still applied. Malformed batches abort in every mode.
    Lenient,
}

/// Receives each resolved input operation. The default handler converts
/// the JSON value to the property's kind and writes it; installing a
/// custom handler lets the application observe or veto remote input.
pub type ApplyHandler =
    Box<dyn FnMut(&mut Tree, NodeId, usize, &PatchOp) -> Result<(), ApplyError> + Send>;

/// Converts the operation value and writes it without recording a
/// change; the remote already holds this value. A value that was coerced
/// to the kind's default is recorded, so the correction reaches the
/// remote in the next batch.
pub fn default_handler() -> ApplyHandler {
    Box::new(|tree, node, slot, op| {
        let Some(schema) = tree.node(node).map(|n| n.schema.clone()) else {
            return Err(ApplyError::StalePath {
                source_op: op.source.clone(),
            });
        };
        let Some(value) = op.value.as_ref() else {
            return Err(ApplyError::MalformedBatch {
                detail: "missing value".into(),
                source_op: op.source.clone(),
            });
        };
        let converted =
            convert_input(schema.prop(slot), value).map_err(|e| ApplyError::ValueConversion {
                detail: e.to_string(),
                source_op: op.source.clone(),
            })?;
        tree.set_input(node, slot, converted.input);
        if converted.coerced_default {
            tree.touch(node, slot);
        }
        Ok(())
    })
}

/// Applies one incoming batch document.
pub fn apply(
    tree: &mut Tree,
    handler: &mut ApplyHandler,
    mode: ApplyMode,
    batch: &str,
) -> Result<ApplyOutcome, ApplyError> {
    if tree.changelog.version.is_none() {
        let ops = decode_batch(batch)?;
        let (applied, rejected) = apply_content(tree, handler, mode, &ops)?;
        debug!(applied, rejected, "applied unversioned batch");
        return Ok(ApplyOutcome {
            status: ApplyStatus::Applied,
            applied,
            rejected,
        });
    }
    apply_versioned(tree, handler, mode, batch)
}

fn apply_versioned(
    tree: &mut Tree,
    handler: &mut ApplyHandler,
    mode: ApplyMode,
    batch: &str,
) -> Result<ApplyOutcome, ApplyError> {
    let (local_field, remote_field, current_remote) = match tree.changelog.version.as_ref() {
        Some(v) => (
            v.local_field().to_string(),
            v.remote_field().to_string(),
            v.remote_version,
        ),
        None => {
            return Err(ApplyError::MalformedBatch {
                detail: "versioned apply without version state".into(),
                source_op: batch.to_string(),
            })
        }
    };
    let ops = decode_batch(batch)?;
    // Both headers must be well-formed before the version comparison:
    // a malformed batch is fatal even when its declared version makes
    // it a duplicate.
    let incoming = parse_remote_header(&ops, &remote_field, batch)?;
    let acked = parse_local_header(&ops, &local_field)?;

    if incoming <= current_remote {
        debug!(incoming, current_remote, "batch already applied");
        return Ok(ApplyOutcome::with_status(ApplyStatus::AlreadyApplied));
    }
    if incoming > current_remote + 1 {
        let slot = (incoming - current_remote - 2) as usize;
        if let Some(v) = tree.changelog.version.as_mut() {
            v.enqueue(batch.as_bytes().to_vec(), slot);
        }
        debug!(incoming, current_remote, slot, "batch queued for replay");
        return Ok(ApplyOutcome::with_status(ApplyStatus::Queued));
    }

    let (mut applied, mut rejected) =
        apply_accepted(tree, handler, mode, &ops, incoming, acked)?;

    // One slot advances per accepted batch; a leading hole stops the
    // drain until the missing version shows up. Each drained batch is
    // dispatched by its own declared version rather than trusted by
    // position, so a drain interrupted by the cap cannot replay a
    // retransmitted batch twice or apply one out of order.
    let mut drained = 0;
    loop {
        if drained >= MAX_QUEUE_DRAIN {
            warn!(drained, "queue drain limit reached");
            break;
        }
        let Some(bytes) = tree.changelog.version.as_mut().and_then(|v| v.shift()) else {
            break;
        };
        drained += 1;
        let text = String::from_utf8(bytes).map_err(|_| ApplyError::MalformedBatch {
            detail: "queued batch is not valid utf-8".into(),
            source_op: String::new(),
        })?;
        let ops = decode_batch(&text)?;
        let incoming = parse_remote_header(&ops, &remote_field, &text)?;
        let acked = parse_local_header(&ops, &local_field)?;
        let current = tree
            .changelog
            .version
            .as_ref()
            .map_or(0, |v| v.remote_version);
        if incoming <= current {
            debug!(incoming, current, "skipped duplicate queued batch");
            continue;
        }
        if incoming > current + 1 {
            let slot = (incoming - current - 2) as usize;
            if let Some(v) = tree.changelog.version.as_mut() {
                v.enqueue(text.into_bytes(), slot);
            }
            break;
        }
        let (a, r) = apply_accepted(tree, handler, mode, &ops, incoming, acked)?;
        applied += a;
        rejected += r;
    }

    debug!(applied, rejected, drained, "applied versioned batch");
    Ok(ApplyOutcome {
        status: ApplyStatus::Applied,
        applied,
        rejected,
    })
}

/// Advances the version state by an accepted batch and applies its
/// content operations. Counts include the two headers.
fn apply_accepted(
    tree: &mut Tree,
    handler: &mut ApplyHandler,
    mode: ApplyMode,
    ops: &[PatchOp],
    incoming: u64,
    acked: u64,
) -> Result<(usize, usize), ApplyError> {
    if let Some(v) = tree.changelog.version.as_mut() {
        v.remote_version = incoming;
        v.remote_local_version = acked;
    }
    tree.cleanup_version_logs(acked);
    let (applied, rejected) = apply_content(tree, handler, mode, &ops[2..])?;
    Ok((applied + 2, rejected))
}

fn parse_remote_header(
    ops: &[PatchOp],
    remote_field: &str,
    batch: &str,
) -> Result<u64, ApplyError> {
    let Some(op) = ops.first() else {
        return Err(ApplyError::MalformedBatch {
            detail: "versioned batch is empty".into(),
            source_op: batch.to_string(),
        });
    };
    if op.kind != OpKind::Replace || op.path.len() != 1 || op.path[0] != remote_field {
        return Err(ApplyError::MalformedBatch {
            detail: format!("first operation must replace /{remote_field}"),
            source_op: op.source.clone(),
        });
    }
    op.value
        .as_ref()
        .and_then(|v| v.as_u64())
        .ok_or_else(|| ApplyError::MalformedBatch {
            detail: "remote version is not an unsigned integer".into(),
            source_op: op.source.clone(),
        })
}

fn parse_local_header(ops: &[PatchOp], local_field: &str) -> Result<u64, ApplyError> {
    let Some(op) = ops.get(1) else {
        return Err(ApplyError::MalformedBatch {
            detail: "versioned batch lacks the acknowledgement header".into(),
            source_op: ops.first().map(|o| o.source.clone()).unwrap_or_default(),
        });
    };
    if op.kind != OpKind::Test || op.path.len() != 1 || op.path[0] != local_field {
        return Err(ApplyError::MalformedBatch {
            detail: format!("second operation must test /{local_field}"),
            source_op: op.source.clone(),
        });
    }
    op.value
        .as_ref()
        .and_then(|v| v.as_u64())
        .ok_or_else(|| ApplyError::MalformedBatch {
            detail: "acknowledged version is not an unsigned integer".into(),
            source_op: op.source.clone(),
        })
}

fn apply_content(
    tree: &mut Tree,
    handler: &mut ApplyHandler,
    mode: ApplyMode,
    ops: &[PatchOp],
) -> Result<(usize, usize), ApplyError> {
    let mut applied = 0;
    let mut rejected = 0;
    for op in ops {
        match apply_one(tree, handler, op) {
            Ok(()) => applied += 1,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => match mode {
                ApplyMode::Strict => return Err(e),
                ApplyMode::Lenient => {
                    warn!(error = %e, "rejected operation");
                    rejected += 1;
                }
            },
        }
    }
    Ok((applied, rejected))
}

fn apply_one(
    tree: &mut Tree,
    handler: &mut ApplyHandler,
    op: &PatchOp,
) -> Result<(), ApplyError> {
    if op.kind != OpKind::Replace {
        return Err(ApplyError::MalformedBatch {
            detail: format!("incoming {} operations are not supported", op.kind),
            source_op: op.source.clone(),
        });
    }
    let target = resolve(tree, op)?;
    let editable = tree
        .node(target.node)
        .map(|n| n.schema.prop(target.slot).editable)
        .unwrap_or(false);
    if !editable {
        return Err(ApplyError::ReadOnlyProperty {
            source_op: op.source.clone(),
        });
    }
    handler(tree, target.node, target.slot, op)
}
