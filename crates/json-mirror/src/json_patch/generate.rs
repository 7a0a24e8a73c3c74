//! Outgoing batch generation.
//!
//! Turns the change log of one generation into a patch batch. The first
//! generation of a tree is a bootstrap: a single `replace` of the whole
//! root under the empty pointer. With versioning enabled, every batch is
//! prefixed with the two version headers and is emitted even when no
//! content changed, because the headers themselves carry information the
//! remote needs. Changes recorded against nodes that were detached
//! before generation are dropped.

use crate::changelog::{Change, ChangeKind};
use crate::json_patch::codec::json::{encode_batch, WireOp};
use crate::json_patch::types::OpKind;
use crate::tree::{NodeId, Tree};
use serde_json::json;
use tracing::debug;

/// Generates the batch for everything recorded since the last call and
/// ends the generation. Returns `None` when versioning is off and
/// nothing changed.
pub fn generate(tree: &mut Tree) -> Option<String> {
    generate_with(tree, true, true)
}

/// Like [`generate`], with two knobs: `flush = false` serializes the
/// pending changes without ending the generation (a preview; the same
/// batch comes out again later), and `include_namespace = false` leaves
/// overlay namespace tags out of the emitted paths.
pub fn generate_with(tree: &mut Tree, flush: bool, include_namespace: bool) -> Option<String> {
    let mut ops: Vec<WireOp> = Vec::new();
    let new_version = tree.changelog.version.as_ref().map(|v| {
        ops.push(WireOp::from_path(
            OpKind::Replace,
            &[v.local_field().to_string()],
            Some(json!(v.local_version + 1)),
        ));
        ops.push(WireOp::from_path(
            OpKind::Test,
            &[v.remote_field().to_string()],
            Some(json!(v.remote_version)),
        ));
        v.local_version + 1
    });

    if tree.changelog.is_brand_new() {
        ops.push(WireOp::from_path(
            OpKind::Replace,
            &[],
            Some(tree.to_value(tree.root())),
        ));
    } else {
        let changes: Vec<Change> = tree.changelog.changes().to_vec();
        for change in &changes {
            if let Some(op) = change_to_op(tree, change, include_namespace) {
                ops.push(op);
            }
        }
        if new_version.is_none() && ops.is_empty() {
            return None;
        }
    }

    debug!(ops = ops.len(), version = ?new_version, flush, "generated patch batch");
    if flush {
        tree.checkpoint(new_version);
    }
    Some(encode_batch(&ops))
}

fn change_to_op(tree: &Tree, change: &Change, include_namespace: bool) -> Option<WireOp> {
    let mut path = node_path(tree, change.node, include_namespace)?;
    let slot = change.property?;
    let prop_name = tree.node(change.node)?.schema.prop(slot).name.clone();
    path.push(prop_name);
    match change.kind {
        ChangeKind::Replace => Some(WireOp::from_path(
            OpKind::Replace,
            &path,
            Some(tree.property_value(change.node, slot)),
        )),
        ChangeKind::Add => {
            let item = change.item?;
            // The item may have been removed again within the same
            // generation; there is nothing left to serialize.
            tree.node(item)?;
            path.push(change.index.to_string());
            Some(WireOp::from_path(
                OpKind::Add,
                &path,
                Some(tree.to_value(item)),
            ))
        }
        ChangeKind::Remove => {
            path.push(change.index.to_string());
            Some(WireOp::from_path(OpKind::Remove, &path, None))
        }
    }
}

/// Segments addressing `node` from the root, or `None` when the node has
/// been detached. Overlay members that hang off a host contribute their
/// namespace tag as a segment.
fn node_path(tree: &Tree, mut node: NodeId, include_namespace: bool) -> Option<Vec<String>> {
    let mut segments: Vec<String> = Vec::new();
    while node != tree.root() {
        let n = tree.node(node)?;
        match n.parent {
            Some(parent) => {
                if n.in_array {
                    segments.push(tree.index_in_array(node)?.to_string());
                } else {
                    let owner = tree.node(parent)?;
                    segments.push(owner.schema.prop(n.parent_slot).name.clone());
                }
                node = parent;
            }
            None => {
                if n.siblings.is_empty() {
                    return None;
                }
                if include_namespace {
                    segments.push(n.namespace.clone()?);
                }
                let host = n.siblings.iter().copied().find(|&member| {
                    member == tree.root()
                        || tree.node(member).is_some_and(|m| m.parent.is_some())
                })?;
                node = host;
            }
        }
    }
    segments.reverse();
    Some(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn sample_schema() -> Arc<Schema> {
        let mut item = Schema::new("Item");
        item.add_string("Description", true);
        let mut page = Schema::new("Page");
        page.add_string("Title", true);
        let mut root = Schema::new("Root");
        root.add_string("FirstName", true);
        root.add_object("Page", Arc::new(page));
        root.add_array("Items", Arc::new(item));
        Arc::new(root)
    }

    fn decoded(batch: &str) -> Value {
        serde_json::from_str(batch).unwrap()
    }

    #[test]
    fn bootstrap_is_a_whole_root_replace() {
        let mut tree = Tree::new(sample_schema());
        tree.set_string(tree.root(), "FirstName", "Hjalle");
        let batch = generate(&mut tree).unwrap();
        assert_eq!(
            decoded(&batch),
            json!([{"op": "replace", "path": "", "value": {
                "FirstName": "Hjalle",
                "Page": {"Title": ""},
                "Items": []
            }}])
        );
        // Nothing changed since: no batch.
        assert_eq!(generate(&mut tree), None);
    }

    #[test]
    fn incremental_changes_emit_property_paths() {
        let mut tree = Tree::new(sample_schema());
        generate(&mut tree);
        let page = tree.child(tree.root(), "Page").unwrap();
        tree.set_string(tree.root(), "FirstName", "Apa");
        tree.set_string(page, "Title", "Papa");
        let batch = generate(&mut tree).unwrap();
        assert_eq!(
            decoded(&batch),
            json!([
                {"op": "replace", "path": "/FirstName", "value": "Apa"},
                {"op": "replace", "path": "/Page/Title", "value": "Papa"}
            ])
        );
    }

    #[test]
    fn repeated_sets_emit_the_latest_value_once() {
        let mut tree = Tree::new(sample_schema());
        generate(&mut tree);
        tree.set_string(tree.root(), "FirstName", "first");
        tree.set_string(tree.root(), "FirstName", "second");
        let batch = generate(&mut tree).unwrap();
        assert_eq!(
            decoded(&batch),
            json!([{"op": "replace", "path": "/FirstName", "value": "second"}])
        );
    }

    #[test]
    fn array_edits_emit_add_and_remove() {
        let mut tree = Tree::new(sample_schema());
        generate(&mut tree);
        let items = tree.child(tree.root(), "Items").unwrap();
        let item = tree.array_push(items).unwrap();
        tree.set_string(item, "Description", "milk");
        let batch = generate(&mut tree).unwrap();
        assert_eq!(
            decoded(&batch),
            json!([
                {"op": "add", "path": "/Items/0", "value": {"Description": ""}},
                {"op": "replace", "path": "/Items/0/Description", "value": "milk"}
            ])
        );
        tree.array_remove(items, 0);
        let batch = generate(&mut tree).unwrap();
        assert_eq!(
            decoded(&batch),
            json!([{"op": "remove", "path": "/Items/0"}])
        );
    }

    #[test]
    fn changes_on_detached_nodes_are_dropped() {
        let mut tree = Tree::new(sample_schema());
        generate(&mut tree);
        let items = tree.child(tree.root(), "Items").unwrap();
        let item = tree.array_push(items).unwrap();
        tree.set_string(item, "Description", "gone");
        tree.array_remove(items, 0);
        let batch = generate(&mut tree).unwrap();
        // The add and the replace both died with the item; only the
        // remove survives.
        assert_eq!(
            decoded(&batch),
            json!([{"op": "remove", "path": "/Items/0"}])
        );
    }

    #[test]
    fn versioned_batches_carry_headers_and_always_emit() {
        let mut tree = Tree::with_versioning(sample_schema());
        let batch = generate(&mut tree).unwrap();
        let ops = decoded(&batch);
        assert_eq!(ops[0], json!({"op": "replace", "path": "/_ver#s", "value": 1}));
        assert_eq!(ops[1], json!({"op": "test", "path": "/_ver#c$", "value": 0}));
        assert_eq!(ops[2]["path"], json!(""));

        // No content changes: headers alone still go out, and the local
        // version keeps advancing.
        let batch = generate(&mut tree).unwrap();
        assert_eq!(
            decoded(&batch),
            json!([
                {"op": "replace", "path": "/_ver#s", "value": 2},
                {"op": "test", "path": "/_ver#c$", "value": 0}
            ])
        );
        let batch = generate(&mut tree).unwrap();
        assert_eq!(decoded(&batch)[0]["value"], json!(3));
        assert_eq!(
            tree.changelog.version.as_ref().unwrap().local_version,
            3
        );
    }

    #[test]
    fn preview_without_flush_leaves_the_generation_open() {
        let mut tree = Tree::new(sample_schema());
        generate(&mut tree);
        tree.set_string(tree.root(), "FirstName", "Apa");
        let preview = generate_with(&mut tree, false, true).unwrap();
        let flushed = generate(&mut tree).unwrap();
        assert_eq!(decoded(&preview), decoded(&flushed));
        // The flush consumed the changes; the preview did not.
        assert_eq!(generate(&mut tree), None);
    }

    #[test]
    fn namespace_segments_can_be_left_out() {
        let mut side = Schema::new("Side");
        side.add_string("Note", true);
        let mut tree = Tree::new(sample_schema());
        let page = tree.child(tree.root(), "Page").unwrap();
        let overlay = tree.attach_overlay(page, Arc::new(side), "side").unwrap();
        generate(&mut tree);
        tree.set_string(overlay, "Note", "hello");
        let batch = generate_with(&mut tree, true, false).unwrap();
        assert_eq!(
            decoded(&batch),
            json!([{"op": "replace", "path": "/Page/Note", "value": "hello"}])
        );
    }

    #[test]
    fn overlay_changes_use_the_namespace_segment() {
        let mut side = Schema::new("Side");
        side.add_string("Note", true);
        let mut tree = Tree::new(sample_schema());
        let page = tree.child(tree.root(), "Page").unwrap();
        let overlay = tree.attach_overlay(page, Arc::new(side), "side").unwrap();
        generate(&mut tree);
        tree.set_string(overlay, "Note", "hello");
        let batch = generate(&mut tree).unwrap();
        assert_eq!(
            decoded(&batch),
            json!([{"op": "replace", "path": "/Page/side/Note", "value": "hello"}])
        );
    }
}
