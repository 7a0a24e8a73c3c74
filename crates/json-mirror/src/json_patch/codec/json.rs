//! JSON wire codec for patch batches.
//!
//! Decoding is deliberately strict about shape (a batch is an array of
//! objects, each with `op` and `path`, and a `value` for every kind but
//! `remove`) and deliberately lax about pointers: bare paths without the
//! leading slash are accepted, matching what older remote runtimes emit.

use crate::json_patch::types::{OpKind, PatchOp};
use crate::json_patch::ApplyError;
use json_mirror_json_pointer::{format_json_pointer, parse_json_pointer_relaxed};
use serde_json::Value;

/// One operation ready for encoding.
#[derive(Debug, Clone)]
pub struct WireOp {
    pub kind: OpKind,
    pub pointer: String,
    pub value: Option<Value>,
}

impl WireOp {
    pub fn new(kind: OpKind, pointer: String, value: Option<Value>) -> Self {
        Self {
            kind,
            pointer,
            value,
        }
    }

    pub fn from_path(kind: OpKind, path: &[String], value: Option<Value>) -> Self {
        Self::new(kind, format_json_pointer(path), value)
    }
}

fn malformed(detail: impl Into<String>, source_op: &Value) -> ApplyError {
    ApplyError::MalformedBatch {
        detail: detail.into(),
        source_op: source_op.to_string(),
    }
}

/// Decodes one batch document into operations, preserving order.
pub fn decode_batch(text: &str) -> Result<Vec<PatchOp>, ApplyError> {
    let doc: Value = serde_json::from_str(text).map_err(|e| ApplyError::MalformedBatch {
        detail: format!("invalid json: {e}"),
        source_op: text.to_string(),
    })?;
    let Value::Array(raw_ops) = doc else {
        return Err(malformed("batch is not an array", &doc));
    };
    let mut ops = Vec::with_capacity(raw_ops.len());
    for raw in &raw_ops {
        ops.push(decode_op(raw)?);
    }
    Ok(ops)
}

fn decode_op(raw: &Value) -> Result<PatchOp, ApplyError> {
    let Value::Object(fields) = raw else {
        return Err(malformed("operation is not an object", raw));
    };
    let kind = match fields.get("op") {
        Some(Value::String(name)) => OpKind::parse_str(name)
            .ok_or_else(|| malformed(format!("unsupported op {name:?}"), raw))?,
        Some(_) => return Err(malformed("op is not a string", raw)),
        None => return Err(malformed("missing op", raw)),
    };
    let path = match fields.get("path") {
        Some(Value::String(pointer)) => parse_json_pointer_relaxed(pointer)
            .map_err(|e| malformed(format!("bad path: {e}"), raw))?,
        Some(_) => return Err(malformed("path is not a string", raw)),
        None => return Err(malformed("missing path", raw)),
    };
    let value = fields.get("value").cloned();
    if value.is_none() && kind != OpKind::Remove {
        return Err(malformed("missing value", raw));
    }
    Ok(PatchOp::new(kind, path, value, raw.to_string()))
}

/// Encodes operations into one batch document.
pub fn encode_batch(ops: &[WireOp]) -> String {
    let rendered: Vec<Value> = ops
        .iter()
        .map(|op| {
            let mut fields = serde_json::Map::new();
            fields.insert("op".into(), Value::String(op.kind.as_str().into()));
            fields.insert("path".into(), Value::String(op.pointer.clone()));
            if let Some(value) = &op.value {
                fields.insert("value".into(), value.clone());
            }
            Value::Object(fields)
        })
        .collect();
    Value::Array(rendered).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_a_typical_batch() {
        let ops = decode_batch(
            r#"[{"op":"replace","path":"/FirstName","value":"Hjalle"},
                {"op":"remove","path":"/Items/0"}]"#,
        )
        .unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].kind, OpKind::Replace);
        assert_eq!(ops[0].path, vec!["FirstName"]);
        assert_eq!(ops[0].value, Some(json!("Hjalle")));
        assert_eq!(ops[1].kind, OpKind::Remove);
        assert_eq!(ops[1].value, None);
    }

    #[test]
    fn accepts_paths_without_leading_slash() {
        let ops = decode_batch(r#"[{"op":"replace","path":"FirstName","value":"x"}]"#).unwrap();
        assert_eq!(ops[0].path, vec!["FirstName"]);
    }

    #[test]
    fn unescapes_pointer_components() {
        let ops = decode_batch(r#"[{"op":"replace","path":"/a~1b/c~0d","value":1}]"#).unwrap();
        assert_eq!(ops[0].path, vec!["a/b", "c~d"]);
    }

    #[test]
    fn rejects_unsupported_ops() {
        for op in ["copy", "move"] {
            let err = decode_batch(&format!(r#"[{{"op":"{op}","path":"/a","value":1}}]"#))
                .unwrap_err();
            assert!(err.is_fatal(), "{op} must be fatal");
        }
    }

    #[test]
    fn rejects_missing_value_except_for_remove() {
        assert!(decode_batch(r#"[{"op":"replace","path":"/a"}]"#).is_err());
        assert!(decode_batch(r#"[{"op":"test","path":"/a"}]"#).is_err());
        assert!(decode_batch(r#"[{"op":"remove","path":"/a"}]"#).is_ok());
    }

    #[test]
    fn rejects_non_array_documents() {
        assert!(decode_batch(r#"{"op":"replace"}"#).is_err());
        assert!(decode_batch("not json").is_err());
    }

    #[test]
    fn error_carries_the_offending_op_text() {
        let err = decode_batch(r#"[{"op":"frobnicate","path":"/a","value":1}]"#).unwrap_err();
        assert!(err.source_op().contains("frobnicate"));
    }

    #[test]
    fn encode_round_trips_through_decode() {
        let ops = vec![
            WireOp::new(OpKind::Replace, "/_ver#c$".into(), Some(json!(3))),
            WireOp::new(OpKind::Test, "/_ver#s".into(), Some(json!(1))),
            WireOp::new(OpKind::Remove, "/Items/2".into(), None),
        ];
        let text = encode_batch(&ops);
        let decoded = decode_batch(&text).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].kind, OpKind::Replace);
        assert_eq!(decoded[0].path, vec!["_ver#c$"]);
        assert_eq!(decoded[2].kind, OpKind::Remove);
    }
}
