//! Patch synchronization: batch generation, decoding, path resolution
//! and application, with the optional version handshake layered on top.

pub mod codec;
pub mod types;

mod apply;
mod generate;
mod resolve;

pub use apply::{apply, default_handler, ApplyHandler, ApplyMode, MAX_QUEUE_DRAIN};
pub use generate::{generate, generate_with};
pub use types::{ApplyOutcome, ApplyStatus, OpKind, PatchOp};

use thiserror::Error;

/// Everything that can go wrong while applying an incoming batch.
///
/// [`ApplyError::MalformedBatch`] is always fatal. The remaining
/// variants are per-operation faults; in strict mode they abort the
/// batch, in lenient mode they are counted and skipped. Every variant
/// carries the raw text of the offending operation.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("malformed patch batch: {detail} (in {source_op})")]
    MalformedBatch { detail: String, source_op: String },

    #[error("path names an unknown property (in {source_op})")]
    UnknownProperty { source_op: String },

    #[error("path names an unknown namespace (in {source_op})")]
    UnknownNamespace { source_op: String },

    #[error("path continues past a terminal property (in {source_op})")]
    UnexpectedTrailingSegment { source_op: String },

    #[error("path targets a node the remote no longer sees (in {source_op})")]
    StalePath { source_op: String },

    #[error("property is not editable (in {source_op})")]
    ReadOnlyProperty { source_op: String },

    #[error("value conversion failed: {detail} (in {source_op})")]
    ValueConversion { detail: String, source_op: String },
}

impl ApplyError {
    /// Fatal errors abort the batch in every mode.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApplyError::MalformedBatch { .. })
    }

    /// Raw text of the operation that produced this error.
    pub fn source_op(&self) -> &str {
        match self {
            ApplyError::MalformedBatch { source_op, .. }
            | ApplyError::UnknownProperty { source_op }
            | ApplyError::UnknownNamespace { source_op }
            | ApplyError::UnexpectedTrailingSegment { source_op }
            | ApplyError::StalePath { source_op }
            | ApplyError::ReadOnlyProperty { source_op }
            | ApplyError::ValueConversion { source_op, .. } => source_op,
        }
    }
}
