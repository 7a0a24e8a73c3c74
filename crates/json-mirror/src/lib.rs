//! Typed view-model mirroring over JSON Patch.
//!
//! A [`tree::Tree`] holds one schema-typed view-model instance and
//! records every mutation in its change log. [`JsonPatch`] turns those
//! recorded changes into JSON Patch batches for a remote mirror and
//! applies the remote's batches back, with an optional version
//! handshake that keeps both sides consistent across reordered or
//! duplicated deliveries.
//!
//! ```
//! use json_mirror::schema::Schema;
//! use json_mirror::tree::Tree;
//! use json_mirror::JsonPatch;
//! use std::sync::Arc;
//!
//! let mut schema = Schema::new("Person");
//! schema.add_string("FirstName", true);
//! let mut tree = Tree::new(Arc::new(schema));
//! let mut patch = JsonPatch::new();
//!
//! // First batch bootstraps the remote with the whole view-model.
//! let bootstrap = patch.generate(&mut tree).unwrap();
//! assert!(bootstrap.contains("FirstName"));
//!
//! // Remote input flows back through apply.
//! patch
//!     .apply(&mut tree, r#"[{"op":"replace","path":"/FirstName","value":"Hjalle"}]"#)
//!     .unwrap();
//! assert_eq!(tree.get_string(tree.root(), "FirstName"), Some("Hjalle"));
//! ```

pub mod changelog;
pub mod json_patch;
pub mod schema;
pub mod tree;

pub use json_patch::{ApplyError, ApplyHandler, ApplyMode, ApplyOutcome, ApplyStatus};

use json_patch::default_handler;
use tree::Tree;

/// Patch endpoint for one or more trees: owns the apply mode and the
/// input handler, and drives generation and application.
pub struct JsonPatch {
    mode: ApplyMode,
    handler: ApplyHandler,
}

impl JsonPatch {
    pub fn new() -> Self {
        Self::with_mode(ApplyMode::Strict)
    }

    pub fn with_mode(mode: ApplyMode) -> Self {
        Self {
            mode,
            handler: default_handler(),
        }
    }

    /// Replaces the input handler invoked for every resolved incoming
    /// operation.
    pub fn set_patch_handler(&mut self, handler: ApplyHandler) {
        self.handler = handler;
    }

    pub fn set_mode(&mut self, mode: ApplyMode) {
        self.mode = mode;
    }

    /// Generates the batch for everything recorded since the last
    /// generation. `None` when versioning is off and nothing changed.
    pub fn generate(&self, tree: &mut Tree) -> Option<String> {
        json_patch::generate(tree)
    }

    /// [`Self::generate`] with explicit flush and namespace control.
    pub fn generate_with(
        &self,
        tree: &mut Tree,
        flush: bool,
        include_namespace: bool,
    ) -> Option<String> {
        json_patch::generate_with(tree, flush, include_namespace)
    }

    /// Applies one incoming batch document.
    pub fn apply(&mut self, tree: &mut Tree, batch: &str) -> Result<ApplyOutcome, ApplyError> {
        json_patch::apply(tree, &mut self.handler, self.mode, batch)
    }
}

impl Default for JsonPatch {
    fn default() -> Self {
        Self::new()
    }
}
