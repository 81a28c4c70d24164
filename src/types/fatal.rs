//! Unrecoverable conditions.
//!
//! Offset-space exhaustion and any disagreement between a reference field's
//! id index and its element array mean either a schema-generation defect or
//! corrupted memory. They are logged with enough context to debug and then the
//! current thread panics; they are never returned as [`super::SombraError`].

use tracing::error;

use super::{FieldIndex, NodeKey};

/// Aborts after a reference field was found in an inconsistent state.
#[cold]
#[track_caller]
pub fn corruption(node: NodeKey, field: FieldIndex, detail: &str) -> ! {
    error!(node = %node, field = field.0, detail, "field storage corrupted");
    panic!("field storage corrupted: node {node} field {field}: {detail}");
}

/// Aborts when a node's field buffer cannot address a new slot.
#[cold]
#[track_caller]
pub fn too_large(node: NodeKey, field: FieldIndex, size: usize) -> ! {
    error!(
        node = %node,
        field = field.0,
        size,
        "field buffer offset space exhausted"
    );
    panic!("field buffer too large: node {node} field {field} needs {size} bytes");
}
