//! Field engine: per-node field storage, strings and text, reference fields
//! and the content hash pass.

/// Per-node field buffer and its alignment-unit addressing.
pub mod buffer;
/// Collaborator traits the engine runs against.
pub mod directory;
/// Two-state ownership of attached edge nodes.
pub mod edge_meta;
/// Field descriptor table, allocation and typed access.
pub mod fields;
/// Deterministic content hash of a node's fields.
pub mod hash;
/// Field deletion and node teardown.
pub mod lifecycle;
/// Reference maintenance metrics.
pub mod metrics;
/// Reference engine.
pub mod refs;
/// Field schemas.
pub mod schema;
/// Checksummed string fields.
pub mod string;
/// Multi-language text fields.
pub mod text;

mod refs_array;

pub use directory::{
    field_schema, inverse_field_schema, Db, ExpireStrategy, ExpiryScheduler, NodeDirectory,
    SchemaDirectory,
};
pub use edge_meta::{EdgeMeta, Release};
pub use fields::{FieldValue, Node, RawView};
pub use hash::{fields_hash, fields_hash_update};
pub use lifecycle::{delete_field, destroy_all_fields, unload_all_fields};
pub use metrics::{default_metrics, CounterMetrics, FieldMetrics, NoopMetrics};
pub use refs::{
    clear_references, reference_set, references_insert, references_insert_tail,
    remove_reference, InsertFlags, RefSelector, RefsIter, REORDER,
};
pub use refs_array::{LINEAR_SEARCH_THRESHOLD, OFFSET_COMPACT_FACTOR};
pub use schema::{
    EdgeConstraint, FieldKind, FieldSchema, NodeSchema, EDGE_FLAG_DEPENDENT, EDGE_FLAG_SKIP_DUMP,
};
pub use string::{encode_wire, FieldString, StrRef, StringMut};
