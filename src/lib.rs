//! Field storage and reference engine of the Sombra graph store.
//!
//! Nodes own a packed, offset-addressed field buffer described by their type's
//! schema. Reference fields keep both directions of every edge consistent,
//! optionally sharing an attached edge node between them.

#![warn(missing_docs)]

pub mod db;
pub mod primitives;
pub mod storage;
pub mod types;

pub use db::{MemDb, MemDbOptions};
pub use storage::{
    clear_references, delete_field, destroy_all_fields, fields_hash, fields_hash_update,
    reference_set, references_insert, references_insert_tail, remove_reference,
    unload_all_fields, Db, EdgeConstraint, FieldKind, FieldSchema, FieldValue, Node, NodeSchema,
    RefSelector, REORDER,
};
pub use types::{FieldIndex, NodeId, NodeKey, RefRecord, Result, SombraError, TypeId};
