#![forbid(unsafe_code)]
//! Identifiers, the recoverable error taxonomy and the fatal path shared by
//! every layer of the field engine.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod checksum;
pub mod fatal;

/// Node type identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeId(pub u16);

/// Node identifier, unique within a node type. `0` never names a node.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u32);

/// Dense, 0-based index of a field inside a node type's schema.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldIndex(pub u8);

/// Full identity of a node: its type and its id within that type.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeKey {
    /// Node type.
    pub ty: TypeId,
    /// Node id within `ty`.
    pub id: NodeId,
}

impl NodeKey {
    /// Creates a key from raw parts.
    pub const fn new(ty: TypeId, id: NodeId) -> Self {
        Self { ty, id }
    }
}

/// One edge as seen from the node that owns the reference field.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct RefRecord {
    /// Destination node of the edge.
    pub dst: NodeKey,
    /// Attached edge node carrying the edge's own fields, if the constraint declares one.
    pub meta: Option<NodeKey>,
    /// Position of the edge inside the field (always 0 for single references).
    pub index: usize,
}

/// Recoverable errors. The node is left in its prior valid state whenever one of
/// these is returned.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SombraError {
    /// Malformed call, e.g. a self reference or a bad index.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// Field kind or destination type disagrees with the requested operation.
    #[error("type mismatch: {0}")]
    TypeMismatch(&'static str),
    /// Missing field, node, schema or element.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// Duplicate insertion without the reorder flag; carries the existing edge.
    #[error("reference to {} already exists at index {}", .0.dst, .0.index)]
    AlreadyExists(RefRecord),
    /// Write exceeds the declared capacity of a fixed-length field.
    #[error("no buffer space: need {need} bytes, capacity {cap}")]
    NoBufferSpace {
        /// Bytes the write needs.
        need: usize,
        /// Declared capacity.
        cap: usize,
    },
    /// Operation is not valid for this field kind.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    /// A schema description could not be decoded or failed validation.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, SombraError>;

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for FieldIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ty, self.id)
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        NodeId(value)
    }
}

impl From<NodeId> for u32 {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

impl From<u16> for TypeId {
    fn from(value: u16) -> Self {
        TypeId(value)
    }
}

impl From<u8> for FieldIndex {
    fn from(value: u8) -> Self {
        FieldIndex(value)
    }
}

impl FieldIndex {
    /// Index as a `usize`, for addressing descriptor tables.
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}
