//! Per-type field schemas.
//!
//! A [`NodeSchema`] is an ordered list of [`FieldSchema`]s with dense indices.
//! Stored ("main") fields come first; virtual kinds (`Alias`, `ColVec`) are
//! handled by other subsystems and must be declared after every main field, so
//! a node's descriptor table only needs `nr_main_fields()` slots.

use serde::{Deserialize, Serialize};

use crate::types::{FieldIndex, Result, SombraError, TypeId};

use super::buffer::DATA_ALIGN;
use super::string::STRING_HEADER_LEN;

/// Edge flag: the owning node is scheduled for expiry once the field empties.
pub const EDGE_FLAG_DEPENDENT: u8 = 0x01;
/// Edge flag: the field is skipped when the node is dumped.
pub const EDGE_FLAG_SKIP_DUMP: u8 = 0x02;

/// Size of the in-buffer record of a single reference.
pub(crate) const REFERENCE_RECORD_LEN: usize = 16;
/// Size of the in-buffer stub of out-of-line fields (text, reference lists).
pub(crate) const STUB_RECORD_LEN: usize = 8;

/// Reference-specific schema data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeConstraint {
    /// Type every destination node must have.
    pub dst_type: TypeId,
    /// Field on the destination type holding the back-edge.
    pub inverse_field: FieldIndex,
    /// Type of the attached edge node, set only when the edge carries fields.
    #[serde(default)]
    pub edge_type: Option<TypeId>,
    /// Maximum number of elements of a reference list, `0` for unbounded.
    #[serde(default)]
    pub limit: u32,
    /// `EDGE_FLAG_*` bits.
    #[serde(default)]
    pub flags: u8,
}

impl EdgeConstraint {
    /// Constraint with no edge metadata, no limit and no flags.
    pub fn new(dst_type: TypeId, inverse_field: FieldIndex) -> Self {
        Self {
            dst_type,
            inverse_field,
            edge_type: None,
            limit: 0,
            flags: 0,
        }
    }

    /// Attaches an edge node type.
    pub fn with_edge_type(mut self, edge_type: TypeId) -> Self {
        self.edge_type = Some(edge_type);
        self
    }

    /// Caps the element count of a reference list.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Sets `EDGE_FLAG_*` bits.
    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags |= flags;
        self
    }

    /// Whether the owning node expires once the field empties.
    pub fn is_dependent(&self) -> bool {
        self.flags & EDGE_FLAG_DEPENDENT != 0
    }

    /// Whether edges carry an attached edge node, which also selects the
    /// extended element layout for reference lists.
    pub fn has_meta(&self) -> bool {
        self.edge_type.is_some()
    }

    pub(crate) fn limit(&self) -> Option<usize> {
        (self.limit > 0).then_some(self.limit as usize)
    }
}

/// Kind of a field and its kind-specific parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    /// Placeholder that never holds a value.
    Null,
    /// Fixed-size raw bytes stored in place.
    MicroBuffer {
        /// Exact length of the value.
        len: u16,
    },
    /// Checksummed string; `fixed_len > 0` embeds it with that capacity.
    String {
        /// Embedded capacity, `0` for a dynamically sized string.
        #[serde(default)]
        fixed_len: u32,
    },
    /// One checksummed string per language.
    Text {
        /// Per-entry capacity, `0` for unbounded.
        #[serde(default)]
        fixed_len: u32,
    },
    /// At most one edge.
    Reference(EdgeConstraint),
    /// Ordered list of edges.
    References(EdgeConstraint),
    /// Column vector, stored outside the node.
    ColVec {
        /// Element size in bytes.
        elem_size: u16,
    },
    /// Alias, stored outside the node.
    Alias,
}

impl FieldKind {
    /// Virtual kinds have no slot in the node's descriptor table.
    pub fn is_virtual(&self) -> bool {
        matches!(self, FieldKind::ColVec { .. } | FieldKind::Alias)
    }

    /// Edge constraint of reference kinds.
    pub fn edge_constraint(&self) -> Option<&EdgeConstraint> {
        match self {
            FieldKind::Reference(efc) | FieldKind::References(efc) => Some(efc),
            _ => None,
        }
    }

    /// Bytes the field occupies inside the node buffer.
    pub(crate) fn slot_size(&self) -> usize {
        match self {
            FieldKind::Null | FieldKind::ColVec { .. } | FieldKind::Alias => 0,
            FieldKind::MicroBuffer { len } => *len as usize,
            FieldKind::String { fixed_len } => STRING_HEADER_LEN + *fixed_len as usize,
            FieldKind::Text { .. } | FieldKind::References(_) => STUB_RECORD_LEN,
            FieldKind::Reference(_) => REFERENCE_RECORD_LEN,
        }
    }

    /// Stable tag folded into content hashes.
    pub(crate) fn tag(&self) -> u8 {
        match self {
            FieldKind::Null => 1,
            FieldKind::MicroBuffer { .. } => 2,
            FieldKind::String { .. } => 3,
            FieldKind::Text { .. } => 4,
            FieldKind::Reference(_) => 5,
            FieldKind::References(_) => 6,
            FieldKind::ColVec { .. } => 7,
            FieldKind::Alias => 8,
        }
    }
}

/// Schema of one field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Dense index of the field inside its type.
    pub field: FieldIndex,
    /// Kind and parameters.
    pub kind: FieldKind,
}

impl FieldSchema {
    /// Creates a field schema.
    pub fn new(field: u8, kind: FieldKind) -> Self {
        Self {
            field: FieldIndex(field),
            kind,
        }
    }
}

#[derive(Deserialize)]
struct RawNodeSchema {
    ty: TypeId,
    fields: Vec<FieldSchema>,
}

/// Schema of a node type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawNodeSchema")]
pub struct NodeSchema {
    ty: TypeId,
    fields: Vec<FieldSchema>,
    #[serde(skip)]
    nr_main: usize,
}

impl TryFrom<RawNodeSchema> for NodeSchema {
    type Error = SombraError;

    fn try_from(raw: RawNodeSchema) -> Result<Self> {
        NodeSchema::new(raw.ty, raw.fields)
    }
}

impl NodeSchema {
    /// Validates and builds a schema.
    ///
    /// Field indices must be dense and in order, virtual fields must follow
    /// every main field, and embedded sizes must fit the alignment-unit
    /// addressing of the node buffer.
    pub fn new(ty: TypeId, fields: Vec<FieldSchema>) -> Result<Self> {
        if fields.len() > u8::MAX as usize {
            return Err(SombraError::InvalidSchema(format!(
                "type {ty} declares {} fields, at most 255 allowed",
                fields.len()
            )));
        }
        let mut nr_main = 0usize;
        let mut seen_virtual = false;
        for (pos, fs) in fields.iter().enumerate() {
            if fs.field.as_usize() != pos {
                return Err(SombraError::InvalidSchema(format!(
                    "type {ty}: field at position {pos} has index {}",
                    fs.field
                )));
            }
            if fs.kind.is_virtual() {
                seen_virtual = true;
                continue;
            }
            if seen_virtual {
                return Err(SombraError::InvalidSchema(format!(
                    "type {ty}: main field {} declared after a virtual field",
                    fs.field
                )));
            }
            if let FieldKind::MicroBuffer { len: 0 } = fs.kind {
                return Err(SombraError::InvalidSchema(format!(
                    "type {ty}: micro buffer {} has zero length",
                    fs.field
                )));
            }
            if fs.kind.slot_size() > super::buffer::MAX_DATA_LEN - DATA_ALIGN {
                return Err(SombraError::InvalidSchema(format!(
                    "type {ty}: field {} does not fit a node buffer",
                    fs.field
                )));
            }
            nr_main += 1;
        }
        Ok(Self {
            ty,
            fields,
            nr_main,
        })
    }

    /// Decodes and validates a schema from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|err| SombraError::InvalidSchema(err.to_string()))
    }

    /// Type described by this schema.
    pub fn ty(&self) -> TypeId {
        self.ty
    }

    /// Every field, main and virtual, in index order.
    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    /// Number of fields with a slot in the descriptor table.
    pub fn nr_main_fields(&self) -> usize {
        self.nr_main
    }

    /// Schema of field `field`.
    pub fn field(&self, field: FieldIndex) -> Result<&FieldSchema> {
        self.fields
            .get(field.as_usize())
            .ok_or(SombraError::NotFound("field schema"))
    }
}
