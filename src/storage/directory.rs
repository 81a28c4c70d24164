//! Collaborators the field engine relies on.
//!
//! Node allocation, the id→node mapping, schema lookup and expiry scheduling
//! belong to the surrounding database. The reference engine only sees them
//! through these traits; [`crate::db::MemDb`] is an in-memory implementation.

use std::sync::Arc;

use crate::types::{FieldIndex, NodeId, NodeKey, Result, SombraError, TypeId};

use super::fields::Node;
use super::metrics::{FieldMetrics, NoopMetrics};
use super::schema::{FieldSchema, NodeSchema};

static NOOP_METRICS: NoopMetrics = NoopMetrics;

/// Schema lookup by node type.
pub trait SchemaDirectory {
    /// Schema of `ty`, if the type is registered.
    fn node_schema(&self, ty: TypeId) -> Option<Arc<NodeSchema>>;
}

/// Node lookup and allocation.
pub trait NodeDirectory {
    /// Finds a live node.
    fn find_node(&self, key: NodeKey) -> Option<&Node>;

    /// Finds a live node for mutation.
    fn find_node_mut(&mut self, key: NodeKey) -> Option<&mut Node>;

    /// Returns the node, creating an empty one if it does not exist.
    fn upsert_node(&mut self, key: NodeKey) -> Result<&mut Node>;

    /// Allocates an unused id of type `ty`.
    fn new_node_id(&mut self, ty: TypeId) -> Result<NodeId>;

    /// Records that the node's fields changed.
    fn mark_dirty(&mut self, key: NodeKey);

    /// Tears a node's fields down and forgets the node.
    fn delete_node(&mut self, key: NodeKey) -> Result<()>;

    /// Metrics sink of the engine.
    fn metrics(&self) -> &dyn FieldMetrics {
        &NOOP_METRICS
    }

    /// Element capacity reserved when a reference list is first populated.
    fn refs_prealloc(&self) -> usize {
        0
    }
}

/// How a new expiry interacts with one already scheduled for the node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpireStrategy {
    /// Schedule in addition to any earlier expiry.
    AddRegardless,
    /// Replace any earlier expiry of the same node.
    CancelPrevious,
}

/// Deferred node expiry.
pub trait ExpiryScheduler {
    /// Current time in milliseconds.
    fn now_ms(&self) -> u64;

    /// Schedules `key` for deletion at `at_ms`.
    fn expire_node(&mut self, key: NodeKey, at_ms: u64, strategy: ExpireStrategy);

    /// Deadline given to a node whose dependent reference field emptied.
    fn dependent_expire_at(&self) -> u64 {
        self.now_ms()
    }
}

/// Everything the reference engine needs from its database.
pub trait Db: SchemaDirectory + NodeDirectory + ExpiryScheduler {}

impl<T: SchemaDirectory + NodeDirectory + ExpiryScheduler> Db for T {}

/// Schema of `field` inside `schema`.
pub fn field_schema(schema: &NodeSchema, field: FieldIndex) -> Result<&FieldSchema> {
    schema.field(field)
}

/// Schema of the back-edge field of reference field `fs` declared on `src_ty`.
///
/// The inverse must be a reference kind on the destination type whose own
/// constraint points back at `src_ty` and `fs`.
pub fn inverse_field_schema<D>(db: &D, src_ty: TypeId, fs: &FieldSchema) -> Result<FieldSchema>
where
    D: SchemaDirectory + ?Sized,
{
    let efc = fs
        .kind
        .edge_constraint()
        .ok_or(SombraError::TypeMismatch("not a reference field"))?;
    let dst_schema = db
        .node_schema(efc.dst_type)
        .ok_or(SombraError::NotFound("destination type"))?;
    let inverse = field_schema(&dst_schema, efc.inverse_field)?;
    let back = inverse
        .kind
        .edge_constraint()
        .ok_or(SombraError::TypeMismatch("inverse field is not a reference"))?;
    if back.dst_type != src_ty || back.inverse_field != fs.field {
        return Err(SombraError::TypeMismatch("inverse field does not point back"));
    }
    Ok(inverse.clone())
}
