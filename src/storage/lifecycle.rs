//! Field deletion and node teardown.

use smallvec::SmallVec;
use tracing::debug;

use crate::types::{NodeKey, Result, SombraError};

use super::directory::Db;
use super::fields::Node;
use super::refs::{clear_edges, deflate_partners, reference_fields};
use super::schema::FieldSchema;

fn require_node<D: Db + ?Sized>(db: &D, key: NodeKey) -> Result<&Node> {
    db.find_node(key).ok_or(SombraError::NotFound("node"))
}

/// Deletes the value of field `fs` of node `key`.
///
/// Reference fields tear down every edge on both endpoints first and fire
/// their dependent trigger like [`super::refs::clear_references`]. The slot
/// keeps its offset for the next write.
pub fn delete_field<D: Db + ?Sized>(db: &mut D, key: NodeKey, fs: &FieldSchema) -> Result<()> {
    let node = require_node(db, key)?;
    node.check_field(fs)?;
    if !node.is_populated(fs.field) {
        return Ok(());
    }
    if fs.kind.edge_constraint().is_some() {
        clear_edges(db, key, fs, true, "teardown")?;
    } else {
        db.find_node_mut(key)
            .ok_or(SombraError::NotFound("node"))?
            .clear_local(fs)?;
    }
    db.mark_dirty(key);
    debug!(node = %key, field = fs.field.0, "field deleted");
    Ok(())
}

/// Tears down every populated field of a node that is being deleted.
///
/// Reference fields go through the symmetric edge removal path in
/// descriptor order; the node's own dependent triggers never fire. The node
/// is left with no populated field and an empty buffer.
pub fn destroy_all_fields<D: Db + ?Sized>(db: &mut D, key: NodeKey) -> Result<()> {
    let node = require_node(db, key)?;
    let schema = node.schema().clone();
    let refs = reference_fields(node);
    for field in refs {
        let fs = schema.field(field)?;
        clear_edges(db, key, fs, false, "teardown")?;
    }
    db.find_node_mut(key)
        .ok_or(SombraError::NotFound("node"))?
        .reset_fields();
    debug!(node = %key, "all fields destroyed");
    Ok(())
}

/// Drops a node's in-memory field storage without deleting its edges.
///
/// The opposite endpoints keep their back-edges and become sole owners of
/// every shared edge node.
pub fn unload_all_fields<D: Db + ?Sized>(db: &mut D, key: NodeKey) -> Result<()> {
    let node = require_node(db, key)?;
    let schema = node.schema().clone();
    let refs: SmallVec<[_; 8]> = reference_fields(node);
    let mut deflated = 0usize;
    for field in refs {
        deflated += deflate_partners(db, key, schema.field(field)?)?;
    }
    db.find_node_mut(key)
        .ok_or(SombraError::NotFound("node"))?
        .reset_fields();
    debug!(node = %key, deflated, "fields unloaded");
    Ok(())
}
