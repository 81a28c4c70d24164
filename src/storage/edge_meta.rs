//! Ownership of attached edge nodes.
//!
//! An edge that carries its own fields points at an edge node. When both
//! directions of the edge keep a handle, each side holds `Shared`; once one
//! side lets go the other is deflated to `Unshared`, and releasing an
//! `Unshared` handle destroys the edge node. There is no reference count:
//! two sides are the most that can ever hold the same edge node.

use crate::types::NodeId;

/// Handle from one side of an edge to its attached edge node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EdgeMeta {
    /// This side is the only owner.
    Unshared(NodeId),
    /// The opposite side holds the same edge node.
    Shared(NodeId),
}

/// What releasing a handle requires of the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Release {
    /// The opposite side still holds the edge node and becomes its sole owner.
    Deflate(NodeId),
    /// No side holds the edge node any more; it must be deleted.
    Destroy(NodeId),
}

const TAG_NONE: u8 = 0;
const TAG_UNSHARED: u8 = 1;
const TAG_SHARED: u8 = 2;

impl EdgeMeta {
    /// Id of the edge node.
    pub fn id(self) -> NodeId {
        match self {
            EdgeMeta::Unshared(id) | EdgeMeta::Shared(id) => id,
        }
    }

    /// Whether the opposite side holds the same edge node.
    pub fn is_shared(self) -> bool {
        matches!(self, EdgeMeta::Shared(_))
    }

    /// Marks the handle as held by both sides.
    pub fn share(self) -> Self {
        EdgeMeta::Shared(self.id())
    }

    /// Marks the handle as the sole owner.
    pub fn unshare(self) -> Self {
        EdgeMeta::Unshared(self.id())
    }

    /// Gives the handle up.
    pub fn release(self) -> Release {
        match self {
            EdgeMeta::Shared(id) => Release::Deflate(id),
            EdgeMeta::Unshared(id) => Release::Destroy(id),
        }
    }

    pub(crate) fn encode(meta: Option<EdgeMeta>) -> (u32, u8) {
        match meta {
            None => (0, TAG_NONE),
            Some(EdgeMeta::Unshared(id)) => (id.0, TAG_UNSHARED),
            Some(EdgeMeta::Shared(id)) => (id.0, TAG_SHARED),
        }
    }

    pub(crate) fn decode(id: u32, tag: u8) -> Option<EdgeMeta> {
        match tag {
            TAG_UNSHARED => Some(EdgeMeta::Unshared(NodeId(id))),
            TAG_SHARED => Some(EdgeMeta::Shared(NodeId(id))),
            _ => None,
        }
    }
}

/// Releases both handles of an edge that is being torn down, source side
/// first, and returns the edge node to delete, if any.
pub(crate) fn release_pair(src: Option<EdgeMeta>, dst: Option<EdgeMeta>) -> Option<NodeId> {
    let mut dst = dst;
    let mut destroy = None;
    match src.map(EdgeMeta::release) {
        Some(Release::Destroy(id)) => destroy = Some(id),
        Some(Release::Deflate(id)) if dst.is_none() => destroy = Some(id),
        Some(Release::Deflate(_)) => dst = dst.map(EdgeMeta::unshare),
        None => {}
    }
    if let Some(Release::Destroy(id)) = dst.map(EdgeMeta::release) {
        destroy = Some(id);
    }
    destroy
}
