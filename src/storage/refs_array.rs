//! Element storage of reference list fields.
//!
//! A list keeps its elements in insertion/reorder order plus a [`NodeIdSet`]
//! mirroring the destination ids for membership tests. Two layouts exist and
//! one is picked per edge constraint: compact (destination id only) and
//! extended (destination id plus attached edge node).
//!
//! Removing the head only advances a front offset; the dead prefix is
//! reclaimed when the offset saturates its counter or grows past
//! [`OFFSET_COMPACT_FACTOR`] times the live length.

use tracing::trace;

use crate::primitives::id_set::NodeIdSet;
use crate::primitives::search::fast_linear_search_by;
use crate::types::NodeId;

use super::edge_meta::EdgeMeta;

/// Lists shorter than this are searched linearly without consulting the id set.
pub const LINEAR_SEARCH_THRESHOLD: usize = 100;
/// Slack, as a multiple of the live length, tolerated before compacting.
pub const OFFSET_COMPACT_FACTOR: usize = 131_072;

/// Element of the extended layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct LargeRef {
    pub dst: NodeId,
    pub meta: Option<EdgeMeta>,
}

pub(crate) trait RefElem: Copy {
    fn dst(&self) -> NodeId;
    fn meta(&self) -> Option<EdgeMeta>;
}

impl RefElem for NodeId {
    fn dst(&self) -> NodeId {
        *self
    }

    fn meta(&self) -> Option<EdgeMeta> {
        None
    }
}

impl RefElem for LargeRef {
    fn dst(&self) -> NodeId {
        self.dst
    }

    fn meta(&self) -> Option<EdgeMeta> {
        self.meta
    }
}

/// Owned element buffer with a front offset.
#[derive(Clone, Debug)]
pub(crate) struct RefsBuf<T> {
    buf: Vec<T>,
    offset: u16,
}

impl<T> Default for RefsBuf<T> {
    fn default() -> Self {
        Self {
            buf: Vec::new(),
            offset: 0,
        }
    }
}

impl<T: RefElem> RefsBuf<T> {
    fn live(&self) -> &[T] {
        &self.buf[self.offset as usize..]
    }

    fn live_mut(&mut self) -> &mut [T] {
        &mut self.buf[self.offset as usize..]
    }

    fn len(&self) -> usize {
        self.buf.len() - self.offset as usize
    }

    fn ensure_capacity(&mut self, additional: usize) {
        if self.offset > 0 && self.buf.capacity() - self.buf.len() < additional {
            self.compact();
        }
        self.buf.reserve(additional);
    }

    /// Drops the head element by advancing the front offset.
    fn shift_front(&mut self) -> T {
        let head = self.buf[self.offset as usize];
        self.offset += 1;
        let live = self.len();
        if self.offset == u16::MAX || self.offset as usize > OFFSET_COMPACT_FACTOR * live {
            self.compact();
        }
        head
    }

    /// Physically moves the live elements to the start.
    fn compact(&mut self) {
        if self.offset == 0 {
            return;
        }
        trace!(dead = self.offset, live = self.len(), "refs array compacted");
        self.buf.drain(..self.offset as usize);
        self.offset = 0;
        if self.buf.is_empty() {
            self.buf = Vec::new();
        }
    }

    fn insert(&mut self, at: usize, elem: T) {
        if at == 0 && self.offset > 0 {
            self.offset -= 1;
            self.buf[self.offset as usize] = elem;
        } else {
            self.buf.insert(self.offset as usize + at, elem);
        }
    }

    fn remove(&mut self, at: usize) -> T {
        if at == 0 {
            self.shift_front()
        } else {
            self.buf.remove(self.offset as usize + at)
        }
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.live_mut().swap(i, j);
    }

    fn move_elem(&mut self, from: usize, to: usize) {
        let live = self.live_mut();
        if from < to {
            live[from..=to].rotate_left(1);
        } else {
            live[to..=from].rotate_right(1);
        }
    }
}

#[derive(Clone, Debug)]
enum RefsStore {
    Compact(RefsBuf<NodeId>),
    Extended(RefsBuf<LargeRef>),
}

macro_rules! with_store {
    ($store:expr, $buf:ident => $body:expr) => {
        match $store {
            RefsStore::Compact($buf) => $body,
            RefsStore::Extended($buf) => $body,
        }
    };
}

/// Outcome of looking a destination up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Lookup {
    Found(usize),
    Missing,
    /// The id set and the element array disagree.
    Desync,
}

/// A reference list: elements in order plus the sorted id index.
#[derive(Clone, Debug)]
pub(crate) struct RefsArray {
    store: RefsStore,
    index: NodeIdSet,
}

impl RefsArray {
    pub fn new(extended: bool) -> Self {
        let store = if extended {
            RefsStore::Extended(RefsBuf::default())
        } else {
            RefsStore::Compact(RefsBuf::default())
        };
        Self {
            store,
            index: NodeIdSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        with_store!(&self.store, b => b.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn index(&self) -> &NodeIdSet {
        &self.index
    }

    /// Whether the id set and the element array have the same size.
    #[cfg(test)]
    pub fn in_sync(&self) -> bool {
        self.index.len() == self.len()
    }

    pub fn get(&self, at: usize) -> Option<(NodeId, Option<EdgeMeta>)> {
        with_store!(&self.store, b => b.live().get(at).map(|e| (e.dst(), e.meta())))
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, Option<EdgeMeta>)> + '_ {
        (0..self.len()).filter_map(move |at| self.get(at))
    }

    /// Finds the position of `dst`.
    pub fn find(&self, dst: NodeId) -> Lookup {
        let len = self.len();
        let indexed = if len < LINEAR_SEARCH_THRESHOLD {
            None
        } else {
            let hit = self.index.contains(dst);
            if !hit {
                return Lookup::Missing;
            }
            Some(hit)
        };
        let pos = with_store!(&self.store, b => fast_linear_search_by(b.live(), |e| e.dst() == dst));
        match pos {
            Some(at) => Lookup::Found(at),
            None if indexed.unwrap_or_else(|| self.index.contains(dst)) => Lookup::Desync,
            None => Lookup::Missing,
        }
    }

    pub fn reserve(&mut self, additional: usize) {
        with_store!(&mut self.store, b => b.ensure_capacity(additional));
        self.index.reserve(additional);
    }

    /// Adds `dst` to the id set only; `false` when already present.
    pub fn index_add(&mut self, dst: NodeId) -> bool {
        self.index.add(dst)
    }

    pub fn index_mut(&mut self) -> &mut NodeIdSet {
        &mut self.index
    }

    /// Inserts an element whose id was already added to the id set.
    pub fn insert(&mut self, at: usize, dst: NodeId, meta: Option<EdgeMeta>) {
        match &mut self.store {
            RefsStore::Compact(b) => b.insert(at, dst),
            RefsStore::Extended(b) => b.insert(at, LargeRef { dst, meta }),
        }
    }

    /// Removes the element at `at` from the array and the id set. Returns
    /// `None` when the id set did not know the element.
    pub fn remove(&mut self, at: usize) -> Option<(NodeId, Option<EdgeMeta>)> {
        let (dst, meta) = with_store!(&mut self.store, b => {
            let e = b.remove(at);
            (e.dst(), e.meta())
        });
        self.index.remove(dst).then_some((dst, meta))
    }

    pub fn set_meta(&mut self, at: usize, meta: Option<EdgeMeta>) {
        if let RefsStore::Extended(b) = &mut self.store {
            if let Some(e) = b.live_mut().get_mut(at) {
                e.meta = meta;
            }
        }
    }

    pub fn swap(&mut self, i: usize, j: usize) {
        with_store!(&mut self.store, b => b.swap(i, j));
    }

    pub fn move_elem(&mut self, from: usize, to: usize) {
        if from != to {
            with_store!(&mut self.store, b => b.move_elem(from, to));
        }
    }

    #[cfg(test)]
    fn head_offset(&self) -> u16 {
        with_store!(&self.store, b => b.offset)
    }
}
