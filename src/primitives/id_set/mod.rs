#![forbid(unsafe_code)]
//! Sorted, duplicate-free node id set.
//!
//! Backs the membership index of every reference-list field. Lookups bisect;
//! insertions and removals shift the tail. The common append-only workload
//! (ids arriving in ascending order) hits the `x > last` fast path and never
//! shifts.

use crate::types::NodeId;

/// Returns the position of `x` in the ascending slice `ids`.
///
/// Values at or below the first element and at or above the last element are
/// answered without bisecting.
pub fn bsearch(ids: &[NodeId], x: NodeId) -> Option<usize> {
    let (first, last) = match (ids.first(), ids.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return None,
    };
    if x <= first {
        return (x == first).then_some(0);
    }
    if x >= last {
        return (x == last).then_some(ids.len() - 1);
    }
    ids.binary_search(&x).ok()
}

/// Ascending set of node ids.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeIdSet {
    ids: Vec<NodeId>,
}

impl NodeIdSet {
    /// Creates an empty set without allocating.
    pub const fn new() -> Self {
        Self { ids: Vec::new() }
    }

    /// Creates an empty set able to hold `capacity` ids without reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: Vec::with_capacity(capacity),
        }
    }

    /// Number of ids in the set.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The ids in ascending order.
    pub fn as_slice(&self) -> &[NodeId] {
        &self.ids
    }

    /// Position of `x`, if present.
    pub fn position(&self, x: NodeId) -> Option<usize> {
        bsearch(&self.ids, x)
    }

    /// Whether `x` is in the set.
    pub fn contains(&self, x: NodeId) -> bool {
        self.position(x).is_some()
    }

    /// Inserts `x`, returning `false` if it was already present.
    pub fn add(&mut self, x: NodeId) -> bool {
        match self.ids.last() {
            None => {
                self.ids.push(x);
                return true;
            }
            Some(last) if x > *last => {
                self.ids.push(x);
                return true;
            }
            _ => {}
        }
        match self.ids.binary_search(&x) {
            Ok(_) => false,
            Err(at) => {
                self.ids.insert(at, x);
                true
            }
        }
    }

    /// Removes `x`, returning `false` if it was not present. The backing
    /// allocation is released once the set becomes empty.
    pub fn remove(&mut self, x: NodeId) -> bool {
        let Some(at) = self.position(x) else {
            return false;
        };
        self.ids.remove(at);
        if self.ids.is_empty() {
            self.ids = Vec::new();
        }
        true
    }

    /// First position at or after `from` whose id is not less than `x`.
    ///
    /// Used by bulk insertion to walk a pre-sorted input against the set with
    /// a bound that only moves forward.
    pub fn lower_bound_from(&self, from: usize, x: NodeId) -> usize {
        let from = from.min(self.ids.len());
        from + self.ids[from..].partition_point(|id| *id < x)
    }

    /// Inserts `x` at a position obtained from [`NodeIdSet::lower_bound_from`].
    pub(crate) fn insert_at(&mut self, at: usize, x: NodeId) {
        debug_assert!(at == 0 || self.ids[at - 1] < x);
        debug_assert!(self.ids.get(at).map_or(true, |next| x < *next));
        self.ids.insert(at, x);
    }

    /// Id at position `at`.
    pub fn get(&self, at: usize) -> Option<NodeId> {
        self.ids.get(at).copied()
    }

    /// Reserves room for `additional` more ids.
    pub fn reserve(&mut self, additional: usize) {
        self.ids.reserve(additional);
    }

    /// Iterates ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.ids.iter().copied()
    }
}
