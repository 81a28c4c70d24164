//! Leaf algorithms and byte helpers with no knowledge of schemas or nodes.

pub mod bytes;
pub mod id_set;
pub mod search;
