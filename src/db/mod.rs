//! In-memory implementation of the collaborators the field engine expects.
//!
//! [`MemDb`] keeps every node in a hash map, allocates ids per type, records
//! dirty nodes and keeps the expiry schedule as a plain list. It is what the
//! integration tests drive and a reference for embedding the engine into a
//! persistent store.

mod memdb;
mod options;


pub use memdb::{Expiry, MemDb};
pub use options::MemDbOptions;
