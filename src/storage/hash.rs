//! Content hash of a node's fields.
//!
//! The digest backs change detection and block integrity checks, so it must
//! depend only on the node's schema and values: fields are folded in schema
//! order, an absent field contributes a single [`ABSENT`] byte, and every
//! present field contributes its kind tag followed by its payload. Strings
//! and text entries are represented by their stored CRC. Edges contribute
//! the destination id and the hash of their attached edge node. Virtual
//! fields are hashed by their own subsystems and skipped here.

use xxhash_rust::xxh3::Xxh3;

use crate::types::{NodeKey, Result};

use super::directory::NodeDirectory;
use super::fields::Node;
use super::schema::FieldKind;

/// Byte folded in for a field without a value.
pub const ABSENT: u8 = 0x00;

/// Folds the fields of `node` into `state`.
pub fn fields_hash_update<D>(state: &mut Xxh3, db: &D, node: &Node) -> Result<()>
where
    D: NodeDirectory + ?Sized,
{
    for fs in node.schema().fields() {
        if fs.kind.is_virtual() {
            continue;
        }
        if !node.is_populated(fs.field) {
            state.update(&[ABSENT]);
            continue;
        }
        state.update(&[fs.kind.tag()]);
        match &fs.kind {
            FieldKind::Null | FieldKind::ColVec { .. } | FieldKind::Alias => {}
            FieldKind::MicroBuffer { .. } => state.update(node.get_micro_buffer(fs)?),
            FieldKind::String { .. } => {
                state.update(&node.get_string(fs)?.crc().to_le_bytes());
            }
            FieldKind::Text { .. } => {
                let entries = node.text_entries(fs)?;
                state.update(&(entries.len() as u32).to_le_bytes());
                for entry in entries {
                    state.update(&entry.crc().to_le_bytes());
                }
            }
            FieldKind::Reference(_) => match node.get_reference(fs)? {
                Some(rec) => {
                    state.update(&rec.dst.id.0.to_le_bytes());
                    hash_edge_node(state, db, rec.meta)?;
                }
                None => state.update(&[ABSENT]),
            },
            FieldKind::References(_) => {
                state.update(&(node.reference_count(fs)? as u32).to_le_bytes());
                for rec in node.get_references(fs)? {
                    state.update(&rec.dst.id.0.to_le_bytes());
                    hash_edge_node(state, db, rec.meta)?;
                }
            }
        }
    }
    Ok(())
}

fn hash_edge_node<D>(state: &mut Xxh3, db: &D, meta: Option<NodeKey>) -> Result<()>
where
    D: NodeDirectory + ?Sized,
{
    match meta.and_then(|key| db.find_node(key)) {
        Some(edge) => fields_hash_update(state, db, edge),
        None => {
            state.update(&[ABSENT]);
            Ok(())
        }
    }
}

/// 128-bit content hash of `node` from a fresh state.
pub fn fields_hash<D>(db: &D, node: &Node) -> Result<u128>
where
    D: NodeDirectory + ?Sized,
{
    let mut state = Xxh3::new();
    fields_hash_update(&mut state, db, node)?;
    Ok(state.digest128())
}
