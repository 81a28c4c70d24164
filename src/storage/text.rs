//! Text fields: one checksummed string per language.
//!
//! The language of an entry is the first stored byte of its string. The
//! in-buffer stub only tracks the entry count; entries live out of line in
//! insertion order.

use crate::primitives::bytes::le;
use crate::types::{Result, SombraError};

use super::fields::{FieldHeap, Node};
use super::schema::{FieldKind, FieldSchema, STUB_RECORD_LEN};
use super::string::{decode_wire, FieldString, StrRef};

fn text_cap(fs: &FieldSchema) -> Result<Option<usize>> {
    match fs.kind {
        FieldKind::Text { fixed_len } => Ok((fixed_len > 0).then_some(fixed_len as usize)),
        _ => Err(SombraError::TypeMismatch("not a text field")),
    }
}

impl Node {
    /// Stores a translation. An entry with the same language is replaced in
    /// place; otherwise the entry is appended.
    pub fn set_text(&mut self, fs: &FieldSchema, wire: &[u8]) -> Result<()> {
        let cap = text_cap(fs)?;
        self.check_field(fs)?;
        let wire = decode_wire(wire)?;
        if let Some(cap) = cap {
            if wire.stored.len() > cap {
                return Err(SombraError::NoBufferSpace {
                    need: wire.stored.len(),
                    cap,
                });
            }
        }
        let lang = StrRef::new(wire.stored, wire.crc).lang();
        let off = self.ensure_slot(fs)?;
        let (stub, heap) = self.record_and_heap_mut(off, STUB_RECORD_LEN, fs.field);
        let Some(FieldHeap::Text(entries)) = heap else {
            return Err(SombraError::TypeMismatch("text storage missing"));
        };
        match entries.iter_mut().find(|e| e.as_str_ref().lang() == lang) {
            Some(entry) => entry.replace(wire)?,
            None => entries.push(FieldString::from_wire(wire, cap)?),
        }
        le::put_u32(stub, 0, entries.len() as u32);
        Ok(())
    }

    /// Translation for `lang`.
    pub fn get_text(&self, fs: &FieldSchema, lang: u8) -> Result<StrRef<'_>> {
        self.text_entries(fs)?
            .into_iter()
            .find(|s| s.lang() == lang)
            .ok_or(SombraError::NotFound("translation"))
    }

    /// Every translation in insertion order; empty when unpopulated.
    pub fn text_entries(&self, fs: &FieldSchema) -> Result<Vec<StrRef<'_>>> {
        text_cap(fs)?;
        let pos = self.check_field(fs)?;
        if self.slot_off(pos).is_none() {
            return Ok(Vec::new());
        }
        match self.heap(fs.field) {
            Some(FieldHeap::Text(entries)) => {
                Ok(entries.iter().map(FieldString::as_str_ref).collect())
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Drops the translation for `lang`, leaving the field populated.
    pub fn remove_text(&mut self, fs: &FieldSchema, lang: u8) -> Result<()> {
        text_cap(fs)?;
        let pos = self.check_field(fs)?;
        let off = self
            .slot_off(pos)
            .ok_or(SombraError::NotFound("translation"))?;
        let (stub, heap) = self.record_and_heap_mut(off, STUB_RECORD_LEN, fs.field);
        let Some(FieldHeap::Text(entries)) = heap else {
            return Err(SombraError::NotFound("translation"));
        };
        let at = entries
            .iter()
            .position(|e| e.as_str_ref().lang() == lang)
            .ok_or(SombraError::NotFound("translation"))?;
        entries.remove(at);
        le::put_u32(stub, 0, entries.len() as u32);
        Ok(())
    }
}
