//! String fields.
//!
//! Callers hand strings over in a checksummed wire encoding:
//!
//! ```text
//! [lang u8][compression u8][payload ..][crc32 LE u32]
//! ```
//!
//! The CRC covers everything before it. The stored value keeps the two header
//! bytes and the payload together with the verified CRC, so change detection
//! never has to rehash the content. Embedded (`fixed_len > 0`) strings live in
//! the node buffer behind a [`STRING_HEADER_LEN`]-byte header; dynamic strings
//! keep the same header in the buffer and their bytes out of line.

use tracing::warn;

use crate::primitives::bytes::{buf::Cursor, le};
use crate::types::checksum::string_crc32;
use crate::types::{Result, SombraError};

use super::fields::{FieldHeap, Node};
use super::schema::{FieldKind, FieldSchema};

/// Header of a string record inside the node buffer:
/// `[flags u8][pad 3][len u32][crc u32]`.
pub const STRING_HEADER_LEN: usize = 12;
/// Record flag: the string's bytes are embedded after the header.
pub const STRING_FLAG_FIXED: u8 = 0x01;
/// Record flag: the payload is compressed.
pub const STRING_FLAG_COMPRESSED: u8 = 0x02;

/// Wire header length (language and compression bytes).
pub const WIRE_HEADER_LEN: usize = 2;
/// Wire trailer length (CRC32).
pub const WIRE_CRC_LEN: usize = 4;
/// Compression byte value marking a compressed payload.
pub const WIRE_COMPRESSED: u8 = 0x01;

/// Encodes a payload into the checksummed wire format.
pub fn encode_wire(lang: u8, compressed: bool, payload: &[u8]) -> Vec<u8> {
    let mut wire = Vec::with_capacity(WIRE_HEADER_LEN + payload.len() + WIRE_CRC_LEN);
    wire.push(lang);
    wire.push(if compressed { WIRE_COMPRESSED } else { 0 });
    wire.extend_from_slice(payload);
    let crc = string_crc32(&wire);
    wire.extend_from_slice(&crc.to_le_bytes());
    wire
}

/// A verified wire string: stored bytes (header and payload) and their CRC.
#[derive(Clone, Copy, Debug)]
pub(crate) struct WireString<'a> {
    pub stored: &'a [u8],
    pub crc: u32,
}

/// Strips and verifies the trailing CRC.
pub(crate) fn decode_wire(wire: &[u8]) -> Result<WireString<'_>> {
    if wire.len() < WIRE_HEADER_LEN + WIRE_CRC_LEN {
        return Err(SombraError::InvalidArgument("string shorter than its header"));
    }
    let mut cur = Cursor::new(wire);
    let stored = cur.take_until_tail(WIRE_CRC_LEN);
    let crc = le::get_u32(cur.take(WIRE_CRC_LEN), 0);
    let computed = string_crc32(stored);
    if computed != crc {
        warn!(expected = crc, computed, len = wire.len(), "string checksum mismatch");
        return Err(SombraError::InvalidArgument("string checksum mismatch"));
    }
    Ok(WireString { stored, crc })
}

/// Borrowed view of a stored string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StrRef<'a> {
    stored: &'a [u8],
    crc: u32,
}

impl<'a> StrRef<'a> {
    pub(crate) fn new(stored: &'a [u8], crc: u32) -> Self {
        Self { stored, crc }
    }

    /// Language tag (first header byte); `0` for untagged strings.
    pub fn lang(&self) -> u8 {
        self.stored.first().copied().unwrap_or(0)
    }

    /// Whether the payload is marked compressed.
    pub fn is_compressed(&self) -> bool {
        self.stored.get(1).is_some_and(|b| b & WIRE_COMPRESSED != 0)
    }

    /// Payload without the header bytes.
    pub fn payload(&self) -> &'a [u8] {
        self.stored.get(WIRE_HEADER_LEN..).unwrap_or(&[])
    }

    /// Header and payload as stored.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.stored
    }

    /// CRC32 of [`StrRef::as_bytes`].
    pub fn crc(&self) -> u32 {
        self.crc
    }

    /// Length of the stored bytes.
    pub fn len(&self) -> usize {
        self.stored.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.stored.is_empty()
    }
}

/// Owned string kept out of line: dynamic string fields and text entries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldString {
    stored: Vec<u8>,
    crc: u32,
    cap: Option<usize>,
}

impl FieldString {
    /// Empty string; `cap` bounds the stored length when set.
    pub fn new(cap: Option<usize>) -> Self {
        Self {
            stored: Vec::new(),
            crc: 0,
            cap,
        }
    }

    pub(crate) fn from_wire(wire: WireString<'_>, cap: Option<usize>) -> Result<Self> {
        let mut s = Self::new(cap);
        s.replace(wire)?;
        Ok(s)
    }

    /// Replaces the content in place; refuses values past the capacity.
    pub(crate) fn replace(&mut self, wire: WireString<'_>) -> Result<()> {
        if let Some(cap) = self.cap {
            if wire.stored.len() > cap {
                return Err(SombraError::NoBufferSpace {
                    need: wire.stored.len(),
                    cap,
                });
            }
        }
        self.stored.clear();
        self.stored.extend_from_slice(wire.stored);
        self.crc = wire.crc;
        Ok(())
    }

    /// Borrowed view.
    pub fn as_str_ref(&self) -> StrRef<'_> {
        StrRef::new(&self.stored, self.crc)
    }

    fn refresh_crc(&mut self) {
        self.crc = string_crc32(&self.stored);
    }
}

/// In-place mutable access to a string field. The stored CRC is refreshed
/// when the guard is dropped.
pub struct StringMut<'a> {
    target: MutTarget<'a>,
}

enum MutTarget<'a> {
    /// Header plus embedded bytes inside the node buffer.
    Embedded(&'a mut [u8]),
    /// Buffer header and the out-of-line string.
    Heap(&'a mut [u8], &'a mut FieldString),
}

impl<'a> StringMut<'a> {
    /// Stored bytes (header and payload), writable.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.target {
            MutTarget::Embedded(record) => {
                let len = le::get_u32(record, 4) as usize;
                &mut record[STRING_HEADER_LEN..STRING_HEADER_LEN + len]
            }
            MutTarget::Heap(_, s) => s.stored.as_mut_slice(),
        }
    }

    /// Stored length.
    pub fn len(&self) -> usize {
        match &self.target {
            MutTarget::Embedded(record) => le::get_u32(record, 4) as usize,
            MutTarget::Heap(_, s) => s.stored.len(),
        }
    }

    /// Whether the stored value is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for StringMut<'_> {
    fn drop(&mut self) {
        match &mut self.target {
            MutTarget::Embedded(record) => {
                let len = le::get_u32(record, 4) as usize;
                let crc = string_crc32(&record[STRING_HEADER_LEN..STRING_HEADER_LEN + len]);
                le::put_u32(record, 8, crc);
                sync_compressed_flag(record, len);
            }
            MutTarget::Heap(header, s) => {
                s.refresh_crc();
                le::put_u32(header, 4, s.stored.len() as u32);
                le::put_u32(header, 8, s.crc);
                header[STRING_HEADER_LEN..].fill(0);
                let compressed = s.as_str_ref().is_compressed();
                set_flag(header, STRING_FLAG_COMPRESSED, compressed);
            }
        }
    }
}

fn set_flag(header: &mut [u8], flag: u8, on: bool) {
    if on {
        header[0] |= flag;
    } else {
        header[0] &= !flag;
    }
}

fn sync_compressed_flag(record: &mut [u8], len: usize) {
    let compressed = len > 1 && record[STRING_HEADER_LEN + 1] & WIRE_COMPRESSED != 0;
    set_flag(record, STRING_FLAG_COMPRESSED, compressed);
}

fn string_params(fs: &FieldSchema) -> Result<usize> {
    match fs.kind {
        FieldKind::String { fixed_len } => Ok(fixed_len as usize),
        _ => Err(SombraError::TypeMismatch("not a string field")),
    }
}

impl Node {
    /// Writes a string field from its wire encoding.
    ///
    /// Embedded strings refuse values longer than their capacity with
    /// `NoBufferSpace` and leave the field untouched.
    pub fn set_string(&mut self, fs: &FieldSchema, wire: &[u8]) -> Result<()> {
        let fixed_len = string_params(fs)?;
        self.check_field(fs)?;
        let wire = decode_wire(wire)?;
        if fixed_len > 0 && wire.stored.len() > fixed_len {
            return Err(SombraError::NoBufferSpace {
                need: wire.stored.len(),
                cap: fixed_len,
            });
        }
        let off = self.ensure_slot(fs)?;
        let (record, heap) = self.record_and_heap_mut(off, fs.kind.slot_size(), fs.field);
        le::put_u32(record, 4, wire.stored.len() as u32);
        le::put_u32(record, 8, wire.crc);
        if fixed_len > 0 {
            let body = &mut record[STRING_HEADER_LEN..];
            body[..wire.stored.len()].copy_from_slice(wire.stored);
            body[wire.stored.len()..].fill(0);
            sync_compressed_flag(record, wire.stored.len());
            return Ok(());
        }
        let compressed = StrRef::new(wire.stored, wire.crc).is_compressed();
        set_flag(record, STRING_FLAG_COMPRESSED, compressed);
        match heap {
            Some(FieldHeap::Str(s)) => s.replace(wire),
            _ => Err(SombraError::TypeMismatch("string storage missing")),
        }
    }

    /// Reads a string field.
    pub fn get_string(&self, fs: &FieldSchema) -> Result<StrRef<'_>> {
        let fixed_len = string_params(fs)?;
        let pos = self.check_field(fs)?;
        let off = self
            .slot_off(pos)
            .ok_or(SombraError::NotFound("field value"))?;
        if fixed_len > 0 {
            let record = self.record(off, fs.kind.slot_size());
            let len = le::get_u32(record, 4) as usize;
            let crc = le::get_u32(record, 8);
            return Ok(StrRef::new(
                &record[STRING_HEADER_LEN..STRING_HEADER_LEN + len],
                crc,
            ));
        }
        match self.heap(fs.field) {
            Some(FieldHeap::Str(s)) => Ok(s.as_str_ref()),
            _ => Err(SombraError::NotFound("field value")),
        }
    }

    /// In-place access to an already populated string field.
    pub fn get_mutable_string(&mut self, fs: &FieldSchema) -> Result<StringMut<'_>> {
        string_params(fs)?;
        let pos = self.check_field(fs)?;
        let off = self
            .slot_off(pos)
            .ok_or(SombraError::NotFound("field value"))?;
        self.string_mut_at(fs, off)
    }

    /// Populates a string field with `len` zeroed stored bytes (keeping any
    /// existing prefix) and returns in-place access to it.
    pub fn ensure_mutable_string(&mut self, fs: &FieldSchema, len: usize) -> Result<StringMut<'_>> {
        let fixed_len = string_params(fs)?;
        self.check_field(fs)?;
        if fixed_len > 0 && len > fixed_len {
            return Err(SombraError::NoBufferSpace {
                need: len,
                cap: fixed_len,
            });
        }
        let off = self.ensure_slot(fs)?;
        let (record, heap) = self.record_and_heap_mut(off, fs.kind.slot_size(), fs.field);
        if fixed_len > 0 {
            let old = le::get_u32(record, 4) as usize;
            if len < old {
                record[STRING_HEADER_LEN + len..STRING_HEADER_LEN + old].fill(0);
            }
            le::put_u32(record, 4, len as u32);
        } else if let Some(FieldHeap::Str(s)) = heap {
            s.stored.resize(len, 0);
        }
        self.string_mut_at(fs, off)
    }

    fn string_mut_at(&mut self, fs: &FieldSchema, off: u16) -> Result<StringMut<'_>> {
        let size = fs.kind.slot_size();
        let fixed = matches!(fs.kind, FieldKind::String { fixed_len } if fixed_len > 0);
        let (record, heap) = self.record_and_heap_mut(off, size, fs.field);
        let target = if fixed {
            MutTarget::Embedded(record)
        } else {
            match heap {
                Some(FieldHeap::Str(s)) => MutTarget::Heap(record, s),
                _ => return Err(SombraError::NotFound("field value")),
            }
        };
        Ok(StringMut { target })
    }
}
