//! Per-node field buffer.
//!
//! Slots are addressed by offsets counted in `DATA_ALIGN`-byte units so the
//! descriptor table can store them in 15 bits. The buffer only ever grows; an
//! existing offset stays valid across growth even though the backing
//! allocation (and so any raw address) may move.

use tracing::trace;

/// Alignment unit of every slot.
pub const DATA_ALIGN: usize = 8;
/// Width of a slot offset in the descriptor table.
pub const OFFSET_BITS: u32 = 15;
/// Largest buffer a node can address.
pub const MAX_DATA_LEN: usize = (1usize << OFFSET_BITS) * DATA_ALIGN;

/// Rounds `size` up to the next alignment unit.
#[inline]
pub const fn aligned(size: usize) -> usize {
    (size + DATA_ALIGN - 1) & !(DATA_ALIGN - 1)
}

/// Growable, unit-addressed byte buffer owned by a single node.
#[derive(Clone, Debug, Default)]
pub struct FieldBuffer {
    bytes: Vec<u8>,
}

impl FieldBuffer {
    /// Creates an empty buffer reserving `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(aligned(capacity.min(MAX_DATA_LEN))),
        }
    }

    /// Bytes currently in use.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether no slot has been allocated yet.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Reserves room for `additional` more bytes without changing any offset.
    pub fn ensure_capacity(&mut self, additional: usize) {
        self.bytes.reserve(aligned(additional));
    }

    /// Appends a zeroed slot of `size` bytes and returns its offset in units,
    /// or `None` when the offset or the total size would not be addressable.
    pub fn alloc(&mut self, size: usize) -> Option<u16> {
        let start = self.bytes.len();
        let unit = start / DATA_ALIGN;
        if unit >= (1usize << OFFSET_BITS) {
            return None;
        }
        let end = start.checked_add(aligned(size))?;
        if end > MAX_DATA_LEN {
            return None;
        }
        self.bytes.resize(end, 0);
        trace!(offset = start, size, total = end, "field buffer grown");
        Some(unit as u16)
    }

    /// Byte offset of a unit offset.
    #[inline]
    pub fn byte_offset(off: u16) -> usize {
        off as usize * DATA_ALIGN
    }

    /// `len` bytes starting at unit offset `off`.
    pub fn slice(&self, off: u16, len: usize) -> &[u8] {
        let start = Self::byte_offset(off);
        &self.bytes[start..start + len]
    }

    /// Mutable `len` bytes starting at unit offset `off`.
    pub fn slice_mut(&mut self, off: u16, len: usize) -> &mut [u8] {
        let start = Self::byte_offset(off);
        &mut self.bytes[start..start + len]
    }

    /// Zeroes `len` bytes starting at unit offset `off`.
    pub fn zero(&mut self, off: u16, len: usize) {
        self.slice_mut(off, len).fill(0);
    }

    /// Bytes in the given byte range.
    pub fn bytes(&self, start: usize, len: usize) -> &[u8] {
        &self.bytes[start..start + len]
    }
}
