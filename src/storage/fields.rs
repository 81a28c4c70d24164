//! Node field storage and allocator.
//!
//! Every node owns one [`Fields`] unit: a descriptor table with one slot per
//! main schema field and a [`FieldBuffer`] holding the slots' fixed-size
//! records. Values that cannot live in a fixed record (dynamic strings, text
//! entries, reference arrays) are kept out of line in `heap`, indexed by the
//! same field index; the in-buffer record then carries the value's header or
//! element count. Nothing is allocated for a field before its first write.

use std::sync::Arc;

use tracing::trace;

use crate::primitives::bytes::le;
use crate::types::{fatal, FieldIndex, NodeKey, RefRecord, Result, SombraError};

use super::buffer::FieldBuffer;
use super::refs_array::RefsArray;
use super::schema::{FieldKind, FieldSchema, NodeSchema};
use super::string::{FieldString, StrRef, STRING_FLAG_FIXED, STRING_HEADER_LEN};

/// Descriptor of one main field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct FieldSlot {
    /// Unit offset, kept after deletion so the storage is reused.
    off: Option<u16>,
    in_use: bool,
}

/// Out-of-line part of a field value.
#[derive(Debug)]
pub(crate) enum FieldHeap {
    Str(FieldString),
    Text(Vec<FieldString>),
    Refs(RefsArray),
}

#[derive(Debug, Default)]
pub(crate) struct Fields {
    slots: Vec<FieldSlot>,
    data: FieldBuffer,
    heap: Vec<Option<FieldHeap>>,
}

/// Read view of a field's bytes inside the node buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawView {
    /// Byte offset inside the node buffer.
    pub off: usize,
    /// Length in bytes; `0` for an unpopulated field.
    pub len: usize,
}

/// Typed value of a populated field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue<'a> {
    /// A populated null field.
    Null,
    /// Raw micro buffer bytes.
    MicroBuffer(&'a [u8]),
    /// String value.
    String(StrRef<'a>),
    /// Text entries in insertion order.
    Text(Vec<StrRef<'a>>),
    /// Single reference; `None` once the edge was removed from the other side.
    Reference(Option<RefRecord>),
    /// Reference list in order.
    References(Vec<RefRecord>),
}

/// A node: identity, schema and field storage.
#[derive(Debug)]
pub struct Node {
    key: NodeKey,
    schema: Arc<NodeSchema>,
    pub(crate) fields: Fields,
}

impl Node {
    /// Creates a node with no populated fields.
    pub fn new(key: NodeKey, schema: Arc<NodeSchema>) -> Self {
        Self::with_capacity(key, schema, 0)
    }

    /// Creates a node reserving `data_capacity` bytes of field buffer.
    pub fn with_capacity(key: NodeKey, schema: Arc<NodeSchema>, data_capacity: usize) -> Self {
        let nr_main = schema.nr_main_fields();
        Self {
            key,
            schema,
            fields: Fields {
                slots: vec![FieldSlot::default(); nr_main],
                data: FieldBuffer::with_capacity(data_capacity),
                heap: Vec::new(),
            },
        }
    }

    /// Node identity.
    pub fn key(&self) -> NodeKey {
        self.key
    }

    /// Schema of the node's type.
    pub fn schema(&self) -> &Arc<NodeSchema> {
        &self.schema
    }

    /// Bytes used by the node's field buffer.
    pub fn data_len(&self) -> usize {
        self.fields.data.len()
    }

    /// Whether `field` currently holds a value.
    pub fn is_populated(&self, field: FieldIndex) -> bool {
        self.fields
            .slots
            .get(field.as_usize())
            .is_some_and(|slot| slot.in_use)
    }

    /// Indices of every populated field, in descriptor order.
    pub fn populated_fields(&self) -> impl Iterator<Item = FieldIndex> + '_ {
        self.fields
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.in_use)
            .map(|(pos, _)| FieldIndex(pos as u8))
    }

    /// Checks that `fs` describes a main field of this node's type.
    pub(crate) fn check_field(&self, fs: &FieldSchema) -> Result<usize> {
        if fs.kind.is_virtual() {
            return Err(SombraError::Unsupported(
                "virtual fields are not stored in the node",
            ));
        }
        let pos = fs.field.as_usize();
        if pos >= self.fields.slots.len() {
            return Err(SombraError::NotFound("field"));
        }
        if self.schema.fields()[pos].kind != fs.kind {
            return Err(SombraError::TypeMismatch(
                "field schema does not match the node type",
            ));
        }
        Ok(pos)
    }

    /// Guarantees a populated, zero-initialized slot for `fs` and returns its
    /// byte offset. Calling it again without a delete returns the same offset.
    ///
    /// Exhausting the node's offset space is fatal.
    pub fn ensure_field(&mut self, fs: &FieldSchema) -> Result<usize> {
        self.ensure_slot(fs).map(FieldBuffer::byte_offset)
    }

    /// Like [`Node::ensure_field`], returning the offset in alignment units.
    pub(crate) fn ensure_slot(&mut self, fs: &FieldSchema) -> Result<u16> {
        let pos = self.check_field(fs)?;
        let slot = self.fields.slots[pos];
        if let (true, Some(off)) = (slot.in_use, slot.off) {
            return Ok(off);
        }
        let size = fs.kind.slot_size();
        let off = match slot.off {
            Some(off) => off,
            None => match self.fields.data.alloc(size) {
                Some(off) => off,
                None => fatal::too_large(self.key, fs.field, self.fields.data.len() + size),
            },
        };
        self.fields.slots[pos] = FieldSlot {
            off: Some(off),
            in_use: true,
        };
        self.init_slot(fs, off);
        trace!(node = %self.key, field = fs.field.0, off, size, "field ensured");
        Ok(off)
    }

    fn init_slot(&mut self, fs: &FieldSchema, off: u16) {
        match &fs.kind {
            FieldKind::String { fixed_len } if *fixed_len > 0 => {
                self.fields.data.slice_mut(off, STRING_HEADER_LEN)[0] = STRING_FLAG_FIXED;
            }
            FieldKind::String { .. } => {
                self.set_heap(fs.field, FieldHeap::Str(FieldString::new(None)));
            }
            FieldKind::Text { .. } => {
                self.set_heap(fs.field, FieldHeap::Text(Vec::new()));
            }
            FieldKind::References(efc) => {
                self.set_heap(fs.field, FieldHeap::Refs(RefsArray::new(efc.has_meta())));
            }
            _ => {}
        }
    }

    /// Read view of the field's value bytes; unpopulated fields yield an
    /// empty view.
    ///
    /// Micro buffers and embedded strings expose the value itself; the other
    /// kinds expose their fixed in-buffer record.
    pub fn get_raw(&self, fs: &FieldSchema) -> Result<RawView> {
        let pos = self.check_field(fs)?;
        let Some(off) = self.slot_off(pos) else {
            return Ok(RawView::default());
        };
        let start = FieldBuffer::byte_offset(off);
        let view = match &fs.kind {
            FieldKind::String { fixed_len } if *fixed_len > 0 => {
                let header = self.fields.data.slice(off, STRING_HEADER_LEN);
                RawView {
                    off: start + STRING_HEADER_LEN,
                    len: le::get_u32(header, 4) as usize,
                }
            }
            kind => RawView {
                off: start,
                len: kind.slot_size(),
            },
        };
        Ok(view)
    }

    /// Bytes covered by a view returned from [`Node::get_raw`].
    pub fn raw_bytes(&self, view: RawView) -> &[u8] {
        if view.len == 0 {
            return &[];
        }
        self.fields.data.bytes(view.off, view.len)
    }

    /// Writes a micro buffer; the value must have the schema's exact length.
    pub fn set_micro_buffer(&mut self, fs: &FieldSchema, value: &[u8]) -> Result<()> {
        let FieldKind::MicroBuffer { len } = fs.kind else {
            return Err(SombraError::TypeMismatch("not a micro buffer field"));
        };
        if value.len() != len as usize {
            return Err(SombraError::InvalidArgument("micro buffer length mismatch"));
        }
        let off = self.ensure_slot(fs)?;
        self.fields.data.slice_mut(off, value.len()).copy_from_slice(value);
        Ok(())
    }

    /// Reads a micro buffer.
    pub fn get_micro_buffer(&self, fs: &FieldSchema) -> Result<&[u8]> {
        let FieldKind::MicroBuffer { len } = fs.kind else {
            return Err(SombraError::TypeMismatch("not a micro buffer field"));
        };
        let pos = self.check_field(fs)?;
        let off = self
            .slot_off(pos)
            .ok_or(SombraError::NotFound("field value"))?;
        Ok(self.fields.data.slice(off, len as usize))
    }

    /// Typed view of a populated field.
    pub fn get_field(&self, fs: &FieldSchema) -> Result<FieldValue<'_>> {
        let pos = self.check_field(fs)?;
        if self.slot_off(pos).is_none() {
            return Err(SombraError::NotFound("field value"));
        }
        let value = match &fs.kind {
            FieldKind::Null => FieldValue::Null,
            FieldKind::MicroBuffer { .. } => FieldValue::MicroBuffer(self.get_micro_buffer(fs)?),
            FieldKind::String { .. } => FieldValue::String(self.get_string(fs)?),
            FieldKind::Text { .. } => FieldValue::Text(self.text_entries(fs)?),
            FieldKind::Reference(_) => FieldValue::Reference(self.get_reference(fs)?),
            FieldKind::References(_) => {
                FieldValue::References(self.get_references(fs)?.collect())
            }
            FieldKind::ColVec { .. } | FieldKind::Alias => {
                return Err(SombraError::Unsupported("virtual field"))
            }
        };
        Ok(value)
    }

    /// Releases a non-reference field's storage and marks it unpopulated.
    /// The slot keeps its offset and is reused by the next `ensure_field`.
    pub(crate) fn clear_local(&mut self, fs: &FieldSchema) -> Result<()> {
        let pos = self.check_field(fs)?;
        let Some(off) = self.slot_off(pos) else {
            return Ok(());
        };
        self.fields.data.zero(off, fs.kind.slot_size());
        if let Some(entry) = self.fields.heap.get_mut(pos) {
            *entry = None;
        }
        self.fields.slots[pos].in_use = false;
        Ok(())
    }

    /// Drops every value and the buffer itself.
    pub(crate) fn reset_fields(&mut self) {
        let nr_main = self.fields.slots.len();
        self.fields = Fields {
            slots: vec![FieldSlot::default(); nr_main],
            data: FieldBuffer::default(),
            heap: Vec::new(),
        };
    }

    /// Unit offset of a populated slot.
    pub(crate) fn slot_off(&self, pos: usize) -> Option<u16> {
        let slot = self.fields.slots.get(pos)?;
        if slot.in_use {
            slot.off
        } else {
            None
        }
    }

    pub(crate) fn record(&self, off: u16, len: usize) -> &[u8] {
        self.fields.data.slice(off, len)
    }

    pub(crate) fn record_mut(&mut self, off: u16, len: usize) -> &mut [u8] {
        self.fields.data.slice_mut(off, len)
    }

    pub(crate) fn heap(&self, field: FieldIndex) -> Option<&FieldHeap> {
        self.fields.heap.get(field.as_usize())?.as_ref()
    }

    /// Splits the borrow between the in-buffer record and the heap entry.
    pub(crate) fn record_and_heap_mut(
        &mut self,
        off: u16,
        len: usize,
        field: FieldIndex,
    ) -> (&mut [u8], Option<&mut FieldHeap>) {
        let Fields { data, heap, .. } = &mut self.fields;
        let heap = heap.get_mut(field.as_usize()).and_then(Option::as_mut);
        (data.slice_mut(off, len), heap)
    }

    fn set_heap(&mut self, field: FieldIndex, value: FieldHeap) {
        let pos = field.as_usize();
        if self.fields.heap.len() <= pos {
            self.fields.heap.resize_with(pos + 1, || None);
        }
        self.fields.heap[pos] = Some(value);
    }
}
