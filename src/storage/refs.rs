//! Reference engine.
//!
//! Every edge is stored on both endpoints: the source's reference field and
//! the destination's inverse field. Operations that create or tear down edges
//! run against a [`Db`] and touch one node at a time, validating both sides
//! before either is mutated.

use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::primitives::bytes::le;
use crate::types::{fatal, FieldIndex, NodeId, NodeKey, RefRecord, Result, SombraError, TypeId};

use super::directory::{inverse_field_schema, Db, ExpireStrategy};
use super::edge_meta::{release_pair, EdgeMeta};
use super::fields::{FieldHeap, Node};
use super::refs_array::{Lookup, RefsArray};
use super::schema::{EdgeConstraint, FieldKind, FieldSchema, REFERENCE_RECORD_LEN, STUB_RECORD_LEN};

/// Bit set accepted by [`references_insert`].
pub type InsertFlags = u8;
/// Move an already linked destination to the requested index instead of
/// failing with `AlreadyExists`.
pub const REORDER: InsertFlags = 0x01;

/// Selects the element to remove.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefSelector {
    /// The edge to this destination id.
    Id(NodeId),
    /// The edge at this position; negative values count from the end.
    Index(isize),
}

/// Which dependent-expiry triggers a removal may fire.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Trigger {
    pub own: bool,
    pub partner: bool,
}

impl Trigger {
    pub const ALL: Trigger = Trigger {
        own: true,
        partner: true,
    };
    pub const PARTNER: Trigger = Trigger {
        own: false,
        partner: true,
    };
}

/// Iterator over a reference list.
pub struct RefsIter<'a> {
    arr: Option<&'a RefsArray>,
    pos: usize,
    dst_type: TypeId,
    edge_type: Option<TypeId>,
}

impl Iterator for RefsIter<'_> {
    type Item = RefRecord;

    fn next(&mut self) -> Option<RefRecord> {
        let (dst, meta) = self.arr?.get(self.pos)?;
        let index = self.pos;
        self.pos += 1;
        Some(RefRecord {
            dst: NodeKey::new(self.dst_type, dst),
            meta: meta_key(meta, self.edge_type),
            index,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.arr.map_or(0, |a| a.len() - self.pos);
        (left, Some(left))
    }
}

fn meta_key(meta: Option<EdgeMeta>, edge_type: Option<TypeId>) -> Option<NodeKey> {
    meta.zip(edge_type)
        .map(|(m, ty)| NodeKey::new(ty, m.id()))
}

fn list_constraint(fs: &FieldSchema) -> Result<&EdgeConstraint> {
    match &fs.kind {
        FieldKind::References(efc) => Ok(efc),
        _ => Err(SombraError::TypeMismatch("not a reference list field")),
    }
}

fn single_constraint(fs: &FieldSchema) -> Result<&EdgeConstraint> {
    match &fs.kind {
        FieldKind::Reference(efc) => Ok(efc),
        _ => Err(SombraError::TypeMismatch("not a single reference field")),
    }
}

/// Position of a new element for an insertion hint: `-1` and anything past
/// the end append, other negative values count from the end.
fn insert_pos(index: isize, len: usize) -> usize {
    if index < 0 {
        len.saturating_sub(index.unsigned_abs() - 1)
    } else {
        (index as usize).min(len)
    }
}

/// Resolves an element index; negative values wrap modulo the length.
fn wrap_index(index: isize, len: usize) -> Result<usize> {
    if len == 0 {
        return Err(SombraError::InvalidArgument("index out of range"));
    }
    let at = if index < 0 {
        index.rem_euclid(len as isize) as usize
    } else {
        index as usize
    };
    if at >= len {
        return Err(SombraError::InvalidArgument("index out of range"));
    }
    Ok(at)
}

impl Node {
    pub(crate) fn refs(&self, fs: &FieldSchema) -> Option<&RefsArray> {
        self.slot_off(fs.field.as_usize())?;
        match self.heap(fs.field) {
            Some(FieldHeap::Refs(arr)) => Some(arr),
            _ => None,
        }
    }

    /// Runs `f` on the populated list and refreshes the in-buffer count.
    pub(crate) fn update_refs<R>(
        &mut self,
        fs: &FieldSchema,
        f: impl FnOnce(&mut RefsArray) -> R,
    ) -> Result<R> {
        let off = self.ensure_slot(fs)?;
        let (stub, heap) = self.record_and_heap_mut(off, STUB_RECORD_LEN, fs.field);
        let Some(FieldHeap::Refs(arr)) = heap else {
            return Err(SombraError::TypeMismatch("reference list storage missing"));
        };
        let out = f(arr);
        le::put_u32(stub, 0, arr.len() as u32);
        Ok(out)
    }

    pub(crate) fn single_ref(&self, fs: &FieldSchema) -> Option<(NodeId, Option<EdgeMeta>)> {
        let off = self.slot_off(fs.field.as_usize())?;
        let rec = self.record(off, REFERENCE_RECORD_LEN);
        let dst = le::get_u32(rec, 0);
        if dst == 0 {
            return None;
        }
        Some((NodeId(dst), EdgeMeta::decode(le::get_u32(rec, 4), rec[8])))
    }

    fn write_single(&mut self, fs: &FieldSchema, dst: NodeId, meta: Option<EdgeMeta>) -> Result<()> {
        let off = self.ensure_slot(fs)?;
        let rec = self.record_mut(off, REFERENCE_RECORD_LEN);
        let (meta_id, tag) = EdgeMeta::encode(meta);
        le::put_u32(rec, 0, dst.0);
        le::put_u32(rec, 4, meta_id);
        rec[8] = tag;
        Ok(())
    }

    /// Rewrites the edge-node handle kept for the edge to `dst`.
    fn set_edge_meta(&mut self, fs: &FieldSchema, dst: NodeId, meta: Option<EdgeMeta>) -> Result<()> {
        match &fs.kind {
            FieldKind::Reference(_) => match self.single_ref(fs) {
                Some((cur, _)) if cur == dst => self.write_single(fs, dst, meta),
                _ => Err(SombraError::NotFound("reference")),
            },
            FieldKind::References(_) => {
                let at = match self.refs(fs).map(|arr| arr.find(dst)) {
                    Some(Lookup::Found(at)) => at,
                    Some(Lookup::Desync) => fatal::corruption(
                        self.key(),
                        fs.field,
                        "id set lists a destination missing from the array",
                    ),
                    _ => return Err(SombraError::NotFound("reference")),
                };
                self.update_refs(fs, |arr| arr.set_meta(at, meta))
            }
            _ => Err(SombraError::TypeMismatch("not a reference field")),
        }
    }

    /// The edge of a single reference field; `None` when unset.
    pub fn get_reference(&self, fs: &FieldSchema) -> Result<Option<RefRecord>> {
        let efc = single_constraint(fs)?;
        self.check_field(fs)?;
        Ok(self.single_ref(fs).map(|(dst, meta)| RefRecord {
            dst: NodeKey::new(efc.dst_type, dst),
            meta: meta_key(meta, efc.edge_type),
            index: 0,
        }))
    }

    /// Edges of a reference list in order; empty when unset.
    pub fn get_references(&self, fs: &FieldSchema) -> Result<RefsIter<'_>> {
        let efc = list_constraint(fs)?;
        self.check_field(fs)?;
        Ok(RefsIter {
            arr: self.refs(fs),
            pos: 0,
            dst_type: efc.dst_type,
            edge_type: efc.edge_type,
        })
    }

    /// Number of edges held by a reference field.
    pub fn reference_count(&self, fs: &FieldSchema) -> Result<usize> {
        self.check_field(fs)?;
        match &fs.kind {
            FieldKind::Reference(_) => Ok(usize::from(self.single_ref(fs).is_some())),
            FieldKind::References(_) => Ok(self.refs(fs).map_or(0, RefsArray::len)),
            _ => Err(SombraError::TypeMismatch("not a reference field")),
        }
    }

    /// Attached edge node of the edge to `dst`.
    pub fn reference_meta(&self, fs: &FieldSchema, dst: NodeId) -> Result<Option<NodeKey>> {
        let efc = fs
            .kind
            .edge_constraint()
            .ok_or(SombraError::TypeMismatch("not a reference field"))?;
        self.check_field(fs)?;
        let meta = match &fs.kind {
            FieldKind::Reference(_) => match self.single_ref(fs) {
                Some((cur, meta)) if cur == dst => meta,
                _ => return Err(SombraError::NotFound("reference")),
            },
            _ => {
                let arr = self.refs(fs).ok_or(SombraError::NotFound("reference"))?;
                match arr.find(dst) {
                    Lookup::Found(at) => arr.get(at).and_then(|(_, meta)| meta),
                    Lookup::Missing => return Err(SombraError::NotFound("reference")),
                    Lookup::Desync => fatal::corruption(
                        self.key(),
                        fs.field,
                        "id set lists a destination missing from the array",
                    ),
                }
            }
        };
        Ok(meta_key(meta, efc.edge_type))
    }

    /// Moves the element at `from` to `to`. Negative indices wrap.
    pub fn references_move(&mut self, fs: &FieldSchema, from: isize, to: isize) -> Result<()> {
        list_constraint(fs)?;
        self.check_field(fs)?;
        let len = self.refs(fs).map_or(0, RefsArray::len);
        let (from, to) = (wrap_index(from, len)?, wrap_index(to, len)?);
        self.update_refs(fs, |arr| arr.move_elem(from, to))
    }

    /// Swaps the elements at `i` and `j`. Negative indices wrap.
    pub fn references_swap(&mut self, fs: &FieldSchema, i: isize, j: isize) -> Result<()> {
        list_constraint(fs)?;
        self.check_field(fs)?;
        let len = self.refs(fs).map_or(0, RefsArray::len);
        let (i, j) = (wrap_index(i, len)?, wrap_index(j, len)?);
        self.update_refs(fs, |arr| arr.swap(i, j))
    }

    /// Reserves room for `additional` more elements of a populated list.
    ///
    /// An unset field stays unset; its first insert reserves
    /// the directory's `refs_prealloc` elements instead.
    pub fn prealloc_refs(&mut self, fs: &FieldSchema, additional: usize) -> Result<()> {
        list_constraint(fs)?;
        self.check_field(fs)?;
        if self.refs(fs).is_none() {
            return Ok(());
        }
        self.update_refs(fs, |arr| arr.reserve(additional))
    }
}

/// Endpoints and schemas of an edge being created.
struct EdgeCtx {
    src: NodeKey,
    dst: NodeKey,
    fs: FieldSchema,
    efc: EdgeConstraint,
    inv: FieldSchema,
}

impl EdgeCtx {
    fn inv_efc(&self) -> Option<&EdgeConstraint> {
        self.inv.kind.edge_constraint()
    }

    fn edge_type(&self) -> Option<TypeId> {
        self.efc
            .edge_type
            .or_else(|| self.inv_efc().and_then(|c| c.edge_type))
    }
}

fn edge_ctx<D: Db + ?Sized>(db: &D, src: NodeKey, fs: &FieldSchema, dst: NodeKey) -> Result<EdgeCtx> {
    let efc = fs
        .kind
        .edge_constraint()
        .ok_or(SombraError::TypeMismatch("not a reference field"))?;
    if dst.ty != efc.dst_type {
        return Err(SombraError::TypeMismatch(
            "destination type does not match the constraint",
        ));
    }
    if dst == src {
        return Err(SombraError::InvalidArgument("self reference"));
    }
    if dst.id.0 == 0 {
        return Err(SombraError::InvalidArgument("node id 0 is reserved"));
    }
    let inv = inverse_field_schema(db, src.ty, fs)?;
    db.find_node(src)
        .ok_or(SombraError::NotFound("source node"))?
        .check_field(fs)?;
    check_edge_type(db, efc)?;
    Ok(EdgeCtx {
        src,
        dst,
        fs: fs.clone(),
        efc: efc.clone(),
        inv,
    })
}

/// Fails unless the attached edge node type of `efc` is registered, so that
/// creating an edge never fails after earlier edges were torn down.
fn check_edge_type<D: Db + ?Sized>(db: &D, efc: &EdgeConstraint) -> Result<()> {
    match efc.edge_type {
        Some(ty) if db.node_schema(ty).is_none() => Err(SombraError::NotFound("edge node type")),
        _ => Ok(()),
    }
}

fn node_mut<D: Db + ?Sized>(db: &mut D, key: NodeKey) -> Result<&mut Node> {
    db.find_node_mut(key).ok_or(SombraError::NotFound("node"))
}

fn schedule_dependent<D: Db + ?Sized>(db: &mut D, key: NodeKey) {
    let at = db.dependent_expire_at();
    db.expire_node(key, at, ExpireStrategy::CancelPrevious);
    db.metrics().expiry_scheduled();
    debug!(node = %key, at_ms = at, "dependent node scheduled for expiry");
}

/// One side of an edge after its element was taken out.
#[derive(Clone, Copy, Debug)]
struct Detached {
    dst: NodeId,
    meta: Option<EdgeMeta>,
    index: usize,
    emptied: bool,
}

/// Removes one element from one endpoint only.
fn detach<D: Db + ?Sized>(
    db: &mut D,
    key: NodeKey,
    fs: &FieldSchema,
    sel: RefSelector,
) -> Result<Detached> {
    let node = node_mut(db, key)?;
    node.check_field(fs)?;
    match &fs.kind {
        FieldKind::Reference(_) => {
            let (dst, meta) = node
                .single_ref(fs)
                .ok_or(SombraError::NotFound("reference"))?;
            match sel {
                RefSelector::Id(id) if id != dst => return Err(SombraError::NotFound("reference")),
                RefSelector::Index(i) if i != 0 && i != -1 => {
                    return Err(SombraError::InvalidArgument("index out of range"))
                }
                _ => {}
            }
            node.clear_local(fs)?;
            Ok(Detached {
                dst,
                meta,
                index: 0,
                emptied: true,
            })
        }
        FieldKind::References(_) => {
            let arr = node.refs(fs).ok_or(SombraError::NotFound("reference"))?;
            let at = match sel {
                RefSelector::Id(id) => match arr.find(id) {
                    Lookup::Found(at) => at,
                    Lookup::Missing => return Err(SombraError::NotFound("reference")),
                    Lookup::Desync => fatal::corruption(
                        key,
                        fs.field,
                        "id set lists a destination missing from the array",
                    ),
                },
                RefSelector::Index(i) => wrap_index(i, arr.len())?,
            };
            let Some((dst, meta)) = node.update_refs(fs, |arr| arr.remove(at))? else {
                fatal::corruption(key, fs.field, "array element missing from the id set")
            };
            let left = node.refs(fs).map_or(0, RefsArray::len);
            Ok(Detached {
                dst,
                meta,
                index: at,
                emptied: left == 0,
            })
        }
        _ => Err(SombraError::TypeMismatch("not a reference field")),
    }
}

/// Tears down one edge on both endpoints.
pub(crate) fn remove_edge<D: Db + ?Sized>(
    db: &mut D,
    src: NodeKey,
    fs: &FieldSchema,
    sel: RefSelector,
    trigger: Trigger,
    cause: &'static str,
) -> Result<RefRecord> {
    let efc = fs
        .kind
        .edge_constraint()
        .ok_or(SombraError::TypeMismatch("not a reference field"))?
        .clone();
    let inv = inverse_field_schema(db, src.ty, fs)?;
    let own = detach(db, src, fs, sel)?;
    let dst = NodeKey::new(efc.dst_type, own.dst);
    let partner = match detach(db, dst, &inv, RefSelector::Id(src.id)) {
        Ok(side) => Some(side),
        Err(SombraError::NotFound(_)) => {
            warn!(src = %src, dst = %dst, field = fs.field.0, "back-edge already gone");
            None
        }
        Err(err) => return Err(err),
    };
    let edge_type = efc
        .edge_type
        .or_else(|| inv.kind.edge_constraint().and_then(|c| c.edge_type));
    if let (Some(id), Some(ty)) = (release_pair(own.meta, partner.and_then(|p| p.meta)), edge_type) {
        db.metrics().edge_meta_destroyed();
        match db.delete_node(NodeKey::new(ty, id)) {
            Ok(()) | Err(SombraError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }
    }
    db.mark_dirty(src);
    if partner.is_some() {
        db.mark_dirty(dst);
    }
    db.metrics().edge_removed(cause);
    debug!(src = %src, dst = %dst, field = fs.field.0, index = own.index, cause, "edge removed");
    if trigger.own && own.emptied && efc.is_dependent() {
        schedule_dependent(db, src);
    }
    let partner_dependent = inv.kind.edge_constraint().is_some_and(EdgeConstraint::is_dependent);
    if trigger.partner && partner_dependent && partner.is_some_and(|p| p.emptied) {
        schedule_dependent(db, dst);
    }
    Ok(RefRecord {
        dst,
        meta: meta_key(own.meta, edge_type),
        index: own.index,
    })
}

/// Evicts the oldest elements of a list until its limit is respected.
///
/// The element pointing at `keep`, the one just inserted, is never chosen.
fn evict_over_limit<D: Db + ?Sized>(
    db: &mut D,
    key: NodeKey,
    fs: &FieldSchema,
    keep: Option<NodeId>,
) -> Result<usize> {
    let Some(limit) = list_constraint(fs).ok().and_then(EdgeConstraint::limit) else {
        return Ok(0);
    };
    let mut evicted = 0;
    loop {
        let Some(arr) = db.find_node(key).and_then(|n| n.refs(fs)) else {
            break;
        };
        if arr.len() <= limit {
            break;
        }
        let oldest = match arr.get(0) {
            Some((dst, _)) if Some(dst) == keep => 1,
            _ => 0,
        };
        remove_edge(db, key, fs, RefSelector::Index(oldest), Trigger::ALL, "evicted")?;
        evicted += 1;
    }
    if evicted > 0 {
        debug!(node = %key, field = fs.field.0, evicted, limit, "edges evicted over limit");
    }
    Ok(evicted)
}

/// Allocates the attached edge node of a new edge; returns the handles kept
/// by the source and destination sides.
fn create_meta<D: Db + ?Sized>(
    db: &mut D,
    ctx: &EdgeCtx,
) -> Result<(Option<EdgeMeta>, Option<EdgeMeta>)> {
    let Some(ty) = ctx.efc.edge_type else {
        return Ok((None, None));
    };
    let id = db.new_node_id(ty)?;
    db.upsert_node(NodeKey::new(ty, id))?;
    db.metrics().edge_meta_created();
    if ctx.inv_efc().is_some_and(EdgeConstraint::has_meta) {
        Ok((Some(EdgeMeta::Shared(id)), Some(EdgeMeta::Shared(id))))
    } else {
        Ok((Some(EdgeMeta::Unshared(id)), None))
    }
}

/// Clears the single-valued inverse field of the destination, if set.
fn free_single_inverse<D: Db + ?Sized>(db: &mut D, ctx: &EdgeCtx) -> Result<()> {
    if !matches!(ctx.inv.kind, FieldKind::Reference(_)) {
        return Ok(());
    }
    let prior = db
        .find_node(ctx.dst)
        .and_then(|n| n.single_ref(&ctx.inv));
    if prior.is_some() {
        remove_edge(db, ctx.dst, &ctx.inv, RefSelector::Index(0), Trigger::PARTNER, "explicit")?;
    }
    Ok(())
}

/// Fails fatally if the destination already lists the source.
fn check_no_back_edge<D: Db + ?Sized>(db: &D, ctx: &EdgeCtx) -> Result<()> {
    let node = db
        .find_node(ctx.dst)
        .ok_or(SombraError::NotFound("destination node"))?;
    node.check_field(&ctx.inv)?;
    if let FieldKind::References(_) = ctx.inv.kind {
        if node.refs(&ctx.inv).is_some_and(|a| a.index().contains(ctx.src.id)) {
            fatal::corruption(ctx.dst, ctx.inv.field, "back-edge present without its edge");
        }
    }
    Ok(())
}

/// Adds the source's id to the destination's inverse id set.
fn index_back_edge<D: Db + ?Sized>(db: &mut D, ctx: &EdgeCtx) -> Result<()> {
    if let FieldKind::References(_) = ctx.inv.kind {
        let src = ctx.src.id;
        if !node_mut(db, ctx.dst)?.update_refs(&ctx.inv, |a| a.index_add(src))? {
            fatal::corruption(ctx.dst, ctx.inv.field, "back-edge present without its edge");
        }
    }
    Ok(())
}

/// Writes the destination's half of the edge after its id was indexed.
fn store_back_edge<D: Db + ?Sized>(db: &mut D, ctx: &EdgeCtx, meta: Option<EdgeMeta>) -> Result<()> {
    let src = ctx.src.id;
    let node = node_mut(db, ctx.dst)?;
    match ctx.inv.kind {
        FieldKind::References(_) => node.update_refs(&ctx.inv, |a| {
            let end = a.len();
            a.insert(end, src, meta);
        }),
        _ => node.write_single(&ctx.inv, src, meta),
    }
}

fn note_edge_created<D: Db + ?Sized>(db: &mut D, ctx: &EdgeCtx, index: usize) {
    db.mark_dirty(ctx.src);
    db.mark_dirty(ctx.dst);
    db.metrics().edge_created();
    debug!(src = %ctx.src, dst = %ctx.dst, field = ctx.fs.field.0, index, "edge created");
}

/// Points single reference field `fs` of `src` at `dst`.
///
/// An existing edge of `src` is removed without firing its dependent
/// trigger, as is the edge currently held by `dst`'s inverse field when that
/// field is single-valued. Setting the current destination again is a no-op.
pub fn reference_set<D: Db + ?Sized>(
    db: &mut D,
    src: NodeKey,
    fs: &FieldSchema,
    dst: NodeKey,
) -> Result<RefRecord> {
    single_constraint(fs)?;
    let ctx = edge_ctx(db, src, fs, dst)?;
    db.find_node(dst)
        .ok_or(SombraError::NotFound("destination node"))?
        .check_field(&ctx.inv)?;
    let current = db.find_node(src).and_then(|n| n.single_ref(fs));
    if let Some((cur, meta)) = current {
        if cur == dst.id {
            return Ok(RefRecord {
                dst,
                meta: meta_key(meta, ctx.edge_type()),
                index: 0,
            });
        }
        remove_edge(db, src, fs, RefSelector::Index(0), Trigger::PARTNER, "explicit")?;
    }
    check_no_back_edge(db, &ctx)?;
    free_single_inverse(db, &ctx)?;
    let (src_meta, dst_meta) = create_meta(db, &ctx)?;
    index_back_edge(db, &ctx)?;
    node_mut(db, src)?.write_single(fs, dst.id, src_meta)?;
    store_back_edge(db, &ctx, dst_meta)?;
    note_edge_created(db, &ctx, 0);
    evict_over_limit(db, dst, &ctx.inv, Some(src.id))?;
    Ok(RefRecord {
        dst,
        meta: meta_key(src_meta, ctx.edge_type()),
        index: 0,
    })
}

/// Inserts an edge into reference list `fs` of `src` at `index` (`-1`
/// appends).
///
/// A destination that is already linked fails with `AlreadyExists` carrying
/// the existing edge, unless `flags` has [`REORDER`], in which case the
/// element is moved to `index`. The oldest elements are evicted while the
/// list exceeds its limit.
pub fn references_insert<D: Db + ?Sized>(
    db: &mut D,
    src: NodeKey,
    fs: &FieldSchema,
    index: isize,
    flags: InsertFlags,
    dst: NodeKey,
) -> Result<RefRecord> {
    list_constraint(fs)?;
    let ctx = edge_ctx(db, src, fs, dst)?;
    let existing = db
        .find_node(src)
        .and_then(|n| n.refs(fs))
        .map(|arr| (arr.find(dst.id), arr.len()));
    match existing {
        Some((Lookup::Found(from), len)) => {
            let node = node_mut(db, src)?;
            if flags & REORDER == 0 {
                let meta = node.refs(fs).and_then(|a| a.get(from)).and_then(|(_, m)| m);
                return Err(SombraError::AlreadyExists(RefRecord {
                    dst,
                    meta: meta_key(meta, ctx.edge_type()),
                    index: from,
                }));
            }
            let to = insert_pos(index, len - 1);
            node.update_refs(fs, |a| a.move_elem(from, to))?;
            let meta = node.refs(fs).and_then(|a| a.get(to)).and_then(|(_, m)| m);
            db.mark_dirty(src);
            return Ok(RefRecord {
                dst,
                meta: meta_key(meta, ctx.edge_type()),
                index: to,
            });
        }
        Some((Lookup::Desync, _)) => fatal::corruption(
            src,
            fs.field,
            "id set lists a destination missing from the array",
        ),
        _ => {}
    }
    check_no_back_edge(db, &ctx)?;
    free_single_inverse(db, &ctx)?;
    let (src_meta, dst_meta) = create_meta(db, &ctx)?;

    let prealloc = db.refs_prealloc();
    let dst_id = dst.id;
    let src_node = node_mut(db, src)?;
    let fresh = src_node.refs(fs).is_none();
    src_node.update_refs(fs, |a| {
        if fresh {
            a.reserve(prealloc);
        }
        a.index_add(dst_id)
    })?;
    index_back_edge(db, &ctx)?;
    let at = node_mut(db, src)?.update_refs(fs, |a| {
        let at = insert_pos(index, a.len());
        a.insert(at, dst_id, src_meta);
        at
    })?;
    store_back_edge(db, &ctx, dst_meta)?;
    note_edge_created(db, &ctx, at);

    evict_over_limit(db, src, fs, Some(dst_id))?;
    evict_over_limit(db, dst, &ctx.inv, Some(src.id))?;
    let index = match db.find_node(src).and_then(|n| n.refs(fs)).map(|a| a.find(dst_id)) {
        Some(Lookup::Found(now)) => now,
        _ => fatal::corruption(src, fs.field, "inserted edge missing after eviction"),
    };
    Ok(RefRecord {
        dst,
        meta: meta_key(src_meta, ctx.edge_type()),
        index,
    })
}

/// Appends a batch of destinations of type `dst_type` to reference list `fs`.
///
/// Ids are sorted and deduplicated first; ids already linked are skipped
/// with a forward-only walk over the source's id set, and missing
/// destination nodes are created. The limit is applied once after the whole
/// batch. Returns the number of edges created.
pub fn references_insert_tail<D: Db + ?Sized>(
    db: &mut D,
    src: NodeKey,
    fs: &FieldSchema,
    dst_type: TypeId,
    ids: &[NodeId],
) -> Result<usize> {
    let efc = list_constraint(fs)?;
    if dst_type != efc.dst_type {
        return Err(SombraError::TypeMismatch(
            "destination type does not match the constraint",
        ));
    }
    if ids.iter().any(|id| id.0 == 0) {
        return Err(SombraError::InvalidArgument("node id 0 is reserved"));
    }
    if dst_type == src.ty && ids.contains(&src.id) {
        return Err(SombraError::InvalidArgument("self reference"));
    }
    let mut sorted: SmallVec<[NodeId; 32]> = SmallVec::from_slice(ids);
    if !sorted.windows(2).all(|w| w[0] <= w[1]) {
        sorted.sort_unstable();
    }
    sorted.dedup();
    if sorted.is_empty() {
        return Ok(0);
    }

    let inv = inverse_field_schema(db, src.ty, fs)?;
    node_mut(db, src)?.check_field(fs)?;
    check_edge_type(db, efc)?;
    let prealloc = db.refs_prealloc().max(sorted.len());
    let fresh = node_mut(db, src)?.update_refs(fs, |a| {
        a.reserve(prealloc);
        a.is_empty()
    })?;

    let mut inserted = 0usize;
    let mut bound = 0usize;
    for &id in &sorted {
        let dst = NodeKey::new(dst_type, id);
        let at = if fresh {
            None
        } else {
            let idx = db
                .find_node(src)
                .and_then(|n| n.refs(fs))
                .map(RefsArray::index)
                .ok_or(SombraError::NotFound("source node"))?;
            let at = idx.lower_bound_from(bound, id);
            if idx.get(at) == Some(id) {
                bound = at + 1;
                continue;
            }
            Some(at)
        };
        db.upsert_node(dst)?;
        let ctx = EdgeCtx {
            src,
            dst,
            fs: fs.clone(),
            efc: efc.clone(),
            inv: inv.clone(),
        };
        check_no_back_edge(db, &ctx)?;
        free_single_inverse(db, &ctx)?;
        let (src_meta, dst_meta) = create_meta(db, &ctx)?;
        node_mut(db, src)?.update_refs(fs, |a| match at {
            Some(at) => a.index_mut().insert_at(at, id),
            None => {
                a.index_add(id);
            }
        })?;
        index_back_edge(db, &ctx)?;
        let pos = node_mut(db, src)?.update_refs(fs, |a| {
            let end = a.len();
            a.insert(end, id, src_meta);
            end
        })?;
        store_back_edge(db, &ctx, dst_meta)?;
        note_edge_created(db, &ctx, pos);
        evict_over_limit(db, dst, &inv, Some(src.id))?;
        bound = at.map_or(0, |at| at + 1);
        inserted += 1;
    }
    let evicted = evict_over_limit(db, src, fs, None)?;
    debug!(node = %src, field = fs.field.0, requested = ids.len(), inserted, evicted, "bulk references appended");
    Ok(inserted)
}

/// Removes one edge from reference field `fs` of `src`, on both endpoints.
///
/// Emptying a dependent field schedules `src` for expiry, replacing any
/// expiry already pending for it.
pub fn remove_reference<D: Db + ?Sized>(
    db: &mut D,
    src: NodeKey,
    fs: &FieldSchema,
    sel: RefSelector,
) -> Result<RefRecord> {
    remove_edge(db, src, fs, sel, Trigger::ALL, "explicit")
}

/// Removes every edge of a reference field, last to first, then releases
/// the field's storage. Returns the number of edges removed.
pub(crate) fn clear_edges<D: Db + ?Sized>(
    db: &mut D,
    key: NodeKey,
    fs: &FieldSchema,
    fire_own: bool,
    cause: &'static str,
) -> Result<usize> {
    let node = db.find_node(key).ok_or(SombraError::NotFound("node"))?;
    node.check_field(fs)?;
    let count = node.reference_count(fs)?;
    for at in (0..count).rev() {
        remove_edge(db, key, fs, RefSelector::Index(at as isize), Trigger::PARTNER, cause)?;
    }
    node_mut(db, key)?.clear_local(fs)?;
    let dependent = fs.kind.edge_constraint().is_some_and(EdgeConstraint::is_dependent);
    if fire_own && count > 0 && dependent {
        schedule_dependent(db, key);
    }
    Ok(count)
}

/// Removes every edge of reference field `fs` of `src`.
pub fn clear_references<D: Db + ?Sized>(db: &mut D, src: NodeKey, fs: &FieldSchema) -> Result<usize> {
    clear_edges(db, src, fs, true, "explicit")
}

/// Hands sole ownership of every shared edge node of field `fs` to the
/// opposite endpoints, leaving the edges themselves in place.
pub(crate) fn deflate_partners<D: Db + ?Sized>(
    db: &mut D,
    key: NodeKey,
    fs: &FieldSchema,
) -> Result<usize> {
    let Some(efc) = fs.kind.edge_constraint() else {
        return Ok(0);
    };
    let node = db.find_node(key).ok_or(SombraError::NotFound("node"))?;
    let shared: SmallVec<[(NodeId, EdgeMeta); 8]> = match &fs.kind {
        FieldKind::Reference(_) => node
            .single_ref(fs)
            .into_iter()
            .filter_map(|(dst, meta)| meta.filter(|m| m.is_shared()).map(|m| (dst, m)))
            .collect(),
        _ => node
            .refs(fs)
            .into_iter()
            .flat_map(RefsArray::iter)
            .filter_map(|(dst, meta)| meta.filter(|m| m.is_shared()).map(|m| (dst, m)))
            .collect(),
    };
    let inv = inverse_field_schema(db, key.ty, fs)?;
    for &(dst, meta) in &shared {
        let partner = NodeKey::new(efc.dst_type, dst);
        let Some(node) = db.find_node_mut(partner) else {
            continue;
        };
        match node.set_edge_meta(&inv, key.id, Some(meta.unshare())) {
            Ok(()) => db.mark_dirty(partner),
            Err(SombraError::NotFound(_)) => {
                warn!(node = %key, partner = %partner, "shared edge node without back-edge");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(shared.len())
}

/// Populated reference fields of a node.
pub(crate) fn reference_fields(node: &Node) -> SmallVec<[FieldIndex; 8]> {
    node.populated_fields()
        .filter(|f| {
            node.schema()
                .field(*f)
                .is_ok_and(|fs| fs.kind.edge_constraint().is_some())
        })
        .collect()
}
