use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::storage::directory::{ExpireStrategy, ExpiryScheduler, NodeDirectory, SchemaDirectory};
use crate::storage::fields::Node;
use crate::storage::hash::fields_hash;
use crate::storage::lifecycle::{destroy_all_fields, unload_all_fields};
use crate::storage::metrics::{default_metrics, FieldMetrics};
use crate::storage::schema::{FieldSchema, NodeSchema};
use crate::types::{FieldIndex, NodeId, NodeKey, Result, SombraError, TypeId};

use super::MemDbOptions;

/// A scheduled node expiry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Expiry {
    /// Node to delete.
    pub node: NodeKey,
    /// Deadline in milliseconds since the Unix epoch.
    pub at_ms: u64,
}

/// Hash-map backed node store.
pub struct MemDb {
    opts: MemDbOptions,
    metrics: Arc<dyn FieldMetrics>,
    schemas: FxHashMap<TypeId, Arc<NodeSchema>>,
    nodes: FxHashMap<NodeKey, Node>,
    next_ids: FxHashMap<TypeId, u32>,
    dirty: FxHashSet<NodeKey>,
    expiries: Vec<Expiry>,
    clock_ms: Option<u64>,
}

impl Default for MemDb {
    fn default() -> Self {
        Self::new(MemDbOptions::default())
    }
}

impl MemDb {
    /// Creates an empty store.
    pub fn new(opts: MemDbOptions) -> Self {
        let metrics = opts.metrics.clone().unwrap_or_else(default_metrics);
        Self {
            opts,
            metrics,
            schemas: FxHashMap::default(),
            nodes: FxHashMap::default(),
            next_ids: FxHashMap::default(),
            dirty: FxHashSet::default(),
            expiries: Vec::new(),
            clock_ms: None,
        }
    }

    /// Options the store was created with.
    pub fn options(&self) -> &MemDbOptions {
        &self.opts
    }

    /// Registers (or replaces) the schema of a node type.
    pub fn register_schema(&mut self, schema: NodeSchema) -> Arc<NodeSchema> {
        let schema = Arc::new(schema);
        debug!(ty = %schema.ty(), fields = schema.fields().len(), "schema registered");
        self.schemas.insert(schema.ty(), Arc::clone(&schema));
        schema
    }

    /// Schema of `ty`.
    pub fn schema(&self, ty: TypeId) -> Result<Arc<NodeSchema>> {
        self.schemas
            .get(&ty)
            .cloned()
            .ok_or(SombraError::NotFound("node type"))
    }

    /// Schema of one field of `ty`.
    pub fn field(&self, ty: TypeId, field: u8) -> Result<FieldSchema> {
        Ok(self.schema(ty)?.field(FieldIndex(field))?.clone())
    }

    /// Creates a node with a freshly allocated id.
    pub fn create_node(&mut self, ty: TypeId) -> Result<NodeKey> {
        let id = self.new_node_id(ty)?;
        let key = NodeKey::new(ty, id);
        self.upsert_node(key)?;
        Ok(key)
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node is live.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Live node `key`.
    pub fn node(&self, key: NodeKey) -> Result<&Node> {
        self.nodes.get(&key).ok_or(SombraError::NotFound("node"))
    }

    /// Live node `key`, mutable. Callers writing fields directly should
    /// [`NodeDirectory::mark_dirty`] the node themselves.
    pub fn node_mut(&mut self, key: NodeKey) -> Result<&mut Node> {
        self.nodes.get_mut(&key).ok_or(SombraError::NotFound("node"))
    }

    /// Pending expiries in scheduling order.
    pub fn expiries(&self) -> &[Expiry] {
        &self.expiries
    }

    /// Drains the set of nodes modified since the last call, sorted by key.
    pub fn take_dirty(&mut self) -> Vec<NodeKey> {
        let mut keys: Vec<NodeKey> = self.dirty.drain().collect();
        keys.sort_unstable();
        keys
    }

    /// Pins the clock used for expiry deadlines.
    pub fn set_clock_ms(&mut self, ms: u64) {
        self.clock_ms = Some(ms);
    }

    /// Deletes every node whose expiry deadline is at or before `now_ms`.
    /// Returns the number of nodes deleted.
    pub fn run_expiries(&mut self, now_ms: u64) -> Result<usize> {
        let mut deleted = 0;
        while let Some(pos) = self.expiries.iter().position(|e| e.at_ms <= now_ms) {
            let expiry = self.expiries.remove(pos);
            match self.delete_node(expiry.node) {
                Ok(()) => deleted += 1,
                Err(SombraError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(deleted)
    }

    /// Evicts a node from memory without deleting its edges.
    pub fn unload_node(&mut self, key: NodeKey) -> Result<()> {
        unload_all_fields(self, key)?;
        self.nodes.remove(&key);
        self.dirty.remove(&key);
        trace!(node = %key, "node unloaded");
        Ok(())
    }

    /// 128-bit content hash of node `key`.
    pub fn hash_node(&self, key: NodeKey) -> Result<u128> {
        fields_hash(self, self.node(key)?)
    }
}

impl SchemaDirectory for MemDb {
    fn node_schema(&self, ty: TypeId) -> Option<Arc<NodeSchema>> {
        self.schemas.get(&ty).cloned()
    }
}

impl NodeDirectory for MemDb {
    fn find_node(&self, key: NodeKey) -> Option<&Node> {
        self.nodes.get(&key)
    }

    fn find_node_mut(&mut self, key: NodeKey) -> Option<&mut Node> {
        self.nodes.get_mut(&key)
    }

    fn upsert_node(&mut self, key: NodeKey) -> Result<&mut Node> {
        if key.id.0 == 0 {
            return Err(SombraError::InvalidArgument("node id 0 is reserved"));
        }
        let schema = self.schema(key.ty)?;
        let next = self.next_ids.entry(key.ty).or_insert(1);
        *next = (*next).max(key.id.0.saturating_add(1));
        let capacity = self.opts.initial_data_capacity;
        Ok(self.nodes.entry(key).or_insert_with(|| {
            trace!(node = %key, "node created");
            Node::with_capacity(key, schema, capacity)
        }))
    }

    fn new_node_id(&mut self, ty: TypeId) -> Result<NodeId> {
        if !self.schemas.contains_key(&ty) {
            return Err(SombraError::NotFound("node type"));
        }
        let next = self.next_ids.entry(ty).or_insert(1);
        while self.nodes.contains_key(&NodeKey::new(ty, NodeId(*next))) {
            *next = next
                .checked_add(1)
                .ok_or(SombraError::Unsupported("node id space exhausted"))?;
        }
        let id = NodeId(*next);
        *next = next.saturating_add(1);
        Ok(id)
    }

    fn mark_dirty(&mut self, key: NodeKey) {
        if self.nodes.contains_key(&key) {
            self.dirty.insert(key);
        }
    }

    fn delete_node(&mut self, key: NodeKey) -> Result<()> {
        if !self.nodes.contains_key(&key) {
            return Err(SombraError::NotFound("node"));
        }
        destroy_all_fields(self, key)?;
        self.nodes.remove(&key);
        self.dirty.remove(&key);
        self.expiries.retain(|e| e.node != key);
        debug!(node = %key, "node deleted");
        Ok(())
    }

    fn metrics(&self) -> &dyn FieldMetrics {
        &*self.metrics
    }

    fn refs_prealloc(&self) -> usize {
        self.opts.refs_prealloc
    }
}

impl ExpiryScheduler for MemDb {
    fn now_ms(&self) -> u64 {
        self.clock_ms.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0)
        })
    }

    fn expire_node(&mut self, key: NodeKey, at_ms: u64, strategy: ExpireStrategy) {
        if strategy == ExpireStrategy::CancelPrevious {
            self.expiries.retain(|e| e.node != key);
        }
        self.expiries.push(Expiry { node: key, at_ms });
    }

    fn dependent_expire_at(&self) -> u64 {
        self.now_ms()
            .saturating_add(self.opts.dependent_expire_delay_ms)
    }
}
