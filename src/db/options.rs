use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::storage::metrics::FieldMetrics;

/// Configuration options supplied when creating a [`super::MemDb`].
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemDbOptions {
    /// Optional metrics collection implementation
    #[serde(skip)]
    pub metrics: Option<Arc<dyn FieldMetrics>>,
    /// Delay in milliseconds before a node whose dependent field emptied expires
    pub dependent_expire_delay_ms: u64,
    /// Element capacity reserved when a reference list is first populated
    pub refs_prealloc: usize,
    /// Field buffer bytes reserved for every new node
    pub initial_data_capacity: usize,
}

impl Default for MemDbOptions {
    fn default() -> Self {
        Self {
            metrics: None,
            dependent_expire_delay_ms: 0,
            refs_prealloc: 0,
            initial_data_capacity: 0,
        }
    }
}

impl MemDbOptions {
    /// Settings for loading large batches of nodes and edges.
    pub fn bulk_load() -> Self {
        Self {
            refs_prealloc: 64,
            initial_data_capacity: 256,
            ..Self::default()
        }
    }

    /// Sets the metrics sink.
    pub fn metrics(mut self, metrics: Arc<dyn FieldMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Sets the delay applied to dependent expiries.
    pub fn dependent_expire_delay_ms(mut self, ms: u64) -> Self {
        self.dependent_expire_delay_ms = ms;
        self
    }

    /// Sets the reference list preallocation hint.
    pub fn refs_prealloc(mut self, elems: usize) -> Self {
        self.refs_prealloc = elems;
        self
    }

    /// Sets the per-node field buffer reservation.
    pub fn initial_data_capacity(mut self, bytes: usize) -> Self {
        self.initial_data_capacity = bytes;
        self
    }
}

impl std::fmt::Debug for MemDbOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemDbOptions")
            .field("metrics", &self.metrics.is_some())
            .field("dependent_expire_delay_ms", &self.dependent_expire_delay_ms)
            .field("refs_prealloc", &self.refs_prealloc)
            .field("initial_data_capacity", &self.initial_data_capacity)
            .finish()
    }
}
