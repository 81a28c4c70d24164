use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Trait for tracking reference maintenance in the field engine.
///
/// Implementations collect statistics about edges created and torn down,
/// limit evictions, dependent expiries and attached edge nodes. The engine
/// reports through [`super::directory::NodeDirectory::metrics`].
pub trait FieldMetrics: Send + Sync {
    /// Records a new edge (both directions count as one).
    fn edge_created(&self);

    /// Records an edge torn down.
    ///
    /// # Parameters
    /// * `cause` - `"explicit"` for caller removals, `"evicted"` for limit
    ///   evictions, `"teardown"` for node destruction and field deletion.
    fn edge_removed(&self, cause: &'static str);

    /// Records a dependent node scheduled for expiry.
    fn expiry_scheduled(&self);

    /// Records an attached edge node being created.
    fn edge_meta_created(&self);

    /// Records an attached edge node being destroyed.
    fn edge_meta_destroyed(&self);
}

/// A no-op implementation of [`FieldMetrics`] that discards all recorded metrics.
#[derive(Default)]
pub struct NoopMetrics;

impl FieldMetrics for NoopMetrics {
    fn edge_created(&self) {}
    fn edge_removed(&self, _cause: &'static str) {}
    fn expiry_scheduled(&self) {}
    fn edge_meta_created(&self) {}
    fn edge_meta_destroyed(&self) {}
}

/// A thread-safe counter-based implementation of [`FieldMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Number of edges created.
    pub edges_created: AtomicU64,

    /// Number of edges removed by callers.
    pub edges_removed: AtomicU64,

    /// Number of edges evicted to honor a limit.
    pub edges_evicted: AtomicU64,

    /// Number of edges torn down by node destruction or field deletion.
    pub edges_torn_down: AtomicU64,

    /// Number of dependent expiries scheduled.
    pub expiries_scheduled: AtomicU64,

    /// Number of attached edge nodes created.
    pub edge_meta_created: AtomicU64,

    /// Number of attached edge nodes destroyed.
    pub edge_meta_destroyed: AtomicU64,
}

impl FieldMetrics for CounterMetrics {
    fn edge_created(&self) {
        self.edges_created.fetch_add(1, Ordering::Relaxed);
    }

    fn edge_removed(&self, cause: &'static str) {
        match cause {
            "explicit" => {
                self.edges_removed.fetch_add(1, Ordering::Relaxed);
            }
            "evicted" => {
                self.edges_evicted.fetch_add(1, Ordering::Relaxed);
            }
            "teardown" => {
                self.edges_torn_down.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    fn expiry_scheduled(&self) {
        self.expiries_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    fn edge_meta_created(&self) {
        self.edge_meta_created.fetch_add(1, Ordering::Relaxed);
    }

    fn edge_meta_destroyed(&self) {
        self.edge_meta_destroyed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation wrapped in an [`Arc`].
pub fn default_metrics() -> Arc<dyn FieldMetrics> {
    Arc::new(NoopMetrics)
}
