//! Connection-count metrics for the streaming subsystem.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Process-wide streaming metrics, owned by the dispatcher.
#[derive(Debug, Default)]
pub struct StreamMetrics {
    active: AtomicUsize,
}

impl StreamMetrics {
    /// Create a new metrics object with zero active connections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connections currently being handled or held open.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Count a connection until the returned guard is dropped.
    #[must_use]
    pub fn begin_connection(self: Arc<Self>) -> ActiveGuard {
        self.active.fetch_add(1, Ordering::Relaxed);
        ActiveGuard { metrics: self }
    }
}

/// Decrements the active-connection count exactly once on drop.
#[derive(Debug)]
pub struct ActiveGuard {
    metrics: Arc<StreamMetrics>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.metrics.active.fetch_sub(1, Ordering::Relaxed);
    }
}
