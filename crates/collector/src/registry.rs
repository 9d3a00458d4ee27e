//! Thread-safe count of currently-open ingest connections.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ClientRegistry {
    count: AtomicUsize,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    /// Saturating decrement: a stray double-close can never drive the
    /// count negative.
    pub fn decrement(&self) {
        let _ = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_sub(1));
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

/// RAII registration of one ingest connection. The decrement happens
/// exactly once, on drop, regardless of how the connection ends.
pub struct ConnectionGuard {
    registry: Arc<ClientRegistry>,
}

impl ConnectionGuard {
    pub fn register(registry: Arc<ClientRegistry>) -> Self {
        registry.increment();
        Self { registry }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.decrement();
    }
}
