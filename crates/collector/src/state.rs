use std::sync::Arc;

use crate::buffer::LogBuffer;
use crate::config::CollectorConfig;
use crate::persist::PersistHandle;
use crate::registry::ClientRegistry;

/// Everything shared across connection handlers: the one log buffer, the
/// one client registry, the persistence queue handle (when enabled), and
/// the immutable configuration. Constructed once at boot and passed to
/// every handler; there is no ambient global state.
pub struct CollectorState {
    pub buffer: LogBuffer,
    pub clients: Arc<ClientRegistry>,
    pub persist: Option<PersistHandle>,
    pub config: CollectorConfig,
}

impl CollectorState {
    pub fn new(config: CollectorConfig, persist: Option<PersistHandle>) -> Self {
        Self {
            buffer: LogBuffer::new(config.buffer_capacity),
            clients: Arc::new(ClientRegistry::new()),
            persist,
            config,
        }
    }
}

pub type SharedState = Arc<CollectorState>;
