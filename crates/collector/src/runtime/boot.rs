//! Boot — logging init, config load, persistence spawn, state creation.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::CollectorConfig;
use crate::error::{CollectorError, CollectorResult};
use crate::persist;
use crate::state::{CollectorState, SharedState};

/// Initialise the tracing / logging subsystem.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "collector=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Load config, start the persistence writer when enabled, and build the
/// shared state every handler receives.
///
/// Returns the state and, when persistence is on, the writer task handle
/// to be awaited at shutdown.
pub async fn boot() -> CollectorResult<(SharedState, Option<JoinHandle<()>>)> {
    info!("Starting log collector v0.0.1");

    let config = CollectorConfig::load()?;
    config.validate().map_err(CollectorError::Config)?;
    info!(
        "Loaded configuration: ingest_port={}, query_port={}, buffer_capacity={}, max_line_len={}",
        config.ingest_port, config.query_port, config.buffer_capacity, config.max_line_len
    );

    let (persist, writer) = if config.persistence.enabled {
        let (handle, task) = persist::spawn(&config.persistence).await?;
        (Some(handle), Some(task))
    } else {
        info!("Persistence disabled");
        (None, None)
    };

    let state = Arc::new(CollectorState::new(config, persist));
    info!("Initialized shared application state");

    Ok((state, writer))
}
