use thiserror::Error;

/// Startup-level failures. Everything past startup is recovered locally:
/// connection errors terminate only their connection, persistence write
/// failures never reach the ingest path, and malformed queries become an
/// `ERROR:` response line.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to bind {listener} listener on port {port}: {source}")]
    Bind {
        listener: &'static str,
        port: u16,
        source: std::io::Error,
    },

    #[error("Failed to initialize persistence: {0}")]
    Persistence(#[from] std::io::Error),
}

pub type CollectorResult<T> = Result<T, CollectorError>;
