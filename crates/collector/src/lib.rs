// Domain-driven module structure for the log collector.

// Core infrastructure
pub mod buffer;
pub mod error;
pub mod registry;
pub mod state;

// Domain modules
pub mod config;
pub mod ingest;
pub mod persist;
pub mod query;
pub mod runtime;
