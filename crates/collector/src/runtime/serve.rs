//! Serve — bind both listeners, accept connections, dispatch handlers,
//! and shut down cleanly.
//!
//! One task per accepted connection, bounded by a semaphore shared across
//! both ports (the worker-pool equivalent: accept rate is decoupled from
//! handler completion rate, and no connection count can grow unbounded).

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::error::{CollectorError, CollectorResult};
use crate::ingest;
use crate::query;
use crate::runtime::stop::shutdown_signal;
use crate::state::SharedState;

#[derive(Debug, Clone, Copy)]
enum Port {
    Ingest,
    Query,
}

impl Port {
    fn name(self) -> &'static str {
        match self {
            Port::Ingest => "ingest",
            Port::Query => "query",
        }
    }
}

/// Bind both ports (failure here aborts startup), serve until a shutdown
/// signal, then drain: stop accepting, wait for handlers, close the
/// persistence queue and wait for the writer to flush.
pub async fn serve(state: SharedState, writer: Option<JoinHandle<()>>) -> CollectorResult<()> {
    let ingest_listener = bind("ingest", state.config.ingest_port).await?;
    let query_listener = bind("query", state.config.query_port).await?;

    info!(
        "Collector is ready. Ingest port: {}, query port: {}, max connections: {}",
        state.config.ingest_port, state.config.query_port, state.config.max_connections
    );

    let limit = Arc::new(Semaphore::new(state.config.max_connections));
    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();

    tracker.spawn(accept_loop(
        ingest_listener,
        Port::Ingest,
        Arc::clone(&state),
        Arc::clone(&limit),
        cancel.clone(),
        tracker.clone(),
    ));
    tracker.spawn(accept_loop(
        query_listener,
        Port::Query,
        Arc::clone(&state),
        limit,
        cancel.clone(),
        tracker.clone(),
    ));

    shutdown_signal().await;

    info!("Shutting down: closing listeners and draining connections");
    cancel.cancel();
    tracker.close();
    tracker.wait().await;

    // All handlers are gone; dropping the last state reference drops the
    // persistence handle, which closes the queue and lets the writer drain.
    drop(state);
    if let Some(writer) = writer {
        if let Err(e) = writer.await {
            error!("persistence writer task failed: {}", e);
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn bind(listener: &'static str, port: u16) -> CollectorResult<TcpListener> {
    TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|source| CollectorError::Bind {
            listener,
            port,
            source,
        })
}

async fn accept_loop(
    listener: TcpListener,
    port: Port,
    state: SharedState,
    limit: Arc<Semaphore>,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = Arc::clone(&limit).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break, // semaphore closed
            },
        };

        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!("accept failed on {} port: {}", port.name(), e);
                    continue;
                }
            },
        };

        debug!("accepted {} connection from {}", port.name(), peer);
        let state = Arc::clone(&state);
        let cancel = cancel.clone();
        // A connection can sit idle indefinitely (an ingest stream between
        // lines, a query client that never sends), so handlers yield to
        // shutdown at their next await point rather than pinning the drain.
        tracker.spawn(async move {
            let _permit = permit;
            let handler = async {
                match port {
                    Port::Ingest => ingest::handle_connection(stream, state).await,
                    Port::Query => query::route::handle_connection(stream, state).await,
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = handler => {}
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use crate::config::CollectorConfig;
    use crate::state::CollectorState;

    use super::*;

    #[tokio::test]
    async fn test_ingest_then_query_end_to_end() {
        let state = Arc::new(CollectorState::new(CollectorConfig::default(), None));
        let ingest_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let query_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ingest_addr = ingest_listener.local_addr().unwrap();
        let query_addr = query_listener.local_addr().unwrap();

        let limit = Arc::new(Semaphore::new(16));
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        tracker.spawn(accept_loop(
            ingest_listener,
            Port::Ingest,
            Arc::clone(&state),
            Arc::clone(&limit),
            cancel.clone(),
            tracker.clone(),
        ));
        tracker.spawn(accept_loop(
            query_listener,
            Port::Query,
            Arc::clone(&state),
            limit,
            cancel.clone(),
            tracker.clone(),
        ));

        // Ingest two lines and close.
        let mut producer = TcpStream::connect(ingest_addr).await.unwrap();
        producer
            .write_all(b"payment failed: timeout\nhealthcheck ok\n")
            .await
            .unwrap();
        producer.shutdown().await.unwrap();

        // Wait for both lines to land in the buffer.
        for _ in 0..50 {
            if state.buffer.stats().current == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        // One-shot query over the wire.
        let mut client = TcpStream::connect(query_addr).await.unwrap();
        client.write_all(b"QUERY keywords=timeout\n").await.unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert_eq!(response, "FOUND: 1\npayment failed: timeout\n");

        cancel.cancel();
        tracker.close();
        tracker.wait().await;
    }
}
