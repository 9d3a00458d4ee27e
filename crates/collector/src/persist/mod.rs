//! Asynchronous append-only persistence with size-based rotation.
//!
//! Many ingest handlers produce onto a bounded queue; a single writer task
//! consumes it and owns the file. Enqueueing never blocks: when the queue
//! is full the entry is dropped; the drop is counted and logged. Write
//! failures are retried a bounded number of times and then dropped with a
//! warning; nothing here ever reaches the ingest path.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Local;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::buffer::LogEntry;
use crate::config::PersistenceConfig;

const WRITE_RETRIES: usize = 3;
const CURRENT_FILE: &str = "current.log";
/// Overflow drops are warned on the first occurrence and then once per
/// this many, so a sustained stall cannot flood the server's own logs.
const OVERFLOW_LOG_EVERY: u64 = 1000;

/// Producer side of the persistence queue, cloned into every ingest handler
/// through the shared state. Dropping the last clone closes the queue and
/// lets the writer drain and exit.
#[derive(Clone)]
pub struct PersistHandle {
    tx: mpsc::Sender<Arc<LogEntry>>,
    overflow: Arc<AtomicU64>,
}

impl PersistHandle {
    /// Non-blocking handoff. A full queue drops the entry rather than
    /// stalling the ingest handler; the drop is counted and surfaced in
    /// the server's own diagnostics.
    pub fn enqueue(&self, entry: Arc<LogEntry>) {
        if self.tx.try_send(entry).is_err() {
            let dropped = self.overflow.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped == 1 || dropped % OVERFLOW_LOG_EVERY == 0 {
                warn!(
                    "persistence queue full, dropped {} entries at enqueue so far",
                    dropped
                );
            }
        }
    }

    /// Entries dropped at enqueue because the queue was full. Separate from
    /// the buffer's eviction counter.
    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }
}

/// Create the directory, open `current.log` for append, and start the
/// writer task. Only called when persistence is enabled; a disabled
/// configuration touches nothing on disk.
pub async fn spawn(config: &PersistenceConfig) -> io::Result<(PersistHandle, JoinHandle<()>)> {
    let dir = PathBuf::from(&config.directory);
    fs::create_dir_all(&dir).await?;

    let path = dir.join(CURRENT_FILE);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;
    let size = file.metadata().await?.len();

    let (tx, rx) = mpsc::channel(config.queue_depth);
    let overflow = Arc::new(AtomicU64::new(0));
    let writer = Writer {
        dir,
        path,
        file,
        size,
        max_size: config.max_file_size(),
        rx,
        overflow: Arc::clone(&overflow),
    };

    info!(
        "Persistence enabled. Dir: {}, max file size: {} MB",
        config.directory, config.max_file_size_mb
    );

    let task = tokio::spawn(writer.run());
    Ok((PersistHandle { tx, overflow }, task))
}

struct Writer {
    dir: PathBuf,
    path: PathBuf,
    file: File,
    size: u64,
    max_size: u64,
    rx: mpsc::Receiver<Arc<LogEntry>>,
    overflow: Arc<AtomicU64>,
}

impl Writer {
    async fn run(mut self) {
        while let Some(entry) = self.rx.recv().await {
            self.write_entry(&entry).await;
        }
        // Queue closed: everything received has been written, flush and go.
        if let Err(e) = self.file.flush().await {
            warn!("final persistence flush failed: {}", e);
        }
        let overflowed = self.overflow.load(Ordering::Relaxed);
        if overflowed > 0 {
            warn!(
                "Persistence writer stopped. {} entries were never enqueued (queue full)",
                overflowed
            );
        } else {
            info!("Persistence writer stopped");
        }
    }

    async fn write_entry(&mut self, entry: &LogEntry) {
        let mut line = Vec::with_capacity(entry.text.len() + 1);
        line.extend_from_slice(entry.text.as_bytes());
        line.push(b'\n');

        for attempt in 1..=WRITE_RETRIES {
            match self.try_write(&line).await {
                Ok(()) => {
                    self.size += line.len() as u64;
                    if self.size >= self.max_size {
                        self.rotate().await;
                    }
                    return;
                }
                Err(e) => {
                    warn!(
                        "persistence write failed (attempt {}/{}): {}",
                        attempt, WRITE_RETRIES, e
                    );
                }
            }
        }
        warn!(
            "dropping log entry seq={} after {} failed writes",
            entry.seq, WRITE_RETRIES
        );
    }

    async fn try_write(&mut self, line: &[u8]) -> io::Result<()> {
        self.file.write_all(line).await?;
        self.file.flush().await
    }

    /// Rename `current.log` to a timestamped name and reopen a fresh one.
    /// Failures leave the writer appending to whatever file it still holds.
    async fn rotate(&mut self) {
        let stamp = Local::now().format("%Y%m%d-%H%M%S");
        let rotated = self.dir.join(format!("log-{stamp}.log"));

        if let Err(e) = fs::rename(&self.path, &rotated).await {
            warn!("log rotation failed: {}", e);
            return;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
        {
            Ok(file) => {
                self.file = file;
                self.size = 0;
                info!("Rotated log file to {}", rotated.display());
            }
            Err(e) => {
                // The old handle still points at the renamed file; keep
                // writing there rather than losing entries.
                warn!(
                    "failed to reopen {} after rotation: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;

    fn entry(seq: u64, text: &str) -> Arc<LogEntry> {
        Arc::new(LogEntry {
            seq,
            received_at: 0,
            text: text.to_string(),
        })
    }

    fn config_for(dir: &std::path::Path) -> PersistenceConfig {
        PersistenceConfig {
            enabled: true,
            directory: dir.to_string_lossy().into_owned(),
            max_file_size_mb: 10,
            queue_depth: 64,
        }
    }

    #[tokio::test]
    async fn test_entry_round_trips_to_current_log() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, task) = spawn(&config_for(dir.path())).await.unwrap();

        handle.enqueue(entry(0, "persisted line"));
        handle.enqueue(entry(1, "another line"));
        drop(handle); // closes the queue, writer drains and exits
        task.await.unwrap();

        let contents = std::fs::read_to_string(dir.path().join(CURRENT_FILE)).unwrap();
        assert_eq!(contents, "persisted line\nanother line\n");
    }

    #[tokio::test]
    async fn test_appends_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path());

        let (handle, task) = spawn(&config).await.unwrap();
        handle.enqueue(entry(0, "first run"));
        drop(handle);
        task.await.unwrap();

        let (handle, task) = spawn(&config).await.unwrap();
        handle.enqueue(entry(1, "second run"));
        drop(handle);
        task.await.unwrap();

        let contents = std::fs::read_to_string(dir.path().join(CURRENT_FILE)).unwrap();
        assert_eq!(contents, "first run\nsecond run\n");
    }

    #[tokio::test]
    async fn test_rotation_at_size_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let config = PersistenceConfig {
            max_file_size_mb: 1,
            queue_depth: 4096,
            ..config_for(dir.path())
        };

        let (handle, task) = spawn(&config).await.unwrap();
        // ~1.1 MiB of 1 KiB lines crosses the 1 MiB threshold once.
        let line = "x".repeat(1023);
        for seq in 0..1100 {
            handle.tx.send(entry(seq, &line)).await.unwrap();
        }
        drop(handle);
        task.await.unwrap();

        let mut rotated = 0;
        let mut has_current = false;
        for dirent in std::fs::read_dir(dir.path()).unwrap() {
            let name = dirent.unwrap().file_name().into_string().unwrap();
            if name == CURRENT_FILE {
                has_current = true;
            } else if name.starts_with("log-") && name.ends_with(".log") {
                rotated += 1;
            }
        }
        assert!(has_current);
        assert_eq!(rotated, 1);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_overflow_counted_and_warned_not_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let config = PersistenceConfig {
            queue_depth: 1,
            ..config_for(dir.path())
        };

        // Build a handle whose queue has no consumer, so it fills up.
        let (tx, _rx) = mpsc::channel(config.queue_depth);
        let handle = PersistHandle {
            tx,
            overflow: Arc::new(AtomicU64::new(0)),
        };

        handle.enqueue(entry(0, "fits"));
        handle.enqueue(entry(1, "dropped"));
        handle.enqueue(entry(2, "dropped"));
        assert_eq!(handle.overflow_count(), 2);
        // The first drop is reported; later drops only at the log interval.
        assert!(logs_contain(
            "persistence queue full, dropped 1 entries at enqueue so far"
        ));
        assert!(!logs_contain("dropped 2 entries"));
    }

    #[traced_test]
    #[tokio::test]
    async fn test_writer_reports_overflow_total_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let config = PersistenceConfig {
            queue_depth: 1,
            ..config_for(dir.path())
        };

        let (handle, task) = spawn(&config).await.unwrap();
        handle.overflow.store(3, Ordering::Relaxed);
        drop(handle);
        task.await.unwrap();

        assert!(logs_contain(
            "Persistence writer stopped. 3 entries were never enqueued"
        ));
    }
}
