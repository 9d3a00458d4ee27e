//! Bounded in-memory log store with FIFO eviction.
//!
//! One instance is shared by every ingest and query connection for the
//! process lifetime. The lock is held only for the duration of a single
//! append/snapshot/stats call, never across I/O, so every append is
//! linearized against every snapshot and readers never observe a
//! partially-applied append.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// One accepted log line. Immutable after construction; shared between the
/// buffer, query snapshots, and the persistence queue.
#[derive(Debug, PartialEq, Eq)]
pub struct LogEntry {
    /// Monotonic sequence number, assigned at append time.
    pub seq: u64,
    /// Receive time, seconds since the Unix epoch.
    pub received_at: i64,
    pub text: String,
}

/// Consistent view of the buffer counters, read under one lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStats {
    /// Lifetime entries accepted.
    pub total: u64,
    /// Lifetime entries evicted from a full buffer. Nothing else counts
    /// toward this; persistence-queue overflow is accounted separately.
    pub dropped: u64,
    /// Entries presently held (`total - dropped`, bounded by capacity).
    pub current: usize,
}

struct Inner {
    entries: VecDeque<Arc<LogEntry>>,
    total: u64,
    dropped: u64,
    next_seq: u64,
}

pub struct LogBuffer {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        // A zero capacity is rejected by config validation; clamp anyway so
        // the eviction arithmetic below can never underflow.
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(Inner {
                entries: VecDeque::with_capacity(capacity),
                total: 0,
                dropped: 0,
                next_seq: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append one entry, evicting the oldest first when at capacity.
    /// Never fails and never blocks beyond the internal lock.
    ///
    /// Returns the stored entry (for the persistence queue) and whether an
    /// eviction took place.
    pub fn append(&self, text: String) -> (Arc<LogEntry>, bool) {
        let received_at = unix_now();
        let mut inner = self.inner.lock();

        let entry = Arc::new(LogEntry {
            seq: inner.next_seq,
            received_at,
            text,
        });
        inner.next_seq += 1;

        let evicted = if inner.entries.len() == self.capacity {
            inner.entries.pop_front();
            inner.dropped += 1;
            true
        } else {
            false
        };

        inner.entries.push_back(Arc::clone(&entry));
        inner.total += 1;

        (entry, evicted)
    }

    /// Point-in-time copy of all held entries, insertion order preserved.
    /// The lock is released before the caller scans anything.
    pub fn snapshot(&self) -> Vec<Arc<LogEntry>> {
        let inner = self.inner.lock();
        inner.entries.iter().cloned().collect()
    }

    pub fn stats(&self) -> BufferStats {
        let inner = self.inner.lock();
        BufferStats {
            total: inner.total,
            dropped: inner.dropped,
            current: inner.entries.len(),
        }
    }
}

fn unix_now() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(_) => 0, // clock before 1970, only plausible in broken test rigs
    }
}
