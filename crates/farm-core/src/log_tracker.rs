//! Bounded per-process output history.
//!
//! Every supervised worker's retained output lines are appended here under
//! the worker's logical process name.  Each name owns a fixed-capacity FIFO:
//! once full, appending a line evicts the oldest one.
//!
//! # Concurrency
//!
//! The tracker is the one structure written and read from different tasks
//! at the same time: a process's output reader appends while the status page
//! takes snapshots.  Each buffer has its own mutex and snapshots hold it only
//! for the copy, so a slow reader never stalls a writer for long and writers
//! for different processes never contend.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

type Buffer = Arc<Mutex<VecDeque<String>>>;

/// Per-process ring buffers of recent output lines.
#[derive(Debug)]
pub struct LogTracker {
    capacity: usize,
    buffers: RwLock<HashMap<String, Buffer>>,
}

impl LogTracker {
    /// Creates a tracker keeping at most `capacity` lines per process.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffers: RwLock::new(HashMap::new()),
        }
    }

    /// Maximum number of lines retained per process name.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends a line to `proc_name`'s history, evicting the oldest line
    /// when the buffer is full.
    pub fn append(&self, proc_name: &str, line: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        let buffer = self.buffer(proc_name);
        let mut lines = buffer.lock().unwrap_or_else(PoisonError::into_inner);
        while lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    /// Returns a copy of `proc_name`'s history, newest line first.
    ///
    /// The snapshot is independent of the tracker: later appends do not
    /// show up in it.  An unknown name yields an empty snapshot.
    pub fn snapshot(&self, proc_name: &str) -> Vec<String> {
        let buffer = {
            let buffers = self.buffers.read().unwrap_or_else(PoisonError::into_inner);
            match buffers.get(proc_name) {
                Some(buffer) => Arc::clone(buffer),
                None => return Vec::new(),
            }
        };
        let lines = buffer.lock().unwrap_or_else(PoisonError::into_inner);
        lines.iter().rev().cloned().collect()
    }

    fn buffer(&self, proc_name: &str) -> Buffer {
        if let Some(buffer) = self
            .buffers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(proc_name)
        {
            return Arc::clone(buffer);
        }
        let mut buffers = self.buffers.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(buffers.entry(proc_name.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(VecDeque::with_capacity(self.capacity.min(1024))))
        }))
    }
}

impl Default for LogTracker {
    fn default() -> Self {
        Self::new(200)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
