//! Recording launcher for event-loop tests.
//!
//! [`MockLauncher`] behaves like the real supervisor at the contract level
//! (one live process per key, `NotRunning` for exited handles, an exit
//! report for every exit) but never spawns anything.  Tests can inspect
//! which specs were started and which keys were stopped, simulate a crash
//! with [`MockLauncher::crash`], and make spawns of a binary fail.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::application::supervision::{
    ExitReport, ExitSignal, ProcessHandle, ProcessKey, ProcessLauncher, ProcessSpec,
    SupervisorError,
};

/// A [`ProcessLauncher`] that records calls instead of spawning processes.
pub struct MockLauncher {
    live: Mutex<HashMap<ProcessKey, (ProcessHandle, ExitSignal)>>,
    started: Mutex<Vec<ProcessSpec>>,
    stopped: Mutex<Vec<ProcessKey>>,
    failing: Mutex<HashSet<PathBuf>>,
    exits: mpsc::UnboundedSender<ExitReport>,
    next_pid: AtomicU32,
}

impl MockLauncher {
    /// Creates a launcher and the receiver its exit reports arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ExitReport>) {
        let (exits, rx) = mpsc::unbounded_channel();
        let launcher = Self {
            live: Mutex::new(HashMap::new()),
            started: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            exits,
            next_pid: AtomicU32::new(1000),
        };
        (launcher, rx)
    }

    /// Makes every future spawn of `binary` fail with `NotFound`.
    pub fn fail_spawns_of(&self, binary: impl Into<PathBuf>) {
        self.failing.lock().expect("lock poisoned").insert(binary.into());
    }

    /// Keys of every successful start, in order.
    pub fn started_keys(&self) -> Vec<ProcessKey> {
        self.started
            .lock()
            .expect("lock poisoned")
            .iter()
            .map(|spec| spec.key.clone())
            .collect()
    }

    pub fn start_count(&self, key: &ProcessKey) -> usize {
        self.started
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|spec| &spec.key == key)
            .count()
    }

    /// The most recent spec started for `key`.
    pub fn last_spec(&self, key: &ProcessKey) -> Option<ProcessSpec> {
        self.started
            .lock()
            .expect("lock poisoned")
            .iter()
            .rev()
            .find(|spec| &spec.key == key)
            .cloned()
    }

    /// Keys of every successful stop, in order.
    pub fn stopped(&self) -> Vec<ProcessKey> {
        self.stopped.lock().expect("lock poisoned").clone()
    }

    pub fn stop_count(&self, key: &ProcessKey) -> usize {
        self.stopped
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|k| *k == key)
            .count()
    }

    /// Number of processes currently running.
    pub fn live_count(&self) -> usize {
        self.live.lock().expect("lock poisoned").len()
    }

    /// Simulates the live process for `key` exiting with `code`.
    ///
    /// Returns `false` if nothing is running under that key.
    pub fn crash(&self, key: &ProcessKey, code: i32) -> bool {
        let Some((_, signal)) = self.live.lock().expect("lock poisoned").remove(key) else {
            return false;
        };
        let report = signal.report(Some(code), code == 0, format!("exit status: {code}"));
        signal.mark_exited(report.clone());
        let _ = self.exits.send(report);
        true
    }
}

#[async_trait]
impl ProcessLauncher for MockLauncher {
    async fn start(&self, spec: ProcessSpec) -> Result<ProcessHandle, SupervisorError> {
        let mut live = self.live.lock().expect("lock poisoned");
        if live.contains_key(&spec.key) {
            return Err(SupervisorError::AlreadyRunning(spec.key));
        }
        if self.failing.lock().expect("lock poisoned").contains(&spec.binary) {
            return Err(SupervisorError::Spawn {
                key: spec.key,
                binary: spec.binary,
                source: io::Error::new(io::ErrorKind::NotFound, "mock spawn failure"),
            });
        }

        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        let (handle, signal) = ProcessHandle::new(spec.key.clone(), spec.log_key.clone(), Some(pid));
        live.insert(spec.key.clone(), (handle.clone(), signal));
        self.started.lock().expect("lock poisoned").push(spec);
        Ok(handle)
    }

    async fn stop(&self, handle: &ProcessHandle) -> Result<ExitReport, SupervisorError> {
        let entry = {
            let mut live = self.live.lock().expect("lock poisoned");
            match live.get(handle.key()) {
                Some((current, _)) if current.instance() == handle.instance() => live.remove(handle.key()),
                _ => None,
            }
        };
        let Some((_, signal)) = entry else {
            return Err(SupervisorError::NotRunning(handle.key().clone()));
        };

        let report = signal.report(None, false, "signal: 15 (SIGTERM)");
        signal.mark_exited(report.clone());
        let _ = self.exits.send(report.clone());
        self.stopped
            .lock()
            .expect("lock poisoned")
            .push(handle.key().clone());
        Ok(report)
    }
}
