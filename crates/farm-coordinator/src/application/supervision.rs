//! Supervision contract between the device event loop and process launchers.
//!
//! The event loop decides *what* should run; a [`ProcessLauncher`] decides
//! *how* a process is spawned, watched and torn down.  The loop only ever
//! talks to the trait, so it can be driven by the real tokio-based supervisor
//! in production and by a recording double in tests.
//!
//! # Handle lifecycle
//!
//! ```text
//! start(spec) ──► ProcessHandle (Running) ──► process exits ──► Exited(report)
//!                        │                          ▲
//!                        └── stop(handle) ──SIGTERM─┘ (SIGKILL after timeout)
//! ```
//!
//! Every successful `start` produces a handle with a fresh instance id.  The
//! launcher keeps the paired [`ExitSignal`] and flips the handle to
//! `Exited` when it observes end-of-output and reaps the child.  The same
//! [`ExitReport`] is also pushed onto the loop's exit channel, which is how
//! the loop learns about crashes it did not ask for.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{watch, Notify};
use uuid::Uuid;

use super::line_filter::LineFilter;

/// Who a supervised process belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Owner {
    /// A device-independent singleton process.
    Base,
    /// A worker serving the device with this uuid.
    Device(String),
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Base => f.write_str("base"),
            Owner::Device(uuid) => f.write_str(uuid),
        }
    }
}

/// Identifies a supervised process: at most one may run per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessKey {
    pub owner: Owner,
    /// Logical process name, e.g. `"mirror"`.
    pub name: String,
}

impl ProcessKey {
    pub fn base(name: impl Into<String>) -> Self {
        Self {
            owner: Owner::Base,
            name: name.into(),
        }
    }

    pub fn device(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: Owner::Device(uuid.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for ProcessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// What the event loop does when a process exits on its own.
///
/// The launcher never restarts anything; this policy is consulted by the
/// event loop when an exit report arrives for a handle it did not stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Leave the process stopped (default).
    #[default]
    Never,
    /// Restart only after a non-zero or signalled exit.
    OnCrash,
    /// Restart after any exit.
    Always,
}

impl RestartPolicy {
    /// Returns `true` if an exit with the given outcome warrants a restart.
    pub fn should_restart(self, exited_successfully: bool) -> bool {
        match self {
            RestartPolicy::Never => false,
            RestartPolicy::OnCrash => !exited_successfully,
            RestartPolicy::Always => true,
        }
    }
}

/// Everything needed to launch one external worker.
#[derive(Clone)]
pub struct ProcessSpec {
    pub key: ProcessKey,
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Structured metadata attached to every log record of this process.
    pub fields: Vec<(String, String)>,
    /// Decides which output lines are kept; `None` keeps all of them.
    pub filter: Option<Arc<dyn LineFilter>>,
    /// Log tracker entry that retained lines are appended to.
    pub log_key: String,
}

impl ProcessSpec {
    /// Creates a spec with no arguments; retained output goes to the log
    /// tracker entry named after the logical process name.
    pub fn new(key: ProcessKey, binary: impl Into<PathBuf>) -> Self {
        let log_key = key.name.clone();
        Self {
            key,
            binary: binary.into(),
            args: Vec::new(),
            working_dir: None,
            fields: Vec::new(),
            filter: None,
            log_key,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }

    pub fn filter(mut self, filter: Arc<dyn LineFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Renders the metadata fields as `k=v k=v` for log records.
    pub fn rendered_fields(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Debug for ProcessSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSpec")
            .field("key", &self.key)
            .field("binary", &self.binary)
            .field("args", &self.args)
            .field("working_dir", &self.working_dir)
            .field("fields", &self.fields)
            .field("filtered", &self.filter.is_some())
            .field("log_key", &self.log_key)
            .finish()
    }
}

/// How a supervised process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    pub key: ProcessKey,
    /// Instance id of the handle that exited.
    pub instance: Uuid,
    /// Exit code, absent when the process was killed by a signal.
    pub code: Option<i32>,
    pub success: bool,
    /// Human-readable exit status.
    pub detail: String,
}

/// Runtime state of a supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Exited(ExitReport),
}

/// Shared, read-mostly view of one launched process.
///
/// Cloning a handle is cheap; all clones observe the same state.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    key: ProcessKey,
    instance: Uuid,
    pid: Option<u32>,
    log_key: String,
    state: watch::Receiver<ProcessState>,
    terminate: Arc<Notify>,
    kill: Arc<Notify>,
}

impl ProcessHandle {
    /// Creates a running handle together with the signal its launcher uses
    /// to report the exit.
    pub fn new(key: ProcessKey, log_key: impl Into<String>, pid: Option<u32>) -> (Self, ExitSignal) {
        let (tx, rx) = watch::channel(ProcessState::Running);
        let terminate = Arc::new(Notify::new());
        let kill = Arc::new(Notify::new());
        let instance = Uuid::new_v4();
        let handle = Self {
            key: key.clone(),
            instance,
            pid,
            log_key: log_key.into(),
            state: rx,
            terminate: Arc::clone(&terminate),
            kill: Arc::clone(&kill),
        };
        let signal = ExitSignal {
            key,
            instance,
            state: tx,
            terminate,
            kill,
        };
        (handle, signal)
    }

    pub fn key(&self) -> &ProcessKey {
        &self.key
    }

    pub fn instance(&self) -> Uuid {
        self.instance
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Log tracker entry this process appends to.
    pub fn log_key(&self) -> &str {
        &self.log_key
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.borrow(), ProcessState::Running)
    }

    /// Returns the exit report once the process has exited.
    pub fn exit_report(&self) -> Option<ExitReport> {
        match &*self.state.borrow() {
            ProcessState::Running => None,
            ProcessState::Exited(report) => Some(report.clone()),
        }
    }

    /// Waits until the launcher observes the process exit.
    pub async fn wait_exit(&self) -> ExitReport {
        let mut state = self.state.clone();
        loop {
            if let ProcessState::Exited(report) = &*state.borrow_and_update() {
                return report.clone();
            }
            if state.changed().await.is_err() {
                // The launcher dropped its signal without reporting.
                return ExitReport {
                    key: self.key.clone(),
                    instance: self.instance,
                    code: None,
                    success: false,
                    detail: "supervisor lost track of the process".to_string(),
                };
            }
        }
    }

    /// Asks the launcher to terminate the process gracefully.
    ///
    /// The request is delivered by whoever owns the child, so it is never
    /// sent to a pid that has already been reaped.
    pub fn request_terminate(&self) {
        self.terminate.notify_one();
    }

    /// Asks the launcher to kill the process forcefully.
    pub fn request_kill(&self) {
        self.kill.notify_one();
    }
}

/// Launcher-side half of a [`ProcessHandle`].
#[derive(Debug)]
pub struct ExitSignal {
    key: ProcessKey,
    instance: Uuid,
    state: watch::Sender<ProcessState>,
    terminate: Arc<Notify>,
    kill: Arc<Notify>,
}

impl ExitSignal {
    pub fn key(&self) -> &ProcessKey {
        &self.key
    }

    pub fn instance(&self) -> Uuid {
        self.instance
    }

    /// Completes when some handle called [`ProcessHandle::request_terminate`].
    pub async fn terminate_requested(&self) {
        self.terminate.notified().await;
    }

    /// Completes when some handle called [`ProcessHandle::request_kill`].
    pub async fn kill_requested(&self) {
        self.kill.notified().await;
    }

    /// Builds a report for this instance.
    pub fn report(&self, code: Option<i32>, success: bool, detail: impl Into<String>) -> ExitReport {
        ExitReport {
            key: self.key.clone(),
            instance: self.instance,
            code,
            success,
            detail: detail.into(),
        }
    }

    /// Flips every clone of the handle to `Exited`.
    pub fn mark_exited(&self, report: ExitReport) {
        self.state.send_replace(ProcessState::Exited(report));
    }
}

/// Error type for supervisor operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A process with the same key is still live.
    #[error("process {0} is already running")]
    AlreadyRunning(ProcessKey),

    /// The handle has already exited.
    #[error("process {0} is not running")]
    NotRunning(ProcessKey),

    /// The OS refused to spawn the binary.
    #[error("failed to spawn {} for {key}: {source}", .binary.display())]
    Spawn {
        key: ProcessKey,
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The process survived both the termination signal and the kill.
    #[error("process {0} did not exit after being killed")]
    StopTimedOut(ProcessKey),
}

/// Starts and stops supervised processes.
///
/// Implementations never restart a process on their own.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Launches `spec` and begins capturing its output.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::AlreadyRunning`] if a process with the same
    /// key is live, or [`SupervisorError::Spawn`] if the OS refused it.
    async fn start(&self, spec: ProcessSpec) -> Result<ProcessHandle, SupervisorError>;

    /// Terminates the process and waits (bounded) for it to exit.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::NotRunning`] if the handle already exited.
    async fn stop(&self, handle: &ProcessHandle) -> Result<ExitReport, SupervisorError>;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_key_display_joins_owner_and_name() {
        assert_eq!(ProcessKey::base("provider").to_string(), "base/provider");
        assert_eq!(ProcessKey::device("dev-1", "mirror").to_string(), "dev-1/mirror");
    }

    #[test]
    fn test_restart_policy_defaults_to_never() {
        assert_eq!(RestartPolicy::default(), RestartPolicy::Never);
    }

    #[test]
    fn test_restart_policy_decisions() {
        assert!(!RestartPolicy::Never.should_restart(false));
        assert!(RestartPolicy::OnCrash.should_restart(false));
        assert!(!RestartPolicy::OnCrash.should_restart(true));
        assert!(RestartPolicy::Always.should_restart(true));
    }

    #[test]
    fn test_spec_builder_collects_args_and_fields() {
        let spec = ProcessSpec::new(ProcessKey::device("dev-1", "mirror"), "/usr/bin/mirror")
            .args(["--port", "8200"])
            .field("video_port", "8200")
            .field("device_name", "lab-phone");

        assert_eq!(spec.args, vec!["--port", "8200"]);
        assert_eq!(spec.log_key, "mirror");
        assert_eq!(spec.rendered_fields(), "video_port=8200 device_name=lab-phone");
    }

    #[tokio::test]
    async fn test_handle_observes_exit_marked_by_signal() {
        let (handle, signal) = ProcessHandle::new(ProcessKey::base("trigger"), "trigger", Some(7));
        let clone = handle.clone();
        assert!(handle.is_running());

        signal.mark_exited(signal.report(Some(0), true, "exit status: 0"));

        let report = clone.wait_exit().await;
        assert!(!handle.is_running());
        assert_eq!(report.code, Some(0));
        assert_eq!(report.instance, handle.instance());
        assert_eq!(handle.exit_report(), Some(report));
    }

    #[tokio::test]
    async fn test_wait_exit_reports_lost_process_when_signal_dropped() {
        let (handle, signal) = ProcessHandle::new(ProcessKey::base("trigger"), "trigger", None);
        drop(signal);

        let report = handle.wait_exit().await;
        assert!(!report.success);
        assert_eq!(report.code, None);
    }

    #[tokio::test]
    async fn test_request_kill_wakes_signal() {
        let (handle, signal) = ProcessHandle::new(ProcessKey::base("trigger"), "trigger", None);
        handle.request_kill();
        // The permit is stored even though nobody was waiting yet.
        tokio::time::timeout(std::time::Duration::from_secs(1), signal.kill_requested())
            .await
            .expect("kill request must be observed");
    }

    #[tokio::test]
    async fn test_terminate_and_kill_requests_are_separate() {
        let (handle, signal) = ProcessHandle::new(ProcessKey::base("trigger"), "trigger", None);
        handle.request_terminate();

        tokio::time::timeout(std::time::Duration::from_secs(1), signal.terminate_requested())
            .await
            .expect("terminate request must be observed");
        let kill = tokio::time::timeout(std::time::Duration::from_millis(20), signal.kill_requested()).await;
        assert!(kill.is_err(), "terminate must not count as kill");
    }

    #[test]
    fn test_handles_get_distinct_instance_ids() {
        let (a, _sa) = ProcessHandle::new(ProcessKey::base("x"), "x", None);
        let (b, _sb) = ProcessHandle::new(ProcessKey::base("x"), "x", None);
        assert_ne!(a.instance(), b.instance());
    }
}
