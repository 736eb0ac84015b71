//! ProcessSupervisor: tokio-based launcher for external worker processes.
//!
//! # Per-process tasks
//!
//! ```text
//!            ┌── stdout pump ──┐
//!  child ────┤                 ├──► line channel ──► reader task ──► filter ──► tracing + LogTracker
//!            └── stderr pump ──┘                         │
//!                                                        └── wait() ──► ExitSignal + exit channel ──► drain
//! ```
//!
//! The reader task owns the child: it is the only place that signals and
//! reaps it.  Once `wait()` returns, the handle is marked exited and the exit
//! report sent before anything else; output still buffered in the pipes is
//! then drained under one overall deadline.  `stop` asks the reader task to
//! send `SIGTERM` and waits on the handle; when the stop timeout elapses it
//! asks for `start_kill()` and waits once more for the kill grace period.
//!
//! A live table keyed by [`ProcessKey`] enforces "at most one running
//! process per key".  The check and the insert happen under one lock around
//! the (synchronous) spawn, so concurrent starts cannot both succeed.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use farm_core::LogTracker;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::application::line_filter::LineFilter;
use crate::application::supervision::{
    ExitReport, ExitSignal, ProcessHandle, ProcessKey, ProcessLauncher, ProcessSpec,
    SupervisorError,
};

/// Buffered output lines per process before the pumps wait on the reader.
const LINE_CHANNEL_CAPACITY: usize = 256;

/// Total time the reader keeps draining output once the child has exited.
const OUTPUT_DRAIN: Duration = Duration::from_millis(200);

/// Stop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// How long `stop` waits after `SIGTERM`.
    pub stop_timeout: Duration,
    /// How long `stop` waits after the forceful kill.
    pub kill_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_millis(5000),
            kill_grace: Duration::from_millis(2000),
        }
    }
}

type LiveTable = Arc<Mutex<HashMap<ProcessKey, ProcessHandle>>>;

/// Launches worker processes and captures their output.
pub struct ProcessSupervisor {
    tracker: Arc<LogTracker>,
    config: SupervisorConfig,
    exits: mpsc::UnboundedSender<ExitReport>,
    live: LiveTable,
}

impl ProcessSupervisor {
    /// Creates a supervisor and the receiver its exit reports arrive on.
    pub fn new(
        tracker: Arc<LogTracker>,
        config: SupervisorConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ExitReport>) {
        let (exits, rx) = mpsc::unbounded_channel();
        let supervisor = Self {
            tracker,
            config,
            exits,
            live: Arc::new(Mutex::new(HashMap::new())),
        };
        (supervisor, rx)
    }

    /// Number of processes currently running.
    pub fn live_count(&self) -> usize {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|h| h.is_running())
            .count()
    }

    fn spawn_locked(&self, spec: &ProcessSpec) -> Result<(ProcessHandle, ExitSignal, Child), SupervisorError> {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        if live.get(&spec.key).is_some_and(ProcessHandle::is_running) {
            return Err(SupervisorError::AlreadyRunning(spec.key.clone()));
        }

        let mut command = Command::new(&spec.binary);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }
        let child = command.spawn().map_err(|source| SupervisorError::Spawn {
            key: spec.key.clone(),
            binary: spec.binary.clone(),
            source,
        })?;

        let (handle, signal) = ProcessHandle::new(spec.key.clone(), spec.log_key.clone(), child.id());
        live.insert(spec.key.clone(), handle.clone());
        Ok((handle, signal, child))
    }
}

#[async_trait]
impl ProcessLauncher for ProcessSupervisor {
    async fn start(&self, spec: ProcessSpec) -> Result<ProcessHandle, SupervisorError> {
        let (handle, signal, mut child) = self.spawn_locked(&spec)?;
        info!(
            process = %spec.key,
            pid = ?handle.pid(),
            instance = %handle.instance(),
            binary = %spec.binary.display(),
            "process started"
        );

        let (line_tx, line_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, line_tx));
        }

        let output = OutputSink {
            key: spec.key.clone(),
            log_key: spec.log_key.clone(),
            fields: spec.rendered_fields(),
            filter: spec.filter.clone(),
            tracker: Arc::clone(&self.tracker),
        };
        tokio::spawn(supervise(
            child,
            line_rx,
            output,
            signal,
            self.exits.clone(),
            Arc::clone(&self.live),
        ));
        Ok(handle)
    }

    async fn stop(&self, handle: &ProcessHandle) -> Result<ExitReport, SupervisorError> {
        if !handle.is_running() {
            return Err(SupervisorError::NotRunning(handle.key().clone()));
        }
        debug!(process = %handle.key(), pid = ?handle.pid(), "terminating process");
        handle.request_terminate();

        if let Ok(report) = timeout(self.config.stop_timeout, handle.wait_exit()).await {
            return Ok(report);
        }
        warn!(
            process = %handle.key(),
            timeout_ms = self.config.stop_timeout.as_millis() as u64,
            "process ignored termination; killing"
        );
        handle.request_kill();
        match timeout(self.config.kill_grace, handle.wait_exit()).await {
            Ok(report) => Ok(report),
            Err(_) => {
                error!(process = %handle.key(), "process survived kill");
                Err(SupervisorError::StopTimedOut(handle.key().clone()))
            }
        }
    }
}

/// Asks the child to exit gracefully.
#[cfg(unix)]
fn terminate(child: &mut Child, key: &ProcessKey) {
    let Some(pid) = child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        // Already reaped.
        return;
    };
    // SAFETY: `kill` has no memory-safety preconditions.  `Child::id` only
    // returns a pid until the child is reaped, and reaping happens on this
    // task, so the pid still names our child.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        debug!(process = %key, pid, "SIGTERM failed; falling back to kill");
        kill(child, key);
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child, key: &ProcessKey) {
    kill(child, key);
}

fn kill(child: &mut Child, key: &ProcessKey) {
    if let Err(e) = child.start_kill() {
        debug!(process = %key, "kill failed: {e}");
    }
}

/// Where retained output lines go.
struct OutputSink {
    key: ProcessKey,
    log_key: String,
    fields: String,
    filter: Option<Arc<dyn LineFilter>>,
    tracker: Arc<LogTracker>,
}

impl OutputSink {
    fn record(&self, line: &str) {
        if let Some(filter) = &self.filter {
            if !filter.should_retain(line) {
                return;
            }
        }
        info!(
            process = %self.key.name,
            owner = %self.key.owner,
            meta = %self.fields,
            "{line}"
        );
        self.tracker.append(&self.log_key, line);
    }
}

/// Forwards lines from one pipe until EOF.  Invalid UTF-8 is replaced.
async fn pump_lines<R>(reader: R, lines: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(|c| c == '\n' || c == '\r')
                    .to_string();
                if lines.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("output pipe read failed: {e}");
                break;
            }
        }
    }
}

/// Reader task: drains output, reaps the child and reports the exit.
async fn supervise(
    mut child: Child,
    mut lines: mpsc::Receiver<String>,
    output: OutputSink,
    signal: ExitSignal,
    exits: mpsc::UnboundedSender<ExitReport>,
    live: LiveTable,
) {
    let mut eof = false;
    let status = loop {
        tokio::select! {
            line = lines.recv(), if !eof => match line {
                Some(line) => output.record(&line),
                None => eof = true,
            },
            status = child.wait() => break status,
            _ = signal.terminate_requested() => terminate(&mut child, signal.key()),
            _ = signal.kill_requested() => kill(&mut child, signal.key()),
        }
    };

    // Lines the pumps have already forwarded belong before the exit record.
    while let Ok(line) = lines.try_recv() {
        output.record(&line);
    }

    let report = match status {
        Ok(status) => signal.report(status.code(), status.success(), status.to_string()),
        Err(e) => signal.report(None, false, format!("wait failed: {e}")),
    };
    if report.success {
        info!(process = %report.key, code = ?report.code, "process exited");
    } else {
        warn!(process = %report.key, code = ?report.code, status = %report.detail, "process exited");
    }

    {
        let mut live = live.lock().unwrap_or_else(PoisonError::into_inner);
        if live
            .get(&report.key)
            .is_some_and(|h| h.instance() == report.instance)
        {
            live.remove(&report.key);
        }
    }
    let key = report.key.clone();
    signal.mark_exited(report.clone());
    // The receiver only goes away while the coordinator shuts down.
    let _ = exits.send(report);

    // Grandchildren may hold the pipes open, and keep writing, long after
    // the child is gone.
    if !eof {
        let drain = async {
            while let Some(line) = lines.recv().await {
                output.record(&line);
            }
        };
        if timeout(OUTPUT_DRAIN, drain).await.is_err() {
            debug!(process = %key, "output still open after exit; detaching");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
