//! DeviceEventLoop: the single writer of device state.
//!
//! Hardware triggers arrive from many HTTP handler tasks, but every state
//! transition is applied here, one event at a time, in enqueue order.  The
//! loop owns the [`DeviceRegistry`], the [`BaseProcessRegistry`] and the
//! [`PortAllocator`] outright, so none of them needs a lock.
//!
//! ```text
//!   HTTP handlers ──EventSender──► bounded mpsc ──┐
//!                                                 ├──► DeviceEventLoop ──► ProcessLauncher
//!   ProcessSupervisor ──exit reports──► mpsc ─────┘          │
//!                                                            └──► watch<FleetStatus> ──► status pages
//! ```
//!
//! Nothing in here may bring the coordinator down: launcher failures,
//! unknown uuids and port exhaustion are logged and contained to the
//! affected device.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use farm_core::{
    fix_uuid, DeviceEvent, FleetStatus, FrameGeometry, PortAllocator, MIRROR_INTERFACE_CLASS,
    MIRROR_INTERFACE_SUBCLASS,
};
use thiserror::Error;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use super::device_registry::{BaseProcessRegistry, DeviceRecord, DeviceRegistry, OwnedProcess};
use super::supervision::{ExitReport, Owner, ProcessHandle, ProcessLauncher, SupervisorError};
use super::worker_catalog::{WorkerCatalog, WorkerScope};

/// Why an event could not be queued.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    /// The queue stayed full for the whole enqueue timeout.
    #[error("event queue full; event dropped after {0:?}")]
    Timeout(Duration),
    /// The event loop has shut down.
    #[error("event loop is not running")]
    Closed,
}

/// Cloneable producer side of the event queue.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<DeviceEvent>,
    timeout: Duration,
}

impl EventSender {
    /// Queues `event`, waiting at most the enqueue timeout for space.
    ///
    /// A dropped event is logged here, callers only need the result to pick
    /// a response status.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Timeout`] if the queue stayed full and
    /// [`EnqueueError::Closed`] if the loop is gone.
    pub async fn send(&self, event: DeviceEvent) -> Result<(), EnqueueError> {
        match self.tx.send_timeout(event, self.timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(event)) => {
                warn!(uuid = %event.uuid(), kind = event.kind(), "event queue full; dropping event");
                Err(EnqueueError::Timeout(self.timeout))
            }
            Err(SendTimeoutError::Closed(event)) => {
                warn!(uuid = %event.uuid(), kind = event.kind(), "event loop closed; dropping event");
                Err(EnqueueError::Closed)
            }
        }
    }
}

/// Creates the bounded event queue.
pub fn event_queue(capacity: usize, enqueue_timeout: Duration) -> (EventSender, mpsc::Receiver<DeviceEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        EventSender {
            tx,
            timeout: enqueue_timeout,
        },
        rx,
    )
}

/// Loop tuning that does not belong to the worker catalog.
#[derive(Debug, Clone, Default)]
pub struct LoopConfig {
    /// Upper bound on automatic restarts per logical process.
    pub max_restarts: u32,
    /// Display names keyed by normalised uuid.
    pub device_names: HashMap<String, String>,
}

/// The device lifecycle actor.
pub struct DeviceEventLoop {
    registry: DeviceRegistry,
    base: BaseProcessRegistry,
    ports: PortAllocator,
    catalog: WorkerCatalog,
    launcher: Arc<dyn ProcessLauncher>,
    config: LoopConfig,
    status_tx: watch::Sender<FleetStatus>,
}

impl DeviceEventLoop {
    /// Creates the loop and the receiver its status snapshots are published on.
    pub fn new(
        ports: PortAllocator,
        catalog: WorkerCatalog,
        launcher: Arc<dyn ProcessLauncher>,
        config: LoopConfig,
    ) -> (Self, watch::Receiver<FleetStatus>) {
        let (status_tx, status_rx) = watch::channel(FleetStatus::default());
        let event_loop = Self {
            registry: DeviceRegistry::new(),
            base: BaseProcessRegistry::new(),
            ports,
            catalog,
            launcher,
            config,
            status_tx,
        };
        (event_loop, status_rx)
    }

    /// Read-only view of the registry.
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn base_processes(&self) -> &BaseProcessRegistry {
        &self.base
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    /// Runs until `shutdown` fires (or its sender is dropped), then stops
    /// every device and base process.
    ///
    /// Losing every event sender does not end the loop: devices that are
    /// already connected keep being supervised.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<DeviceEvent>,
        mut exits: mpsc::UnboundedReceiver<ExitReport>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        self.start_base_processes().await;
        info!("device event loop running");

        let mut accepting = true;
        loop {
            tokio::select! {
                event = events.recv(), if accepting => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!("event queue closed; no further device events will arrive");
                        accepting = false;
                    }
                },
                Some(report) = exits.recv() => self.handle_exit(report).await,
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        self.shutdown().await;
        info!("device event loop stopped");
    }

    /// Starts every base-scope worker that is not already running.
    pub async fn start_base_processes(&mut self) {
        for name in self.catalog.names_in_scope(WorkerScope::Base) {
            self.start_base_worker(&name, 0).await;
        }
        self.publish_status();
    }

    /// Applies one device event and publishes the resulting status.
    pub async fn handle_event(&mut self, event: DeviceEvent) {
        let uuid = fix_uuid(event.uuid());
        debug!(uuid = %uuid, kind = event.kind(), "applying device event");
        match event {
            DeviceEvent::Connect { .. } => self.connect(uuid).await,
            DeviceEvent::Disconnect { .. } => self.disconnect(&uuid).await,
            DeviceEvent::InterfaceAdded { class, subclass, .. } => {
                self.interface_added(&uuid, class, subclass).await
            }
            DeviceEvent::FrameConfigured {
                width,
                height,
                click_scale,
                ..
            } => {
                let geometry = FrameGeometry::from_frame(width, height, click_scale);
                self.frame_configured(&uuid, geometry).await
            }
        }
        self.publish_status();
    }

    /// Applies a process exit reported by the launcher.
    ///
    /// Reports for instances the registry no longer holds (stopped by the
    /// loop itself, or superseded by a restart) are ignored.
    pub async fn handle_exit(&mut self, report: ExitReport) {
        let name = report.key.name.clone();
        let current = match &report.key.owner {
            Owner::Base => self.base.get(&name),
            Owner::Device(uuid) => self.registry.get(uuid).and_then(|r| r.process(&name)),
        };
        let Some(owned) = current.filter(|p| p.handle.instance() == report.instance) else {
            debug!(process = %report.key, instance = %report.instance, "ignoring exit of superseded process");
            return;
        };
        let restarts = owned.restarts;

        if report.success {
            info!(process = %report.key, code = ?report.code, "process exited");
        } else {
            warn!(process = %report.key, code = ?report.code, detail = %report.detail, "process crashed");
        }

        let policy = self.catalog.restart_policy(&name);
        if !policy.should_restart(report.success) {
            self.publish_status();
            return;
        }
        if restarts >= self.config.max_restarts {
            error!(
                process = %report.key,
                restarts,
                "restart limit reached; leaving process stopped"
            );
            self.publish_status();
            return;
        }

        info!(process = %report.key, attempt = restarts + 1, ?policy, "restarting process");
        match &report.key.owner {
            Owner::Base => self.start_base_worker(&name, restarts + 1).await,
            Owner::Device(uuid) => {
                let uuid = uuid.clone();
                self.start_device_worker(&uuid, &name, restarts + 1).await
            }
        }
        self.publish_status();
    }

    /// Stops every device and base process.
    pub async fn shutdown(&mut self) {
        for uuid in self.registry.uuids() {
            self.disconnect(&uuid).await;
        }
        for (name, owned) in self.base.take_all() {
            stop_process(self.launcher.as_ref(), &name, &owned.handle).await;
        }
        self.publish_status();
    }

    // ── Event handlers ───────────────────────────────────────────────────────

    async fn connect(&mut self, uuid: String) {
        if self.registry.contains(&uuid) {
            info!(uuid = %uuid, "device already connected; ignoring duplicate connect");
            return;
        }
        let ports = match self.ports.allocate(&uuid) {
            Ok(ports) => ports,
            Err(e) => {
                error!(uuid = %uuid, error = %e, "cannot allocate ports; device ignored");
                return;
            }
        };
        let name = self
            .config
            .device_names
            .get(&uuid)
            .cloned()
            .unwrap_or_else(|| uuid.clone());
        info!(
            uuid = %uuid,
            name = %name,
            vnc_port = ports.vnc_port,
            video_port = ports.video_port,
            wda_port = ports.wda_port,
            bridge_port = ports.bridge_port,
            "device connected"
        );
        self.registry.insert(DeviceRecord::new(uuid.clone(), name, ports));

        for worker in self.catalog.names_in_scope(WorkerScope::Connect) {
            self.start_device_worker(&uuid, &worker, 0).await;
        }
    }

    async fn disconnect(&mut self, uuid: &str) {
        let Some(mut record) = self.registry.remove(uuid) else {
            warn!(uuid, "disconnect for unknown device; ignoring");
            return;
        };
        for (name, owned) in record.take_processes() {
            stop_process(self.launcher.as_ref(), &name, &owned.handle).await;
        }
        self.ports.release(uuid);
        info!(uuid, "device disconnected");
    }

    async fn interface_added(&mut self, uuid: &str, class: u8, subclass: u8) {
        if class != MIRROR_INTERFACE_CLASS || subclass != MIRROR_INTERFACE_SUBCLASS {
            debug!(uuid, class, subclass, "ignoring non-mirror interface");
            return;
        }
        if !self.registry.contains(uuid) {
            warn!(uuid, "mirror interface for unknown device; ignoring");
            return;
        }
        info!(uuid, "mirror interface available");
        for worker in self.catalog.names_in_scope(WorkerScope::Interface) {
            self.start_device_worker(uuid, &worker, 0).await;
        }
    }

    async fn frame_configured(&mut self, uuid: &str, geometry: FrameGeometry) {
        let Some(record) = self.registry.get_mut(uuid) else {
            warn!(uuid, "frame geometry for unknown device; ignoring");
            return;
        };
        if record.geometry != Some(geometry) {
            info!(
                uuid,
                stream_width = geometry.stream_width,
                stream_height = geometry.stream_height,
                click_width = geometry.click_width,
                click_height = geometry.click_height,
                click_scale = geometry.click_scale,
                "frame geometry updated"
            );
        }
        record.geometry = Some(geometry);

        let stale: Vec<String> = record
            .processes()
            .filter(|(name, owned)| {
                owned.handle.is_running()
                    && owned.geometry != Some(geometry)
                    && self.catalog.is_geometry_sensitive(name)
            })
            .map(|(name, _)| name.clone())
            .collect();

        for name in stale {
            info!(uuid, process = %name, "restarting worker with new geometry");
            let restarts = match self.registry.get_mut(uuid).and_then(|r| r.remove_process(&name)) {
                Some(owned) => {
                    stop_process(self.launcher.as_ref(), &name, &owned.handle).await;
                    owned.restarts
                }
                None => 0,
            };
            self.start_device_worker(uuid, &name, restarts).await;
        }
    }

    // ── Process helpers ──────────────────────────────────────────────────────

    async fn start_device_worker(&mut self, uuid: &str, name: &str, restarts: u32) {
        let Some(template) = self.catalog.get(name) else {
            warn!(uuid, process = name, "no worker template; skipping");
            return;
        };
        let Some(record) = self.registry.get(uuid) else {
            return;
        };
        if record.is_running(name) {
            debug!(uuid, process = name, "worker already running");
            return;
        }
        let geometry = record.geometry;
        let spec = self.catalog.device_spec(template, &record.context());

        match self.launcher.start(spec).await {
            Ok(handle) => {
                info!(uuid, process = name, pid = ?handle.pid(), "worker started");
                if let Some(record) = self.registry.get_mut(uuid) {
                    record.insert_process(name, OwnedProcess::new(handle, geometry, restarts));
                }
            }
            Err(SupervisorError::AlreadyRunning(key)) => {
                debug!(process = %key, "worker already running; nothing to do");
            }
            Err(e) => {
                error!(uuid, process = name, error = %e, "failed to start worker");
            }
        }
    }

    async fn start_base_worker(&mut self, name: &str, restarts: u32) {
        let Some(template) = self.catalog.get(name) else {
            warn!(process = name, "no worker template; skipping");
            return;
        };
        if self.base.get(name).is_some_and(|p| p.handle.is_running()) {
            debug!(process = name, "base process already running");
            return;
        }
        let spec = self.catalog.base_spec(template);

        match self.launcher.start(spec).await {
            Ok(handle) => {
                info!(process = name, pid = ?handle.pid(), "base process started");
                self.base.insert(name, OwnedProcess::new(handle, None, restarts));
            }
            Err(SupervisorError::AlreadyRunning(key)) => {
                debug!(process = %key, "base process already running; nothing to do");
            }
            Err(e) => {
                error!(process = name, error = %e, "failed to start base process");
            }
        }
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(FleetStatus {
            base: self.base.statuses(),
            devices: self.registry.statuses(),
        });
    }
}

async fn stop_process(launcher: &dyn ProcessLauncher, name: &str, handle: &ProcessHandle) {
    match launcher.stop(handle).await {
        Ok(report) => {
            info!(process = %handle.key(), code = ?report.code, "worker stopped");
        }
        Err(SupervisorError::NotRunning(_)) => {
            debug!(process = name, "worker already stopped");
        }
        Err(e) => {
            error!(process = %handle.key(), error = %e, "failed to stop worker");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::supervision::{ProcessKey, RestartPolicy};
    use crate::application::worker_catalog::WorkerTemplate;
    use crate::infrastructure::process::mock::MockLauncher;
    use farm_core::PortRanges;
    use std::collections::BTreeMap;
    use tokio_test::{assert_err, assert_ok};

    const UUID: &str = "abcdefab-cdefabcdefabcdef";

    fn catalog(mirror_restart: RestartPolicy) -> WorkerCatalog {
        let mut mirror = WorkerTemplate::new("mirror", "/opt/farm/mirror", WorkerScope::Interface);
        mirror.geometry_sensitive = true;
        mirror.restart = mirror_restart;
        mirror.args = vec!["--size={stream_width}x{stream_height}".into()];
        WorkerCatalog::new(
            vec![
                WorkerTemplate::new("bridge", "/opt/farm/bridge", WorkerScope::Connect),
                mirror,
                WorkerTemplate::new("provider", "/opt/farm/provider", WorkerScope::Base),
            ],
            BTreeMap::new(),
        )
    }

    fn event_loop(
        mirror_restart: RestartPolicy,
    ) -> (DeviceEventLoop, Arc<MockLauncher>, mpsc::UnboundedReceiver<ExitReport>) {
        let (launcher, exits) = MockLauncher::new();
        let launcher = Arc::new(launcher);
        let ports = PortAllocator::new(PortRanges::default(), &[]).unwrap();
        let config = LoopConfig {
            max_restarts: 2,
            device_names: HashMap::from([(UUID.to_string(), "lab-phone".to_string())]),
        };
        let (event_loop, _status) =
            DeviceEventLoop::new(ports, catalog(mirror_restart), launcher.clone(), config);
        (event_loop, launcher, exits)
    }

    fn connect(uuid: &str) -> DeviceEvent {
        DeviceEvent::Connect { uuid: uuid.into() }
    }

    fn mirror_interface(uuid: &str) -> DeviceEvent {
        DeviceEvent::InterfaceAdded {
            uuid: uuid.into(),
            class: 0xff,
            subclass: 0x2a,
        }
    }

    #[tokio::test]
    async fn test_connect_creates_record_and_starts_connect_workers() {
        let (mut lp, launcher, _exits) = event_loop(RestartPolicy::Never);

        lp.handle_event(connect(UUID)).await;

        let record = lp.registry().get(UUID).expect("record");
        assert_eq!(record.name, "lab-phone");
        assert!(record.is_running("bridge"));
        assert!(!record.is_running("mirror"));
        assert_eq!(launcher.start_count(&ProcessKey::device(UUID, "bridge")), 1);
    }

    #[tokio::test]
    async fn test_connect_normalises_bare_uuid() {
        let (mut lp, _launcher, _exits) = event_loop(RestartPolicy::Never);

        lp.handle_event(connect("abcdefabcdefabcdefabcdef")).await;

        assert!(lp.registry().contains(UUID));
    }

    #[tokio::test]
    async fn test_duplicate_connect_is_a_no_op() {
        let (mut lp, launcher, _exits) = event_loop(RestartPolicy::Never);

        lp.handle_event(connect(UUID)).await;
        let ports = lp.ports().get(UUID);
        lp.handle_event(connect(UUID)).await;

        assert_eq!(lp.registry().len(), 1);
        assert_eq!(lp.ports().allocated_count(), 1);
        assert_eq!(lp.ports().get(UUID), ports);
        assert_eq!(launcher.start_count(&ProcessKey::device(UUID, "bridge")), 1);
    }

    #[tokio::test]
    async fn test_disconnect_stops_processes_and_releases_ports() {
        let (mut lp, launcher, _exits) = event_loop(RestartPolicy::Never);
        lp.handle_event(connect(UUID)).await;
        lp.handle_event(mirror_interface(UUID)).await;

        lp.handle_event(DeviceEvent::Disconnect { uuid: UUID.into() }).await;

        assert!(lp.registry().is_empty());
        assert_eq!(lp.ports().allocated_count(), 0);
        let stopped = launcher.stopped();
        assert!(stopped.contains(&ProcessKey::device(UUID, "bridge")));
        assert!(stopped.contains(&ProcessKey::device(UUID, "mirror")));
        assert_eq!(launcher.live_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_uuid_events_are_ignored() {
        let (mut lp, launcher, _exits) = event_loop(RestartPolicy::Never);

        lp.handle_event(DeviceEvent::Disconnect { uuid: "ghost".into() }).await;
        lp.handle_event(mirror_interface("ghost")).await;
        lp.handle_event(DeviceEvent::FrameConfigured {
            uuid: "ghost".into(),
            width: 750,
            height: 1334,
            click_scale: 2,
        })
        .await;

        assert!(lp.registry().is_empty());
        assert!(launcher.started_keys().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_mirror_interface_starts_mirror_once() {
        let (mut lp, launcher, _exits) = event_loop(RestartPolicy::Never);
        lp.handle_event(connect(UUID)).await;

        lp.handle_event(mirror_interface(UUID)).await;
        lp.handle_event(mirror_interface(UUID)).await;

        assert_eq!(launcher.start_count(&ProcessKey::device(UUID, "mirror")), 1);
    }

    #[tokio::test]
    async fn test_other_interface_starts_nothing() {
        let (mut lp, launcher, _exits) = event_loop(RestartPolicy::Never);
        lp.handle_event(connect(UUID)).await;

        lp.handle_event(DeviceEvent::InterfaceAdded {
            uuid: UUID.into(),
            class: 0x01,
            subclass: 0x01,
        })
        .await;

        assert_eq!(launcher.start_count(&ProcessKey::device(UUID, "mirror")), 0);
    }

    #[tokio::test]
    async fn test_frame_change_restarts_geometry_sensitive_worker() {
        let (mut lp, launcher, _exits) = event_loop(RestartPolicy::Never);
        lp.handle_event(connect(UUID)).await;
        lp.handle_event(mirror_interface(UUID)).await;
        let frame = DeviceEvent::FrameConfigured {
            uuid: UUID.into(),
            width: 750,
            height: 1334,
            click_scale: 2,
        };

        lp.handle_event(frame.clone()).await;
        // Same geometry again must not restart.
        lp.handle_event(frame).await;

        let mirror = ProcessKey::device(UUID, "mirror");
        assert_eq!(launcher.start_count(&mirror), 2);
        assert_eq!(launcher.stop_count(&mirror), 1);
        // Bridge is not geometry sensitive.
        assert_eq!(launcher.start_count(&ProcessKey::device(UUID, "bridge")), 1);
        let last = launcher.last_spec(&mirror).unwrap();
        assert_eq!(last.args, vec!["--size=750x1334"]);
    }

    #[tokio::test]
    async fn test_crash_with_never_policy_leaves_process_stopped() {
        let (mut lp, launcher, mut exits) = event_loop(RestartPolicy::Never);
        lp.handle_event(connect(UUID)).await;
        lp.handle_event(mirror_interface(UUID)).await;
        let mirror = ProcessKey::device(UUID, "mirror");

        assert!(launcher.crash(&mirror, 1));
        let report = exits.recv().await.unwrap();
        lp.handle_exit(report).await;

        assert!(!lp.registry().get(UUID).unwrap().is_running("mirror"));
        assert_eq!(launcher.start_count(&mirror), 1);
    }

    #[tokio::test]
    async fn test_on_crash_policy_restarts_up_to_limit() {
        let (mut lp, launcher, mut exits) = event_loop(RestartPolicy::OnCrash);
        lp.handle_event(connect(UUID)).await;
        lp.handle_event(mirror_interface(UUID)).await;
        let mirror = ProcessKey::device(UUID, "mirror");

        for _ in 0..3 {
            assert!(launcher.crash(&mirror, 1));
            let report = exits.recv().await.unwrap();
            lp.handle_exit(report).await;
        }

        // One initial start plus `max_restarts` (2) restarts.
        assert_eq!(launcher.start_count(&mirror), 3);
        let record = lp.registry().get(UUID).unwrap();
        assert!(!record.is_running("mirror"));
        assert_eq!(record.process("mirror").unwrap().restarts, 2);
    }

    #[tokio::test]
    async fn test_exit_of_superseded_instance_is_ignored() {
        let (mut lp, launcher, mut exits) = event_loop(RestartPolicy::Always);
        lp.handle_event(connect(UUID)).await;
        lp.handle_event(mirror_interface(UUID)).await;
        let mirror = ProcessKey::device(UUID, "mirror");

        // The geometry restart stops the first mirror instance itself.
        lp.handle_event(DeviceEvent::FrameConfigured {
            uuid: UUID.into(),
            width: 750,
            height: 1334,
            click_scale: 2,
        })
        .await;
        let report = exits.recv().await.unwrap();
        lp.handle_exit(report).await;

        assert_eq!(launcher.start_count(&mirror), 2);
        assert!(lp.registry().get(UUID).unwrap().is_running("mirror"));
    }

    #[tokio::test]
    async fn test_exit_after_disconnect_is_ignored() {
        let (mut lp, launcher, mut exits) = event_loop(RestartPolicy::Always);
        lp.handle_event(connect(UUID)).await;

        lp.handle_event(DeviceEvent::Disconnect { uuid: UUID.into() }).await;
        let report = exits.recv().await.unwrap();
        lp.handle_exit(report).await;

        assert!(lp.registry().is_empty());
        assert_eq!(launcher.start_count(&ProcessKey::device(UUID, "bridge")), 1);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_contained() {
        let (mut lp, launcher, _exits) = event_loop(RestartPolicy::Never);
        launcher.fail_spawns_of("/opt/farm/bridge");

        lp.handle_event(connect(UUID)).await;

        let record = lp.registry().get(UUID).expect("device still registered");
        assert!(record.process("bridge").is_none());
    }

    #[tokio::test]
    async fn test_status_is_published_after_events() {
        let (launcher, _exits) = MockLauncher::new();
        let ports = PortAllocator::new(PortRanges::default(), &[]).unwrap();
        let (mut lp, status) = DeviceEventLoop::new(
            ports,
            catalog(RestartPolicy::Never),
            Arc::new(launcher),
            LoopConfig::default(),
        );

        lp.start_base_processes().await;
        lp.handle_event(connect(UUID)).await;

        let snapshot = status.borrow().clone();
        assert_eq!(snapshot.base.len(), 1);
        assert!(snapshot.base[0].running);
        let device = snapshot.device(UUID).expect("device in snapshot");
        assert_eq!(device.name, UUID);
        assert!(device.process("bridge").unwrap().running);
    }

    #[tokio::test]
    async fn test_run_stops_everything_on_shutdown() {
        let (lp, launcher, exits) = event_loop(RestartPolicy::Never);
        let (events, rx) = event_queue(4, Duration::from_millis(50));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(lp.run(rx, exits, shutdown_rx));

        assert_ok!(events.send(connect(UUID)).await);
        // Wait for the loop to apply the connect.
        for _ in 0..100 {
            if launcher.live_count() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(launcher.live_count(), 2);

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();

        assert_eq!(launcher.live_count(), 0);
        assert!(launcher.stopped().contains(&ProcessKey::base("provider")));
        assert_err!(events.send(connect("other")).await);
    }

    #[tokio::test]
    async fn test_event_sender_times_out_when_queue_full() {
        let (events, _rx) = event_queue(1, Duration::from_millis(10));

        assert_ok!(events.send(connect("a")).await);
        let result = events.send(connect("b")).await;

        assert_eq!(result, Err(EnqueueError::Timeout(Duration::from_millis(10))));
    }

    #[tokio::test]
    async fn test_event_sender_reports_closed_queue() {
        let (events, rx) = event_queue(1, Duration::from_millis(10));
        drop(rx);

        assert_eq!(events.send(connect("a")).await, Err(EnqueueError::Closed));
    }
}
