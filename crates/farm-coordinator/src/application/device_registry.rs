//! Device registry and base-process registry.
//!
//! The [`DeviceRegistry`] is the coordinator's authoritative map of every
//! connected device and the worker processes it owns.  It is owned by the
//! device event loop and never shared: other components only ever see the
//! [`FleetStatus`] snapshots built from it.
//!
//! # Device lifecycle
//!
//! ```text
//! Absent ──Connect──► Connected ──InterfaceAdded / FrameConfigured──► Connected
//!    ▲                                                                    │
//!    └──────────────────────────── Disconnect ◄───────────────────────────┘
//! ```

use std::collections::{BTreeMap, HashMap};

use farm_core::{DeviceStatus, FrameGeometry, PortSet, ProcessStatus};

use super::supervision::ProcessHandle;
use super::worker_catalog::DeviceContext;

/// A worker handle together with the bookkeeping the loop needs.
#[derive(Debug, Clone)]
pub struct OwnedProcess {
    pub handle: ProcessHandle,
    /// Geometry the process was started with.
    pub geometry: Option<FrameGeometry>,
    /// Automatic restarts performed so far for this logical process.
    pub restarts: u32,
}

impl OwnedProcess {
    pub fn new(handle: ProcessHandle, geometry: Option<FrameGeometry>, restarts: u32) -> Self {
        Self {
            handle,
            geometry,
            restarts,
        }
    }

    fn status(&self, name: &str) -> ProcessStatus {
        ProcessStatus {
            name: name.to_string(),
            running: self.handle.is_running(),
            pid: self.handle.pid(),
            restarts: self.restarts,
        }
    }
}

/// Authoritative state of one connected device.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub uuid: String,
    pub name: String,
    pub ports: PortSet,
    pub geometry: Option<FrameGeometry>,
    processes: BTreeMap<String, OwnedProcess>,
}

impl DeviceRecord {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>, ports: PortSet) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            ports,
            geometry: None,
            processes: BTreeMap::new(),
        }
    }

    pub fn process(&self, name: &str) -> Option<&OwnedProcess> {
        self.processes.get(name)
    }

    /// Returns `true` if the named worker has a live handle.
    pub fn is_running(&self, name: &str) -> bool {
        self.processes
            .get(name)
            .is_some_and(|p| p.handle.is_running())
    }

    pub fn processes(&self) -> impl Iterator<Item = (&String, &OwnedProcess)> {
        self.processes.iter()
    }

    /// Stores a process under its logical name, returning the one it replaced.
    pub fn insert_process(&mut self, name: impl Into<String>, process: OwnedProcess) -> Option<OwnedProcess> {
        self.processes.insert(name.into(), process)
    }

    pub fn remove_process(&mut self, name: &str) -> Option<OwnedProcess> {
        self.processes.remove(name)
    }

    /// Removes and returns every owned process.
    pub fn take_processes(&mut self) -> Vec<(String, OwnedProcess)> {
        std::mem::take(&mut self.processes).into_iter().collect()
    }

    /// Values used to expand worker templates for this device.
    pub fn context(&self) -> DeviceContext<'_> {
        DeviceContext {
            uuid: &self.uuid,
            name: &self.name,
            ports: self.ports,
            geometry: self.geometry,
        }
    }

    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            uuid: self.uuid.clone(),
            name: self.name.clone(),
            ports: self.ports,
            geometry: self.geometry,
            processes: self
                .processes
                .iter()
                .map(|(name, p)| p.status(name))
                .collect(),
        }
    }
}

/// In-memory map of connected devices keyed by normalised uuid.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, DeviceRecord>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.devices.contains_key(uuid)
    }

    pub fn get(&self, uuid: &str) -> Option<&DeviceRecord> {
        self.devices.get(uuid)
    }

    pub fn get_mut(&mut self, uuid: &str) -> Option<&mut DeviceRecord> {
        self.devices.get_mut(uuid)
    }

    /// Adds a record.  Returns `false` and leaves the registry untouched if
    /// a record with the same uuid exists.
    pub fn insert(&mut self, record: DeviceRecord) -> bool {
        if self.devices.contains_key(&record.uuid) {
            return false;
        }
        self.devices.insert(record.uuid.clone(), record);
        true
    }

    pub fn remove(&mut self, uuid: &str) -> Option<DeviceRecord> {
        self.devices.remove(uuid)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Connected uuids, sorted.
    pub fn uuids(&self) -> Vec<String> {
        let mut uuids: Vec<String> = self.devices.keys().cloned().collect();
        uuids.sort();
        uuids
    }

    /// Status of every device, sorted by uuid.
    pub fn statuses(&self) -> Vec<DeviceStatus> {
        let mut statuses: Vec<DeviceStatus> = self.devices.values().map(DeviceRecord::status).collect();
        statuses.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        statuses
    }
}

/// Device-independent singleton processes, keyed by logical name.
#[derive(Debug, Default)]
pub struct BaseProcessRegistry {
    processes: BTreeMap<String, OwnedProcess>,
}

impl BaseProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&OwnedProcess> {
        self.processes.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, process: OwnedProcess) -> Option<OwnedProcess> {
        self.processes.insert(name.into(), process)
    }

    pub fn take_all(&mut self) -> Vec<(String, OwnedProcess)> {
        std::mem::take(&mut self.processes).into_iter().collect()
    }

    pub fn statuses(&self) -> Vec<ProcessStatus> {
        self.processes.iter().map(|(name, p)| p.status(name)).collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
