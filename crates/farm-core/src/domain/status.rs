//! Read-only status snapshots.
//!
//! The device event loop is the only writer of device state.  Everything
//! else (the status page, the JSON listing) sees an immutable
//! [`FleetStatus`] published after each applied event.

use serde::{Deserialize, Serialize};

use super::device::{FrameGeometry, PortSet};

/// Running state of one named worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStatus {
    /// Logical process name, e.g. `"mirror"`.
    pub name: String,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// How many times the loop restarted this process after it exited.
    pub restarts: u32,
}

/// Snapshot of one connected device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub uuid: String,
    pub name: String,
    pub ports: PortSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<FrameGeometry>,
    /// Worker processes sorted by name.
    pub processes: Vec<ProcessStatus>,
}

impl DeviceStatus {
    /// Looks up a worker process by logical name.
    pub fn process(&self, name: &str) -> Option<&ProcessStatus> {
        self.processes.iter().find(|p| p.name == name)
    }
}

/// Snapshot of the whole coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetStatus {
    /// Device-independent singleton processes.
    pub base: Vec<ProcessStatus>,
    /// Connected devices sorted by uuid.
    pub devices: Vec<DeviceStatus>,
}

impl FleetStatus {
    /// Looks up a connected device by (normalised) uuid.
    pub fn device(&self, uuid: &str) -> Option<&DeviceStatus> {
        self.devices.iter().find(|d| d.uuid == uuid)
    }
}
