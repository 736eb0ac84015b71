//! Domain entities for the device-farm coordinator.
//!
//! This module contains pure business logic with no infrastructure
//! dependencies.  Code in outer layers (the event loop, the process
//! supervisor, the HTTP front-end) depends on the domain, but the domain
//! never depends on them.

/// Device identity, owned ports and negotiated frame geometry.
pub mod device;

/// The typed events that drive the device lifecycle.
pub mod event;

/// Disjoint per-device port assignment.
pub mod ports;

/// Read-only snapshots handed to status collaborators.
pub mod status;
