//! # farm-core
//!
//! Shared library for the device-farm coordinator containing the device
//! domain types, the per-device port allocator, the bounded per-process log
//! history and the JSON trigger bodies sent by hardware watchers.
//!
//! This crate has zero dependencies on an async runtime, OS process APIs or
//! network sockets.  Everything here can be unit-tested in isolation.
//!
//! # Architecture overview
//!
//! The coordinator reacts to physical devices being plugged in and out.  For
//! every attached device it starts a handful of external worker processes
//! (screen mirror, control bridge, ...).  This crate defines:
//!
//! - **`domain`** – What a device event is, what ports a device owns, what
//!   frame geometry it negotiated, and how a raw hardware serial is
//!   normalised into a device uuid.
//!
//! - **`log_tracker`** – A fixed-capacity, newest-first line history per
//!   logical process name, shared between output readers and status pages.
//!
//! - **`protocol`** – The JSON bodies that hardware watchers POST to the
//!   coordinator and how they translate into [`DeviceEvent`]s.

pub mod domain;
pub mod log_tracker;
pub mod protocol;

pub use domain::device::{fix_uuid, FrameGeometry, PortSet};
pub use domain::event::{DeviceEvent, MIRROR_INTERFACE_CLASS, MIRROR_INTERFACE_SUBCLASS};
pub use domain::ports::{PortAllocator, PortError, PortRanges};
pub use domain::status::{DeviceStatus, FleetStatus, ProcessStatus};
pub use log_tracker::LogTracker;
pub use protocol::trigger::{
    connect_event, disconnect_event, FrameMessage, InterfaceDescriptor, TriggerError,
};
