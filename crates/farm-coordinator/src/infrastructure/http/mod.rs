//! HTTP front-end: trigger endpoints and read-only status views.
//!
//! Handlers only translate requests into [`farm_core::DeviceEvent`]s and
//! queue them; they never touch device state.  Status views read the
//! latest published [`farm_core::FleetStatus`] and the log tracker.

pub mod server;
