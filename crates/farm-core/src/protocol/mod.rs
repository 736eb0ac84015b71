//! Inbound trigger formats.
//!
//! Hardware watchers talk to the coordinator over plain HTTP.  Connect and
//! disconnect carry a single `uuid` form field; interface discovery and frame
//! negotiation POST small JSON bodies.  This module owns those JSON shapes and
//! their translation into [`DeviceEvent`](crate::DeviceEvent)s, so the HTTP
//! layer stays a thin adapter.

pub mod trigger;
