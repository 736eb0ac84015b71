//! Application layer of the coordinator.
//!
//! Use cases here orchestrate `farm_core` domain types and talk to the
//! outside world only through traits ([`supervision::ProcessLauncher`],
//! [`line_filter::LineFilter`]).  No OS process calls, sockets or files.
//!
//! # Sub-modules
//!
//! - **`device_loop`** – The single-consumer event loop that applies device
//!   events, starts and stops workers and publishes status snapshots.
//!
//! - **`device_registry`** – The loop-owned maps of connected devices and
//!   base processes.
//!
//! - **`supervision`** – The launcher contract: specs, handles, exit
//!   reports and the restart policy.
//!
//! - **`line_filter`** – Output-line predicates (heartbeat suppression,
//!   ownership watching).
//!
//! - **`worker_catalog`** – Configured worker templates and their expansion
//!   into per-device process specs.

pub mod device_loop;
pub mod device_registry;
pub mod line_filter;
pub mod supervision;
pub mod worker_catalog;
