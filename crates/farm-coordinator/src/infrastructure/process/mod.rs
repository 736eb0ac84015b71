//! Process supervision adapters.
//!
//! - **`supervisor`** – [`ProcessSupervisor`](supervisor::ProcessSupervisor):
//!   spawns workers with `tokio::process`, pumps their output through the
//!   spec's line filter into `tracing` and the log tracker, and reports
//!   exits.
//! - **`mock`** – [`MockLauncher`](mock::MockLauncher): a recording double
//!   that never touches the OS, for event-loop tests.

pub mod mock;
pub mod supervisor;
