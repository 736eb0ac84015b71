//! Infrastructure layer for the coordinator.
//!
//! Contains OS-facing adapters: the subprocess supervisor, the HTTP
//! listener and file-system configuration storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `farm_core`, but MUST NOT be imported by the `application` or domain
//! layers (tests excepted).

pub mod http;
pub mod process;
pub mod storage;
