#![deny(unsafe_code)]

//! Shared test utilities for the fwtabled workspace.
//!
//! Provides a recording table backend, config builders, and a daemon
//! harness so that individual crate tests stay concise and consistent.
//! Integration tests capture tracing output with `test_log`.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! fwtabled-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod daemon;
pub mod tables;

pub use config::TestConfigBuilder;
pub use daemon::{TestDaemon, eventually};
pub use tables::{CallOutcome, RecordedCall, RecordingTables, TableCall};
