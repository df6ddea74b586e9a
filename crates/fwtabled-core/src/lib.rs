#![deny(unsafe_code)]

//! fwtabled core runtime.
//!
//! A single-threaded daemon that receives fixed-length command records over
//! TCP, UDP, or Unix-domain sockets and applies them to firewall address
//! tables, removing entries again after a per-table TTL.

/// Firewall table backends (ipfw, in-memory).
pub mod adapter;
/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Client for sending records to a daemon.
pub mod client;
/// Bounded slot table for accepted connections.
pub mod connections;
/// Event loop and process lifecycle.
pub mod daemon;
/// Applies decoded records to the table backend.
pub mod dispatch;
/// TTL-based removal of table entries.
pub mod expiry;
/// Bind targets to listening sockets.
pub mod listener;
/// Wire record encoding and validation.
pub mod protocol;

pub use adapter::{AdapterError, IpfwTables, MemoryTables, TableAdapter, TableEntry};
pub use client::{Client, ClientError};
pub use daemon::{Daemon, DaemonError, ShutdownSignal};
pub use dispatch::{Dispatcher, Outcome};
pub use expiry::ExpiryQueue;
pub use listener::{ListenAddr, ListenerError, TransportKind};
pub use protocol::{Command, MESSAGE_LEN, Message, ProtocolError};
