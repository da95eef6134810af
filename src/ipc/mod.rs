//! Client side of the slipway daemon protocol.
//!
//! The daemon listens on a Unix domain socket (Linux/macOS) or a named pipe
//! (Windows) derived from the context home and speaks newline-delimited
//! JSON.

pub mod client;
pub mod codec;
pub mod daemon;
pub mod endpoint;
pub mod protocol;

pub use client::IpcClient;
pub use daemon::{DaemonSupervisor, RespawnPolicy};
pub use endpoint::Endpoint;
pub use protocol::{Command, Handle, Health, Report, ServiceState, Tunnel};
