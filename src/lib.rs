#![forbid(unsafe_code)]

//! Shared webpier context store and slipway daemon client.
//!
//! Several editor processes and the background tunneling daemon share one
//! on-disk registry under a home directory. [`context`] guards it with a
//! file lock plus staleness stamp, [`ipc`] drives the daemon over a local
//! socket, and [`reconcile`] keeps an observable status board in sync with
//! both.

pub mod config;
pub mod context;
pub mod errors;
pub mod files;
pub mod ipc;
pub mod models;
pub mod reconcile;
pub mod validate;

pub use config::Settings;
pub use errors::{AppError, Result};
