//! Shared on-disk context: identity, settings, and service registry.
//!
//! Several editor processes and the tunneling daemon read and write the same
//! home directory. [`locker::Locker`] arbitrates between them and
//! [`store::ContextStore`] is the registry built on top of it.

pub mod certs;
pub mod locker;
pub mod store;

pub use certs::{CertificateProvider, Credentials, SelfSignedProvider};
pub use locker::{LockGuard, Locker};
pub use store::{ContextStore, ServiceMap};
