//! Service entries stored in per-pier manifests.

use serde::{Deserialize, Serialize};

/// A named endpoint exposed (local) or consumed (imported) through a tunnel.
///
/// `(pier, name)` is unique across the whole registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Service {
    /// Whether the owning pier is the local identity.
    pub local: bool,
    /// Service name, unique per pier.
    pub name: String,
    /// Pier the service is shared with or imported from.
    pub pier: String,
    /// Local address the tunnel forwards to or listens on.
    pub address: String,
    /// Gateway address used for hole punching.
    pub gateway: String,
    /// Rendezvous: empty for email, otherwise a DHT bootstrap host.
    pub rendezvous: String,
    /// Whether the daemon engages the service on startup.
    pub autostart: bool,
    /// Whether the tunnel traffic is obscured.
    pub obscure: bool,
}

impl Service {
    /// A service with default gateway, rendezvous, and flags.
    #[must_use]
    pub fn new(local: bool, name: impl Into<String>, pier: impl Into<String>) -> Self {
        Self {
            local,
            name: name.into(),
            pier: pier.into(),
            address: String::new(),
            gateway: "0.0.0.0:0".into(),
            rendezvous: "bootstrap.jami.net".into(),
            autostart: false,
            obscure: true,
        }
    }

    /// Whether rendezvous happens over email rather than the DHT.
    #[must_use]
    pub fn uses_email(&self) -> bool {
        self.rendezvous.is_empty()
    }
}

/// Partial edit of a [`Service`]; `None` fields keep their saved value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceUpdate {
    /// New local address.
    pub address: Option<String>,
    /// New gateway address.
    pub gateway: Option<String>,
    /// New rendezvous.
    pub rendezvous: Option<String>,
    /// New autostart flag.
    pub autostart: Option<bool>,
    /// New obscure flag.
    pub obscure: Option<bool>,
}

impl ServiceUpdate {
    /// Overwrite the fields of `service` that this update names.
    pub fn apply(self, service: &mut Service) {
        if let Some(address) = self.address {
            service.address = address;
        }
        if let Some(gateway) = self.gateway {
            service.gateway = gateway;
        }
        if let Some(rendezvous) = self.rendezvous {
            service.rendezvous = rendezvous;
        }
        if let Some(autostart) = self.autostart {
            service.autostart = autostart;
        }
        if let Some(obscure) = self.obscure {
            service.obscure = obscure;
        }
    }
}

/// On-disk shape of `<repo>/<pier>/webpier.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct Manifest {
    pub services: Vec<Service>,
}
