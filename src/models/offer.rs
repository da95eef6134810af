//! Portable identity bundles exchanged out of band to import a pier.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::files::{read_json, write_json_atomic};
use crate::Result;

/// One advertised service inside an [`Offer`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OfferedService {
    /// Service name.
    pub name: String,
    /// Whether tunnel traffic is obscured.
    pub obscure: bool,
    /// Rendezvous: empty for email, otherwise a DHT bootstrap host.
    pub rendezvous: String,
}

/// A pier's identity, certificate, and advertised services.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Offer {
    /// Offering pier id.
    pub pier: String,
    /// PEM certificate of the offering pier.
    pub certificate: String,
    /// Services the pier advertises.
    pub services: Vec<OfferedService>,
}

impl Offer {
    /// SHA-256 of the certificate text, hex encoded, for out-of-band checks.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.certificate.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Write `offer` to `path` as one atomic replace.
///
/// # Errors
///
/// Returns `AppError::Io` if the file cannot be written.
pub fn save_offer(path: &Path, offer: &Offer) -> Result<()> {
    write_json_atomic(path, offer)
}

/// Read an offer previously written by [`save_offer`].
///
/// # Errors
///
/// Returns `AppError::Io` if the file cannot be read or does not match the
/// offer schema.
pub fn load_offer(path: &Path) -> Result<Offer> {
    read_json(path)
}
