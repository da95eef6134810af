//! Pier credentials: key pair plus self-signed certificate.
//!
//! The context store treats credential generation as an opaque
//! [`CertificateProvider`]; [`SelfSignedProvider`] is the bundled one.

use chrono::{Datelike, Utc};
use rcgen::{date_time_ymd, CertificateParams, DistinguishedName, DnType, KeyPair, SerialNumber};
use tracing::info;

use crate::{AppError, Result};

/// Validity period of generated certificates.
pub const VALIDITY_YEARS: i32 = 5;

/// PEM encoded certificate and private key of one pier.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// PEM certificate whose common name is the pier id.
    pub certificate: String,
    /// PEM private key.
    pub private_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("certificate", &self.certificate)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Source of pier credentials.
pub trait CertificateProvider: Send + Sync {
    /// Generate a fresh key pair and certificate for `pier`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if generation fails.
    fn issue(&self, pier: &str) -> Result<Credentials>;
}

/// Generates a key pair and a self-signed certificate with `CN = pier`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelfSignedProvider;

impl CertificateProvider for SelfSignedProvider {
    fn issue(&self, pier: &str) -> Result<Credentials> {
        let key_pair = KeyPair::generate().map_err(cert_error)?;

        let mut params = CertificateParams::new(Vec::<String>::new()).map_err(cert_error)?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, pier);
        params.distinguished_name = dn;

        let now = Utc::now();
        let month = u8::try_from(now.month()).unwrap_or(1);
        // Clamped so the expiry date exists in every year.
        let day = u8::try_from(now.day().min(28)).unwrap_or(1);
        params.not_before = date_time_ymd(now.year(), month, day);
        params.not_after = date_time_ymd(now.year() + VALIDITY_YEARS, month, day);
        let serial = u64::try_from(now.timestamp_millis()).unwrap_or_default();
        params.serial_number = Some(SerialNumber::from_slice(&serial.to_be_bytes()));

        let cert = params.self_signed(&key_pair).map_err(cert_error)?;
        info!(pier, "issued self-signed pier certificate");

        Ok(Credentials {
            certificate: cert.pem(),
            private_key: key_pair.serialize_pem(),
        })
    }
}

#[allow(clippy::needless_pass_by_value)]
fn cert_error(err: rcgen::Error) -> AppError {
    AppError::Config(format!("certificate generation failed: {err}"))
}
