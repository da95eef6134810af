//! Unit tests for the bundled self-signed credential provider.

use webpier_bridge::context::{CertificateProvider, SelfSignedProvider};

#[test]
fn issues_pem_certificate_and_key() {
    let credentials = SelfSignedProvider.issue("owner/host").expect("issue");

    assert!(credentials.certificate.starts_with("-----BEGIN CERTIFICATE-----"));
    assert!(credentials.private_key.contains("PRIVATE KEY"));
}

#[test]
fn each_issue_produces_fresh_keys() {
    let first = SelfSignedProvider.issue("owner/host").expect("first");
    let second = SelfSignedProvider.issue("owner/host").expect("second");
    assert_ne!(first.private_key, second.private_key);
}

#[test]
fn debug_output_redacts_the_private_key() {
    let credentials = SelfSignedProvider.issue("owner/host").expect("issue");
    let debug = format!("{credentials:?}");
    assert!(debug.contains("<redacted>"));
    assert!(!debug.contains(&credentials.private_key));
}
