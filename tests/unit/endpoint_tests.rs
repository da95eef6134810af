//! Unit tests for daemon endpoint derivation.

use std::path::Path;

use webpier_bridge::ipc::Endpoint;
use webpier_bridge::models::text_hash;

#[test]
fn endpoint_is_derived_from_home() {
    let home = Path::new("/home/me/.webpier");
    let endpoint = Endpoint::for_home(home);
    let expected = format!("{}.slipway", text_hash("/home/me/.webpier"));

    assert!(
        endpoint.socket().ends_with(&expected),
        "{} must end with {expected}",
        endpoint.socket()
    );
    assert!(endpoint.to_name().is_ok());
}

#[cfg(unix)]
#[test]
fn unix_endpoint_lives_in_tmp() {
    let endpoint = Endpoint::for_home(Path::new("/srv/wp"));
    if Path::new("/tmp").is_dir() {
        assert!(endpoint.socket().starts_with("/tmp/"));
    }
    assert_eq!(endpoint.to_string(), endpoint.socket());
}

#[cfg(windows)]
#[test]
fn windows_endpoint_is_a_named_pipe() {
    let endpoint = Endpoint::for_home(Path::new(r"C:\Users\me\.webpier"));
    assert!(endpoint.to_string().starts_with(r"\\.\pipe\"));
}

#[test]
fn distinct_homes_never_share_an_endpoint() {
    let a = Endpoint::for_home(Path::new("/home/a/.webpier"));
    let b = Endpoint::for_home(Path::new("/home/b/.webpier"));
    assert_ne!(a, b);
    assert_eq!(a, Endpoint::for_home(Path::new("/home/a/.webpier")));
}
