//! Unit tests for the error taxonomy.

use webpier_bridge::AppError;

#[test]
fn display_flattens_the_message() {
    assert_eq!(AppError::StaleContext.to_string(), "stale webpier context");
    assert_eq!(
        AppError::Daemon("unknown service".into()).to_string(),
        "daemon: unknown service"
    );
    assert_eq!(
        AppError::UnknownPier("a/b".into()).to_string(),
        "unknown pier: a/b"
    );
}

#[test]
fn only_stale_and_transport_are_retryable() {
    assert!(AppError::StaleContext.is_retryable());
    assert!(AppError::Transport("refused".into()).is_retryable());

    for err in [
        AppError::Protocol("bad".into()),
        AppError::Daemon("bad".into()),
        AppError::LockTimeout("bad".into()),
        AppError::UnknownService("bad".into()),
        AppError::Io("bad".into()),
    ] {
        assert!(!err.is_retryable(), "{err:?}");
    }
}

#[test]
fn io_errors_convert() {
    let err: AppError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("gone")));
}

#[test]
fn json_errors_convert() {
    let parse = serde_json::from_str::<serde_json::Value>("{").expect_err("invalid");
    let err: AppError = parse.into();
    assert!(matches!(err, AppError::Io(ref msg) if msg.starts_with("invalid json")));
}
