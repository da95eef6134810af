//! Unit tests for daemon launch policy and supervision.

use std::time::Duration;

use webpier_bridge::ipc::{DaemonSupervisor, RespawnPolicy};
use webpier_bridge::{AppError, Settings};

fn policy(cooldown: Duration) -> RespawnPolicy {
    RespawnPolicy {
        attempts: 5,
        initial_backoff: Duration::from_millis(100),
        max_backoff: Duration::from_millis(1_000),
        cooldown,
    }
}

#[test]
fn backoff_doubles_up_to_the_cap() {
    let policy = policy(Duration::ZERO);
    let delays: Vec<u128> = (0..6).map(|n| policy.delay(n).as_millis()).collect();
    assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    assert_eq!(policy.delay(64), Duration::from_millis(1_000));
}

#[test]
fn policy_follows_settings() {
    let settings = Settings::default();
    let policy = RespawnPolicy::from_settings(&settings);

    assert_eq!(policy.attempts, 5);
    assert_eq!(policy.initial_backoff, Duration::from_millis(100));
    assert_eq!(policy.max_backoff, Duration::from_millis(2_000));
    assert_eq!(policy.cooldown, Duration::from_millis(30_000));
}

#[test]
fn missing_program_is_a_transport_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = DaemonSupervisor::new(
        dir.path().join("no-such-slipway"),
        dir.path(),
        policy(Duration::from_secs(60)),
    );

    let err = supervisor.launch().expect_err("cannot spawn");
    assert!(matches!(err, AppError::Transport(_)), "{err:?}");
    let err = supervisor.launch().expect_err("failed launches do not start the cooldown");
    assert!(matches!(err, AppError::Transport(_)));
}

#[cfg(unix)]
#[test]
fn second_launch_within_cooldown_is_skipped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = DaemonSupervisor::new("true", dir.path(), policy(Duration::from_secs(60)));

    assert!(supervisor.launch().expect("first launch"));
    assert!(!supervisor.launch().expect("cooldown"));
}

#[cfg(unix)]
#[test]
fn launch_after_cooldown_starts_again() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = DaemonSupervisor::new("true", dir.path(), policy(Duration::ZERO));

    assert!(supervisor.launch().expect("first launch"));
    assert!(supervisor.launch().expect("second launch"));
}

#[test]
fn from_settings_requires_a_daemon_program() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = Settings::with_home(dir.path());
    settings.module_config = dir.path().join("missing.conf");
    assert!(matches!(
        DaemonSupervisor::from_settings(&settings),
        Err(AppError::Config(_))
    ));

    settings.daemon_program = Some("/opt/slipway".into());
    let supervisor = DaemonSupervisor::from_settings(&settings).expect("override");
    assert_eq!(supervisor.program(), std::path::Path::new("/opt/slipway"));
}
