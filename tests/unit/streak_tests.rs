//! Unit tests for edge-triggered failure reporting.

use webpier_bridge::reconcile::FailureStreak;

#[test]
fn only_the_first_failure_of_a_streak_is_reported() {
    let mut streak = FailureStreak::default();

    assert!(streak.failure());
    assert!(!streak.failure());
    assert!(!streak.failure());
    assert_eq!(streak.count(), 3);
}

#[test]
fn success_ends_the_streak_once() {
    let mut streak = FailureStreak::default();
    streak.failure();

    assert!(streak.success());
    assert!(!streak.success());
    assert_eq!(streak.count(), 0);
    assert!(streak.failure(), "a new streak reports again");
}

#[test]
fn success_without_failures_is_quiet() {
    let mut streak = FailureStreak::default();
    assert!(!streak.success());
    assert_eq!(streak.count(), 0);
}
