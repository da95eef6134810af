//! Unit tests for the per-service status board.

use webpier_bridge::context::ServiceMap;
use webpier_bridge::ipc::{Handle, Health, Report, ServiceState, Tunnel};
use webpier_bridge::models::Service;
use webpier_bridge::reconcile::StatusBoard;

fn services(entries: &[(&str, &str)]) -> ServiceMap {
    let mut map = ServiceMap::new();
    for (pier, name) in entries {
        map.entry((*pier).to_owned())
            .or_default()
            .push(Service::new(false, *name, *pier));
    }
    map
}

fn report(pier: &str, service: &str, state: ServiceState, tunnels: &[(&str, u32)]) -> Report {
    Report {
        health: Health {
            pier: pier.into(),
            service: service.into(),
            state,
            message: String::new(),
        },
        tunnels: tunnels
            .iter()
            .map(|(pier, pid)| Tunnel {
                pier: (*pier).into(),
                pid: *pid,
            })
            .collect(),
    }
}

#[test]
fn new_services_start_asleep() {
    let board = StatusBoard::from_services(&services(&[("a/b", "web"), ("c/d", "ssh")]));

    assert_eq!(board.len(), 2);
    assert_eq!(board.state(&Handle::new("a/b", "web")), ServiceState::Asleep);
    assert_eq!(board.state(&Handle::new("c/d", "ssh")), ServiceState::Asleep);
}

#[test]
fn engage_then_unplug() {
    let handle = Handle::new("a/b", "web");
    let mut board = StatusBoard::from_services(&services(&[("a/b", "web")]));

    board.engage(&handle);
    assert_eq!(board.state(&handle), ServiceState::Lonely);

    board.unplug(&handle);
    assert_eq!(board.state(&handle), ServiceState::Asleep);
}

#[test]
fn engage_keeps_a_busier_state() {
    let handle = Handle::new("a/b", "web");
    let mut board = StatusBoard::from_services(&services(&[("a/b", "web")]));
    board.apply_reviews(vec![report("a/b", "web", ServiceState::Burden, &[("c/d", 10)])]);

    board.engage(&handle);
    assert_eq!(board.state(&handle), ServiceState::Burden);
}

#[test]
fn failure_marks_broken_with_message() {
    let handle = Handle::new("a/b", "web");
    let mut board = StatusBoard::from_services(&services(&[("a/b", "web")]));

    board.fail(&handle, "daemon: refused");
    let status = board.get(&handle).expect("tracked");
    assert_eq!(status.state, ServiceState::Broken);
    assert_eq!(status.message, "daemon: refused");
}

#[test]
fn review_overrides_optimistic_guess() {
    let web = Handle::new("a/b", "web");
    let ssh = Handle::new("a/b", "ssh");
    let mut board = StatusBoard::from_services(&services(&[("a/b", "web"), ("a/b", "ssh")]));
    board.engage(&web);
    board.engage(&ssh);

    let changed = board.apply_reviews(vec![report(
        "a/b",
        "web",
        ServiceState::Burden,
        &[("c/d", 77)],
    )]);

    assert!(changed);
    let status = board.get(&web).expect("web");
    assert_eq!(status.state, ServiceState::Burden);
    assert_eq!(status.tunnels.len(), 1);
    assert_eq!(
        board.state(&ssh),
        ServiceState::Asleep,
        "services missing from the review are not running"
    );
}

#[test]
fn identical_review_reports_no_change() {
    let mut board = StatusBoard::from_services(&services(&[("a/b", "web")]));
    let snapshot = vec![report("a/b", "web", ServiceState::Lonely, &[])];

    assert!(board.apply_reviews(snapshot.clone()));
    assert!(!board.apply_reviews(snapshot));
}

#[test]
fn rebuild_keeps_known_statuses_and_drops_removed_services() {
    let web = Handle::new("a/b", "web");
    let mut board = StatusBoard::from_services(&services(&[("a/b", "web"), ("a/b", "ssh")]));
    board.engage(&web);

    let changed = board.rebuild(&services(&[("a/b", "web"), ("c/d", "rdp")]));

    assert!(changed);
    assert_eq!(board.len(), 2);
    assert_eq!(board.state(&web), ServiceState::Lonely);
    assert!(board.get(&Handle::new("a/b", "ssh")).is_none());
    assert_eq!(board.state(&Handle::new("c/d", "rdp")), ServiceState::Asleep);
}

#[test]
fn rebuild_with_same_services_is_not_a_change() {
    let registry = services(&[("a/b", "web")]);
    let mut board = StatusBoard::from_services(&registry);
    assert!(!board.rebuild(&registry));
}

#[test]
fn unplug_all_puts_everything_to_sleep() {
    let mut board = StatusBoard::from_services(&services(&[("a/b", "web"), ("a/b", "ssh")]));
    board.engage(&Handle::new("a/b", "web"));
    board.fail(&Handle::new("a/b", "ssh"), "boom");

    board.unplug_all();
    assert!(board
        .iter()
        .all(|(_, status)| status.state == ServiceState::Asleep && status.message.is_empty()));
}
