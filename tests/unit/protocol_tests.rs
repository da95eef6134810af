//! Unit tests for daemon wire types and response validation.

use webpier_bridge::ipc::protocol::{
    peek_id, Body, Command, Handle, OneOrMany, Request, Response, ServiceState,
};
use webpier_bridge::AppError;

#[test]
fn request_without_handle_omits_the_field() {
    let request = Request {
        id: Some(7),
        action: Command::Review,
        handle: None,
    };
    let json = serde_json::to_value(&request).expect("serialize");
    assert_eq!(json, serde_json::json!({"id": 7, "action": 5}));
}

#[test]
fn request_with_handle_addresses_one_service() {
    let request = Request {
        id: Some(8),
        action: Command::Engage,
        handle: Some(Handle::new("owner/host", "web")),
    };
    let json = serde_json::to_value(&request).expect("serialize");
    assert_eq!(
        json,
        serde_json::json!({"id": 8, "action": 2, "handle": {"pier": "owner/host", "service": "web"}})
    );
}

#[test]
fn command_codes_match_the_daemon() {
    let codes: Vec<u8> = [
        Command::Unplug,
        Command::Engage,
        Command::Adjust,
        Command::Status,
        Command::Review,
    ]
    .into_iter()
    .map(u8::from)
    .collect();
    assert_eq!(codes, vec![1, 2, 3, 4, 5]);
    assert!(Command::try_from(0_u8).is_err(), "0 is the null command");
    assert!(Command::try_from(6_u8).is_err());
}

#[test]
fn plain_acknowledgement() {
    let response = Response::parse(r#"{"id":3,"action":2}"#).expect("parse");
    assert_eq!(response.id, Some(3));
    assert_eq!(response.action, Command::Engage);
    assert_eq!(response.body, Body::Ack);
}

#[test]
fn error_field_becomes_failed_body() {
    let response = Response::parse(r#"{"action":2,"error":"unknown service"}"#).expect("parse");
    assert_eq!(response.id, None);
    assert_eq!(response.body, Body::Failed("unknown service".into()));
}

#[test]
fn empty_error_field_is_success() {
    let response = Response::parse(r#"{"action":1,"error":""}"#).expect("parse");
    assert_eq!(response.body, Body::Ack);
}

#[test]
fn status_payload_may_be_one_object_or_an_array() {
    let one = Response::parse(
        r#"{"action":4,"health":{"pier":"a/b","service":"web","state":2,"message":""}}"#,
    )
    .expect("parse one");
    let Body::Health(OneOrMany::One(health)) = one.body else {
        panic!("expected a single health entry, got {:?}", one.body);
    };
    assert_eq!(health.state, ServiceState::Lonely);
    assert_eq!(health.handle(), Handle::new("a/b", "web"));

    let many = Response::parse(
        r#"{"action":4,"health":[{"pier":"a/b","service":"web","state":0,"message":""},{"pier":"a/b","service":"ssh","state":1,"message":"refused"}]}"#,
    )
    .expect("parse many");
    let Body::Health(list) = many.body else {
        panic!("expected health list");
    };
    let list = list.into_vec();
    assert_eq!(list.len(), 2);
    assert_eq!(list[1].state, ServiceState::Broken);
    assert_eq!(list[1].message, "refused");
}

#[test]
fn report_carries_health_and_tunnels() {
    let response = Response::parse(
        r#"{"action":5,"report":{"pier":"a/b","service":"web","state":3,"message":"","tunnels":[{"pier":"c/d","pid":4242}]}}"#,
    )
    .expect("parse");
    let Body::Report(report) = response.body else {
        panic!("expected report");
    };
    let report = report.into_single().expect("single report");
    assert_eq!(report.health.state, ServiceState::Burden);
    assert_eq!(report.tunnels.len(), 1);
    assert_eq!(report.tunnels[0].pier, "c/d");
    assert_eq!(report.tunnels[0].pid, 4242);
}

#[test]
fn report_without_tunnels_defaults_to_empty() {
    let response = Response::parse(
        r#"{"action":5,"report":[{"pier":"a/b","service":"web","state":0,"message":""}]}"#,
    )
    .expect("parse");
    let Body::Report(reports) = response.body else {
        panic!("expected report");
    };
    assert!(reports.into_vec()[0].tunnels.is_empty());
}

#[test]
fn payload_for_a_different_command_is_ignored() {
    let response = Response::parse(
        r#"{"action":2,"health":{"pier":"a/b","service":"web","state":2,"message":""}}"#,
    )
    .expect("parse");
    assert_eq!(response.body, Body::Ack);
}

#[test]
fn malformed_lines_are_protocol_errors() {
    for line in [
        "not json",
        r#"{"id":1}"#,
        r#"{"action":0}"#,
        r#"{"action":9}"#,
        r#"{"action":4,"health":{"pier":"a/b","service":"web","state":7,"message":""}}"#,
        r#"{"action":5,"report":{"pier":"a/b"}}"#,
    ] {
        let err = Response::parse(line).expect_err(line);
        assert!(matches!(err, AppError::Protocol(_)), "{line}: {err:?}");
    }
}

#[test]
fn single_payload_rejects_several_entries() {
    let many: OneOrMany<u8> = OneOrMany::Many(vec![1, 2]);
    assert!(matches!(many.into_single(), Err(AppError::Protocol(_))));
    let empty: OneOrMany<u8> = OneOrMany::Many(Vec::new());
    assert!(matches!(empty.into_single(), Err(AppError::Protocol(_))));
    let one: OneOrMany<u8> = OneOrMany::Many(vec![9]);
    assert_eq!(one.into_single().expect("one"), 9);
}

#[test]
fn peek_id_survives_invalid_payloads() {
    assert_eq!(peek_id(r#"{"id":42,"action":0}"#), Some(42));
    assert_eq!(peek_id(r#"{"action":5}"#), None);
    assert_eq!(peek_id("garbage"), None);
}
