//! Integration tests for the daemon client against an in-process mock
//! daemon listening on a real local socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use interprocess::local_socket::tokio::prelude::*;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use webpier_bridge::ipc::protocol::Request;
use webpier_bridge::ipc::{
    Command, DaemonSupervisor, Handle, IpcClient, RespawnPolicy, ServiceState,
};
use webpier_bridge::AppError;

use super::test_helpers::{
    bind, healthy_responder, spawn_mock_daemon, test_client, unique_endpoint, Responder,
};

const TIMEOUT: Duration = Duration::from_secs(2);

fn web() -> Handle {
    Handle::new("alice/laptop", "web")
}

fn reports() -> serde_json::Value {
    json!([
        {"pier": "alice/laptop", "service": "web", "state": 3, "message": "",
         "tunnels": [{"pier": "bob/server", "pid": 4242}]},
        {"pier": "bob/server", "service": "db", "state": 0}
    ])
}

#[tokio::test]
async fn commands_are_acknowledged_and_recorded() {
    let endpoint = unique_endpoint("ack");
    let daemon = spawn_mock_daemon(&endpoint, healthy_responder(reports()));
    let client = test_client(&endpoint, TIMEOUT);

    client.engage_all().await.expect("engage all");
    client.unplug_service(&web()).await.expect("unplug one");
    client.adjust_all().await.expect("adjust all");

    let requests = daemon.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].action, Command::Engage);
    assert_eq!(requests[0].handle, None);
    assert_eq!(requests[1].action, Command::Unplug);
    assert_eq!(requests[1].handle, Some(web()));
    assert_eq!(requests[2].action, Command::Adjust);

    let ids: Vec<u64> = requests.iter().filter_map(|request| request.id).collect();
    assert_eq!(ids.len(), 3, "every request carries an id");
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
async fn review_returns_every_report() {
    let endpoint = unique_endpoint("review");
    let _daemon = spawn_mock_daemon(&endpoint, healthy_responder(reports()));
    let client = test_client(&endpoint, TIMEOUT);

    let all = client.review_all().await.expect("review all");
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].health.state, ServiceState::Burden);
    assert_eq!(all[0].tunnels.len(), 1);
    assert_eq!(all[0].tunnels[0].pid, 4242);
    assert!(all[1].tunnels.is_empty());

    let one = client.review_service(&web()).await.expect("review one");
    assert_eq!(one.health.handle(), web());
    assert_eq!(one, all[0]);
}

#[tokio::test]
async fn status_returns_health_only() {
    let endpoint = unique_endpoint("status");
    let responder: Responder = Arc::new(|request: &Request| {
        Some(
            json!({"id": request.id, "action": 4,
                   "health": {"pier": "alice/laptop", "service": "web", "state": 2}})
            .to_string(),
        )
    });
    let _daemon = spawn_mock_daemon(&endpoint, responder);
    let client = test_client(&endpoint, TIMEOUT);

    let health = client.status_service(&web()).await.expect("status");
    assert_eq!(health.state, ServiceState::Lonely);
    assert_eq!(health.message, "");

    let all = client.status_all().await.expect("status all");
    assert_eq!(all, vec![health]);
}

#[tokio::test]
async fn daemon_error_is_surfaced() {
    let endpoint = unique_endpoint("err");
    let responder: Responder = Arc::new(|request: &Request| {
        Some(json!({"id": request.id, "action": 2, "error": "unknown service"}).to_string())
    });
    let _daemon = spawn_mock_daemon(&endpoint, responder);
    let client = test_client(&endpoint, TIMEOUT);

    let err = client.engage_service(&web()).await.expect_err("daemon error");
    assert_eq!(err, AppError::Daemon("unknown service".into()));
}

#[tokio::test]
async fn mismatched_action_is_a_protocol_error() {
    let endpoint = unique_endpoint("mismatch");
    let responder: Responder =
        Arc::new(|request: &Request| Some(json!({"id": request.id, "action": 1}).to_string()));
    let _daemon = spawn_mock_daemon(&endpoint, responder);
    let client = test_client(&endpoint, TIMEOUT);

    let err = client.engage_all().await.expect_err("wrong action");
    assert_eq!(
        err,
        AppError::Protocol("invalid response: expected action 2, got 1".into())
    );
}

#[tokio::test]
async fn malformed_response_is_a_protocol_error() {
    let endpoint = unique_endpoint("garbage");
    let responder: Responder =
        Arc::new(|request: &Request| Some(format!("{{\"id\": {}, \"action\": ", request.id.unwrap_or(0))));
    let _daemon = spawn_mock_daemon(&endpoint, responder);
    let client = test_client(&endpoint, TIMEOUT);

    let err = client.review_all().await.expect_err("malformed");
    assert!(matches!(err, AppError::Protocol(_)), "got {err:?}");
}

#[tokio::test]
async fn silent_daemon_times_out_and_the_client_reconnects() {
    let endpoint = unique_endpoint("silent");
    let responder: Responder = Arc::new(|request: &Request| match request.action {
        Command::Engage => None,
        action => Some(json!({"id": request.id, "action": u8::from(action)}).to_string()),
    });
    let _daemon = spawn_mock_daemon(&endpoint, responder);
    let client = test_client(&endpoint, Duration::from_millis(100));

    let err = client.engage_all().await.expect_err("no answer");
    assert_eq!(err, AppError::Transport("no response within 100 ms".into()));
    assert!(err.is_retryable());

    client.unplug_all().await.expect("fresh connection after timeout");
}

#[tokio::test]
async fn overlapping_requests_are_routed_by_id() {
    let endpoint = unique_endpoint("overlap");
    let listener = bind(&endpoint);
    let server = tokio::spawn(async move {
        let stream = listener.accept().await.expect("accept");
        let (reader, mut writer) = stream.split();
        let mut lines = BufReader::new(reader).lines();

        let mut received = Vec::new();
        while received.len() < 2 {
            let line = lines.next_line().await.expect("read").expect("line");
            received.push(serde_json::from_str::<Request>(&line).expect("request"));
        }
        for request in received.iter().rev() {
            let handle = request.handle.as_ref().expect("handle");
            let reply = json!({"id": request.id, "action": 4,
                "health": {"pier": handle.pier, "service": handle.service, "state": 2}});
            writer
                .write_all(format!("{reply}\n").as_bytes())
                .await
                .expect("write");
        }
        // Keep the connection open until the client is done.
        let _ = lines.next_line().await;
    });

    let client = test_client(&endpoint, TIMEOUT);
    let db = Handle::new("bob/server", "db");
    let web_handle = web();
    let (first, second) = tokio::join!(client.status_service(&web_handle), client.status_service(&db));

    assert_eq!(first.expect("first").handle(), web());
    assert_eq!(second.expect("second").handle(), db);
    drop(client);
    let _ = server.await;
}

#[tokio::test]
async fn response_without_id_answers_the_oldest_request() {
    let endpoint = unique_endpoint("noid");
    let responder: Responder = Arc::new(|request: &Request| {
        Some(json!({"action": u8::from(request.action)}).to_string())
    });
    let _daemon = spawn_mock_daemon(&endpoint, responder);
    let client = test_client(&endpoint, TIMEOUT);

    client.engage_all().await.expect("engage");
    client.unplug_all().await.expect("unplug");
}

#[tokio::test]
async fn late_reply_without_id_does_not_answer_the_next_request() {
    let endpoint = unique_endpoint("late");
    let listener = bind(&endpoint);
    let slow = Arc::new(AtomicBool::new(true));
    let server = tokio::spawn(async move {
        loop {
            let Ok(stream) = listener.accept().await else {
                break;
            };
            let slow = Arc::clone(&slow);
            tokio::spawn(async move {
                let (reader, mut writer) = stream.split();
                let mut lines = BufReader::new(reader).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let request: Request = serde_json::from_str(&line).expect("request");
                    if slow.swap(false, Ordering::SeqCst) {
                        tokio::time::sleep(Duration::from_millis(300)).await;
                    }
                    let handle = request.handle.as_ref().expect("handle");
                    // This daemon never echoes request ids.
                    let reply = json!({"action": 5,
                        "report": {"pier": handle.pier, "service": handle.service, "state": 0}});
                    if writer.write_all(format!("{reply}\n").as_bytes()).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    let client = test_client(&endpoint, Duration::from_millis(150));
    let old = Handle::new("alice/laptop", "old");
    let new = Handle::new("alice/laptop", "new");

    let err = client.review_service(&old).await.expect_err("slow answer");
    assert_eq!(err, AppError::Transport("no response within 150 ms".into()));

    let report = client.review_service(&new).await.expect("review new");
    assert_eq!(report.health.handle(), new);

    server.abort();
}

#[tokio::test]
async fn dropped_connection_fails_pending_and_reconnects() {
    let endpoint = unique_endpoint("drop");
    let listener = bind(&endpoint);
    let server = tokio::spawn(async move {
        // First connection: read one request and hang up without answering.
        let stream = listener.accept().await.expect("accept first");
        let (reader, writer) = stream.split();
        let mut lines = BufReader::new(reader).lines();
        let _ = lines.next_line().await;
        drop(lines);
        drop(writer);

        // Second connection: answer normally.
        let stream = listener.accept().await.expect("accept second");
        let (reader, mut writer) = stream.split();
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let request: Request = serde_json::from_str(&line).expect("request");
            let reply = json!({"id": request.id, "action": u8::from(request.action)});
            if writer.write_all(format!("{reply}\n").as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let client = test_client(&endpoint, TIMEOUT);
    let err = client.engage_all().await.expect_err("connection dropped");
    assert!(matches!(err, AppError::Transport(_)), "got {err:?}");

    client.engage_all().await.expect("reconnected");
    drop(client);
    let _ = server.await;
}

#[tokio::test]
async fn unreachable_daemon_without_supervisor_is_a_transport_error() {
    let endpoint = unique_endpoint("none");
    let client = test_client(&endpoint, TIMEOUT);

    assert!(!client.health_check().await);
    let err = client.review_all().await.expect_err("nobody listening");
    match err {
        AppError::Transport(message) => assert!(message.starts_with("failed to connect to")),
        other => panic!("expected transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn health_check_sees_a_listening_daemon() {
    let endpoint = unique_endpoint("health");
    let daemon = spawn_mock_daemon(&endpoint, healthy_responder(reports()));
    let client = test_client(&endpoint, TIMEOUT);

    assert!(client.health_check().await);
    assert!(daemon.requests().is_empty(), "health check sends no command");
}

#[cfg(unix)]
#[tokio::test]
async fn launched_daemon_that_never_listens_gives_up() {
    let home = tempfile::tempdir().expect("tempdir");
    let endpoint = unique_endpoint("spawn");
    let policy = RespawnPolicy {
        attempts: 3,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(20),
        cooldown: Duration::from_secs(60),
    };
    let supervisor = Arc::new(DaemonSupervisor::new("true", home.path(), policy));
    let client = IpcClient::new(endpoint, TIMEOUT).with_daemon(Arc::clone(&supervisor));

    let err = client.engage_all().await.expect_err("daemon never listens");
    match err {
        AppError::Transport(message) => {
            assert!(message.contains("did not accept connections"), "{message}");
            assert!(message.contains("after 3 attempts"), "{message}");
        }
        other => panic!("expected transport error, got {other:?}"),
    }

    assert!(!supervisor.launch().expect("cooldown"), "relaunch within cooldown is skipped");
}
