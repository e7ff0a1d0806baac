//! Document-store bookkeeper tests against a mock HTTP collector.

use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use duplex_voice::bookkeeping::{BookkeepingError, DocumentStoreBookkeeper, SessionBookkeeper};
use duplex_voice::session::{SessionError, SessionReport, SessionState};

#[tokio::test]
async fn test_started_event_is_posted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .and(body_partial_json(serde_json::json!({
            "session_id": "s-1",
            "event": "started",
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let bookkeeper = DocumentStoreBookkeeper::new(format!("{}/sessions", server.uri()));
    bookkeeper.session_started("s-1").await.expect("posted");
}

#[tokio::test]
async fn test_failed_event_carries_cause_and_state() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .and(body_partial_json(serde_json::json!({
            "session_id": "s-2",
            "event": "failed",
            "state": "failed",
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let report = SessionReport {
        session_id: "s-2".to_string(),
        state: SessionState::Failed,
        cause: Some(SessionError::DrainTimeout(std::time::Duration::from_secs(5))),
        transcript: None,
    };
    let bookkeeper = DocumentStoreBookkeeper::new(format!("{}/sessions", server.uri()));
    bookkeeper.session_failed(&report).await.expect("posted");
}

#[tokio::test]
async fn test_completed_event_carries_transcript() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .and(body_partial_json(serde_json::json!({
            "session_id": "s-4",
            "event": "completed",
            "state": "closed",
            "transcript": "hello there, how can I help?",
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let report = SessionReport {
        session_id: "s-4".to_string(),
        state: SessionState::Closed,
        cause: None,
        transcript: Some("hello there, how can I help?".to_string()),
    };
    let bookkeeper = DocumentStoreBookkeeper::new(format!("{}/sessions", server.uri()));
    bookkeeper.session_completed(&report).await.expect("posted");
}

#[tokio::test]
async fn test_collector_rejection_surfaces_as_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let report = SessionReport {
        session_id: "s-3".to_string(),
        state: SessionState::Closed,
        cause: None,
        transcript: None,
    };
    let bookkeeper = DocumentStoreBookkeeper::new(server.uri());
    let result = bookkeeper.session_completed(&report).await;
    assert!(matches!(result, Err(BookkeepingError::Rejected(500))));
}
