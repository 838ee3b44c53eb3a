//! Session persistence and liveness against a mock platform.

mod common;

use pretty_assertions::assert_eq;
use reelscout::session::probe::UNKNOWN_IDENTITY;
use reelscout::session::{SessionProbe, SessionState, SessionStore};
use serde_json::json;
use wiremock::matchers::{header_regex, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SHARED_DATA: &str = "/api/v1/web/data/shared_data/";

fn probe(server: &MockServer) -> SessionProbe {
    SessionProbe::new("Mozilla/5.0 test", None)
        .unwrap()
        .with_base_url(server.uri())
}

async fn viewer(server: &MockServer, session: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(SHARED_DATA))
        .and(header_regex("cookie", &format!("sessionid={}", session)))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_saved_live_session_is_reused() {
    common::init_logging();
    let server = MockServer::start().await;
    viewer(&server, "live1", json!({"config": {"viewer": {"username": "alice"}}})).await;

    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path());
    let state = SessionState::new("alice", common::jar(&[("sessionid", "live1"), ("csrftoken", "c1")]));
    store.save(&state).await.unwrap();

    let resolved = store.resolve("alice", &probe(&server), None, None).await.unwrap();

    assert_eq!(resolved, state);
    assert_eq!(
        store.probe_liveness(&probe(&server), &resolved).await.as_deref(),
        Some("alice")
    );
}

#[tokio::test]
async fn test_dead_session_replaced_from_cookie_file() {
    let server = MockServer::start().await;
    viewer(&server, "dead0", json!({"config": {"viewer": null}})).await;
    viewer(&server, "fresh2", json!({"config": {"viewer": {"username": "bob"}}})).await;

    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path().join("sessions"));
    store
        .save(&SessionState::new("bob", common::jar(&[("sessionid", "dead0")])))
        .await
        .unwrap();

    let cookie_file = dir.path().join("cookies.txt");
    std::fs::write(
        &cookie_file,
        "# Netscape HTTP Cookie File\n\
         .instagram.com\tTRUE\t/\tTRUE\t0\tsessionid\tfresh2\n\
         #HttpOnly_.instagram.com\tTRUE\t/\tTRUE\t0\tcsrftoken\ttok\n\
         .example.com\tTRUE\t/\tFALSE\t0\tsessionid\tnope\n",
    )
    .unwrap();

    let resolved = store
        .resolve("bob", &probe(&server), Some(cookie_file.as_path()), None)
        .await
        .unwrap();

    assert_eq!(resolved.get("sessionid"), Some("fresh2"));
    assert_eq!(resolved.csrf_token(), Some("tok"));
    assert_eq!(resolved.cookies.len(), 2);

    // the verified jar replaced the dead one on disk
    let reloaded = store.load("bob").await.unwrap();
    assert_eq!(reloaded.get("sessionid"), Some("fresh2"));
}

#[tokio::test]
async fn test_home_page_fallback_reports_unknown_identity() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SHARED_DATA))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>feed</html>"))
        .mount(&server)
        .await;

    let state = SessionState::new("carol", common::jar(&[("sessionid", "s")]));
    let identity = probe(&server).probe_liveness(&state).await;

    assert_eq!(identity.as_deref(), Some(UNKNOWN_IDENTITY));
}

#[tokio::test]
async fn test_nothing_live_resolves_to_none() {
    let server = MockServer::start().await;
    viewer(&server, "gone", json!({"config": {"viewer": null}})).await;

    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path());
    store
        .save(&SessionState::new("dave", common::jar(&[("sessionid", "gone")])))
        .await
        .unwrap();

    assert!(store.resolve("dave", &probe(&server), None, None).await.is_none());
    // a dead session is not deleted by resolution
    assert!(store.load("dave").await.is_some());
}
