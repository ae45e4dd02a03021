//! End-to-end tests for the webhook pipeline: HTTP in, Telegram message and
//! stored turns out.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use booai::relay::commands::WELCOME_MESSAGE;
use booai::relay::webhook::{MAX_UPDATE_BYTES, router};
use booai::relay::{CompletionClient, ConversationStore, Relay, RelaySettings, Role, TextFormat};
use common::{Provider, RecordingTransport, eventually};

fn relay(provider: &Provider, transport: Arc<RecordingTransport>) -> Arc<Relay> {
    let store = ConversationStore::in_memory().unwrap();
    store.ensure_schema().unwrap();
    Arc::new(Relay::new(
        store,
        CompletionClient::new(provider.config()),
        transport,
        RelaySettings::default(),
    ))
}

async fn post_update(relay: Arc<Relay>, body: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router(relay).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_text_message_end_to_end() {
    let provider = Provider::completing("X", Duration::from_millis(500)).await;
    let transport = Arc::new(RecordingTransport::default());
    let relay = relay(&provider, transport.clone());

    let started = Instant::now();
    let (status, body) = post_update(
        relay.clone(),
        r#"{"update_id":1,"message":{"message_id":10,"from":{"id":7,"is_bot":false,"first_name":"Ana"},"chat":{"id":42,"type":"private"},"date":1700000000,"text":"CMV o que é?"}}"#,
    )
    .await;

    // Acknowledged before the provider has answered.
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({ "ok": true }));
    assert!(transport.sent().is_empty());

    let sent = &*transport;
    assert!(eventually(|| async move { !sent.sent().is_empty() }).await);
    assert_eq!(transport.sent(), vec![(42, "X".to_string(), TextFormat::Plain)]);

    let store = relay.store();
    assert!(eventually(|| async move { store.count("42").await.unwrap() == 2 }).await);
    let turns = store.recent("42", 10).await.unwrap();
    let user = turns.iter().find(|t| t.role == Role::User).unwrap();
    let assistant = turns.iter().find(|t| t.role == Role::Assistant).unwrap();
    assert_eq!(user.content, "CMV o que é?");
    assert_eq!(assistant.content, "X");
    assert_eq!(provider.hits(), 1);
}

#[tokio::test]
async fn test_start_command_end_to_end() {
    let provider = Provider::completing("nunca", Duration::ZERO).await;
    let transport = Arc::new(RecordingTransport::default());
    let relay = relay(&provider, transport.clone());

    let (status, _) = post_update(relay, r#"{"message":{"chat":{"id":42},"from":{"id":7},"text":"/start"}}"#).await;
    assert_eq!(status, StatusCode::OK);

    let sent = &*transport;
    assert!(eventually(|| async move { !sent.sent().is_empty() }).await);
    assert_eq!(transport.sent(), vec![(42, WELCOME_MESSAGE.to_string(), TextFormat::Html)]);
    assert_eq!(provider.hits(), 0);
}

#[tokio::test]
async fn test_updates_without_message_are_acknowledged_and_ignored() {
    let provider = Provider::completing("X", Duration::ZERO).await;
    let transport = Arc::new(RecordingTransport::default());
    let relay = relay(&provider, transport.clone());

    for body in [
        r#"{"update_id":3,"edited_message":{"chat":{"id":42},"text":"editado"}}"#,
        r#"{"update_id":4,"my_chat_member":{"chat":{"id":42}}}"#,
        r#"{}"#,
        "not json at all",
        "",
    ] {
        let (status, ack) = post_update(relay.clone(), body).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(ack["ok"], true, "{body}");
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(transport.sent().is_empty());
    assert_eq!(provider.hits(), 0);
    assert_eq!(relay.store().count("42").await.unwrap(), 0);
}

#[tokio::test]
async fn test_missing_content_type_is_still_acknowledged() {
    let provider = Provider::completing("X", Duration::ZERO).await;
    let transport = Arc::new(RecordingTransport::default());
    let relay = relay(&provider, transport.clone());

    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .body(Body::from(r#"{"message":{"chat":{"id":5},"text":"oi"}}"#))
        .unwrap();
    let response = router(relay).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let sent = &*transport;
    assert!(eventually(|| async move { !sent.sent().is_empty() }).await);
    assert_eq!(transport.sent()[0].0, 5);
}

#[tokio::test]
async fn test_oversized_update_is_acknowledged_and_dropped() {
    let provider = Provider::completing("X", Duration::ZERO).await;
    let transport = Arc::new(RecordingTransport::default());
    let relay = relay(&provider, transport.clone());

    // Above axum's default 2 MB limit as well as our own cap.
    let padding = "a".repeat(3 * 1024 * 1024);
    let body = format!(r#"{{"message":{{"chat":{{"id":42}},"text":"{padding}"}}}}"#);
    assert!(body.len() > MAX_UPDATE_BYTES);

    let (status, ack) = post_update(relay.clone(), &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack, serde_json::json!({ "ok": true }));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(transport.sent().is_empty());
    assert_eq!(provider.hits(), 0);
    assert_eq!(relay.store().count("42").await.unwrap(), 0);
}

#[tokio::test]
async fn test_large_update_under_cap_is_processed() {
    let provider = Provider::completing("X", Duration::ZERO).await;
    let transport = Arc::new(RecordingTransport::default());
    let relay = relay(&provider, transport.clone());

    let padding = " ".repeat(MAX_UPDATE_BYTES / 2);
    let body = format!(r#"{{"message":{{"chat":{{"id":42}},"text":"oi"}}{padding}}}"#);

    let (status, _) = post_update(relay, &body).await;
    assert_eq!(status, StatusCode::OK);

    let sent = &*transport;
    assert!(eventually(|| async move { !sent.sent().is_empty() }).await);
    assert_eq!(transport.sent()[0].1, "X");
}

#[tokio::test]
async fn test_health_routes() {
    let provider = Provider::completing("X", Duration::ZERO).await;
    let relay = relay(&provider, Arc::new(RecordingTransport::default()));

    for uri in ["/", "/health"] {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = router(relay.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
    }
}
