//! Doubles shared by the integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};

use booai::relay::{ChatTransport, CompletionConfig, TextFormat, TransportError};

#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(i64, String, TextFormat)>>,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<(i64, String, TextFormat)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_message(&self, chat_id: i64, text: &str, format: TextFormat) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push((chat_id, text.to_string(), format));
        Ok(())
    }

    async fn set_webhook(&self, _url: &str) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Provider stand-in that always completes with `text`.
pub struct Provider {
    pub base_url: String,
    hits: Arc<AtomicUsize>,
}

impl Provider {
    pub async fn completing(text: &str, delay: Duration) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let body = json!({ "choices": [{ "message": { "role": "assistant", "content": text } }] });
        let app = Router::new().route(
            "/chat/completions",
            post(move |Json(_): Json<Value>| {
                let (counter, body) = (counter.clone(), body.clone());
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    Json(body)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            base_url: format!("http://{addr}"),
            hits,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> CompletionConfig {
        CompletionConfig {
            api_key: Some("sk-test".to_string()),
            base_url: self.base_url.clone(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 500,
            timeout: Duration::from_secs(5),
            retries: 0,
        }
    }
}

/// Poll `check` until it returns true or three seconds pass.
pub async fn eventually<F, Fut>(check: F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..150 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
