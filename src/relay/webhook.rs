//! HTTP surface: the Telegram webhook and liveness routes.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::relay::engine::Relay;
use crate::relay::turn::InboundEvent;

/// Updates larger than this are acknowledged and dropped unread.
pub const MAX_UPDATE_BYTES: usize = 1024 * 1024;

/// Body of every webhook response.
#[derive(Debug, Serialize)]
pub struct Ack {
    pub ok: bool,
}

#[derive(Deserialize)]
struct Update {
    message: Option<IncomingMessage>,
}

#[derive(Deserialize)]
struct IncomingMessage {
    chat: Chat,
    from: Option<Sender>,
    text: Option<String>,
}

#[derive(Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Deserialize)]
struct Sender {
    id: i64,
}

pub fn router(relay: Arc<Relay>) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/health", get(status))
        // The handler enforces its own size cap; axum's would answer 413.
        .route("/webhook", post(receive_update).layer(DefaultBodyLimit::disable()))
        .layer(TraceLayer::new_for_http())
        .with_state(relay)
}

/// POST /webhook - acknowledge, then process in the background.
///
/// The body is read as raw bytes so a malformed payload still gets
/// `200 {"ok":true}`; Telegram retries anything else.
async fn receive_update(State(relay): State<Arc<Relay>>, body: Bytes) -> Json<Ack> {
    if body.len() > MAX_UPDATE_BYTES {
        warn!(bytes = body.len(), "Dropping oversized update");
        return Json(Ack { ok: true });
    }
    match parse_update(&body) {
        // At capacity the event is dropped and logged by `schedule`.
        Some(event) => {
            let _ = relay.schedule(event);
        }
        None => debug!("Ignoring update without a message"),
    }
    Json(Ack { ok: true })
}

async fn status() -> Json<Value> {
    Json(json!({ "message": "BOOAI backend está online", "status": "ok" }))
}

/// Extract the message fields of an update. `None` for payloads that are not
/// JSON, lack a message (edits, member updates, ...) or lack a chat id.
pub fn parse_update(body: &[u8]) -> Option<InboundEvent> {
    let update: Update = match serde_json::from_slice(body) {
        Ok(update) => update,
        Err(e) => {
            debug!(error = %e, "Unparseable update");
            return None;
        }
    };
    let message = update.message?;
    Some(InboundEvent::new(
        message.chat.id,
        message.from.map(|s| s.id),
        message.text.unwrap_or_default(),
    ))
}
