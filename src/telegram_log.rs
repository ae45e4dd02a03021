//! Forwards log events to an operator chat.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::relay::telegram::{ChatTransport, TextFormat, utf16_len};

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const MAX_BUFFERED: usize = 50;
/// In UTF-16 code units, leaving room for the ellipsis under Telegram's limit.
const MAX_LOG_LEN: usize = 4000;

tokio::task_local! {
    /// Set while a log line is being sent. Events raised by the transport
    /// during that send must not be forwarded again.
    static FORWARDING: ();
}

/// Log message with priority.
enum LogMessage {
    /// High priority (WARN/ERROR) - send immediately
    Urgent(String),
    /// Low priority (INFO) - batch and send periodically
    Info(String),
}

pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<LogMessage>,
}

impl TelegramLogLayer {
    /// Must be called inside a tokio runtime.
    pub fn new(transport: Arc<dyn ChatTransport>, chat_id: i64) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogMessage>();

        tokio::spawn(async move {
            let mut info_buffer: Vec<String> = Vec::new();
            let start = tokio::time::Instant::now() + FLUSH_INTERVAL;
            let mut interval = tokio::time::interval_at(start, FLUSH_INTERVAL);

            loop {
                tokio::select! {
                    msg = rx.recv() => {
                        match msg {
                            Some(LogMessage::Urgent(text)) => {
                                send_log(transport.as_ref(), chat_id, &text).await;
                            }
                            Some(LogMessage::Info(text)) => {
                                info_buffer.push(text);
                                if info_buffer.len() >= MAX_BUFFERED {
                                    flush_buffer(transport.as_ref(), chat_id, &mut info_buffer).await;
                                }
                            }
                            None => break,
                        }
                    }
                    _ = interval.tick() => {
                        flush_buffer(transport.as_ref(), chat_id, &mut info_buffer).await;
                    }
                }
            }
        });

        Self { tx }
    }
}

async fn send_log(transport: &dyn ChatTransport, chat_id: i64, text: &str) {
    let text = truncate(text, MAX_LOG_LEN);
    let sent = FORWARDING
        .scope((), transport.send_message(chat_id, &text, TextFormat::Plain))
        .await;
    // Reporting through tracing here would feed back into this layer.
    if let Err(e) = sent {
        eprintln!("Failed to send log to Telegram: {e}");
    }
}

async fn flush_buffer(transport: &dyn ChatTransport, chat_id: i64, buffer: &mut Vec<String>) {
    if buffer.is_empty() {
        return;
    }
    let combined = buffer.join("\n");
    buffer.clear();
    send_log(transport, chat_id, &combined).await;
}

fn truncate(text: &str, max_units: usize) -> String {
    if utf16_len(text) <= max_units {
        return text.to_string();
    }
    let mut units = 0;
    let truncated: String = text
        .chars()
        .take_while(|c| {
            units += c.len_utf16();
            units <= max_units
        })
        .collect();
    format!("{}...", truncated)
}

struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let fields = std::mem::take(&mut self.message);
            self.message = format!("{:?}", value);
            if !fields.is_empty() {
                self.message.push_str(&format!(" ({fields})"));
            }
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message
                .push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();

        // Only send INFO, WARN, ERROR to Telegram
        if level > Level::INFO {
            return;
        }
        // HTTP client internals would echo every log send back into the chat.
        if !event.metadata().target().starts_with(env!("CARGO_CRATE_NAME")) {
            return;
        }
        if FORWARDING.try_with(|_| ()).is_ok() {
            return;
        }

        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);

        let msg = match level {
            Level::ERROR => LogMessage::Urgent(format!("❌ {}", visitor.message)),
            Level::WARN => LogMessage::Urgent(format!("⚠️ {}", visitor.message)),
            _ => LogMessage::Info(visitor.message),
        };

        if self.tx.send(msg).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tracing_subscriber::prelude::*;

    use crate::relay::tests::RecordingTransport;
    use crate::relay::telegram::TransportError;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("ççççç", 2), "çç...");
        assert_eq!(truncate("😀😀😀", 5), "😀😀...");
    }

    /// Fails every send and logs the failure the way `TelegramClient` does.
    #[derive(Default)]
    struct FailingTransport {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl ChatTransport for FailingTransport {
        async fn send_message(&self, chat_id: i64, _text: &str, _format: TextFormat) -> Result<(), TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(chat_id, "Failed to send: Bad Request: chat not found");
            Err(TransportError("Bad Request: chat not found".to_string()))
        }

        async fn set_webhook(&self, _url: &str) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_log_send_is_not_forwarded_again() {
        let transport = Arc::new(FailingTransport::default());
        let layer = TelegramLogLayer::new(transport.clone(), -100);
        // Held across awaits so the forwarding task logs into the same subscriber.
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(layer));

        tracing::warn!("single warning");
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_warnings_are_forwarded_immediately() {
        let transport = Arc::new(RecordingTransport::new());
        let layer = TelegramLogLayer::new(transport.clone(), -100);
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(chat_id = 42, "delivery failed");
            tracing::debug!("not forwarded");
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        let sent = transport.sent_texts(-100);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("⚠️ delivery failed"));
        assert!(sent[0].contains("chat_id = 42"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_info_is_batched() {
        let transport = Arc::new(RecordingTransport::new());
        let layer = TelegramLogLayer::new(transport.clone(), -100);
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("one");
            tracing::info!("two");
        });

        tokio::time::sleep(FLUSH_INTERVAL + Duration::from_millis(10)).await;
        assert_eq!(transport.sent_texts(-100), vec!["one\ntwo"]);
    }
}
