//! Reply delivery with a single technical-difficulty follow-up.

use std::sync::Arc;

use tracing::{error, warn};

use crate::relay::telegram::{ChatTransport, MAX_MESSAGE_LEN, TextFormat, split_message};

/// Sent once when a reply could not be delivered.
pub const TECHNICAL_DIFFICULTY_NOTICE: &str =
    "Estamos com dificuldades técnicas no momento. Por favor, tente novamente mais tarde.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The reply reached the chat.
    Delivered,
    /// A later chunk of a long reply failed after earlier ones went out.
    /// Holds the byte length of the delivered prefix. No notice is sent.
    Partial(usize),
    /// The reply failed but the notice went through.
    NoticeSent,
    /// Both the reply and the notice failed.
    Failed,
}

pub struct ReplyDispatcher {
    transport: Arc<dyn ChatTransport>,
}

impl ReplyDispatcher {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self { transport }
    }

    /// Send `text` to `chat_id`, split to fit the platform limit. If nothing
    /// went out, try the notice exactly once; if that fails too, log and give up.
    pub async fn deliver(&self, chat_id: i64, text: &str, format: TextFormat) -> Delivery {
        let mut delivered = 0;
        for chunk in split_message(text, MAX_MESSAGE_LEN) {
            if let Err(e) = self.transport.send_message(chat_id, chunk, format).await {
                if delivered > 0 {
                    warn!(
                        chat_id,
                        error = %e,
                        delivered,
                        total = text.len(),
                        "Reply only partly delivered"
                    );
                    return Delivery::Partial(delivered);
                }
                warn!(chat_id, error = %e, "Reply delivery failed, sending notice");
                return self.send_notice(chat_id).await;
            }
            delivered += chunk.len();
        }
        Delivery::Delivered
    }

    async fn send_notice(&self, chat_id: i64) -> Delivery {
        match self
            .transport
            .send_message(chat_id, TECHNICAL_DIFFICULTY_NOTICE, TextFormat::Plain)
            .await
        {
            Ok(()) => Delivery::NoticeSent,
            Err(e) => {
                error!(chat_id, error = %e, "Technical-difficulty notice failed, dropping reply");
                Delivery::Failed
            }
        }
    }
}
