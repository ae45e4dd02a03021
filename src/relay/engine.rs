//! Relay engine - the background half of webhook handling.
//!
//! The webhook handler acknowledges first and hands the event to
//! [`Relay::schedule`]; everything here runs after the platform already has
//! its response, so outcomes are only ever logged.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::relay::commands::Action;
use crate::relay::completion::CompletionClient;
use crate::relay::database::ConversationStore;
use crate::relay::dispatch::{Delivery, ReplyDispatcher};
use crate::relay::telegram::{ChatTransport, TextFormat};
use crate::relay::turn::{ConversationTurn, InboundEvent};

#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    /// Events processed at once; extra events are dropped.
    pub max_in_flight: usize,
    /// Prior turns sent to the provider as context.
    pub context_turns: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            max_in_flight: 64,
            context_turns: 0,
        }
    }
}

/// Shared collaborators for event processing. Built once at startup.
pub struct Relay {
    store: ConversationStore,
    completion: CompletionClient,
    dispatcher: ReplyDispatcher,
    permits: Arc<Semaphore>,
    settings: RelaySettings,
}

impl Relay {
    pub fn new(
        store: ConversationStore,
        completion: CompletionClient,
        transport: Arc<dyn ChatTransport>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            store,
            completion,
            dispatcher: ReplyDispatcher::new(transport),
            permits: Arc::new(Semaphore::new(settings.max_in_flight.max(1))),
            settings,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Run `process` on its own task. Returns `None` when the in-flight limit
    /// is reached and the event was dropped.
    pub fn schedule(self: &Arc<Self>, event: InboundEvent) -> Option<JoinHandle<()>> {
        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    chat_id = event.chat_id,
                    limit = self.settings.max_in_flight,
                    "Relay at capacity, dropping event"
                );
                return None;
            }
        };

        let relay = Arc::clone(self);
        Some(tokio::spawn(async move {
            relay.process(event).await;
            drop(permit);
        }))
    }

    /// Route, reply and record one event.
    pub async fn process(&self, event: InboundEvent) {
        let chat_id = event.chat_id;
        let preview: String = event.text.chars().take(100).collect();
        info!(chat_id, "📨 Message: \"{}\"", preview);

        debug!(chat_id, is_command = event.route.is_command, "Routed");
        let (reply, format) = match event.route.action {
            Action::Canned(text) => {
                self.record(ConversationTurn::user(chat_id, event.sender_id, event.text.as_str()))
                    .await;
                (text.to_string(), TextFormat::Html)
            }
            Action::Complete => {
                // Read context before this turn is stored so it isn't sent twice.
                let history = self.history(chat_id).await;
                let user_turn = ConversationTurn::user(chat_id, event.sender_id, event.text.as_str());
                let (_, reply) = tokio::join!(
                    self.record(user_turn),
                    self.completion.complete_with_history(&history, &event.text)
                );
                (reply, TextFormat::Plain)
            }
        };

        match self.dispatcher.deliver(chat_id, &reply, format).await {
            Delivery::Delivered => {
                self.record(ConversationTurn::assistant(chat_id, reply)).await;
            }
            Delivery::Partial(len) => {
                let mut reply = reply;
                reply.truncate(len);
                self.record(ConversationTurn::assistant(chat_id, reply)).await;
            }
            Delivery::NoticeSent | Delivery::Failed => {
                debug!(chat_id, "Reply not delivered, not recording it");
            }
        }
    }

    async fn history(&self, chat_id: i64) -> Vec<ConversationTurn> {
        if self.settings.context_turns == 0 {
            return Vec::new();
        }
        match self.store.recent(&chat_id.to_string(), self.settings.context_turns).await {
            Ok(turns) => turns,
            Err(e) => {
                warn!(chat_id, error = %e, "Failed to load history, continuing without it");
                Vec::new()
            }
        }
    }

    /// Best-effort append: failures are logged and otherwise ignored.
    async fn record(&self, turn: ConversationTurn) {
        if let Err(e) = self.store.append(turn).await {
            warn!(error = %e, "Failed to store turn");
        }
    }
}
