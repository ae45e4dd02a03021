use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{error, info};

use booai::config::Config;
use booai::logging;
use booai::relay::registrar::register_webhook;
use booai::relay::webhook::router;
use booai::relay::{ChatTransport, CompletionClient, ConversationStore, Relay, RelaySettings, TelegramClient};

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);
    let transport: Arc<dyn ChatTransport> = Arc::new(TelegramClient::new(bot));

    let log_chat = config.log_chat_id.map(|chat_id| (transport.clone(), chat_id));
    let _guard = match logging::init(&config.data_dir, log_chat) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("❌ Failed to set up logging in {:?}: {e}", config.data_dir);
            std::process::exit(1);
        }
    };

    info!("🚀 Starting BOOAI...");
    if config.openai_api_key.is_none() {
        info!("OPENAI_API_KEY not set, running in degraded mode");
    }

    // Conversation history is a product requirement: no database, no service.
    let store = match ConversationStore::open(&config.database_path).and_then(|store| {
        store.ensure_schema()?;
        Ok(store)
    }) {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "Failed to initialize conversation database");
            std::process::exit(1);
        }
    };

    // Telegram keeps the previous registration, so a failure here is logged
    // inside `register_webhook` and the server still starts.
    if register_webhook(transport.as_ref(), &config.webhook_url()).await.is_err() {
        info!("Continuing without a confirmed webhook registration");
    }

    let relay = Arc::new(Relay::new(
        store,
        CompletionClient::new(config.completion()),
        transport,
        RelaySettings {
            max_in_flight: config.max_in_flight,
            context_turns: config.context_turns,
        },
    ));

    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, port = config.port, "Failed to bind");
            std::process::exit(1);
        }
    };
    info!("Listening on port {}", config.port);

    if let Err(e) = axum::serve(listener, router(relay))
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "Server error");
    }
    info!("Shut down");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
