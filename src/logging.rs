//! Tracing setup: stdout, a log file under the data directory, and the
//! optional operator chat.

use std::path::Path;
use std::sync::Arc;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

use crate::relay::telegram::ChatTransport;
use crate::telegram_log::TelegramLogLayer;

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
}

/// Install the global subscriber. Keep the returned guard alive for the
/// lifetime of the process or buffered file output is lost.
pub fn init(
    data_dir: &Path,
    log_chat: Option<(Arc<dyn ChatTransport>, i64)>,
) -> std::io::Result<WorkerGuard> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("booai.log"))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(env_filter()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(env_filter()),
        );

    match log_chat {
        Some((transport, chat_id)) => registry.with(TelegramLogLayer::new(transport, chat_id)).init(),
        None => registry.init(),
    }

    Ok(guard)
}
