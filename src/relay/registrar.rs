//! Webhook registration at startup.

use tracing::{error, info};

use crate::relay::telegram::{ChatTransport, TransportError};

/// Register `webhook_url` with the platform. Called once per process start.
///
/// A failure is logged and returned but must not stop the server: the
/// operator can re-register externally, and updates start flowing once it
/// succeeds.
pub async fn register_webhook(transport: &dyn ChatTransport, webhook_url: &str) -> Result<(), TransportError> {
    match transport.set_webhook(webhook_url).await {
        Ok(()) => {
            info!("✅ Webhook registered at {}", webhook_url);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Webhook registration failed, no updates will arrive until it succeeds");
            Err(e)
        }
    }
}
