//! CLI commands.

pub mod ask;
pub mod chat;
pub mod model;
pub mod serve;
pub mod status;

use companion_chat::{ChatConfig, InferenceClient};
use companion_ollama::InferenceServiceManager;

/// Start the managed backend, or report why it is not available.
pub(crate) async fn start_service(manager: &mut InferenceServiceManager) -> miette::Result<()> {
    let status = manager
        .start()
        .await
        .map_err(|e| miette::miette!("Failed to start inference service: {}", e))?;

    if status.is_external {
        tracing::info!("Using running inference service at {}", manager.config().base_url());
    }
    Ok(())
}

/// Chat client talking to the managed backend.
pub(crate) fn chat_client(manager: &InferenceServiceManager) -> miette::Result<InferenceClient> {
    let config = ChatConfig {
        base_url: manager.config().base_url(),
        ..ChatConfig::from_env()
    };
    InferenceClient::new(config).map_err(|e| miette::miette!("Invalid chat configuration: {}", e))
}
