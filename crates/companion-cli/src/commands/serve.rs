//! Serve command - keep the inference service up until interrupted.

use companion_ollama::{InferenceServiceManager, ServiceConfig, ServiceState};

pub(crate) async fn run(config: ServiceConfig) -> miette::Result<()> {
    let mut manager = InferenceServiceManager::new(config);

    println!("Starting inference service...");
    super::start_service(&mut manager).await?;

    let status = manager.status();
    match status.state {
        ServiceState::RunningExternal => println!(
            "An inference service is already running at {}; attaching to it.",
            manager.config().base_url()
        ),
        _ => println!(
            "Inference service started at {} (PID: {})",
            manager.config().base_url(),
            manager
                .owned_pid()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        ),
    }
    println!("Press Ctrl-C to stop.");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("Failed to wait for Ctrl-C: {}", e))?;

    println!();
    if status.is_external {
        println!("Leaving the external inference service running.");
    } else {
        println!("Stopping inference service...");
    }
    manager
        .stop()
        .await
        .map_err(|e| miette::miette!("Failed to stop inference service: {}", e))?;

    Ok(())
}
