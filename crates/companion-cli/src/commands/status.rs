//! Status command - probe the inference service without starting it.

use companion_ollama::{InferenceServiceManager, ServiceConfig};
use serde_json::json;

pub(crate) async fn run(config: ServiceConfig, as_json: bool) -> miette::Result<()> {
    let manager = InferenceServiceManager::new(config);
    let client = manager.client();

    let reachable = client.check_health(manager.config().probe_timeout).await;
    let models = match &reachable {
        Ok(()) => client.list_models().await.unwrap_or_default(),
        Err(_) => Vec::new(),
    };
    let binary = manager.binary_path();

    if as_json {
        let report = json!({
            "base_url": client.base_url(),
            "reachable": reachable.is_ok(),
            "error": reachable.as_ref().err().map(|e| e.to_string()),
            "binary": binary.as_ref().map(|p| p.display().to_string()),
            "models": models,
        });
        let text = serde_json::to_string_pretty(&report)
            .map_err(|e| miette::miette!("Failed to encode status: {}", e))?;
        println!("{}", text);
        return Ok(());
    }

    println!("Inference service: {}", client.base_url());
    match &reachable {
        Ok(()) => println!("  Status: running"),
        Err(e) => println!("  Status: not reachable ({})", e),
    }
    match &binary {
        Some(path) => println!("  Binary: {}", path.display()),
        None => println!("  Binary: not found"),
    }

    if reachable.is_ok() {
        println!();
        if models.is_empty() {
            println!("No models installed.");
        } else {
            println!("Installed models:");
            for model in &models {
                println!("  - {}", model.name);
            }
        }
    }

    Ok(())
}
