//! Ask command - one-shot completion without conversation history.

use std::io::Write;

use companion_chat::{ChatOutcome, StreamControl};
use companion_ollama::{InferenceServiceManager, ServiceConfig};

pub(crate) async fn run(
    config: ServiceConfig,
    prompt: &str,
    system: Option<&str>,
    model: Option<String>,
    stream: bool,
) -> miette::Result<()> {
    let mut manager = InferenceServiceManager::new(config);
    super::start_service(&mut manager).await?;

    let client = super::chat_client(&manager)?;
    if let Some(model) = model {
        client.set_model(model);
    }
    let options = client.config().options.clone();

    let result = if stream {
        let mut streamed = String::new();
        let outcome = client
            .generate_stream(prompt, system, &options, &StreamControl::default(), |chunk| {
                streamed.push_str(chunk);
                print!("{}", chunk);
                std::io::stdout().flush().ok();
            })
            .await;
        if !streamed.is_empty() {
            println!();
        }
        if let Ok(ChatOutcome::Reply(reply)) = &outcome {
            if reply.trim() != streamed.trim() {
                println!("[filtered] {}", reply);
            }
        }
        outcome
    } else {
        client.generate(prompt, system, &options).await.map(|outcome| {
            if let ChatOutcome::Reply(text) = &outcome {
                println!("{}", text);
            }
            outcome
        })
    };

    let stopped = manager.stop().await;

    match result {
        Ok(ChatOutcome::Blocked { notice }) => Err(miette::miette!("{}", notice)),
        Ok(_) => stopped.map_err(|e| miette::miette!("Failed to stop inference service: {}", e)),
        Err(e) => Err(miette::miette!("Generation failed: {}", e)),
    }
}
