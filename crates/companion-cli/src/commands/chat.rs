//! Chat command - interactive session.

use std::io::Write;

use companion_chat::{ChatError, ChatOutcome, Conversation, InferenceClient, StreamControl};
use companion_ollama::{paths, InferenceServiceManager, ServiceConfig};
use tokio::io::{AsyncBufReadExt, BufReader};

const NOT_CONNECTED: &str = "[AI not connected]";

pub(crate) async fn run(
    config: ServiceConfig,
    model: Option<String>,
    stream: bool,
    keep_partial: bool,
) -> miette::Result<()> {
    let mut manager = InferenceServiceManager::new(config);

    // Without a backend the session still runs; every turn reports the outage.
    let connected = match super::start_service(&mut manager).await {
        Ok(()) => true,
        Err(e) => {
            eprintln!("{:?}", e);
            eprintln!("{} Continuing without a model.", NOT_CONNECTED);
            false
        }
    };

    let client = super::chat_client(&manager)?;
    if connected {
        let wanted = model
            .clone()
            .unwrap_or_else(|| client.config().default_model.clone());
        provision(&manager, &client, &wanted).await;
    }
    if let Some(model) = model {
        client.set_model(model);
    }

    if connected {
        match client.resolve_model().await {
            Ok(selection) => {
                manager.set_active_model(&selection.name);
                if selection.degraded {
                    println!("Using model {} (preferred models are not installed)", selection.name);
                } else {
                    println!("Using model {}", selection.name);
                }
            }
            Err(ChatError::NoModelAvailable) => {
                eprintln!("No models installed. Install one with: companion model pull");
            }
            Err(e) => eprintln!("Could not select a model: {}", e),
        }
    }

    println!("Type a message. /clear resets the conversation, /exit quits.");
    let conversation = client.new_conversation();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| miette::miette!("Failed to read input: {}", e))?
        else {
            break;
        };

        match line.trim() {
            "" => continue,
            "/exit" | "/quit" => break,
            "/clear" => {
                conversation.clear();
                println!("Conversation cleared.");
                continue;
            }
            _ => {}
        }

        let result = if stream {
            stream_turn(&client, &conversation, &line, keep_partial).await
        } else {
            let options = client.config().options.clone();
            client.chat(&conversation, &line, &options).await.map(|outcome| {
                if let Some(text) = outcome.text() {
                    println!("{}", text);
                }
                outcome
            })
        };

        match result {
            Ok(ChatOutcome::Blocked { .. }) => {}
            Ok(_) => {
                let stats = client.stats();
                tracing::debug!(
                    "{} turns, {} messages",
                    stats.conversation_count,
                    stats.total_messages
                );
            }
            Err(e) if e.is_connection_failure() => eprintln!("{}", NOT_CONNECTED),
            Err(e) => eprintln!("[error] {}", e),
        }
    }

    manager
        .stop()
        .await
        .map_err(|e| miette::miette!("Failed to stop inference service: {}", e))?;
    Ok(())
}

/// Install `name` when the backend lacks it. Failures leave the session to
/// fall back on whatever is installed.
async fn provision(manager: &InferenceServiceManager, client: &InferenceClient, name: &str) {
    match client.is_model_installed(name).await {
        Ok(true) => return,
        Ok(false) => {}
        Err(e) => {
            tracing::debug!("Could not check for model {}: {}", name, e);
            return;
        }
    }

    if let Err(e) = paths::ensure_dirs() {
        tracing::warn!("Failed to create data directories: {}", e);
    }
    let source = super::model::install_source(name, None);
    if let Err(e) = super::model::install(manager, name, &source).await {
        eprintln!("{:?}", e);
        eprintln!("Continuing with the models already installed.");
    }
}

/// Stream one turn to stdout. Ctrl-C cancels the reply.
async fn stream_turn(
    client: &InferenceClient,
    conversation: &Conversation,
    line: &str,
    keep_partial: bool,
) -> Result<ChatOutcome, ChatError> {
    let control = StreamControl {
        keep_partial,
        ..Default::default()
    };
    let cancel = control.cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let mut streamed = String::new();
    let options = client.config().options.clone();
    let outcome = client
        .chat_stream(conversation, line, &options, &control, |chunk| {
            streamed.push_str(chunk);
            print!("{}", chunk);
            std::io::stdout().flush().ok();
        })
        .await;
    watcher.abort();

    if !streamed.is_empty() {
        println!();
    }

    match &outcome {
        Ok(ChatOutcome::Reply(reply)) if reply.trim() != streamed.trim() => {
            // The stored reply is the filtered one.
            println!("[filtered] {}", reply);
        }
        Ok(ChatOutcome::Blocked { notice }) => println!("{}", notice),
        Ok(ChatOutcome::Cancelled { kept }) => match kept {
            Some(_) => println!("[interrupted, partial reply kept]"),
            None => println!("[interrupted]"),
        },
        _ => {}
    }

    outcome
}
