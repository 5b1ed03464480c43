//! Companion CLI - chat with a local model through Ollama.

use clap::{Parser, Subcommand};
use companion_ollama::ServiceConfig;
use std::path::PathBuf;

mod commands;

/// Companion - a filtered chat assistant backed by a local Ollama server
#[derive(Parser)]
#[command(name = "companion")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Port of the Ollama server (default: 11434)
    #[arg(long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start or attach to the inference service and keep it running until Ctrl-C
    Serve,

    /// Show whether the inference service is reachable
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Interactive chat session
    Chat {
        /// Model to use instead of the configured default
        #[arg(short, long)]
        model: Option<String>,
        /// Wait for whole replies instead of streaming
        #[arg(long)]
        no_stream: bool,
        /// Keep partial replies interrupted with Ctrl-C
        #[arg(long)]
        keep_partial: bool,
    },

    /// One-shot completion
    Ask {
        /// Prompt text
        prompt: String,
        /// System prompt (default: the built-in safe prompt)
        #[arg(long)]
        system: Option<String>,
        /// Model to use instead of the configured default
        #[arg(short, long)]
        model: Option<String>,
        /// Stream the reply as it is generated
        #[arg(long)]
        stream: bool,
    },

    /// Model management
    Model {
        #[command(subcommand)]
        command: ModelCommands,
    },
}

#[derive(Subcommand)]
enum ModelCommands {
    /// List installed models
    List,

    /// Install a model from the registry or a local manifest
    Pull {
        /// Model name (default: the packaged model)
        name: Option<String>,
        /// Build from this manifest instead of pulling
        #[arg(long)]
        manifest: Option<PathBuf>,
    },

    /// Show model paths and configuration
    Info,

    /// Print the manifest for the packaged model
    Manifest {
        /// Write it to the models directory instead of printing
        #[arg(long)]
        write: bool,
    },
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let mut service = ServiceConfig::from_env();
    if let Some(port) = cli.port {
        service.port = port;
    }

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| miette::miette!("Failed to start async runtime: {}", e))?;

    runtime.block_on(async move {
        match cli.command {
            Commands::Serve => commands::serve::run(service).await,
            Commands::Status { json } => commands::status::run(service, json).await,
            Commands::Chat {
                model,
                no_stream,
                keep_partial,
            } => commands::chat::run(service, model, !no_stream, keep_partial).await,
            Commands::Ask {
                prompt,
                system,
                model,
                stream,
            } => commands::ask::run(service, &prompt, system.as_deref(), model, stream).await,
            Commands::Model { command } => match command {
                ModelCommands::List => commands::model::list(service).await,
                ModelCommands::Pull { name, manifest } => {
                    commands::model::pull(service, name, manifest).await
                }
                ModelCommands::Info => commands::model::info(service),
                ModelCommands::Manifest { write } => commands::model::manifest(write),
            },
        }
    })
}
