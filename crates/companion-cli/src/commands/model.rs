//! Model management commands.

use std::path::PathBuf;
use std::time::Duration;

use companion_ollama::{
    paths, InferenceServiceManager, InstallProgress, InstallSource, Manifest, ModelProvisioner,
    ServiceConfig, DEFAULT_MODEL_FILENAME, DEFAULT_MODEL_NAME,
};
use indicatif::{ProgressBar, ProgressStyle};

/// List installed models.
pub(crate) async fn list(config: ServiceConfig) -> miette::Result<()> {
    let mut manager = InferenceServiceManager::new(config);
    super::start_service(&mut manager).await?;

    let models = manager
        .client()
        .list_models()
        .await
        .map_err(|e| miette::miette!("Failed to list models: {}", e))?;

    if models.is_empty() {
        println!("No models installed.");
        println!();
        println!("To install the default model, run:");
        println!("  companion model pull");
    } else {
        println!("Installed models:");
        for model in &models {
            println!(
                "  - {:<40} {:>8.1} MB  {}",
                model.name,
                model.size_bytes as f64 / (1024.0 * 1024.0),
                model.modified_at
            );
        }
    }

    stop(&mut manager).await
}

/// Install a model unless it is already present.
pub(crate) async fn pull(
    config: ServiceConfig,
    name: Option<String>,
    manifest: Option<PathBuf>,
) -> miette::Result<()> {
    paths::ensure_dirs().map_err(|e| miette::miette!("Failed to create data directories: {}", e))?;

    let mut manager = InferenceServiceManager::new(config);
    super::start_service(&mut manager).await?;

    let name = name.unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string());
    let source = install_source(&name, manifest);

    match install(&manager, &name, &source).await {
        Ok(true) => println!("Model '{}' installed.", name),
        Ok(false) => println!("Model '{}' is already installed.", name),
        Err(e) => {
            stop(&mut manager).await?;
            return Err(e);
        }
    }

    manager.set_active_model(&name);
    stop(&mut manager).await
}

/// Where `name` is installed from: an explicit manifest, the packaged
/// manifest for the default model when present, otherwise the registry.
pub(crate) fn install_source(name: &str, manifest: Option<PathBuf>) -> InstallSource {
    match manifest {
        Some(path) => InstallSource::Local { manifest: path },
        None if name == DEFAULT_MODEL_NAME && paths::default_manifest_path().is_file() => {
            InstallSource::Local {
                manifest: paths::default_manifest_path(),
            }
        }
        None => InstallSource::Registry,
    }
}

/// Install `name` on the managed backend with a progress bar.
///
/// Returns `true` when an install ran.
pub(crate) async fn install(
    manager: &InferenceServiceManager,
    name: &str,
    source: &InstallSource,
) -> miette::Result<bool> {
    let provisioner = ModelProvisioner::from_manager(manager)
        .map_err(|e| miette::miette!("Cannot install models: {}", e))?;

    if provisioner
        .is_installed(name)
        .await
        .map_err(|e| miette::miette!("Failed to list models: {}", e))?
    {
        return Ok(false);
    }

    match source {
        InstallSource::Registry => println!("Pulling model: {}", name),
        InstallSource::Local { manifest } => {
            println!("Building model {} from {}", name, manifest.display())
        }
    }
    println!("This may take a while...");

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .map_err(|e| miette::miette!("Invalid progress bar template: {}", e))?
            .progress_chars("#>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(120));

    let result = provisioner
        .ensure_installed(name, source, |progress: InstallProgress| {
            if let Some(percent) = progress.percent {
                pb.set_position(percent.round() as u64);
            }
            pb.set_message(progress.line);
        })
        .await;

    match result {
        Ok(installed) => {
            pb.finish_with_message("done");
            Ok(installed)
        }
        Err(e) => {
            pb.abandon_with_message("failed");
            Err(miette::miette!("Failed to install model: {}", e))
        }
    }
}

/// Show information about models and paths.
pub(crate) fn info(config: ServiceConfig) -> miette::Result<()> {
    let manager = InferenceServiceManager::new(config);

    println!("Companion Model Configuration");
    println!("=============================");
    println!();
    println!("Data directory:   {}", paths::companion_data_dir().display());
    println!("Models directory: {}", paths::models_dir().display());
    println!("Binaries:         {}", paths::bin_dir().display());
    println!();
    match manager.binary_path() {
        Some(path) => println!("Ollama binary:    {}", path.display()),
        None => println!("Ollama binary:    not found"),
    }
    println!("Service address:  {}", manager.config().base_url());
    println!();

    let manifest_path = paths::default_manifest_path();
    println!("Default model:    {}", DEFAULT_MODEL_NAME);
    println!("  Artifact:       {}", DEFAULT_MODEL_FILENAME);
    println!("  Manifest:       {}", manifest_path.display());
    println!("  Manifest found: {}", manifest_path.is_file());
    println!(
        "  Artifact found: {}",
        paths::models_dir().join(DEFAULT_MODEL_FILENAME).is_file()
    );

    Ok(())
}

/// Print or write the manifest of the packaged model.
pub(crate) fn manifest(write: bool) -> miette::Result<()> {
    let text = Manifest::packaged(DEFAULT_MODEL_FILENAME).render();

    if !write {
        print!("{}", text);
        return Ok(());
    }

    paths::ensure_dirs().map_err(|e| miette::miette!("Failed to create data directories: {}", e))?;
    let path = paths::default_manifest_path();
    std::fs::write(&path, text)
        .map_err(|e| miette::miette!("Failed to write {}: {}", path.display(), e))?;
    println!("Manifest written to {}", path.display());
    Ok(())
}

async fn stop(manager: &mut InferenceServiceManager) -> miette::Result<()> {
    manager
        .stop()
        .await
        .map_err(|e| miette::miette!("Failed to stop inference service: {}", e))
}
