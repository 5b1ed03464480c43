#![cfg(unix)]

mod common;

use std::path::{Path, PathBuf};

use common::write_script;
use companion_ollama::{InstallProgress, InstallSource, Manifest, ModelProvisioner, OllamaError};

/// Fake `ollama` that records installs as marker files next to itself.
fn fake_cli(dir: &Path) -> PathBuf {
    let body = format!(
        r#"DIR={dir}
case "$1" in
  list)
    echo "NAME              ID              SIZE      MODIFIED"
    echo "mistral:latest    61e88e884507    4.1 GB    2 days ago"
    if [ -f "$DIR/pulled" ]; then
      echo "gemma:2b          b50d6c999e59    1.7 GB    now"
    fi
    ;;
  pull)
    if [ "$2" = "missing:1b" ]; then
      echo "Error: pull model manifest: file does not exist" >&2
      exit 1
    fi
    printf 'pulling manifest\r'
    printf 'pulling 8eeb52dfb3bb... 45%% 1.2 GB\r'
    printf 'pulling 8eeb52dfb3bb... 100%% 2.6 GB\n'
    echo "success"
    touch "$DIR/pulled"
    ;;
  create)
    echo "transferring model data"
    echo "$2 $3 $(pwd)" > "$DIR/created"
    echo "success"
    ;;
esac"#,
        dir = dir.display()
    );
    write_script(dir, "ollama", &body)
}

fn provisioner(dir: &Path) -> ModelProvisioner {
    ModelProvisioner::new(fake_cli(dir), "127.0.0.1:11434")
}

#[tokio::test]
async fn test_list_installed() {
    let dir = tempfile::tempdir().unwrap();
    let provisioner = provisioner(dir.path());

    assert_eq!(provisioner.list_installed().await.unwrap(), vec!["mistral:latest"]);
    assert!(provisioner.is_installed("mistral").await.unwrap());
    assert!(!provisioner.is_installed("gemma:2b").await.unwrap());
}

#[tokio::test]
async fn test_installed_model_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let provisioner = provisioner(dir.path());
    let mut events = Vec::new();

    let installed = provisioner
        .ensure_installed("mistral:latest", &InstallSource::Registry, |p| events.push(p))
        .await
        .unwrap();

    assert!(!installed);
    assert!(events.is_empty());
    assert!(!dir.path().join("pulled").exists());
}

#[tokio::test]
async fn test_pull_reports_progress() {
    let dir = tempfile::tempdir().unwrap();
    let provisioner = provisioner(dir.path());
    let mut events: Vec<InstallProgress> = Vec::new();

    let installed = provisioner
        .ensure_installed("gemma:2b", &InstallSource::Registry, |p| events.push(p))
        .await
        .unwrap();

    assert!(installed);
    assert!(events.iter().all(|e| e.model == "gemma:2b"));
    let percents: Vec<f32> = events.iter().filter_map(|e| e.percent).collect();
    assert_eq!(percents, vec![45.0, 100.0]);
    assert!(events.iter().any(|e| e.line == "pulling manifest"));
    assert!(provisioner.is_installed("gemma:2b").await.unwrap());
}

#[tokio::test]
async fn test_failed_pull() {
    let dir = tempfile::tempdir().unwrap();
    let provisioner = provisioner(dir.path());

    let err = provisioner
        .ensure_installed("missing:1b", &InstallSource::Registry, |_| {})
        .await
        .unwrap_err();

    match err {
        OllamaError::ModelInstallFailed(message) => {
            assert!(message.contains("file does not exist"), "{}", message)
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_local_install_requires_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let provisioner = provisioner(dir.path());
    let source = InstallSource::Local {
        manifest: dir.path().join("models").join("Modelfile"),
    };

    let err = provisioner
        .ensure_installed("companion", &source, |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, OllamaError::ManifestNotFound(_)));
}

#[tokio::test]
async fn test_local_install_requires_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let provisioner = provisioner(dir.path());
    let models = dir.path().join("models");
    std::fs::create_dir(&models).unwrap();
    let manifest = models.join("Modelfile");
    std::fs::write(&manifest, Manifest::packaged("model.gguf").render()).unwrap();

    let err = provisioner
        .ensure_installed("companion", &InstallSource::Local { manifest }, |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, OllamaError::ArtifactNotFound(_)));
}

#[tokio::test]
async fn test_local_install_runs_create() {
    let dir = tempfile::tempdir().unwrap();
    let provisioner = provisioner(dir.path());
    let models = dir.path().join("models");
    std::fs::create_dir(&models).unwrap();
    std::fs::write(models.join("model.gguf"), b"GGUF").unwrap();
    let manifest = models.join("Modelfile");
    std::fs::write(&manifest, Manifest::packaged("model.gguf").render()).unwrap();

    let installed = provisioner
        .ensure_installed("companion", &InstallSource::Local { manifest }, |_| {})
        .await
        .unwrap();

    assert!(installed);
    let created = std::fs::read_to_string(dir.path().join("created")).unwrap();
    let fields: Vec<&str> = created.split_whitespace().collect();
    assert_eq!(fields[0], "companion");
    assert_eq!(fields[1], "-f");
    assert!(fields[2].ends_with("models"), "{}", created);
}
