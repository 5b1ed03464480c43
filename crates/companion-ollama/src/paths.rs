//! Path utilities for Companion data directories.

use std::path::{Path, PathBuf};

/// Get the Companion data directory (~/.companion/).
///
/// Falls back to the current directory when no home directory is known.
pub fn companion_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".companion")
}

/// Get the models directory (~/.companion/models/).
pub fn models_dir() -> PathBuf {
    companion_data_dir().join("models")
}

/// Get the bin directory (~/.companion/bin/).
pub fn bin_dir() -> PathBuf {
    companion_data_dir().join("bin")
}

/// Platform file name of the ollama binary.
pub fn ollama_binary_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "ollama.exe"
    } else {
        "ollama"
    }
}

/// Get the path to the bundled ollama binary.
pub fn bundled_ollama_path() -> PathBuf {
    bin_dir().join(ollama_binary_name())
}

/// Get the path to the default packaged manifest.
pub fn default_manifest_path() -> PathBuf {
    models_dir().join("Modelfile")
}

/// Search `PATH` for an executable with the given name.
pub fn find_on_path(binary: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(binary))
        .find(|candidate| is_executable(candidate))
}

/// Locate the ollama binary.
///
/// Order: explicit override, bundled copy, `PATH`.
pub fn locate_ollama(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return is_executable(path).then(|| path.to_path_buf());
    }

    let bundled = bundled_ollama_path();
    if is_executable(&bundled) {
        return Some(bundled);
    }

    find_on_path(ollama_binary_name())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Ensure the Companion data directories exist.
pub fn ensure_dirs() -> std::io::Result<()> {
    std::fs::create_dir_all(companion_data_dir())?;
    std::fs::create_dir_all(models_dir())?;
    std::fs::create_dir_all(bin_dir())?;
    Ok(())
}
