//! Modelfile-style manifests used to build a model from a local artifact.
//!
//! ```text
//! FROM ./model.gguf
//! SYSTEM """You are a friendly assistant."""
//! PARAMETER temperature 0.3
//! PARAMETER stop "User:"
//! ```

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::api::ModelOptions;
use crate::error::OllamaError;

/// Parsed manifest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    /// Source artifact path or base model reference.
    pub from: String,
    pub template: Option<String>,
    pub system: Option<String>,
    /// Parameters in file order. `stop` may repeat.
    pub parameters: Vec<(String, String)>,
    pub license: Option<String>,
}

impl Manifest {
    /// Manifest for a packaged GGUF artifact placed next to it.
    pub fn packaged(artifact_file: &str) -> Self {
        let parameters = [
            ("temperature", "0.3"),
            ("top_p", "0.9"),
            ("top_k", "40"),
            ("num_ctx", "2048"),
            ("num_predict", "200"),
            ("stop", "<|im_end|>"),
            ("stop", "사용자:"),
            ("stop", "User:"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            from: format!("./{}", artifact_file),
            template: None,
            system: Some(
                "You are a friendly and helpful assistant. Answer accurately and politely."
                    .to_string(),
            ),
            parameters,
            license: None,
        }
    }

    /// Read and parse a manifest file.
    pub fn load(path: &Path) -> Result<Self, OllamaError> {
        if !path.is_file() {
            return Err(OllamaError::ManifestNotFound(path.display().to_string()));
        }
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse manifest text.
    pub fn parse(text: &str) -> Result<Self, OllamaError> {
        let mut manifest = Manifest::default();
        let mut saw_from = false;
        let mut lines = text.lines().enumerate();

        while let Some((idx, raw)) = lines.next() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (directive, rest) = match line.split_once(char::is_whitespace) {
                Some((d, r)) => (d, r.trim()),
                None => (line, ""),
            };

            let value = if let Some(body) = rest.strip_prefix("\"\"\"") {
                read_triple_quoted(body, &mut lines).ok_or_else(|| {
                    OllamaError::Manifest(format!("unterminated \"\"\" on line {}", idx + 1))
                })?
            } else {
                rest.to_string()
            };

            match directive.to_ascii_uppercase().as_str() {
                "FROM" => {
                    if value.is_empty() {
                        return Err(OllamaError::Manifest(format!(
                            "FROM without a source on line {}",
                            idx + 1
                        )));
                    }
                    manifest.from = value;
                    saw_from = true;
                }
                "TEMPLATE" => manifest.template = Some(value),
                "SYSTEM" => manifest.system = Some(value),
                "LICENSE" => manifest.license = Some(value),
                "PARAMETER" => {
                    let (name, param) = value.split_once(char::is_whitespace).ok_or_else(|| {
                        OllamaError::Manifest(format!("PARAMETER without a value on line {}", idx + 1))
                    })?;
                    manifest
                        .parameters
                        .push((name.to_string(), unquote(param.trim()).to_string()));
                }
                other => debug!("Ignoring manifest directive {}", other),
            }
        }

        if !saw_from {
            return Err(OllamaError::Manifest("missing FROM directive".to_string()));
        }
        Ok(manifest)
    }

    /// Render back to manifest text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "FROM {}", self.from);
        if let Some(template) = &self.template {
            let _ = writeln!(out, "TEMPLATE \"\"\"{}\"\"\"", template);
        }
        if let Some(system) = &self.system {
            let _ = writeln!(out, "SYSTEM \"\"\"{}\"\"\"", system);
        }
        for (name, value) in &self.parameters {
            if value.chars().any(|c| c.is_whitespace() || c == '"' || c == '<' || c == ':') {
                let _ = writeln!(out, "PARAMETER {} \"{}\"", name, value);
            } else {
                let _ = writeln!(out, "PARAMETER {} {}", name, value);
            }
        }
        if let Some(license) = &self.license {
            let _ = writeln!(out, "LICENSE \"\"\"{}\"\"\"", license);
        }
        out
    }

    /// First value of a parameter.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn stop_sequences(&self) -> Vec<String> {
        self.parameters
            .iter()
            .filter(|(k, _)| k == "stop")
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Generation defaults declared by the manifest.
    pub fn generation_defaults(&self) -> ModelOptions {
        ModelOptions {
            temperature: self.parameter("temperature").and_then(|v| v.parse().ok()),
            top_p: self.parameter("top_p").and_then(|v| v.parse().ok()),
            top_k: self.parameter("top_k").and_then(|v| v.parse().ok()),
            num_predict: self.parameter("num_predict").and_then(|v| v.parse().ok()),
            num_ctx: self.parameter("num_ctx").and_then(|v| v.parse().ok()),
            stop: self.stop_sequences(),
        }
    }

    /// Whether `FROM` names a file rather than a registry model.
    pub fn from_is_path(&self) -> bool {
        let from = self.from.as_str();
        from.starts_with("./")
            || from.starts_with("../")
            || from.starts_with('/')
            || from.starts_with(".\\")
            || from.ends_with(".gguf")
            || Path::new(from).is_absolute()
    }

    /// Artifact path, resolved against the manifest's directory.
    pub fn artifact_path(&self, manifest_dir: &Path) -> Option<PathBuf> {
        if !self.from_is_path() {
            return None;
        }
        let from = Path::new(&self.from);
        Some(if from.is_absolute() {
            from.to_path_buf()
        } else {
            manifest_dir.join(from)
        })
    }
}

fn read_triple_quoted<'a>(
    first: &str,
    lines: &mut impl Iterator<Item = (usize, &'a str)>,
) -> Option<String> {
    if let Some(end) = first.find("\"\"\"") {
        return Some(first[..end].to_string());
    }

    let mut value = first.to_string();
    for (_, line) in lines {
        value.push('\n');
        if let Some(end) = line.find("\"\"\"") {
            value.push_str(&line[..end]);
            return Some(value);
        }
        value.push_str(line);
    }
    None
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}
