//! Runtime environment profiles.
//!
//! An [`EnvProfile`] is a read-only snapshot of what the host can execute:
//! native interpreters plus the container images available for isolated
//! runs. The routing stage renders the profile into prompt text; the
//! executor consults it for interpreter invocations.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A natively available interpreter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeRuntime {
    /// Language name, lowercased (e.g., "python").
    pub language: String,
    /// Interpreter version string (e.g., "3.11.4").
    pub version: String,
    /// Command used to run a script via stdin-free invocation
    /// (e.g., `["python3", "-c"]` or `["bash", "-c"]`).
    pub invocation: Vec<String>,
}

impl NativeRuntime {
    /// Creates a new native runtime descriptor.
    pub fn new(
        language: impl Into<String>,
        version: impl Into<String>,
        invocation: Vec<String>,
    ) -> Self {
        Self {
            language: language.into().to_lowercase(),
            version: version.into(),
            invocation,
        }
    }
}

/// A container image available for isolated execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageProfile {
    /// Image reference (e.g., "biocontainers/scanpy:1.9").
    pub image: String,
    /// Human-readable description of the installed toolchain.
    pub description: String,
    /// Languages this image can execute.
    #[serde(default)]
    pub languages: Vec<String>,
}

/// Snapshot of the runtimes available for script execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvProfile {
    /// Natively installed interpreters.
    pub native_runtimes: Vec<NativeRuntime>,
    /// Container images registered for isolated execution.
    pub images: Vec<ImageProfile>,
}

impl EnvProfile {
    /// Creates an empty profile.
    pub fn new() -> Self {
        Self::default()
    }

    /// A profile with a plain local Python and Bash, no containers.
    pub fn local_default() -> Self {
        Self {
            native_runtimes: vec![
                NativeRuntime::new(
                    "python",
                    "3",
                    vec!["python3".to_string(), "-c".to_string()],
                ),
                NativeRuntime::new("bash", "5", vec!["bash".to_string(), "-c".to_string()]),
            ],
            images: Vec::new(),
        }
    }

    /// Loads an image profile file: a JSON map or list describing available
    /// images and their toolchains.
    pub fn from_image_profile_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(&path)?;
        let images: Vec<ImageProfile> =
            serde_json::from_str(&text).map_err(|e| ConfigError::InvalidValue {
                key: path.as_ref().display().to_string(),
                message: e.to_string(),
            })?;

        let mut profile = Self::local_default();
        profile.images = images;
        Ok(profile)
    }

    /// Adds a native runtime.
    pub fn with_native(mut self, runtime: NativeRuntime) -> Self {
        self.native_runtimes.push(runtime);
        self
    }

    /// Adds a container image.
    pub fn with_image(mut self, image: ImageProfile) -> Self {
        self.images.push(image);
        self
    }

    /// Looks up the invocation command for a native language.
    pub fn native_invocation(&self, language: &str) -> Option<&[String]> {
        let language = language.to_lowercase();
        self.native_runtimes
            .iter()
            .find(|r| r.language == language)
            .map(|r| r.invocation.as_slice())
    }

    /// Renders the native runtime list for the routing prompt.
    pub fn native_runtimes_text(&self) -> String {
        if self.native_runtimes.is_empty() {
            return "(none)".to_string();
        }
        self.native_runtimes
            .iter()
            .map(|r| format!("- {} {}", r.language, r.version))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Renders the image list for the routing prompt.
    pub fn images_text(&self) -> String {
        if self.images.is_empty() {
            return "(none)".to_string();
        }
        self.images
            .iter()
            .map(|img| {
                let langs = if img.languages.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", img.languages.join(", "))
                };
                format!("- {}{}: {}", img.image, langs, img.description)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_local_default_has_python() {
        let profile = EnvProfile::local_default();
        let invocation = profile.native_invocation("python").expect("python");
        assert_eq!(invocation[0], "python3");
    }

    #[test]
    fn test_native_lookup_is_case_insensitive() {
        let profile = EnvProfile::local_default();
        assert!(profile.native_invocation("Python").is_some());
        assert!(profile.native_invocation("ruby").is_none());
    }

    #[test]
    fn test_prompt_text_rendering() {
        let profile = EnvProfile::new()
            .with_native(NativeRuntime::new(
                "python",
                "3.11",
                vec!["python3".into(), "-c".into()],
            ))
            .with_image(ImageProfile {
                image: "rocker/tidyverse:4.3".into(),
                description: "R with tidyverse and Seurat".into(),
                languages: vec!["r".into()],
            });

        let native = profile.native_runtimes_text();
        assert!(native.contains("python 3.11"));

        let images = profile.images_text();
        assert!(images.contains("rocker/tidyverse:4.3"));
        assert!(images.contains("[r]"));
    }

    #[test]
    fn test_empty_profile_text() {
        let profile = EnvProfile::new();
        assert_eq!(profile.native_runtimes_text(), "(none)");
        assert_eq!(profile.images_text(), "(none)");
    }

    #[test]
    fn test_image_profile_file_loading() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(
            file,
            r#"[{{"image": "python:3.11-slim", "description": "plain python", "languages": ["python"]}}]"#
        )
        .expect("write");

        let profile = EnvProfile::from_image_profile_file(file.path()).expect("load");
        assert_eq!(profile.images.len(), 1);
        assert_eq!(profile.images[0].image, "python:3.11-slim");
        // Native defaults still present alongside the file's images.
        assert!(profile.native_invocation("python").is_some());
    }
}
