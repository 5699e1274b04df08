use anyhow::{Context, Result};
use facecam_core::RecogniserPaths;
use facecam_models::{ArtifactRef, DEFAULT_HUB_ENDPOINT, DEFAULT_REVISION};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "facecam.toml";

/// Runtime configuration.
///
/// Layered as defaults, then `facecam.toml`, then `FACECAM_*` environment
/// variables; CLI flags are applied last by the caller.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Dashboard listen address.
    pub bind: String,
    pub port: u16,
    /// V4L2 camera index (`/dev/video{N}`).
    pub camera_index: u32,
    /// Where the model artifacts live.
    pub model_dir: PathBuf,
    /// Download cache for the artifact store.
    pub cache_dir: PathBuf,
    /// Hugging Face repository holding the artifacts.
    pub hub_repo: String,
    pub hub_revision: String,
    pub hub_endpoint: String,
    pub detector_file: String,
    pub embedder_file: String,
    pub classifier_file: String,
    /// Font for labels; a system font is searched for when unset.
    pub font_path: Option<PathBuf>,
    /// JPEG quality of dashboard frames (1-100).
    pub jpeg_quality: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8501,
            camera_index: 0,
            model_dir: PathBuf::from("."),
            cache_dir: PathBuf::from("model_cache"),
            hub_repo: "facecam/face-recogniser".to_string(),
            hub_revision: DEFAULT_REVISION.to_string(),
            hub_endpoint: DEFAULT_HUB_ENDPOINT.to_string(),
            detector_file: "det_10g.onnx".to_string(),
            embedder_file: "w600k_r50.onnx".to_string(),
            classifier_file: "face_recogniser.json".to_string(),
            font_path: None,
            jpeg_quality: 80,
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit `path` must exist; otherwise `./facecam.toml` is read if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()),
        };

        let mut config = match &file {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read config {}", p.display()))?;
                let config = Self::from_toml_str(&raw)
                    .with_context(|| format!("failed to parse config {}", p.display()))?;
                tracing::info!(path = %p.display(), "loaded config file");
                config
            }
            None => Self::default(),
        };

        config.apply_env_with(|key| std::env::var(key).ok());
        config.jpeg_quality = config.jpeg_quality.clamp(1, 100);
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Override fields from `FACECAM_*` variables (and `HF_ENDPOINT`).
    /// Unparseable numbers are ignored with a warning.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FACECAM_BIND") {
            self.bind = v;
        }
        if let Some(v) = parse_var(&lookup, "FACECAM_PORT") {
            self.port = v;
        }
        if let Some(v) = parse_var(&lookup, "FACECAM_CAMERA_INDEX") {
            self.camera_index = v;
        }
        if let Some(v) = lookup("FACECAM_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACECAM_CACHE_DIR") {
            self.cache_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACECAM_HUB_REPO") {
            self.hub_repo = v;
        }
        if let Some(v) = lookup("FACECAM_HUB_REVISION") {
            self.hub_revision = v;
        }
        if let Some(v) = lookup("FACECAM_HUB_ENDPOINT").or_else(|| lookup("HF_ENDPOINT")) {
            self.hub_endpoint = v;
        }
        if let Some(v) = lookup("FACECAM_FONT_PATH") {
            self.font_path = Some(PathBuf::from(v));
        }
        if let Some(v) = parse_var(&lookup, "FACECAM_JPEG_QUALITY") {
            self.jpeg_quality = v;
        }
    }

    fn artifact(&self, filename: &str) -> ArtifactRef {
        ArtifactRef::new(&self.hub_repo, filename).at_revision(&self.hub_revision)
    }

    /// Every artifact the live recogniser needs.
    pub fn artifacts(&self) -> Vec<ArtifactRef> {
        vec![
            self.artifact(&self.detector_file),
            self.artifact(&self.embedder_file),
            self.artifact(&self.classifier_file),
        ]
    }

    /// The two networks, without the classifier (for building a gallery).
    pub fn network_artifacts(&self) -> Vec<ArtifactRef> {
        vec![self.artifact(&self.detector_file), self.artifact(&self.embedder_file)]
    }

    pub fn recogniser_paths(&self) -> RecogniserPaths {
        facecam_core::recogniser::paths_in(
            &self.model_dir,
            &self.detector_file,
            &self.embedder_file,
            &self.classifier_file,
        )
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment variable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.camera_index, 0);
        assert_eq!(config.cache_dir, PathBuf::from("model_cache"));
        assert_eq!(config.classifier_file, "face_recogniser.json");
        assert_eq!(config.hub_endpoint, "https://huggingface.co");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            port = 9000
            hub_repo = "acme/faces"
            font_path = "/fonts/Sans.ttf"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.hub_repo, "acme/faces");
        assert_eq!(config.font_path, Some(PathBuf::from("/fonts/Sans.ttf")));
        assert_eq!(config.bind, "127.0.0.1");
    }

    #[test]
    fn test_unknown_toml_key_is_rejected() {
        assert!(Config::from_toml_str("camera = 1").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env_with(env(&[
            ("FACECAM_PORT", "8080"),
            ("FACECAM_CAMERA_INDEX", "2"),
            ("FACECAM_MODEL_DIR", "/var/lib/facecam"),
            ("HF_ENDPOINT", "https://hf-mirror.example"),
        ]));
        assert_eq!(config.port, 8080);
        assert_eq!(config.camera_index, 2);
        assert_eq!(config.model_dir, PathBuf::from("/var/lib/facecam"));
        assert_eq!(config.hub_endpoint, "https://hf-mirror.example");
    }

    #[test]
    fn test_facecam_endpoint_wins_over_hf_endpoint() {
        let mut config = Config::default();
        config.apply_env_with(env(&[
            ("FACECAM_HUB_ENDPOINT", "https://primary.example"),
            ("HF_ENDPOINT", "https://secondary.example"),
        ]));
        assert_eq!(config.hub_endpoint, "https://primary.example");
    }

    #[test]
    fn test_bad_number_is_ignored() {
        let mut config = Config::default();
        config.apply_env_with(env(&[("FACECAM_PORT", "not-a-port")]));
        assert_eq!(config.port, 8501);
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facecam.toml");
        std::fs::write(&path, "jpeg_quality = 0\ncamera_index = 1\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.camera_index, 1);
        // Clamped into the valid JPEG range.
        assert_eq!(config.jpeg_quality, 1);
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        assert!(Config::load(Some(Path::new("/nonexistent/facecam.toml"))).is_err());
    }

    #[test]
    fn test_artifacts_share_repo_and_revision() {
        let mut config = Config::default();
        config.hub_repo = "acme/faces".into();
        config.hub_revision = "v3".into();
        let artifacts = config.artifacts();
        let names: Vec<&str> = artifacts.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, vec!["det_10g.onnx", "w600k_r50.onnx", "face_recogniser.json"]);
        assert!(artifacts.iter().all(|a| a.repo_id == "acme/faces" && a.revision == "v3"));
        assert_eq!(config.network_artifacts().len(), 2);
    }
}
