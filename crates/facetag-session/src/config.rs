use crate::catalog::{Catalog, CatalogError};
use facetag_core::{ModelPaths, DEFAULT_MATCH_THRESHOLD};
use std::path::PathBuf;
use std::time::Duration;

/// Session configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing the four ONNX model files.
    pub model_dir: PathBuf,
    /// Root for the seed catalog images (`<data_dir>/labeled_images`).
    pub data_dir: PathBuf,
    /// Optional TOML catalog file or per-label image directory; overrides
    /// the seed catalog when set.
    pub catalog_path: Option<PathBuf>,
    /// Maximum Euclidean distance accepted as a match.
    pub match_threshold: f32,
    /// Minimum SCRFD score for a face to be kept.
    pub detection_confidence: f32,
    /// Period of the detection loop ticker.
    pub frame_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            model_dir: data_dir.join("models"),
            data_dir,
            catalog_path: None,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            detection_confidence: facetag_core::detector::DEFAULT_CONFIDENCE_THRESHOLD,
            frame_interval: Duration::from_millis(33),
        }
    }
}

impl Config {
    /// Load configuration from `FACETAG_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let data_dir = std::env::var("FACETAG_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let model_dir = std::env::var("FACETAG_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        Self {
            model_dir,
            data_dir,
            catalog_path: std::env::var("FACETAG_CATALOG").ok().map(PathBuf::from),
            match_threshold: env_or("FACETAG_MATCH_THRESHOLD", defaults.match_threshold),
            detection_confidence: env_or("FACETAG_DETECT_CONFIDENCE", defaults.detection_confidence),
            frame_interval: Duration::from_millis(env_or(
                "FACETAG_FRAME_INTERVAL_MS",
                defaults.frame_interval.as_millis() as u64,
            )),
        }
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths::in_dir(&self.model_dir)
    }

    pub fn seed_root(&self) -> PathBuf {
        self.data_dir.join("labeled_images")
    }

    /// The configured catalog, otherwise the seed catalog.
    pub fn catalog(&self) -> Result<Catalog, CatalogError> {
        match &self.catalog_path {
            Some(path) if path.is_dir() => Catalog::from_dir(path),
            Some(path) => Catalog::load(path),
            None => Ok(Catalog::seed(&self.seed_root())),
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facetag")
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    parse_or(std::env::var(key).ok().as_deref(), default)
}

fn parse_or<T: std::str::FromStr>(raw: Option<&str>, default: T) -> T {
    match raw {
        Some(v) => v.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(value = v, "ignoring unparsable setting");
            default
        }),
        None => default,
    }
}
