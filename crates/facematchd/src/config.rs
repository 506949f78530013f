use facematch_capture::{CaptureSettings, EmbedderSettings, PixelScaling, TensorLayout};
use facematch_core::MatcherConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Which D-Bus bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Session,
    System,
}

impl FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "session" => Ok(Self::Session),
            "system" => Ok(Self::System),
            other => Err(format!("unknown bus '{other}' (expected session or system)")),
        }
    }
}

/// Optional TOML config file. Every field falls back to a default;
/// `FACEMATCH_*` environment variables override the file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub snapshot_path: Option<PathBuf>,
    pub model_dir: Option<PathBuf>,
    pub detector_model: Option<PathBuf>,
    pub embedder_model: Option<PathBuf>,
    pub request_timeout_secs: Option<u64>,
    pub max_image_bytes: Option<usize>,
    pub bus: Option<BusKind>,
    pub matcher: Option<MatcherConfig>,
    pub embedder: Option<EmbedderSettings>,
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Registry snapshot file (default: `$XDG_DATA_HOME/facematch/embeddings.json`).
    pub snapshot_path: PathBuf,
    pub capture: CaptureSettings,
    pub matcher: MatcherConfig,
    /// Deadline in seconds for one detect + embed call.
    pub request_timeout_secs: u64,
    /// Largest accepted encoded image.
    pub max_image_bytes: usize,
    pub bus: BusKind,
}

impl Config {
    /// Load `FACEMATCH_CONFIG` (if set) and apply environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let file = match std::env::var("FACEMATCH_CONFIG") {
            Ok(path) => {
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| anyhow::anyhow!("cannot read config {path}: {e}"))?;
                let parsed: FileConfig = toml::from_str(&text)
                    .map_err(|e| anyhow::anyhow!("invalid config {path}: {e}"))?;
                tracing::info!(path = %path, "loaded config file");
                parsed
            }
            Err(_) => FileConfig::default(),
        };
        Ok(Self::from_sources(file, |key| std::env::var(key).ok()))
    }

    /// Merge a parsed file with an environment lookup.
    pub fn from_sources(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = env("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facematch");

        let snapshot_path = env("FACEMATCH_SNAPSHOT_PATH")
            .map(PathBuf::from)
            .or(file.snapshot_path)
            .unwrap_or_else(|| data_dir.join("embeddings.json"));

        let model_dir = env("FACEMATCH_MODEL_DIR")
            .map(PathBuf::from)
            .or(file.model_dir)
            .unwrap_or_else(|| data_dir.join("models"));

        let mut capture = CaptureSettings::in_dir(&model_dir);
        if let Some(p) = env("FACEMATCH_DETECTOR_MODEL").map(PathBuf::from).or(file.detector_model) {
            capture.detector_model = resolve(&model_dir, p);
        }
        if let Some(p) = env("FACEMATCH_EMBEDDER_MODEL").map(PathBuf::from).or(file.embedder_model) {
            capture.embedder_model = resolve(&model_dir, p);
        }
        let mut embedder = file.embedder.unwrap_or_default();
        embedder.input_size = parsed(&env, "FACEMATCH_EMBEDDER_INPUT_SIZE", embedder.input_size);
        embedder.layout = parsed::<TensorLayout>(&env, "FACEMATCH_EMBEDDER_LAYOUT", embedder.layout);
        embedder.scaling = parsed::<PixelScaling>(&env, "FACEMATCH_EMBEDDER_SCALING", embedder.scaling);

        let mut matcher = file.matcher.unwrap_or_default();
        matcher.threshold = parsed(&env, "FACEMATCH_THRESHOLD", matcher.threshold);
        matcher.dimension = parsed(&env, "FACEMATCH_EMBEDDING_DIM", matcher.dimension);
        // The embedder must produce what the registry stores.
        embedder.dimension = matcher.dimension;
        capture.embedder = embedder;

        Self {
            snapshot_path,
            capture,
            matcher,
            request_timeout_secs: parsed(
                &env,
                "FACEMATCH_REQUEST_TIMEOUT_SECS",
                file.request_timeout_secs.unwrap_or(10),
            ),
            max_image_bytes: parsed(
                &env,
                "FACEMATCH_MAX_IMAGE_BYTES",
                file.max_image_bytes.unwrap_or(16 * 1024 * 1024),
            ),
            bus: parsed(&env, "FACEMATCH_BUS", file.bus.unwrap_or(BusKind::Session)),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Relative model paths are taken from the model directory.
fn resolve(model_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        model_dir.join(path)
    }
}

fn parsed<T>(env: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env(key) {
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            tracing::warn!(key, value = %raw, error = %e, "ignoring invalid setting");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::from_sources(FileConfig::default(), env_of(&[("HOME", "/home/u")]));
        assert_eq!(
            cfg.snapshot_path,
            PathBuf::from("/home/u/.local/share/facematch/embeddings.json")
        );
        assert_eq!(
            cfg.capture.detector_model,
            PathBuf::from("/home/u/.local/share/facematch/models/det_10g.onnx")
        );
        assert_eq!(cfg.matcher.threshold, 0.97);
        assert_eq!(cfg.matcher.dimension, 512);
        assert_eq!(cfg.request_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.max_image_bytes, 16 * 1024 * 1024);
        assert_eq!(cfg.bus, BusKind::Session);
    }

    #[test]
    fn test_env_overrides() {
        let cfg = Config::from_sources(
            FileConfig::default(),
            env_of(&[
                ("XDG_DATA_HOME", "/data"),
                ("FACEMATCH_SNAPSHOT_PATH", "/srv/db.json"),
                ("FACEMATCH_MODEL_DIR", "/models"),
                ("FACEMATCH_EMBEDDER_MODEL", "arcface.onnx"),
                ("FACEMATCH_THRESHOLD", "0.8"),
                ("FACEMATCH_EMBEDDING_DIM", "128"),
                ("FACEMATCH_EMBEDDER_LAYOUT", "nchw"),
                ("FACEMATCH_EMBEDDER_SCALING", "fixed:127.5:127.5"),
                ("FACEMATCH_BUS", "system"),
            ]),
        );
        assert_eq!(cfg.snapshot_path, PathBuf::from("/srv/db.json"));
        assert_eq!(cfg.capture.embedder_model, PathBuf::from("/models/arcface.onnx"));
        assert_eq!(cfg.matcher.threshold, 0.8);
        assert_eq!(cfg.matcher.dimension, 128);
        assert_eq!(cfg.capture.embedder.dimension, 128);
        assert_eq!(cfg.capture.embedder.layout, TensorLayout::Nchw);
        assert_eq!(
            cfg.capture.embedder.scaling,
            PixelScaling::Fixed { mean: 127.5, std: 127.5 }
        );
        assert_eq!(cfg.bus, BusKind::System);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let cfg = Config::from_sources(
            FileConfig::default(),
            env_of(&[("FACEMATCH_THRESHOLD", "high"), ("FACEMATCH_BUS", "pci")]),
        );
        assert_eq!(cfg.matcher.threshold, 0.97);
        assert_eq!(cfg.bus, BusKind::Session);
    }

    #[test]
    fn test_file_config_with_env_precedence() {
        let file: FileConfig = toml::from_str(
            r#"
            snapshot_path = "/etc/facematch/embeddings.json"
            request_timeout_secs = 3
            bus = "system"

            [matcher]
            threshold = 0.9

            [embedder]
            input_size = 112
            layout = "nchw"
            scaling = { kind = "fixed", mean = 127.5, std = 128.0 }
            "#,
        )
        .unwrap();
        let cfg = Config::from_sources(file, env_of(&[("FACEMATCH_THRESHOLD", "0.5")]));
        assert_eq!(cfg.snapshot_path, PathBuf::from("/etc/facematch/embeddings.json"));
        assert_eq!(cfg.request_timeout_secs, 3);
        assert_eq!(cfg.bus, BusKind::System);
        assert_eq!(cfg.matcher.threshold, 0.5);
        assert_eq!(cfg.matcher.dimension, 512);
        assert_eq!(cfg.capture.embedder.input_size, 112);
        assert_eq!(
            cfg.capture.embedder.scaling,
            PixelScaling::Fixed { mean: 127.5, std: 128.0 }
        );
    }
}
