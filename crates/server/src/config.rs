use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tungstenite::protocol::WebSocketConfig;

use motion_relay_core::detection::domain::motion_detector::{MotionConfig, SelectionPolicy};
use motion_relay_core::detection::infrastructure::background_model_factory::{
    BackgroundConfig, ModelKind, ModelSharing,
};
use motion_relay_core::pipeline::stream_session::SessionOptions;
use motion_relay_core::shared::constants::{
    DEFAULT_HISTORY, DEFAULT_JPEG_QUALITY, DEFAULT_KERNEL_SIZE, DEFAULT_MAX_MESSAGE_BYTES,
    DEFAULT_MIN_AREA, DEFAULT_STREAM_PATH, DEFAULT_SUBSCRIBER_QUEUE, DEFAULT_THRESHOLD,
    DEFAULT_WARMUP_ITERATIONS, DEFAULT_WARMUP_LEARNING_RATE,
};

pub const DEFAULT_BIND: &str = "0.0.0.0:5000";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 20;
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 120;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Selection {
    AllRegions,
    LargestOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Model {
    Gaussian,
    Knn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Sharing {
    Shared,
    PerSession,
}

/// Every runtime knob of the relay, as stored in `config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub path: String,
    pub min_area: f64,
    pub kernel_size: usize,
    pub threshold: u8,
    pub cleanup: bool,
    pub selection: Selection,
    pub model: Model,
    /// `None` averages over the frames seen, capped at `history`.
    pub learning_rate: Option<f64>,
    pub history: usize,
    pub detect_shadows: bool,
    pub sharing: Sharing,
    pub reference_image: Option<PathBuf>,
    pub warmup_iterations: usize,
    pub warmup_learning_rate: f64,
    pub jpeg_quality: u8,
    pub subscriber_queue: usize,
    pub max_message_bytes: usize,
    pub poll_interval_ms: u64,
    /// Idle seconds before a ping is sent; `0` disables keep-alive.
    pub keep_alive_secs: u64,
    pub dump_masks: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            path: DEFAULT_STREAM_PATH.to_string(),
            min_area: DEFAULT_MIN_AREA,
            kernel_size: DEFAULT_KERNEL_SIZE,
            threshold: DEFAULT_THRESHOLD,
            cleanup: true,
            selection: Selection::AllRegions,
            model: Model::Gaussian,
            learning_rate: None,
            history: DEFAULT_HISTORY,
            detect_shadows: true,
            sharing: Sharing::Shared,
            reference_image: None,
            warmup_iterations: DEFAULT_WARMUP_ITERATIONS,
            warmup_learning_rate: DEFAULT_WARMUP_LEARNING_RATE,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            subscriber_queue: DEFAULT_SUBSCRIBER_QUEUE,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            dump_masks: None,
        }
    }
}

impl ServerConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("motion-relay").join("config.json"))
    }

    /// Reads `explicit` if given, else the per-user config file when it
    /// exists, else falls back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => {
                    log::info!("Loading config from {}", path.display());
                    Self::from_file(&path)
                }
                None => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if !self.path.starts_with('/') {
            return invalid(format!("Path must start with '/', got {:?}", self.path));
        }
        if self.kernel_size == 0 || self.kernel_size % 2 == 0 {
            return invalid(format!(
                "Kernel size must be a positive odd integer, got {}",
                self.kernel_size
            ));
        }
        if !(self.min_area >= 0.0) {
            return invalid(format!("Minimum area must be non-negative, got {}", self.min_area));
        }
        if let Some(rate) = self.learning_rate {
            if !(0.0..=1.0).contains(&rate) {
                return invalid(format!("Learning rate must be between 0.0 and 1.0, got {rate}"));
            }
        }
        if !(0.0..=1.0).contains(&self.warmup_learning_rate) {
            return invalid(format!(
                "Warm-up learning rate must be between 0.0 and 1.0, got {}",
                self.warmup_learning_rate
            ));
        }
        if self.history == 0 {
            return invalid("History must be at least 1 frame".to_string());
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return invalid(format!(
                "JPEG quality must be between 1 and 100, got {}",
                self.jpeg_quality
            ));
        }
        if self.subscriber_queue == 0 {
            return invalid("Subscriber queue must hold at least 1 frame".to_string());
        }
        if self.max_message_bytes == 0 {
            return invalid("Maximum message size must be positive".to_string());
        }
        if self.poll_interval_ms == 0 {
            return invalid("Poll interval must be at least 1ms".to_string());
        }
        if let Some(image) = &self.reference_image {
            if !image.is_file() {
                return invalid(format!("Reference image not found: {}", image.display()));
            }
        }
        Ok(())
    }

    pub fn motion_config(&self) -> MotionConfig {
        MotionConfig {
            min_area: self.min_area,
            kernel_size: self.kernel_size,
            threshold: self.threshold,
            cleanup: self.cleanup,
            selection: match self.selection {
                Selection::AllRegions => SelectionPolicy::AllRegions,
                Selection::LargestOnly => SelectionPolicy::LargestOnly,
            },
        }
    }

    pub fn background_config(&self) -> BackgroundConfig {
        BackgroundConfig {
            kind: match self.model {
                Model::Gaussian => ModelKind::Gaussian,
                Model::Knn => ModelKind::Knn,
            },
            learning_rate: self.learning_rate,
            history: self.history,
            detect_shadows: self.detect_shadows,
        }
    }

    pub fn model_sharing(&self) -> ModelSharing {
        match self.sharing {
            Sharing::Shared => ModelSharing::Shared,
            Sharing::PerSession => ModelSharing::PerSession,
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            max_message_bytes: self.max_message_bytes,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn keep_alive(&self) -> Option<Duration> {
        (self.keep_alive_secs > 0).then(|| Duration::from_secs(self.keep_alive_secs))
    }

    /// Transport limits sit at twice `max_message_bytes`, so a message just
    /// over the limit reaches the session and is dropped there instead of
    /// failing the connection.
    pub fn websocket_config(&self) -> WebSocketConfig {
        let transport_limit = self.max_message_bytes.saturating_mul(2);
        WebSocketConfig::default()
            .max_message_size(Some(transport_limit))
            .max_frame_size(Some(transport_limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.bind, "0.0.0.0:5000");
        assert_eq!(config.path, "/ws/stream");
        assert_eq!(config.motion_config(), MotionConfig::default());
        assert_eq!(config.background_config(), BackgroundConfig::default());
        assert_eq!(config.model_sharing(), ModelSharing::Shared);
    }

    #[rstest]
    #[case::relative_path(ServerConfig { path: "ws".into(), ..ServerConfig::default() }, "Path")]
    #[case::even_kernel(ServerConfig { kernel_size: 4, ..ServerConfig::default() }, "Kernel size")]
    #[case::zero_kernel(ServerConfig { kernel_size: 0, ..ServerConfig::default() }, "Kernel size")]
    #[case::negative_area(ServerConfig { min_area: -1.0, ..ServerConfig::default() }, "Minimum area")]
    #[case::rate_too_high(ServerConfig { learning_rate: Some(1.5), ..ServerConfig::default() }, "Learning rate")]
    #[case::warmup_rate(ServerConfig { warmup_learning_rate: -0.1, ..ServerConfig::default() }, "Warm-up")]
    #[case::zero_history(ServerConfig { history: 0, ..ServerConfig::default() }, "History")]
    #[case::zero_quality(ServerConfig { jpeg_quality: 0, ..ServerConfig::default() }, "JPEG quality")]
    #[case::quality_too_high(ServerConfig { jpeg_quality: 101, ..ServerConfig::default() }, "JPEG quality")]
    #[case::zero_queue(ServerConfig { subscriber_queue: 0, ..ServerConfig::default() }, "queue")]
    #[case::zero_limit(ServerConfig { max_message_bytes: 0, ..ServerConfig::default() }, "message size")]
    #[case::zero_poll(ServerConfig { poll_interval_ms: 0, ..ServerConfig::default() }, "Poll interval")]
    #[case::missing_reference(ServerConfig { reference_image: Some("/no/such/file.png".into()), ..ServerConfig::default() }, "Reference image")]
    fn test_validate_rejects(#[case] config: ServerConfig, #[case] needle: &str) {
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains(needle), "{err}");
    }

    #[test]
    fn test_keep_alive_zero_disables_pings() {
        assert_eq!(ServerConfig::default().keep_alive(), Some(Duration::from_secs(120)));
        let config = ServerConfig {
            keep_alive_secs: 0,
            ..ServerConfig::default()
        };
        config.validate().unwrap();
        assert_eq!(config.keep_alive(), None);
    }

    #[test]
    fn test_transport_limit_exceeds_session_limit() {
        let config = ServerConfig {
            max_message_bytes: 1000,
            ..ServerConfig::default()
        };
        let ws = config.websocket_config();
        assert_eq!(ws.max_message_size, Some(2000));
        assert_eq!(ws.max_frame_size, Some(2000));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "min_area": 800, "selection": "largest-only", "model": "knn", "sharing": "per-session", "learning_rate": 0.05 }"#,
        )
        .unwrap();

        let config = ServerConfig::load(Some(&path)).unwrap();

        assert_eq!(config.min_area, 800.0);
        assert_eq!(config.selection, Selection::LargestOnly);
        assert_eq!(config.model_sharing(), ModelSharing::PerSession);
        assert_eq!(config.background_config().kind, ModelKind::Knn);
        assert_eq!(config.learning_rate, Some(0.05));
        assert_eq!(config.kernel_size, DEFAULT_KERNEL_SIZE);
        assert_eq!(config.path, DEFAULT_STREAM_PATH);
    }

    #[test]
    fn test_round_trips_through_json() {
        let config = ServerConfig {
            dump_masks: Some("/tmp/masks".into()),
            threshold: 128,
            ..ServerConfig::default()
        };
        let json = serde_json::to_string_pretty(&config).unwrap();
        assert!(json.contains("\"all-regions\""));
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_missing_explicit_file_is_read_error() {
        let err = ServerConfig::load(Some(Path::new("/no/such/config.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        let err = ServerConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_unknown_selection_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "selection": "biggest" }"#).unwrap();
        assert!(ServerConfig::from_file(&path).is_err());
    }
}
