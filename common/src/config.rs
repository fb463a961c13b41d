use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Highest accepted `source.fps`. Keeps the frame interval at 1 ms or more.
pub const MAX_FPS: f64 = 1000.0;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_quality")]
    pub quality: u32,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default = "default_replay_path")]
    pub replay_path: PathBuf,
    #[serde(default)]
    pub replay_loop: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Minimum time between two saves unless the new frame is brighter.
    #[serde(default = "default_capture_cooldown_ms")]
    pub cooldown_ms: i64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// Also dump the raw luminance record next to each JPEG.
    #[serde(default)]
    pub write_raw: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_notify_cooldown_ms")]
    pub cooldown_ms: i64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub start_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: default_capture_cooldown_ms(),
            output_dir: default_output_dir(),
            file_prefix: default_file_prefix(),
            jpeg_quality: default_jpeg_quality(),
            write_raw: false,
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: default_notify_cooldown_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), mode = config.source.mode, "config loaded");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.source.mode.as_str() {
            "mjpeg" | "polling" if self.source.url.is_empty() => Err(ConfigError::Invalid(
                format!("source.url is required in {} mode", self.source.mode),
            )),
            "mjpeg" | "polling" | "replay" => Ok(()),
            other => Err(ConfigError::Invalid(format!(
                "unknown source.mode '{other}', expected 'mjpeg', 'polling' or 'replay'"
            ))),
        }?;
        // written as a negated range so NaN is rejected too
        if !(self.source.fps > 0.0 && self.source.fps <= MAX_FPS) {
            return Err(ConfigError::Invalid(format!(
                "source.fps must be in (0, {MAX_FPS}], got {}",
                self.source.fps
            )));
        }
        if self.notify.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "notify.channel_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_mode() -> String {
    "mjpeg".into()
}
fn default_quality() -> u32 {
    80
}
fn default_fps() -> f64 {
    10.0
}
fn default_replay_path() -> PathBuf {
    PathBuf::from("session.luma")
}
fn default_capture_cooldown_ms() -> i64 {
    5000
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("captures")
}
fn default_file_prefix() -> String {
    "radiograph_".into()
}
fn default_jpeg_quality() -> u8 {
    100
}
fn default_notify_cooldown_ms() -> i64 {
    3000
}
fn default_channel_capacity() -> usize {
    32
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/captures.db")
}
fn default_api_port() -> u16 {
    8090
}
fn default_log_level() -> String {
    "info".into()
}
