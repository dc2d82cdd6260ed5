//! Configuration loader and validator for the clip publication engine.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::encoder::{is_safe_temp_root, AssemblyOptions};
use crate::schedule;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub queue: Queue,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub encoder: Encoder,
    pub youtube: YouTube,
}

/// Filesystem layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub output_dir: String,
    /// Root for scoped scratch directories; passed to the encoder on its
    /// command line, so it must not contain whitespace, quotes or backslashes.
    pub temp_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Queue {
    pub poll_interval_ms: u64,
    pub claim_delay_ms: u64,
}

impl Default for Queue {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5000,
            claim_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Schedule {
    pub utc_offset: String,
    pub daily_hour: u32,
    pub tick_seconds: u64,
    pub warmup_seconds: u64,
    pub publish_window_minutes: i64,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            utc_offset: schedule::DEFAULT_UTC_OFFSET.to_string(),
            daily_hour: 1,
            tick_seconds: 60,
            warmup_seconds: 10,
            publish_window_minutes: 1,
        }
    }
}

/// ffmpeg binaries and encode parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Encoder {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub fade_in_secs: f64,
    pub fade_out_secs: f64,
    pub segment_volume: f64,
    pub audio_volume: f64,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub crf: u32,
    pub preset: String,
    pub probe_concurrency: usize,
}

impl Default for Encoder {
    fn default() -> Self {
        let opts = AssemblyOptions::default();
        Self {
            ffmpeg: "ffmpeg".into(),
            ffprobe: "ffprobe".into(),
            fade_in_secs: opts.fade_in_secs,
            fade_out_secs: opts.fade_out_secs,
            segment_volume: opts.segment_track_volume,
            audio_volume: opts.audio_track_volume,
            width: opts.width,
            height: opts.height,
            fps: opts.fps,
            crf: opts.crf,
            preset: opts.preset,
            probe_concurrency: 4,
        }
    }
}

/// YouTube Data API client settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct YouTube {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_category_id")]
    pub category_id: String,
}

fn default_api_base() -> String {
    "https://www.googleapis.com".into()
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".into()
}

fn default_category_id() -> String {
    "22".into()
}

impl Config {
    /// Ensure data, output and temp directories exist.
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        for dir in [&self.app.data_dir, &self.app.output_dir, &self.app.temp_dir] {
            if !dir.trim().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        Ok(())
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/clipcast.db", self.app.data_dir))
    }

    pub fn assembly_options(&self) -> AssemblyOptions {
        AssemblyOptions {
            fade_in_secs: self.encoder.fade_in_secs,
            fade_out_secs: self.encoder.fade_out_secs,
            segment_track_volume: self.encoder.segment_volume,
            audio_track_volume: self.encoder.audio_volume,
            width: self.encoder.width,
            height: self.encoder.height,
            fps: self.encoder.fps,
            crf: self.encoder.crf,
            preset: self.encoder.preset.clone(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue.poll_interval_ms)
    }

    pub fn claim_delay(&self) -> Duration {
        Duration::from_millis(self.queue.claim_delay_ms)
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.app.output_dir)
    }

    pub fn temp_dir(&self) -> PathBuf {
        PathBuf::from(&self.app.temp_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.output_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.output_dir must be non-empty"));
    }
    if !is_safe_temp_root(Path::new(&cfg.app.temp_dir)) {
        return Err(ConfigError::Invalid(
            "app.temp_dir must be non-empty and free of whitespace, quotes and backslashes",
        ));
    }

    if cfg.queue.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("queue.poll_interval_ms must be > 0"));
    }

    if schedule::parse_utc_offset(&cfg.schedule.utc_offset).is_err() {
        return Err(ConfigError::Invalid("schedule.utc_offset must look like +05:30"));
    }
    if cfg.schedule.daily_hour > 23 {
        return Err(ConfigError::Invalid("schedule.daily_hour must be within 0..=23"));
    }
    if cfg.schedule.tick_seconds == 0 {
        return Err(ConfigError::Invalid("schedule.tick_seconds must be > 0"));
    }
    if cfg.schedule.publish_window_minutes < 0 {
        return Err(ConfigError::Invalid("schedule.publish_window_minutes must be >= 0"));
    }

    let enc = &cfg.encoder;
    if enc.ffmpeg.trim().is_empty() || enc.ffprobe.trim().is_empty() {
        return Err(ConfigError::Invalid("encoder.ffmpeg and encoder.ffprobe must be non-empty"));
    }
    if enc.width == 0 || enc.height == 0 || enc.fps == 0 {
        return Err(ConfigError::Invalid("encoder.width, height and fps must be > 0"));
    }
    if enc.crf > 51 {
        return Err(ConfigError::Invalid("encoder.crf must be within 0..=51"));
    }
    if !(enc.fade_in_secs >= 0.0 && enc.fade_out_secs >= 0.0) {
        return Err(ConfigError::Invalid("encoder fades must be >= 0"));
    }
    if !(enc.segment_volume >= 0.0 && enc.audio_volume >= 0.0) {
        return Err(ConfigError::Invalid("encoder volumes must be >= 0"));
    }
    if enc.probe_concurrency == 0 {
        return Err(ConfigError::Invalid("encoder.probe_concurrency must be > 0"));
    }

    if cfg.youtube.client_id.trim().is_empty() {
        return Err(ConfigError::Invalid("youtube.client_id must be non-empty"));
    }
    if cfg.youtube.client_secret.trim().is_empty() {
        return Err(ConfigError::Invalid("youtube.client_secret must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.youtube.api_base).is_err() {
        return Err(ConfigError::Invalid("youtube.api_base must be a valid URL"));
    }
    if reqwest::Url::parse(&cfg.youtube.token_url).is_err() {
        return Err(ConfigError::Invalid("youtube.token_url must be a valid URL"));
    }

    Ok(())
}

/// Example configuration with every section spelled out.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  output_dir: "./data/output"
  temp_dir: "/tmp/clipcast"

queue:
  poll_interval_ms: 5000
  claim_delay_ms: 1000

schedule:
  utc_offset: "+05:30"
  daily_hour: 1
  tick_seconds: 60
  warmup_seconds: 10
  publish_window_minutes: 1

encoder:
  ffmpeg: "ffmpeg"
  ffprobe: "ffprobe"
  fade_in_secs: 1.0
  fade_out_secs: 1.0
  segment_volume: 0.7
  audio_volume: 0.5
  width: 1920
  height: 1080
  fps: 30
  crf: 23
  preset: "medium"
  probe_concurrency: 4

youtube:
  client_id: "YOUR_GOOGLE_CLIENT_ID"
  client_secret: "YOUR_GOOGLE_CLIENT_SECRET"
  category_id: "22"
"#
}
