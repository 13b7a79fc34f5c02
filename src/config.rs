// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, ThumbError};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Streams to watch and generate thumbnails for.
    #[serde(default)]
    pub streams: Vec<StreamConfig>,
    /// HTTP control API configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// ffmpeg invocation defaults.
    #[serde(default)]
    pub ffmpeg: FfmpegConfig,
}

/// HTTP control API configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_server_enabled")]
    pub enabled: bool,
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Seconds without a liveness ping before a generator is destroyed.
    /// 0 disables the reaper.
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_server_enabled(),
            port: default_server_port(),
            ping_timeout_secs: default_ping_timeout(),
        }
    }
}

fn default_server_enabled() -> bool {
    true
}
fn default_server_port() -> u16 {
    8088
}
fn default_ping_timeout() -> u64 {
    0
}

/// Default ffmpeg binary location and call timeout.
#[derive(Debug, Deserialize, Clone)]
pub struct FfmpegConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub binary: String,
    #[serde(default = "default_ffmpeg_timeout")]
    pub timeout_secs: u64,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            binary: default_ffmpeg_path(),
            timeout_secs: default_ffmpeg_timeout(),
        }
    }
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}
fn default_ffmpeg_timeout() -> u64 {
    20
}

/// Per-stream configuration, i.e. one [`crate::generator::Generator`].
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StreamConfig {
    /// Unique identifier used for filename prefixing and API lookups.
    /// Defaults to sha1(playlist_url) when absent.
    #[serde(default)]
    pub id: Option<String>,

    /// The HLS playlist URL to watch.
    pub playlist_url: String,

    /// Directory where the manifest and thumbnails are written. Created if missing.
    pub output_dir: PathBuf,

    /// Scratch directory for the frame extractor. Created if missing.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Manifest file name, default `thumbnails-<id>.json`.
    #[serde(default)]
    pub manifest_file_name: Option<String>,

    /// Fixed interval between thumbnails, in seconds. Mutually exclusive with
    /// `target_thumbnail_count`.
    #[serde(default)]
    pub interval: Option<f64>,

    /// Desired number of thumbnails spread across the stream duration.
    /// Ignored if `interval` is set. Defaults to 30 if neither is set.
    #[serde(default)]
    pub target_thumbnail_count: Option<usize>,

    /// Number of thumbnails to backfill before `T=0` on first poll.
    #[serde(default)]
    pub initial_thumbnail_count: Option<usize>,

    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,

    /// Seconds after a segment leaves the window before its thumbnails are reaped.
    #[serde(default)]
    pub expire_time_secs: u64,

    /// Disable GC entirely; thumbnails live for the process lifetime.
    #[serde(default)]
    pub never_delete: bool,

    #[serde(default)]
    pub ignore_playlist_404: bool,

    /// -1 = retry forever.
    #[serde(default = "default_retry_count")]
    pub playlist_retry_count: i64,

    #[serde(default)]
    pub output_name_prefix: Option<String>,
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir()
}
fn default_retry_count() -> i64 {
    2
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ThumbError::Config(format!("Cannot read config file: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| ThumbError::Config(format!("Invalid TOML: {e}")))?;
        for stream in &config.streams {
            stream.validate()?;
        }
        Ok(config)
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<()> {
        if self.playlist_url.is_empty() {
            return Err(ThumbError::Config("playlist_url must not be empty".into()));
        }
        if self.interval.is_some() && self.target_thumbnail_count.is_some() {
            return Err(ThumbError::Config(
                "interval and target_thumbnail_count are mutually exclusive".into(),
            ));
        }
        if self.never_delete && self.expire_time_secs != 0 {
            return Err(ThumbError::Config(
                "expire_time_secs must be unset when never_delete is set".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the thumbnail interval policy: fixed value, or a target count
    /// (defaulting to 30 when neither is configured).
    pub fn interval_mode(&self) -> IntervalMode {
        if let Some(fixed) = self.interval {
            IntervalMode::Fixed(fixed)
        } else {
            IntervalMode::TargetCount(self.target_thumbnail_count.unwrap_or(30))
        }
    }

    /// Resolve the scaling width: as configured, or 150 when neither `width`
    /// nor `height` is set (so thumbnails don't default to full source
    /// resolution).
    pub fn effective_width(&self) -> Option<u32> {
        if self.width.is_none() && self.height.is_none() {
            Some(150)
        } else {
            self.width
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IntervalMode {
    Fixed(f64),
    TargetCount(usize),
}
