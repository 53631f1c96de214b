use anyhow::{anyhow, Result};
use chrono::TimeDelta;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::{DEFAULT_MIN_AREA, DEFAULT_THRESHOLD};
use crate::encode::DEFAULT_JPEG_QUALITY;

const DEFAULT_DATA_PATH: &str = "recordings";
const DEFAULT_DB_FILE: &str = "motions.db";
const DEFAULT_SOURCE_URL: &str = "stub://camera";
const DEFAULT_SOURCE_FPS: u32 = 10;
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_ON_MS: u64 = 400;
const DEFAULT_OFF_MS: u64 = 1_000;
const DEFAULT_VIDEO_EXTENSION: &str = ".mjpeg";

#[derive(Debug, Deserialize, Default)]
struct RecorderConfigFile {
    data_path: Option<PathBuf>,
    db_path: Option<String>,
    source: Option<SourceConfigFile>,
    detect: Option<DetectConfigFile>,
    debounce: Option<DebounceConfigFile>,
    video: Option<VideoConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectConfigFile {
    threshold: Option<u8>,
    min_area: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DebounceConfigFile {
    on_ms: Option<u64>,
    off_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct VideoConfigFile {
    extension: Option<String>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Directory the video files and previews are written to.
    pub data_path: PathBuf,
    pub db_path: String,
    pub source: SourceSettings,
    pub detect: DetectSettings,
    pub debounce: DebounceSettings,
    pub video: VideoSettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// `stub://<name>` for the synthetic scene, otherwise a local image directory.
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct DetectSettings {
    pub threshold: u8,
    pub min_area: u64,
}

#[derive(Debug, Clone)]
pub struct DebounceSettings {
    pub on_ms: u64,
    pub off_ms: u64,
}

impl DebounceSettings {
    pub fn on_threshold(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.on_ms as i64)
    }

    pub fn off_threshold(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.off_ms as i64)
    }
}

#[derive(Debug, Clone)]
pub struct VideoSettings {
    /// File extension of recorded videos, including the leading dot.
    pub extension: String,
    pub jpeg_quality: u8,
}

impl RecorderConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("RECORDER_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.resolve_db_path();
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RecorderConfigFile) -> Self {
        let data_path = file
            .data_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_PATH));
        // resolved against the final data_path once env overrides are applied
        let db_path = file.db_path.unwrap_or_default();
        let source = SourceSettings {
            url: file
                .source
                .as_ref()
                .and_then(|source| source.url.clone())
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            target_fps: file
                .source
                .as_ref()
                .and_then(|source| source.target_fps)
                .unwrap_or(DEFAULT_SOURCE_FPS),
            width: file
                .source
                .as_ref()
                .and_then(|source| source.width)
                .unwrap_or(DEFAULT_SOURCE_WIDTH),
            height: file
                .source
                .as_ref()
                .and_then(|source| source.height)
                .unwrap_or(DEFAULT_SOURCE_HEIGHT),
        };
        let detect = DetectSettings {
            threshold: file
                .detect
                .as_ref()
                .and_then(|detect| detect.threshold)
                .unwrap_or(DEFAULT_THRESHOLD),
            min_area: file
                .detect
                .as_ref()
                .and_then(|detect| detect.min_area)
                .unwrap_or(DEFAULT_MIN_AREA),
        };
        let debounce = DebounceSettings {
            on_ms: file
                .debounce
                .as_ref()
                .and_then(|debounce| debounce.on_ms)
                .unwrap_or(DEFAULT_ON_MS),
            off_ms: file
                .debounce
                .as_ref()
                .and_then(|debounce| debounce.off_ms)
                .unwrap_or(DEFAULT_OFF_MS),
        };
        let video = VideoSettings {
            extension: file
                .video
                .as_ref()
                .and_then(|video| video.extension.clone())
                .unwrap_or_else(|| DEFAULT_VIDEO_EXTENSION.to_string()),
            jpeg_quality: file
                .video
                .and_then(|video| video.jpeg_quality)
                .unwrap_or(DEFAULT_JPEG_QUALITY),
        };
        Self {
            data_path,
            db_path,
            source,
            detect,
            debounce,
            video,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("RECORDER_DATA_PATH") {
            if !path.trim().is_empty() {
                self.data_path = PathBuf::from(path);
            }
        }
        if let Ok(path) = std::env::var("RECORDER_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(url) = std::env::var("RECORDER_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(threshold) = std::env::var("RECORDER_THRESHOLD") {
            self.detect.threshold = threshold
                .parse()
                .map_err(|_| anyhow!("RECORDER_THRESHOLD must be an integer between 0 and 255"))?;
        }
        if let Ok(min_area) = std::env::var("RECORDER_MIN_AREA") {
            self.detect.min_area = min_area
                .parse()
                .map_err(|_| anyhow!("RECORDER_MIN_AREA must be an integer number of pixels"))?;
        }
        if let Ok(on_ms) = std::env::var("RECORDER_ON_MS") {
            self.debounce.on_ms = on_ms
                .parse()
                .map_err(|_| anyhow!("RECORDER_ON_MS must be an integer number of milliseconds"))?;
        }
        if let Ok(off_ms) = std::env::var("RECORDER_OFF_MS") {
            self.debounce.off_ms = off_ms.parse().map_err(|_| {
                anyhow!("RECORDER_OFF_MS must be an integer number of milliseconds")
            })?;
        }
        Ok(())
    }

    fn resolve_db_path(&mut self) {
        if self.db_path.trim().is_empty() {
            self.db_path = self.data_path.join(DEFAULT_DB_FILE).display().to_string();
        }
    }

    fn validate(&mut self) -> Result<()> {
        if self.data_path.as_os_str().is_empty() {
            return Err(anyhow!("data_path must not be empty"));
        }
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        if self.source.url.trim().is_empty() {
            return Err(anyhow!("source url must not be empty"));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("source target_fps must be greater than zero"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!(
                "source dimensions must be non-zero (got {}x{})",
                self.source.width,
                self.source.height
            ));
        }
        if !(1..=100).contains(&self.video.jpeg_quality) {
            return Err(anyhow!("video jpeg_quality must be between 1 and 100"));
        }
        let ext = self.video.extension.trim();
        if ext.is_empty() || ext == "." {
            return Err(anyhow!("video extension must not be empty"));
        }
        if !ext.starts_with('.') {
            self.video.extension = format!(".{}", ext);
        } else {
            self.video.extension = ext.to_string();
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<RecorderConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
