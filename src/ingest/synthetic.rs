//! Synthetic scene source (`stub://` URLs).
//!
//! Renders a static gradient background. During the active part of each
//! motion cycle a bright block sweeps across the frame, so frame differencing
//! reports motion exactly inside the scheduled windows. Timestamps are spaced
//! by `1 / target_fps` from a fixed start, which makes runs reproducible.
//!
//! URL parameters: `stub://<name>?frames=<n>&quiet=<n>&active=<n>`.

use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeDelta, Utc};
use std::time::{Duration, Instant};

use super::{FrameSource, SourceStats};
use crate::config::SourceSettings;
use crate::frame::Frame;

const DEFAULT_QUIET_FRAMES: u64 = 60;
const DEFAULT_ACTIVE_FRAMES: u64 = 40;
const BLOCK_MAX_PX: u32 = 96;
const BLOCK_STEP_PX: u32 = 24;
const BLOCK_RGB: [u8; 3] = [235, 235, 235];

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    /// Timestamp of the first frame.
    pub start: DateTime<Utc>,
    /// Stop after this many frames. `None` runs until shutdown.
    pub frame_limit: Option<u64>,
    /// Frames without motion at the start of every cycle.
    pub quiet_frames: u64,
    /// Frames with motion at the end of every cycle.
    pub active_frames: u64,
    /// Pace frames against the wall clock instead of producing them as fast
    /// as they are pulled.
    pub realtime: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "stub://camera".to_string(),
            width: 640,
            height: 480,
            target_fps: 10,
            start: Utc::now(),
            frame_limit: None,
            quiet_frames: DEFAULT_QUIET_FRAMES,
            active_frames: DEFAULT_ACTIVE_FRAMES,
            realtime: false,
        }
    }
}

impl SyntheticConfig {
    pub fn from_settings(settings: &SourceSettings) -> Result<Self> {
        let mut config = Self {
            name: settings.url.clone(),
            width: settings.width,
            height: settings.height,
            target_fps: settings.target_fps,
            realtime: true,
            ..Self::default()
        };
        if let Some((_, query)) = settings.url.split_once('?') {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| anyhow!("malformed stub parameter {:?}", pair))?;
                let value: u64 = value
                    .parse()
                    .map_err(|_| anyhow!("stub parameter {} must be an integer", key))?;
                match key {
                    "frames" => config.frame_limit = Some(value),
                    "quiet" => config.quiet_frames = value,
                    "active" => config.active_frames = value,
                    other => return Err(anyhow!("unknown stub parameter {}", other)),
                }
            }
        }
        Ok(config)
    }

    /// Whether frame `index` (0-based) falls inside a motion window.
    pub fn in_motion(&self, index: u64) -> bool {
        let cycle = self.quiet_frames + self.active_frames;
        cycle > 0 && index % cycle >= self.quiet_frames
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    interval_ns: i64,
    background: Vec<u8>,
    frame_count: u64,
    started: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        let fps = config.target_fps.max(1) as i64;
        let background = render_background(config.width, config.height);
        log::info!(
            "SyntheticSource: {} {}x{} @ {} fps (synthetic)",
            config.name,
            config.width,
            config.height,
            fps
        );
        Self {
            interval_ns: 1_000_000_000 / fps,
            background,
            config,
            frame_count: 0,
            started: None,
        }
    }

    fn render(&self, index: u64, captured_at: DateTime<Utc>) -> Option<Frame> {
        let mut frame = Frame::new(
            self.background.clone(),
            self.config.width,
            self.config.height,
            captured_at,
        )?;
        let (w, h) = (self.config.width, self.config.height);
        if self.config.in_motion(index) && w > 0 && h > 0 {
            let size = BLOCK_MAX_PX.min(w / 2).min(h / 2).max(1);
            let step = index % (self.config.quiet_frames + self.config.active_frames)
                - self.config.quiet_frames;
            let travel = (w - size + 1) as u64;
            let x0 = ((step * BLOCK_STEP_PX as u64) % travel) as u32;
            let y0 = (h - size) / 2;
            for y in y0..y0 + size {
                for x in x0..x0 + size {
                    frame.put_pixel(x, y, BLOCK_RGB);
                }
            }
        }
        Some(frame)
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(limit) = self.config.frame_limit {
            if self.frame_count >= limit {
                return Ok(None);
            }
        }
        let index = self.frame_count;
        if self.config.realtime {
            let started = *self.started.get_or_insert_with(Instant::now);
            let due = started + Duration::from_nanos(self.interval_ns as u64 * index);
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        let captured_at =
            self.config.start + TimeDelta::nanoseconds(self.interval_ns * index as i64);
        let frame = self.render(index, captured_at).ok_or_else(|| {
            anyhow!(
                "cannot render {}x{} synthetic frame",
                self.config.width,
                self.config.height
            )
        })?;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.name.clone(),
        }
    }
}

fn render_background(width: u32, height: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
    for y in 0..height {
        for x in 0..width {
            let shade = (x * 40 / width.max(1)) as u8;
            pixels.extend_from_slice(&[20 + shade, 30, 40 + (y * 20 / height.max(1)) as u8]);
        }
    }
    pixels
}
