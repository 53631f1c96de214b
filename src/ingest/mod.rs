//! Frame ingestion sources.
//!
//! This module provides the sources the capture loop pulls frames from:
//! - Synthetic scene (`stub://` URLs), for tests and dry runs
//! - Local image directories, replayed in file-name order
//!
//! Every source stamps its frames at capture time and signals the end of the
//! stream with `Ok(None)`. Errors are reserved for sources that broke.

use anyhow::{anyhow, Result};
use std::path::Path;

use crate::config::SourceSettings;
use crate::frame::Frame;

pub mod file;
pub mod synthetic;

pub use file::ImageDirSource;
pub use synthetic::{SyntheticConfig, SyntheticSource};

/// A pull-based stream of frames.
pub trait FrameSource: Send {
    /// Next frame, or `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Build the source named by `settings.url`.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    if !is_local_source(&settings.url) {
        return Err(anyhow!(
            "unsupported source {}: only stub:// and local directories are supported",
            settings.url
        ));
    }
    if settings.url.starts_with("stub://") {
        let config = SyntheticConfig::from_settings(settings)?;
        return Ok(Box::new(SyntheticSource::new(config)));
    }
    let source = ImageDirSource::open(Path::new(&settings.url), settings.target_fps)?;
    Ok(Box::new(source))
}

fn is_local_source(url: &str) -> bool {
    if url.trim().is_empty() {
        return false;
    }
    if url.starts_with("stub://") {
        return true;
    }
    !url.contains("://")
}
