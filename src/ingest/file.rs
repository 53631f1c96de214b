//! Local image directory source.
//!
//! `ImageDirSource` replays the PNG/JPEG files of a local directory in file
//! name order. Each file is decoded in memory and stamped at the target frame
//! rate, starting from the moment the source was opened.
//!
//! Remote URLs are rejected before this source is built; see `open_source`.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use std::path::{Path, PathBuf};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

pub struct ImageDirSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next_index: usize,
    start: DateTime<Utc>,
    interval_ns: i64,
}

impl ImageDirSource {
    pub fn open(dir: &Path, target_fps: u32) -> Result<Self> {
        Self::open_at(dir, target_fps, Utc::now())
    }

    /// Open with an explicit timestamp for the first frame.
    pub fn open_at(dir: &Path, target_fps: u32, start: DateTime<Utc>) -> Result<Self> {
        if target_fps == 0 {
            return Err(anyhow!("target_fps must be greater than zero"));
        }
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read image directory {}", dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && is_image_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        log::info!(
            "ImageDirSource: {} images in {}",
            files.len(),
            dir.display()
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            next_index: 0,
            start,
            interval_ns: 1_000_000_000 / target_fps as i64,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageDirSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.files.get(self.next_index) else {
            return Ok(None);
        };
        let image = image::open(path)
            .with_context(|| format!("failed to decode {}", path.display()))?
            .to_rgb8();
        let (width, height) = image.dimensions();
        let captured_at =
            self.start + TimeDelta::nanoseconds(self.interval_ns * self.next_index as i64);
        let frame = Frame::new(image.into_raw(), width, height, captured_at)
            .ok_or_else(|| anyhow!("decoded image {} has inconsistent size", path.display()))?;
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.next_index as u64,
            source: self.dir.display().to_string(),
        }
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use image::{Rgb, RgbImage};

    fn write_png(dir: &Path, name: &str, shade: u8) {
        let img = RgbImage::from_pixel(8, 6, Rgb([shade, shade, shade]));
        img.save(dir.join(name)).unwrap();
    }

    #[test]
    fn replays_images_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "002.png", 200);
        write_png(dir.path(), "001.png", 10);
        std::fs::write(dir.path().join("notes.txt"), b"not an image").unwrap();

        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut source = ImageDirSource::open_at(dir.path(), 4, start).unwrap();
        assert_eq!(source.len(), 2);

        let first = source.next_frame().unwrap().unwrap();
        let second = source.next_frame().unwrap().unwrap();
        assert!(source.next_frame().unwrap().is_none());

        assert_eq!((first.width(), first.height()), (8, 6));
        assert_eq!(first.luma(0, 0), 10);
        assert_eq!(second.luma(0, 0), 200);
        assert_eq!(first.captured_at, start);
        assert_eq!(second.captured_at - start, TimeDelta::milliseconds(250));
        assert_eq!(source.stats().frames_captured, 2);
    }

    #[test]
    fn undecodable_image_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.png"), b"garbage").unwrap();
        let mut source = ImageDirSource::open(dir.path(), 10).unwrap();
        assert!(source.next_frame().is_err());
    }

    #[test]
    fn empty_directory_is_immediately_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = ImageDirSource::open(dir.path(), 10).unwrap();
        assert!(source.is_empty());
        assert!(source.next_frame().unwrap().is_none());
    }
}
