//! Media encoding for recorded episodes and the live view.
//!
//! `MediaEncoder` is the seam the session manager records through. The
//! bundled `MjpegEncoder` writes Motion-JPEG streams (JPEG frames back to back,
//! playable by ffmpeg/VLC as `mjpeg`) and JPEG previews.
//!
//! Overlays are drawn straight into the frame: `stamp_time` burns the capture
//! time into every frame before it is recorded, and `annotate` adds region
//! outlines and the `REC` label to the live view.

use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::EncodeError;
use crate::frame::{Frame, Rect};

pub const DEFAULT_JPEG_QUALITY: u8 = 80;

const REGION_COLOR: [u8; 3] = [0, 0, 255];
const RECORDING_COLOR: [u8; 3] = [255, 0, 0];
const TIMESTAMP_COLOR: [u8; 3] = [0, 255, 0];
const SHADOW_COLOR: [u8; 3] = [0, 0, 0];
const OUTLINE_PX: u32 = 2;
const GLYPH_PX: u32 = 8;
const TEXT_MARGIN_PX: u32 = 8;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const RECORDING_LABEL: &str = "REC";

/// Opens video sinks and writes still previews.
pub trait MediaEncoder: Send {
    /// Open a video sink at `path` for frames of the given size.
    fn open_video(
        &mut self,
        path: &Path,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn VideoSink>, EncodeError>;

    /// Write a single still image. Returns the number of bytes written.
    fn write_preview(&mut self, path: &Path, frame: &Frame) -> Result<u64, EncodeError>;
}

/// An open video file. Dropping the sink closes the underlying file.
pub trait VideoSink: Send {
    /// Append one frame. Returns the number of bytes written for it.
    fn write_frame(&mut self, frame: &Frame) -> Result<u64, EncodeError>;

    /// Flush and close. Returns the total bytes written to the file.
    fn finish(self: Box<Self>) -> Result<u64, EncodeError>;
}

/// Encode a frame as JPEG into memory.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, EncodeError> {
    if frame.is_empty() {
        return Err(EncodeError::EmptyFrame {
            width: frame.width(),
            height: frame.height(),
        });
    }
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder.encode(
        frame.pixels(),
        frame.width(),
        frame.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(out)
}

#[derive(Clone, Debug)]
pub struct MjpegEncoder {
    quality: u8,
}

impl MjpegEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl Default for MjpegEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl MediaEncoder for MjpegEncoder {
    fn open_video(
        &mut self,
        path: &Path,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn VideoSink>, EncodeError> {
        if width == 0 || height == 0 {
            return Err(EncodeError::EmptyFrame { width, height });
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // never truncate a video that belongs to an earlier episode
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        log::debug!("mjpeg sink opened {} ({}x{})", path.display(), width, height);
        Ok(Box::new(MjpegSink {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
            width,
            height,
            quality: self.quality,
            bytes_written: 0,
        }))
    }

    fn write_preview(&mut self, path: &Path, frame: &Frame) -> Result<u64, EncodeError> {
        let jpeg = encode_jpeg(frame, self.quality)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(path, &jpeg)?;
        Ok(jpeg.len() as u64)
    }
}

struct MjpegSink {
    path: PathBuf,
    out: BufWriter<File>,
    width: u32,
    height: u32,
    quality: u8,
    bytes_written: u64,
}

impl VideoSink for MjpegSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<u64, EncodeError> {
        if frame.width() != self.width || frame.height() != self.height {
            log::debug!(
                "{}: frame size {}x{} differs from stream size {}x{}",
                self.path.display(),
                frame.width(),
                frame.height(),
                self.width,
                self.height
            );
        }
        let jpeg = encode_jpeg(frame, self.quality)?;
        self.out.write_all(&jpeg)?;
        self.bytes_written += jpeg.len() as u64;
        Ok(jpeg.len() as u64)
    }

    fn finish(mut self: Box<Self>) -> Result<u64, EncodeError> {
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        Ok(self.bytes_written)
    }
}

/// Burn the capture time (UTC, to the second) into the top-right corner.
pub fn stamp_time(frame: &mut Frame) {
    let text = frame.captured_at.format(TIMESTAMP_FORMAT).to_string();
    let scale = text_scale(frame);
    let width = text.chars().count() as u32 * GLYPH_PX * scale;
    let x = frame.width().saturating_sub(width + TEXT_MARGIN_PX);
    draw_text(frame, x, TEXT_MARGIN_PX, &text, TIMESTAMP_COLOR, scale);
}

/// Draw region outlines and, while recording, a `REC` label in the top-left
/// corner.
pub fn annotate(frame: &mut Frame, regions: &[Rect], recording: bool) {
    for region in regions {
        if let Some(r) = region.clip(frame.width(), frame.height()) {
            draw_outline(frame, r, REGION_COLOR);
        }
    }
    if recording {
        let scale = text_scale(frame);
        draw_text(
            frame,
            TEXT_MARGIN_PX,
            TEXT_MARGIN_PX,
            RECORDING_LABEL,
            RECORDING_COLOR,
            scale,
        );
    }
}

/// 8px glyphs below 480px of width, scaled up for larger frames.
fn text_scale(frame: &Frame) -> u32 {
    (frame.width() / 480).max(1)
}

/// Draw `text` with a one-pixel drop shadow. Characters without a glyph
/// leave a blank cell.
fn draw_text(frame: &mut Frame, x: u32, y: u32, text: &str, rgb: [u8; 3], scale: u32) {
    let glyphs: Vec<Option<[u8; 8]>> = text.chars().map(|c| BASIC_FONTS.get(c)).collect();
    for (offset, color) in [(1, SHADOW_COLOR), (0, rgb)] {
        for (i, glyph) in glyphs.iter().enumerate() {
            if let Some(glyph) = glyph {
                let cell_x = x + i as u32 * GLYPH_PX * scale;
                draw_glyph(frame, cell_x + offset, y + offset, glyph, color, scale);
            }
        }
    }
}

fn draw_glyph(frame: &mut Frame, x: u32, y: u32, glyph: &[u8; 8], rgb: [u8; 3], scale: u32) {
    for (row, bits) in glyph.iter().enumerate() {
        for col in 0..GLYPH_PX {
            // bit 0 is the leftmost pixel
            if *bits & (1u8 << col) == 0 {
                continue;
            }
            let px = x + col * scale;
            let py = y + row as u32 * scale;
            for dy in 0..scale {
                for dx in 0..scale {
                    frame.put_pixel(px + dx, py + dy, rgb);
                }
            }
        }
    }
}

fn draw_outline(frame: &mut Frame, r: Rect, rgb: [u8; 3]) {
    let right = r.x + r.width - 1;
    let bottom = r.y + r.height - 1;
    for t in 0..OUTLINE_PX {
        for x in r.x..=right {
            frame.put_pixel(x, r.y + t, rgb);
            frame.put_pixel(x, bottom.saturating_sub(t), rgb);
        }
        for y in r.y..=bottom {
            frame.put_pixel(r.x + t, y, rgb);
            frame.put_pixel(right.saturating_sub(t), y, rgb);
        }
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)
}
