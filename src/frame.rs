//! Frames and the live-view buffer.
//!
//! - `Frame`: one decoded RGB8 image with its capture timestamp.
//! - `Rect`: a bounding region in pixel coordinates.
//! - `LatestFrame`: the most recent encoded frame, shared with viewers.
//!
//! The capture worker is the only producer. Viewers clone a `LatestFrame`
//! handle and read whatever frame was published last; they never see a frame
//! that is still being built because publishing swaps a complete `Arc`.

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Bytes per pixel of a `Frame` (RGB8).
pub const CHANNELS: usize = 3;

/// Decoded RGB8 frame.
///
/// The pixel buffer always holds `width * height * CHANNELS` bytes, so the
/// dimensions are read-only.
#[derive(Clone)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    /// Wrap RGB8 pixel data. Returns `None` when the buffer length does not
    /// match the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32, captured_at: DateTime<Utc>) -> Option<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(CHANNELS)?;
        if data.len() != expected {
            return None;
        }
        Some(Self {
            data,
            width,
            height,
            captured_at,
        })
    }

    /// Uniformly filled frame.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3], captured_at: DateTime<Utc>) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * CHANNELS);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self {
            data,
            width,
            height,
            captured_at,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Set one pixel, ignoring coordinates outside the frame.
    pub fn put_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = (y as usize * self.width as usize + x as usize) * CHANNELS;
        self.data[idx..idx + CHANNELS].copy_from_slice(&rgb);
    }

    /// BT.601 luma of one pixel.
    pub fn luma(&self, x: u32, y: u32) -> u8 {
        let idx = (y as usize * self.width as usize + x as usize) * CHANNELS;
        let r = self.data[idx] as u32;
        let g = self.data[idx + 1] as u32;
        let b = self.data[idx + 2] as u32;
        ((r * 299 + g * 587 + b * 114) / 1000) as u8
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // pixel payload intentionally omitted
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

/// Axis-aligned bounding region, pixel coordinates, origin top-left.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Clip to a frame of the given size. Returns `None` if nothing is left.
    pub fn clip(&self, width: u32, height: u32) -> Option<Rect> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(Rect::new(self.x, self.y, w, h))
    }
}

/// One published live-view frame.
#[derive(Clone, Debug)]
pub struct LiveFrame {
    /// JPEG-encoded, annotated frame.
    pub jpeg: Vec<u8>,
    pub captured_at: DateTime<Utc>,
    /// Whether an episode was being recorded when the frame was captured.
    pub recording: bool,
}

/// Latest-frame buffer shared between the capture worker and viewers.
///
/// Cloning the handle shares the same slot. Publishing and reading are
/// lock-free pointer operations, so a slow viewer never stalls capture.
#[derive(Clone)]
pub struct LatestFrame {
    slot: Arc<ArcSwapOption<LiveFrame>>,
}

impl Default for LatestFrame {
    fn default() -> Self {
        Self {
            slot: Arc::new(ArcSwapOption::empty()),
        }
    }
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the published frame (last write wins).
    pub fn publish(&self, frame: LiveFrame) {
        self.slot.store(Some(Arc::new(frame)));
    }

    /// Snapshot of the most recently published frame.
    pub fn latest(&self) -> Option<Arc<LiveFrame>> {
        self.slot.load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn frame_rejects_mismatched_buffer() {
        assert!(Frame::new(vec![0u8; 10], 4, 4, ts()).is_none());
        assert!(Frame::new(vec![0u8; 48], 4, 4, ts()).is_some());
    }

    #[test]
    fn dimensions_always_match_the_buffer() {
        let frame = Frame::new(vec![7u8; 6 * 2 * CHANNELS], 6, 2, ts()).unwrap();
        assert_eq!((frame.width(), frame.height()), (6, 2));
        assert_eq!(frame.pixels().len(), frame.pixel_count() * CHANNELS);
        assert_eq!(frame.luma(5, 1), 7);
    }

    #[test]
    fn put_pixel_ignores_out_of_bounds() {
        let mut frame = Frame::filled(4, 4, [0, 0, 0], ts());
        frame.put_pixel(10, 10, [255, 255, 255]);
        frame.put_pixel(1, 2, [255, 255, 255]);
        assert_eq!(frame.luma(1, 2), 255);
        assert_eq!(frame.luma(0, 0), 0);
    }

    #[test]
    fn rect_clip_trims_to_frame() {
        let r = Rect::new(630, 470, 40, 40);
        assert_eq!(r.clip(640, 480), Some(Rect::new(630, 470, 10, 10)));
        assert_eq!(Rect::new(700, 0, 10, 10).clip(640, 480), None);
    }

    #[test]
    fn latest_frame_is_last_write_wins() {
        let latest = LatestFrame::new();
        assert!(latest.latest().is_none());

        let reader = latest.clone();
        latest.publish(LiveFrame {
            jpeg: vec![1],
            captured_at: ts(),
            recording: false,
        });
        let first = reader.latest().unwrap();
        latest.publish(LiveFrame {
            jpeg: vec![2],
            captured_at: ts(),
            recording: true,
        });

        // a snapshot taken earlier stays intact after the swap
        assert_eq!(first.jpeg, vec![1]);
        let second = reader.latest().unwrap();
        assert_eq!(second.jpeg, vec![2]);
        assert!(second.recording);
    }

    #[test]
    fn readers_on_other_threads_see_complete_frames() {
        let latest = LatestFrame::new();
        let reader = latest.clone();
        let handle = std::thread::spawn(move || {
            let mut seen = 0;
            for _ in 0..1000 {
                if let Some(frame) = reader.latest() {
                    assert!(frame.jpeg.iter().all(|b| *b == frame.jpeg[0]));
                    seen += 1;
                }
            }
            seen
        });
        for i in 0..200u8 {
            latest.publish(LiveFrame {
                jpeg: vec![i; 256],
                captured_at: ts(),
                recording: false,
            });
        }
        handle.join().unwrap();
    }

    #[test]
    fn publishing_proceeds_while_readers_hold_snapshots() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let latest = LatestFrame::new();
        let stop = Arc::new(AtomicBool::new(false));
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let reader = latest.clone();
                let stop = stop.clone();
                std::thread::spawn(move || {
                    let mut held = Vec::new();
                    while !stop.load(Ordering::SeqCst) {
                        if let Some(frame) = reader.latest() {
                            held.push(frame);
                            if held.len() > 64 {
                                held.clear();
                            }
                        }
                    }
                })
            })
            .collect();

        for i in 0..10_000u32 {
            latest.publish(LiveFrame {
                jpeg: i.to_be_bytes().to_vec(),
                captured_at: ts(),
                recording: false,
            });
        }
        stop.store(true, Ordering::SeqCst);
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(latest.latest().unwrap().jpeg, 9_999u32.to_be_bytes().to_vec());
    }
}
