use anyhow::Result;

use crate::detect::backend::MotionClassifier;
use crate::detect::result::Classification;
use crate::frame::{Frame, Rect};

pub const DEFAULT_THRESHOLD: u8 = 30;
pub const DEFAULT_MIN_AREA: u64 = 2_000;
pub const DEFAULT_BLOCK_SIZE: u32 = 16;

/// Block frame-differencing classifier.
///
/// Each frame is compared with the previous one in blocks of `block_size`
/// pixels. A block is active when its mean absolute luma difference exceeds
/// `threshold`. Connected active blocks (8-neighbourhood) form one region,
/// which is kept when the pixel area it covers is at least `min_area`.
pub struct FrameDiffClassifier {
    threshold: u8,
    min_area: u64,
    block_size: u32,
    previous: Option<LumaPlane>,
}

struct LumaPlane {
    width: u32,
    height: u32,
    values: Vec<u8>,
}

impl LumaPlane {
    fn from_frame(frame: &Frame) -> Self {
        let mut values = Vec::with_capacity(frame.pixel_count());
        for y in 0..frame.height() {
            for x in 0..frame.width() {
                values.push(frame.luma(x, y));
            }
        }
        Self {
            width: frame.width(),
            height: frame.height(),
            values,
        }
    }

    fn at(&self, x: u32, y: u32) -> u8 {
        self.values[y as usize * self.width as usize + x as usize]
    }
}

impl FrameDiffClassifier {
    pub fn new(threshold: u8, min_area: u64) -> Self {
        Self::with_block_size(threshold, min_area, DEFAULT_BLOCK_SIZE)
    }

    pub fn with_block_size(threshold: u8, min_area: u64, block_size: u32) -> Self {
        Self {
            threshold,
            min_area,
            block_size: block_size.max(1),
            previous: None,
        }
    }

    fn active_blocks(&self, prev: &LumaPlane, cur: &LumaPlane) -> (usize, usize, Vec<bool>) {
        let bs = self.block_size;
        let cols = cur.width.div_ceil(bs) as usize;
        let rows = cur.height.div_ceil(bs) as usize;
        let mut active = vec![false; cols * rows];

        for by in 0..rows {
            for bx in 0..cols {
                let x0 = bx as u32 * bs;
                let y0 = by as u32 * bs;
                let x1 = (x0 + bs).min(cur.width);
                let y1 = (y0 + bs).min(cur.height);
                let mut sum = 0u64;
                for y in y0..y1 {
                    for x in x0..x1 {
                        sum += cur.at(x, y).abs_diff(prev.at(x, y)) as u64;
                    }
                }
                let count = ((x1 - x0) * (y1 - y0)) as u64;
                active[by * cols + bx] = sum > self.threshold as u64 * count;
            }
        }
        (cols, rows, active)
    }

    fn regions(&self, width: u32, height: u32, cols: usize, rows: usize, mut active: Vec<bool>) -> Vec<Rect> {
        let bs = self.block_size;
        let mut regions = Vec::new();

        for start in 0..active.len() {
            if !active[start] {
                continue;
            }
            active[start] = false;
            let mut stack = vec![start];
            let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
            let (mut max_x, mut max_y) = (0usize, 0usize);
            let mut area = 0u64;

            while let Some(idx) = stack.pop() {
                let (bx, by) = (idx % cols, idx / cols);
                min_x = min_x.min(bx);
                min_y = min_y.min(by);
                max_x = max_x.max(bx);
                max_y = max_y.max(by);
                let block_w = ((bx as u32 + 1) * bs).min(width) - bx as u32 * bs;
                let block_h = ((by as u32 + 1) * bs).min(height) - by as u32 * bs;
                area += block_w as u64 * block_h as u64;

                for dy in -1i64..=1 {
                    for dx in -1i64..=1 {
                        let nx = bx as i64 + dx;
                        let ny = by as i64 + dy;
                        if nx < 0 || ny < 0 || nx >= cols as i64 || ny >= rows as i64 {
                            continue;
                        }
                        let n = ny as usize * cols + nx as usize;
                        if active[n] {
                            active[n] = false;
                            stack.push(n);
                        }
                    }
                }
            }

            if area < self.min_area {
                continue;
            }
            let x = min_x as u32 * bs;
            let y = min_y as u32 * bs;
            let right = ((max_x as u32 + 1) * bs).min(width);
            let bottom = ((max_y as u32 + 1) * bs).min(height);
            regions.push(Rect::new(x, y, right - x, bottom - y));
        }
        regions
    }
}

impl Default for FrameDiffClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_MIN_AREA)
    }
}

impl MotionClassifier for FrameDiffClassifier {
    fn name(&self) -> &'static str {
        "frame-diff"
    }

    fn classify(&mut self, frame: &Frame) -> Result<Classification> {
        let current = LumaPlane::from_frame(frame);
        let verdict = match &self.previous {
            Some(prev) if prev.width == current.width && prev.height == current.height => {
                let (cols, rows, active) = self.active_blocks(prev, &current);
                Classification::from_regions(self.regions(
                    current.width,
                    current.height,
                    cols,
                    rows,
                    active,
                ))
            }
            // first frame, or the stream changed resolution
            _ => Classification::still(),
        };
        self.previous = Some(current);
        Ok(verdict)
    }
}
