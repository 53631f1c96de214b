mod backend;
mod frame_diff;
mod result;

pub use backend::MotionClassifier;
pub use frame_diff::{FrameDiffClassifier, DEFAULT_BLOCK_SIZE, DEFAULT_MIN_AREA, DEFAULT_THRESHOLD};
pub use result::Classification;
