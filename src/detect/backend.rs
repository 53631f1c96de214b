use anyhow::Result;

use crate::detect::result::Classification;
use crate::frame::Frame;

/// Turns a frame into a motion verdict.
///
/// Implementations may keep state between calls (a background model, the
/// previous frame), but must not hold on to the frame itself beyond what
/// that state needs. The capture loop calls `classify` once per frame, in
/// capture order.
pub trait MotionClassifier: Send {
    /// Classifier identifier for logs.
    fn name(&self) -> &'static str;

    fn classify(&mut self, frame: &Frame) -> Result<Classification>;
}
