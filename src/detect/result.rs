use crate::frame::Rect;

/// Per-frame motion verdict.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Classification {
    /// Did the frame contain motion?
    pub motion_present: bool,
    /// Candidate regions, pixel coordinates, in scan order.
    pub regions: Vec<Rect>,
}

impl Classification {
    pub fn still() -> Self {
        Self::default()
    }

    /// Motion is present exactly when at least one region survived filtering.
    pub fn from_regions(regions: Vec<Rect>) -> Self {
        Self {
            motion_present: !regions.is_empty(),
            regions,
        }
    }
}
