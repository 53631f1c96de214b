//! Hysteresis filter for the per-frame motion signal.
//!
//! The filter keeps two watermarks: the last time a positive sample was seen
//! and the last time a negative sample was seen. The stable state turns on when
//! the positive watermark leads the negative one by more than `on_threshold`,
//! and turns off when the negative watermark leads by more than
//! `off_threshold`. A single contrary sample only moves one watermark, so one
//! flickering frame cannot reset an episode.

use chrono::{DateTime, TimeDelta, Utc};

#[derive(Clone, Debug)]
pub struct HysteresisDebouncer {
    last_positive: Option<DateTime<Utc>>,
    last_negative: Option<DateTime<Utc>>,
    on_threshold: TimeDelta,
    off_threshold: TimeDelta,
    stable: bool,
}

impl HysteresisDebouncer {
    pub fn new(on_threshold: TimeDelta, off_threshold: TimeDelta) -> Self {
        Self {
            last_positive: None,
            last_negative: None,
            on_threshold,
            off_threshold,
            stable: false,
        }
    }

    /// Feed one sample. Returns `(changed, state)`.
    ///
    /// Timestamps must be non-decreasing. A clock that runs backwards does not
    /// panic but may produce a spurious transition.
    pub fn update(&mut self, sample: bool, now: DateTime<Utc>) -> (bool, bool) {
        let previous = self.stable;
        if sample {
            self.last_positive = Some(now);
        } else {
            self.last_negative = Some(now);
        }
        // An unset watermark starts at the first sample time, so the very
        // first call cannot see an unbounded lead.
        let positive = *self.last_positive.get_or_insert(now);
        let negative = *self.last_negative.get_or_insert(now);

        let lead = positive - negative;
        if !self.stable && lead > self.on_threshold {
            self.stable = true;
        } else if self.stable && -lead > self.off_threshold {
            self.stable = false;
        }

        (previous != self.stable, self.stable)
    }

    pub fn state(&self) -> bool {
        self.stable
    }

    pub fn on_threshold(&self) -> TimeDelta {
        self.on_threshold
    }

    pub fn off_threshold(&self) -> TimeDelta {
        self.off_threshold
    }
}
