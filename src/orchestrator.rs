//! The capture loop.
//!
//! One worker pulls frames from the source and, per frame:
//! 1. classifies it,
//! 2. feeds the verdict to the debouncer,
//! 3. opens a session on a rising edge, or closes it and appends the episode
//!    on a falling edge,
//! 4. burns the capture time into the frame,
//! 5. writes the frame into the open session while the state is on,
//! 6. publishes an annotated JPEG to the latest-frame buffer.
//!
//! The classifier always sees the raw frame, so the changing timestamp never
//! registers as motion.
//!
//! The worker is the only mutator of debounce and session state and the only
//! store writer. Shutdown is checked between frames; any open session is
//! closed and persisted before `run` returns.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::debounce::HysteresisDebouncer;
use crate::detect::{Classification, MotionClassifier};
use crate::encode::{annotate, encode_jpeg, stamp_time, DEFAULT_JPEG_QUALITY};
use crate::error::RecordError;
use crate::frame::{Frame, LatestFrame, LiveFrame, Rect};
use crate::ingest::FrameSource;
use crate::session::{CompletedEpisode, SessionManager};
use crate::store::EventStore;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Cooperative stop flag shared with signal handlers.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames: u64,
    pub motion_frames: u64,
    pub episodes_recorded: u64,
    pub append_failures: u64,
    /// Frames that could not be written into an open session.
    pub degraded_writes: u64,
    pub classifier_errors: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Exhausted,
}

pub struct CaptureOrchestrator {
    source: Box<dyn FrameSource>,
    classifier: Box<dyn MotionClassifier>,
    debouncer: HysteresisDebouncer,
    sessions: SessionManager,
    store: Box<dyn EventStore>,
    live: LatestFrame,
    shutdown: ShutdownSignal,
    live_quality: u8,
    stats: CaptureStats,
    last_frame_at: Option<DateTime<Utc>>,
    last_health_log: Instant,
}

impl CaptureOrchestrator {
    pub fn new(
        source: Box<dyn FrameSource>,
        classifier: Box<dyn MotionClassifier>,
        debouncer: HysteresisDebouncer,
        sessions: SessionManager,
        store: Box<dyn EventStore>,
    ) -> Self {
        Self {
            source,
            classifier,
            debouncer,
            sessions,
            store,
            live: LatestFrame::new(),
            shutdown: ShutdownSignal::new(),
            live_quality: DEFAULT_JPEG_QUALITY,
            stats: CaptureStats::default(),
            last_frame_at: None,
            last_health_log: Instant::now(),
        }
    }

    /// Publish live frames into an existing buffer.
    pub fn with_live_frame(mut self, live: LatestFrame) -> Self {
        self.live = live;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_live_quality(mut self, quality: u8) -> Self {
        self.live_quality = quality.clamp(1, 100);
        self
    }

    /// Handle for viewers of the live frame.
    pub fn live_frame(&self) -> LatestFrame {
        self.live.clone()
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    pub fn store(&self) -> &dyn EventStore {
        self.store.as_ref()
    }

    pub fn is_recording(&self) -> bool {
        self.sessions.is_recording()
    }

    /// Run until the source is exhausted, fails, or shutdown is requested.
    ///
    /// A source failure is returned after the open session has been persisted.
    pub fn run(&mut self) -> Result<CaptureStats> {
        log::info!(
            "capture loop started (classifier={}, on={}ms, off={}ms)",
            self.classifier.name(),
            self.debouncer.on_threshold().num_milliseconds(),
            self.debouncer.off_threshold().num_milliseconds()
        );
        loop {
            if self.shutdown.is_triggered() {
                log::info!("shutdown requested; stopping capture loop");
                break;
            }
            match self.tick() {
                Ok(TickOutcome::Continue) => {}
                Ok(TickOutcome::Exhausted) => {
                    log::info!("frame source exhausted");
                    break;
                }
                Err(e) => {
                    log::error!("frame source failed: {:#}", e);
                    self.flush();
                    return Err(e);
                }
            }
            self.log_health();
        }
        self.flush();
        Ok(self.stats.clone())
    }

    /// Process one frame.
    pub fn tick(&mut self) -> Result<TickOutcome> {
        let Some(mut frame) = self.source.next_frame()? else {
            return Ok(TickOutcome::Exhausted);
        };
        self.stats.frames += 1;
        let now = frame.captured_at;

        let verdict = match self.classifier.classify(&frame) {
            Ok(verdict) => verdict,
            Err(e) => {
                log::warn!("classifier {} failed: {:#}", self.classifier.name(), e);
                self.stats.classifier_errors += 1;
                Classification::still()
            }
        };
        if verdict.motion_present {
            self.stats.motion_frames += 1;
        }

        let (changed, recording) = self.debouncer.update(verdict.motion_present, now);
        if changed {
            let finished = if recording {
                self.sessions.open_session(now)
            } else {
                self.sessions.close_session(now)
            };
            if let Some(episode) = finished {
                self.persist(&episode);
            }
        }

        stamp_time(&mut frame);
        if recording {
            match self.sessions.write_frame(&frame, &verdict.regions) {
                Ok(()) => {}
                Err(RecordError::Encoder(e)) => {
                    self.stats.degraded_writes += 1;
                    log::warn!("frame write failed: {}", e);
                }
                Err(e) => {
                    self.stats.degraded_writes += 1;
                    log::debug!("frame dropped: {}", e);
                }
            }
        }

        self.publish(frame, &verdict.regions, recording);
        self.last_frame_at = Some(now);
        Ok(TickOutcome::Continue)
    }

    /// Close and persist the open session, if any.
    fn flush(&mut self) {
        let end = self.last_frame_at.unwrap_or_else(Utc::now);
        if let Some(episode) = self.sessions.close_session(end) {
            self.persist(&episode);
        }
    }

    fn persist(&mut self, episode: &CompletedEpisode) {
        match self.store.append(episode) {
            Ok(id) => {
                self.stats.episodes_recorded += 1;
                if episode.status.is_degraded() {
                    log::warn!(
                        "motion event {} recorded degraded: {:?}",
                        id,
                        episode.status
                    );
                } else {
                    log::info!(
                        "motion event {} recorded: {} ({} frames)",
                        id,
                        episode.video_path.display(),
                        episode.video_frame_count
                    );
                }
            }
            Err(e) => {
                self.stats.append_failures += 1;
                log::error!(
                    "failed to record motion event for {}: {}",
                    episode.video_path.display(),
                    e
                );
            }
        }
    }

    fn publish(&mut self, mut frame: Frame, regions: &[Rect], recording: bool) {
        annotate(&mut frame, regions, recording);
        match encode_jpeg(&frame, self.live_quality) {
            Ok(jpeg) => self.live.publish(LiveFrame {
                jpeg,
                captured_at: frame.captured_at,
                recording,
            }),
            Err(e) => log::debug!("live frame not published: {}", e),
        }
    }

    fn log_health(&mut self) {
        if self.last_health_log.elapsed() < HEALTH_LOG_INTERVAL {
            return;
        }
        let source = self.source.stats();
        log::info!(
            "health: source={} frames={} motion_frames={} recording={} episodes={} append_failures={}",
            source.source,
            self.stats.frames,
            self.stats.motion_frames,
            self.sessions.is_recording(),
            self.stats.episodes_recorded,
            self.stats.append_failures
        );
        self.last_health_log = Instant::now();
    }
}
