//! Recording sessions.
//!
//! A session is opened on a debounce rising edge and closed on the falling
//! edge. Opening is metadata only; the video sink is acquired on the first
//! written frame because it needs the frame dimensions. The sink is owned by
//! the session, so it is released when the session closes or is dropped.

use chrono::{DateTime, TimeDelta, Utc};
use std::path::{Path, PathBuf};

use crate::encode::{MediaEncoder, VideoSink};
use crate::error::{EncodeError, RecordError};
use crate::frame::{Frame, Rect};

const FILE_STAMP_FORMAT: &str = "%Y-%m-%d--%H-%M-%S-%3f";
/// Suffixes tried when a video file for the same instant already exists.
const MAX_NAME_ATTEMPTS: u32 = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EpisodeStatus {
    Complete,
    /// The episode was tracked but its media is incomplete or missing.
    Degraded { reason: String },
}

impl EpisodeStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, EpisodeStatus::Degraded { .. })
    }
}

/// A closed recording session, ready to be persisted.
#[derive(Clone, Debug)]
pub struct CompletedEpisode {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration: TimeDelta,
    pub video_path: PathBuf,
    /// Bytes written to the video file.
    pub video_size: u64,
    pub video_frame_count: u64,
    pub preview_path: PathBuf,
    pub preview_size: u64,
    pub bounding_regions: Vec<Rect>,
    pub status: EpisodeStatus,
}

enum SinkState {
    /// No frame written yet.
    Pending,
    Open(Box<dyn VideoSink>),
    /// Acquisition failed; frames are dropped until the session closes.
    Unavailable,
}

/// The session currently being recorded.
pub struct RecordingSession {
    start_time: DateTime<Utc>,
    /// `data_dir/<stamp>`; file names are derived from it.
    stem: PathBuf,
    video_ext: String,
    name_suffix: u32,
    video_path: PathBuf,
    preview_path: PathBuf,
    video_frame_count: u64,
    video_size: u64,
    preview_size: u64,
    bounding_regions: Vec<Rect>,
    sink: SinkState,
    degraded: Option<String>,
}

impl RecordingSession {
    fn new(start_time: DateTime<Utc>, stem: PathBuf, video_ext: &str, name_suffix: u32) -> Self {
        let mut session = Self {
            start_time,
            stem,
            video_ext: video_ext.to_string(),
            name_suffix,
            video_path: PathBuf::new(),
            preview_path: PathBuf::new(),
            video_frame_count: 0,
            video_size: 0,
            preview_size: 0,
            bounding_regions: Vec::new(),
            sink: SinkState::Pending,
            degraded: None,
        };
        session.derive_paths();
        session
    }

    fn derive_paths(&mut self) {
        let mut name = self.stem.clone().into_os_string();
        if self.name_suffix > 0 {
            name.push(format!("-{}", self.name_suffix));
        }
        let base = PathBuf::from(name);
        let mut video = base.clone().into_os_string();
        video.push(&self.video_ext);
        let mut preview = base.into_os_string();
        preview.push(".jpg");
        self.video_path = PathBuf::from(video);
        self.preview_path = PathBuf::from(preview);
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn video_path(&self) -> &Path {
        &self.video_path
    }

    pub fn preview_path(&self) -> &Path {
        &self.preview_path
    }

    pub fn video_frame_count(&self) -> u64 {
        self.video_frame_count
    }

    pub fn bounding_regions(&self) -> &[Rect] {
        &self.bounding_regions
    }

    pub fn has_encoder(&self) -> bool {
        matches!(self.sink, SinkState::Open(_))
    }

    fn mark_degraded(&mut self, reason: String) {
        // keep the first cause
        if self.degraded.is_none() {
            self.degraded = Some(reason);
        }
    }

    /// Open the video sink, moving to the next free name while a file for
    /// this instant already exists.
    fn open_sink(
        &mut self,
        encoder: &mut dyn MediaEncoder,
        frame: &Frame,
    ) -> Result<Box<dyn VideoSink>, EncodeError> {
        let mut attempts = 1;
        loop {
            match encoder.open_video(&self.video_path, frame.width(), frame.height()) {
                Err(e) if e.is_already_exists() && attempts < MAX_NAME_ATTEMPTS => {
                    log::debug!("{} exists; trying next name", self.video_path.display());
                    self.name_suffix += 1;
                    self.derive_paths();
                    attempts += 1;
                }
                other => return other,
            }
        }
    }

    fn acquire(&mut self, encoder: &mut dyn MediaEncoder, frame: &Frame) {
        match self.open_sink(encoder, frame) {
            Ok(sink) => {
                self.sink = SinkState::Open(sink);
                match encoder.write_preview(&self.preview_path, frame) {
                    Ok(size) => self.preview_size = size,
                    Err(e) => {
                        log::warn!("preview {} failed: {}", self.preview_path.display(), e);
                        self.mark_degraded(format!("preview failed: {}", e));
                    }
                }
            }
            Err(e) => {
                log::warn!("video encoder {} unavailable: {}", self.video_path.display(), e);
                self.sink = SinkState::Unavailable;
                self.mark_degraded(format!("encoder unavailable: {}", e));
            }
        }
    }

    fn finish(mut self, end_time: DateTime<Utc>) -> CompletedEpisode {
        match std::mem::replace(&mut self.sink, SinkState::Unavailable) {
            SinkState::Open(sink) => match sink.finish() {
                Ok(total) => self.video_size = total,
                Err(e) => {
                    log::warn!("closing {} failed: {}", self.video_path.display(), e);
                    self.mark_degraded(format!("close failed: {}", e));
                }
            },
            SinkState::Pending => self.mark_degraded("no frames recorded".to_string()),
            SinkState::Unavailable => {}
        }

        let duration = (end_time - self.start_time).max(TimeDelta::zero());
        let status = match self.degraded {
            Some(reason) => EpisodeStatus::Degraded { reason },
            None => EpisodeStatus::Complete,
        };
        CompletedEpisode {
            start_time: self.start_time,
            end_time,
            duration,
            video_path: self.video_path,
            video_size: self.video_size,
            video_frame_count: self.video_frame_count,
            preview_path: self.preview_path,
            preview_size: self.preview_size,
            bounding_regions: self.bounding_regions,
            status,
        }
    }
}

/// Owns at most one recording session at a time.
pub struct SessionManager {
    encoder: Box<dyn MediaEncoder>,
    data_dir: PathBuf,
    video_ext: String,
    current: Option<RecordingSession>,
    /// Stamp and suffix of the most recently opened session.
    last_name: Option<(String, u32)>,
}

impl SessionManager {
    pub fn new(encoder: Box<dyn MediaEncoder>, data_dir: impl Into<PathBuf>, video_ext: &str) -> Self {
        Self {
            encoder,
            data_dir: data_dir.into(),
            video_ext: video_ext.to_string(),
            current: None,
            last_name: None,
        }
    }

    /// Start a new session at `now`.
    ///
    /// A session that is still open is closed first and returned, so its
    /// episode can still be persisted.
    pub fn open_session(&mut self, now: DateTime<Utc>) -> Option<CompletedEpisode> {
        let displaced = self.close_session(now);
        if let Some(episode) = &displaced {
            log::warn!(
                "session {} was still open; closed before opening a new one",
                episode.video_path.display()
            );
        }
        let stamp = now.format(FILE_STAMP_FORMAT).to_string();
        let suffix = match &self.last_name {
            Some((last, n)) if *last == stamp => n + 1,
            _ => 0,
        };
        let session =
            RecordingSession::new(now, self.data_dir.join(&stamp), &self.video_ext, suffix);
        self.last_name = Some((stamp, suffix));
        log::info!("recording session opened: {}", session.video_path.display());
        self.current = Some(session);
        displaced
    }

    /// Record one frame and the regions observed in it.
    ///
    /// Regions are kept even when the frame cannot be encoded.
    pub fn write_frame(&mut self, frame: &Frame, regions: &[Rect]) -> Result<(), RecordError> {
        let session = self.current.as_mut().ok_or(RecordError::NoActiveSession)?;
        if matches!(session.sink, SinkState::Pending) {
            session.acquire(self.encoder.as_mut(), frame);
        }
        session.bounding_regions.extend_from_slice(regions);

        let result = match &mut session.sink {
            SinkState::Open(sink) => sink.write_frame(frame).map_err(RecordError::from),
            SinkState::Unavailable | SinkState::Pending => Err(RecordError::EncoderUnavailable {
                path: session.video_path.display().to_string(),
            }),
        };
        match result {
            Ok(_) => {
                session.video_frame_count += 1;
                Ok(())
            }
            Err(RecordError::Encoder(e)) => {
                session.mark_degraded(format!("frame write failed: {}", e));
                Err(RecordError::Encoder(e))
            }
            Err(e) => Err(e),
        }
    }

    /// Close the open session. Returns `None` if there is nothing to close.
    pub fn close_session(&mut self, now: DateTime<Utc>) -> Option<CompletedEpisode> {
        let session = self.current.take()?;
        let episode = session.finish(now);
        log::info!(
            "recording session closed: {} frames={} duration_ms={} status={:?}",
            episode.video_path.display(),
            episode.video_frame_count,
            episode.duration.num_milliseconds(),
            episode.status
        );
        Some(episode)
    }

    pub fn is_recording(&self) -> bool {
        self.current.is_some()
    }

    pub fn current(&self) -> Option<&RecordingSession> {
        self.current.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counters {
        opened: AtomicUsize,
        live: AtomicUsize,
        frames: AtomicUsize,
        previews: AtomicUsize,
    }

    struct FakeEncoder {
        counters: Arc<Counters>,
        fail_open: bool,
        fail_writes: bool,
    }

    struct FakeSink {
        counters: Arc<Counters>,
        bytes: u64,
        fail_writes: bool,
    }

    impl MediaEncoder for FakeEncoder {
        fn open_video(
            &mut self,
            _path: &Path,
            _width: u32,
            _height: u32,
        ) -> Result<Box<dyn VideoSink>, EncodeError> {
            if self.fail_open {
                return Err(EncodeError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "read-only disk",
                )));
            }
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            self.counters.live.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSink {
                counters: self.counters.clone(),
                bytes: 0,
                fail_writes: self.fail_writes,
            }))
        }

        fn write_preview(&mut self, _path: &Path, _frame: &Frame) -> Result<u64, EncodeError> {
            self.counters.previews.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        }
    }

    impl VideoSink for FakeSink {
        fn write_frame(&mut self, _frame: &Frame) -> Result<u64, EncodeError> {
            if self.fail_writes {
                return Err(EncodeError::Io(std::io::Error::other("disk full")));
            }
            self.counters.frames.fetch_add(1, Ordering::SeqCst);
            self.bytes += 100;
            Ok(100)
        }

        fn finish(self: Box<Self>) -> Result<u64, EncodeError> {
            Ok(self.bytes)
        }
    }

    impl Drop for FakeSink {
        fn drop(&mut self) {
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn manager(fail_open: bool, fail_writes: bool) -> (SessionManager, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let encoder = FakeEncoder {
            counters: counters.clone(),
            fail_open,
            fail_writes,
        };
        (
            SessionManager::new(Box::new(encoder), "/data/motions", ".mjpeg"),
            counters,
        )
    }

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + TimeDelta::milliseconds(ms)
    }

    fn frame(ms: i64) -> Frame {
        Frame::filled(8, 6, [1, 2, 3], at(ms))
    }

    #[test]
    fn write_without_session_is_an_error() {
        let (mut mgr, counters) = manager(false, false);
        let err = mgr.write_frame(&frame(0), &[]).unwrap_err();
        assert!(matches!(err, RecordError::NoActiveSession));
        assert_eq!(counters.opened.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn open_is_metadata_only_until_first_frame() {
        let (mut mgr, counters) = manager(false, false);
        assert!(mgr.open_session(at(0)).is_none());
        let session = mgr.current().unwrap();
        assert!(!session.has_encoder());
        assert_eq!(session.video_path(), Path::new("/data/motions/2024-05-01--12-00-00-000.mjpeg"));
        assert_eq!(session.preview_path(), Path::new("/data/motions/2024-05-01--12-00-00-000.jpg"));
        assert_eq!(counters.opened.load(Ordering::SeqCst), 0);

        mgr.write_frame(&frame(100), &[]).unwrap();
        assert!(mgr.current().unwrap().has_encoder());
        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
        assert_eq!(counters.previews.load(Ordering::SeqCst), 1);

        mgr.write_frame(&frame(200), &[]).unwrap();
        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
        assert_eq!(counters.previews.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ten_frame_session_keeps_regions_in_order() {
        let (mut mgr, _) = manager(false, false);
        mgr.open_session(at(0));
        let regions = [Rect::new(1, 1, 2, 2), Rect::new(3, 3, 1, 1), Rect::new(0, 4, 5, 2)];
        let mut next = regions.iter();
        for i in 0..10 {
            let r: Vec<Rect> = if i % 3 == 1 {
                next.next().copied().into_iter().collect()
            } else {
                Vec::new()
            };
            mgr.write_frame(&frame(i * 100), &r).unwrap();
        }
        let episode = mgr.close_session(at(1_000)).unwrap();
        assert_eq!(episode.video_frame_count, 10);
        assert_eq!(episode.bounding_regions, regions.to_vec());
        assert_eq!(episode.video_size, 1_000);
        assert_eq!(episode.preview_size, 42);
        assert_eq!(episode.duration, TimeDelta::seconds(1));
        assert_eq!(episode.status, EpisodeStatus::Complete);
    }

    #[test]
    fn close_is_idempotent() {
        let (mut mgr, counters) = manager(false, false);
        mgr.open_session(at(0));
        mgr.write_frame(&frame(0), &[]).unwrap();
        assert!(mgr.close_session(at(500)).is_some());
        assert!(mgr.close_session(at(600)).is_none());
        assert!(!mgr.is_recording());
        assert_eq!(counters.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn close_without_open_returns_nothing() {
        let (mut mgr, _) = manager(false, false);
        assert!(mgr.close_session(at(0)).is_none());
    }

    #[test]
    fn double_open_keeps_second_session_and_releases_first_sink() {
        let (mut mgr, counters) = manager(false, false);
        mgr.open_session(at(0));
        mgr.write_frame(&frame(0), &[Rect::new(0, 0, 1, 1)]).unwrap();
        assert_eq!(counters.live.load(Ordering::SeqCst), 1);

        let displaced = mgr.open_session(at(2_000)).unwrap();
        assert_eq!(displaced.start_time, at(0));
        assert_eq!(displaced.video_frame_count, 1);
        assert_eq!(counters.live.load(Ordering::SeqCst), 0);

        let current = mgr.current().unwrap();
        assert_eq!(current.start_time(), at(2_000));
        assert_eq!(current.video_frame_count(), 0);
        assert!(current.bounding_regions().is_empty());

        mgr.write_frame(&frame(2_100), &[]).unwrap();
        let episode = mgr.close_session(at(3_000)).unwrap();
        assert_eq!(episode.start_time, at(2_000));
        assert!(mgr.close_session(at(3_100)).is_none());
        assert_eq!(counters.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_encoder_still_yields_a_degraded_episode() {
        let (mut mgr, counters) = manager(true, false);
        mgr.open_session(at(0));
        for i in 0..4 {
            let err = mgr.write_frame(&frame(i * 100), &[Rect::new(1, 1, 1, 1)]).unwrap_err();
            assert!(matches!(err, RecordError::EncoderUnavailable { .. }));
            assert!(mgr.is_recording());
        }
        let episode = mgr.close_session(at(1_500)).unwrap();
        assert!(episode.status.is_degraded());
        assert_eq!(episode.video_frame_count, 0);
        assert_eq!(episode.video_size, 0);
        assert_eq!(episode.bounding_regions.len(), 4);
        assert_eq!(episode.duration, TimeDelta::milliseconds(1_500));
        assert_eq!(counters.previews.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn write_failures_degrade_but_keep_recording() {
        let (mut mgr, counters) = manager(false, true);
        mgr.open_session(at(0));
        let err = mgr.write_frame(&frame(0), &[]).unwrap_err();
        assert!(matches!(err, RecordError::Encoder(_)));
        assert!(mgr.current().unwrap().has_encoder());
        let episode = mgr.close_session(at(100)).unwrap();
        assert!(episode.status.is_degraded());
        assert_eq!(counters.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn session_closed_before_any_frame_is_degraded() {
        let (mut mgr, _) = manager(false, false);
        mgr.open_session(at(0));
        let episode = mgr.close_session(at(10)).unwrap();
        assert!(episode.status.is_degraded());
        assert_eq!(episode.video_frame_count, 0);
    }

    #[test]
    fn clock_regression_clamps_duration_to_zero() {
        let (mut mgr, _) = manager(false, false);
        mgr.open_session(at(1_000));
        mgr.write_frame(&frame(1_000), &[]).unwrap();
        let episode = mgr.close_session(at(0)).unwrap();
        assert_eq!(episode.duration, TimeDelta::zero());
    }

    #[test]
    fn sessions_within_one_millisecond_get_distinct_files() {
        use crate::encode::MjpegEncoder;

        let dir = tempfile::tempdir().unwrap();
        let mut mgr = SessionManager::new(Box::new(MjpegEncoder::default()), dir.path(), ".mjpeg");
        let t = at(0);

        mgr.open_session(t);
        mgr.write_frame(&frame(0), &[]).unwrap();
        mgr.write_frame(&frame(0), &[]).unwrap();
        let first = mgr.close_session(t + TimeDelta::microseconds(300)).unwrap();

        mgr.open_session(t + TimeDelta::microseconds(600));
        mgr.write_frame(&frame(0), &[]).unwrap();
        let second = mgr.close_session(t + TimeDelta::microseconds(900)).unwrap();

        assert_ne!(first.video_path, second.video_path);
        assert_ne!(first.preview_path, second.preview_path);
        assert!(second.video_path.ends_with("2024-05-01--12-00-00-000-1.mjpeg"));
        for episode in [&first, &second] {
            assert_eq!(std::fs::metadata(&episode.video_path).unwrap().len(), episode.video_size);
            assert!(episode.preview_path.exists());
        }
        assert!(first.video_size > second.video_size);
    }

    #[test]
    fn existing_video_for_the_instant_is_left_untouched() {
        use crate::encode::MjpegEncoder;

        let dir = tempfile::tempdir().unwrap();
        let taken = dir.path().join("2024-05-01--12-00-00-000.mjpeg");
        std::fs::write(&taken, b"earlier episode").unwrap();

        // a fresh manager, as after a restart or a clock step backwards
        let mut mgr = SessionManager::new(Box::new(MjpegEncoder::default()), dir.path(), ".mjpeg");
        mgr.open_session(at(0));
        mgr.write_frame(&frame(0), &[]).unwrap();
        let episode = mgr.close_session(at(100)).unwrap();

        assert_eq!(episode.status, EpisodeStatus::Complete);
        assert!(episode.video_path.ends_with("2024-05-01--12-00-00-000-1.mjpeg"));
        assert!(episode.preview_path.ends_with("2024-05-01--12-00-00-000-1.jpg"));
        assert_eq!(std::fs::read(&taken).unwrap(), b"earlier episode");
    }

    #[test]
    fn dropping_the_manager_releases_an_open_sink() {
        let (mut mgr, counters) = manager(false, false);
        mgr.open_session(at(0));
        mgr.write_frame(&frame(0), &[]).unwrap();
        assert_eq!(counters.live.load(Ordering::SeqCst), 1);
        drop(mgr);
        assert_eq!(counters.live.load(Ordering::SeqCst), 0);
    }
}
