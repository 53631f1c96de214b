use chrono::{TimeDelta, TimeZone, Utc};
use std::path::Path;

use motion_recorder::ingest::{SyntheticConfig, SyntheticSource};
use motion_recorder::{
    CaptureOrchestrator, EventStore, FrameDiffClassifier, HysteresisDebouncer, LatestFrame,
    MjpegEncoder, SessionManager, SqliteEventStore,
};

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

fn synthetic(frames: u64) -> SyntheticSource {
    SyntheticSource::new(SyntheticConfig {
        name: "stub://pipeline".to_string(),
        width: 160,
        height: 120,
        target_fps: 10,
        start: Utc.with_ymd_and_hms(2024, 5, 1, 7, 30, 0).unwrap(),
        frame_limit: Some(frames),
        quiet_frames: 20,
        active_frames: 20,
        realtime: false,
    })
}

fn count_jpeg_frames(path: &Path) -> usize {
    let bytes = std::fs::read(path).unwrap();
    bytes.windows(3).filter(|w| w == &[0xFF, 0xD8, 0xFF]).count()
}

#[test]
fn synthetic_motion_windows_become_recorded_episodes() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("recordings");
    let db = dir.path().join("motions.db").display().to_string();

    // two full cycles: quiet 0..20, motion 20..40, quiet 40..60, motion 60..80, quiet 80..100
    let live = LatestFrame::new();
    let mut orchestrator = CaptureOrchestrator::new(
        Box::new(synthetic(100)),
        Box::new(FrameDiffClassifier::new(30, 400)),
        HysteresisDebouncer::new(TimeDelta::milliseconds(400), TimeDelta::milliseconds(1_000)),
        SessionManager::new(Box::new(MjpegEncoder::new(70)), &data, ".mjpeg"),
        Box::new(SqliteEventStore::open(&db).unwrap()),
    )
    .with_live_frame(live.clone());
    let stats = orchestrator.run().unwrap();

    assert_eq!(stats.frames, 100);
    assert_eq!(stats.episodes_recorded, 2);
    assert_eq!(stats.append_failures, 0);
    assert_eq!(stats.degraded_writes, 0);
    assert!(live.latest().is_some());

    let store = SqliteEventStore::open_read_only(&db).unwrap();
    let events = store.list().unwrap();
    assert_eq!(events.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2]);

    for event in &events {
        assert!(!event.degraded);
        assert!(event.video_frames > 0);
        assert!(event.duration() > TimeDelta::seconds(1));

        let video = Path::new(&event.video_path);
        assert!(video.starts_with(&data));
        assert_eq!(std::fs::metadata(video).unwrap().len(), event.video_size);
        assert_eq!(count_jpeg_frames(video) as u64, event.video_frames);

        let preview = std::fs::read(&event.preview_path).unwrap();
        assert_eq!(preview.len() as u64, event.preview_size);
        assert_eq!(preview[..2], JPEG_SOI);

        assert!(!store.regions(event.id).unwrap().is_empty());
    }
    assert!(events[0].start_time < events[1].start_time);
}

#[test]
fn quiet_scene_records_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("recordings");
    let db = dir.path().join("motions.db").display().to_string();

    let mut orchestrator = CaptureOrchestrator::new(
        Box::new(synthetic(20)),
        Box::new(FrameDiffClassifier::new(30, 400)),
        HysteresisDebouncer::new(TimeDelta::milliseconds(400), TimeDelta::milliseconds(1_000)),
        SessionManager::new(Box::new(MjpegEncoder::default()), &data, ".mjpeg"),
        Box::new(SqliteEventStore::open(&db).unwrap()),
    );
    let stats = orchestrator.run().unwrap();

    assert_eq!(stats.frames, 20);
    assert_eq!(stats.motion_frames, 0);
    assert_eq!(stats.episodes_recorded, 0);
    assert!(orchestrator.store().list().unwrap().is_empty());
    assert!(!data.exists());
}
