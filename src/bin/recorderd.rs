//! recorderd - motion episode recorder daemon
//!
//! This daemon:
//! 1. Pulls frames from the configured source (synthetic or a local image directory)
//! 2. Classifies each frame with block frame differencing
//! 3. Debounces the motion signal into episodes
//! 4. Records each episode as an MJPEG file plus a JPEG preview
//! 5. Appends one motion event per episode to the event store

use anyhow::{anyhow, Result};
use std::thread;

use motion_recorder::{
    open_source, CaptureOrchestrator, FrameDiffClassifier, HysteresisDebouncer, MjpegEncoder,
    RecorderConfig, SessionManager, ShutdownSignal, SqliteEventStore,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = RecorderConfig::load()?;
    std::fs::create_dir_all(&config.data_path).map_err(|e| {
        anyhow!(
            "failed to create data directory {}: {}",
            config.data_path.display(),
            e
        )
    })?;

    let store = match SqliteEventStore::open(&config.db_path) {
        Ok(store) => store,
        Err(e) => {
            log::error!("{}", e);
            return Err(e.into());
        }
    };

    let source = open_source(&config.source)?;
    let classifier = FrameDiffClassifier::new(config.detect.threshold, config.detect.min_area);
    let debouncer = HysteresisDebouncer::new(
        config.debounce.on_threshold(),
        config.debounce.off_threshold(),
    );
    let sessions = SessionManager::new(
        Box::new(MjpegEncoder::new(config.video.jpeg_quality)),
        config.data_path.clone(),
        &config.video.extension,
    );

    let shutdown = ShutdownSignal::new();
    let handler_signal = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received, finishing current episode...");
        handler_signal.trigger();
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!(
        "recorderd {} running. source={} data={} db={}",
        env!("CARGO_PKG_VERSION"),
        config.source.url,
        config.data_path.display(),
        config.db_path
    );

    let mut orchestrator = CaptureOrchestrator::new(
        source,
        Box::new(classifier),
        debouncer,
        sessions,
        Box::new(store),
    )
    .with_shutdown(shutdown)
    .with_live_quality(config.video.jpeg_quality);

    let worker = thread::Builder::new()
        .name("capture".to_string())
        .spawn(move || orchestrator.run())?;
    let stats = worker
        .join()
        .map_err(|_| anyhow!("capture worker panicked"))??;

    log::info!(
        "recorderd stopped: frames={} motion_frames={} episodes={} append_failures={} degraded_writes={}",
        stats.frames,
        stats.motion_frames,
        stats.episodes_recorded,
        stats.append_failures,
        stats.degraded_writes
    );
    Ok(())
}
