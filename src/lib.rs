//! Motion Recorder
//!
//! This crate turns a camera feed into a durable log of motion episodes.
//!
//! # Architecture
//!
//! Frames flow through one sequential capture loop:
//!
//! 1. **Classify**: a `MotionClassifier` reports motion and bounding regions per frame.
//! 2. **Debounce**: `HysteresisDebouncer` turns the noisy per-frame signal into
//!    stable on/off transitions.
//! 3. **Record**: `SessionManager` opens a session on a rising edge, writes
//!    frames while on, and closes it into a `CompletedEpisode` on the falling edge.
//! 4. **Persist**: `EventStore` appends each episode under a gapless, durable id.
//!
//! The latest annotated frame is published to a `LatestFrame` buffer for viewers.
//!
//! # Module Structure
//!
//! - `debounce`: hysteresis filter
//! - `session`: recording sessions and completed episodes
//! - `store`: append-only motion event log (SQLite, in-memory)
//! - `orchestrator`: the capture loop
//! - `frame`, `encode`: frames, the live buffer, MJPEG/JPEG output
//! - `ingest`, `detect`: frame sources and motion classifiers
//! - `config`, `error`: daemon configuration and error types

pub mod config;
pub mod debounce;
pub mod detect;
pub mod encode;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod orchestrator;
pub mod session;
pub mod store;

pub use config::RecorderConfig;
pub use debounce::HysteresisDebouncer;
pub use detect::{Classification, FrameDiffClassifier, MotionClassifier};
pub use encode::{MediaEncoder, MjpegEncoder, VideoSink};
pub use error::{EncodeError, RecordError, StoreError};
pub use frame::{Frame, LatestFrame, LiveFrame, Rect};
pub use ingest::{open_source, FrameSource, ImageDirSource, SourceStats, SyntheticSource};
pub use orchestrator::{CaptureOrchestrator, CaptureStats, ShutdownSignal, TickOutcome};
pub use session::{CompletedEpisode, EpisodeStatus, RecordingSession, SessionManager};
pub use store::{EventStore, InMemoryEventStore, MotionEvent, SqliteEventStore};
