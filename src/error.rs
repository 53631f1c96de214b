//! Error types shared across the recording pipeline.
//!
//! Plumbing code uses `anyhow`. The types here exist where a caller has to
//! tell failure kinds apart: a missing event is not a corrupt event, and a
//! store that cannot be opened is not a single failed append.

use thiserror::Error;

/// Failures from the event store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing database could not be opened or initialised.
    #[error("cannot open event store at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("motion event {0} not found")]
    NotFound(u64),

    #[error("motion event {id} is corrupt: {reason}")]
    CorruptRecord { id: u64, reason: String },

    #[error("cannot serialize motion event: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl StoreError {
    /// True when no episode can ever be recorded through this store.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Open { .. })
    }
}

/// Failures from the media encoder.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("frame has no pixels ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },
}

impl EncodeError {
    /// True when the target file already exists and was left untouched.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, EncodeError::Io(e) if e.kind() == std::io::ErrorKind::AlreadyExists)
    }
}

/// Failures from writing into a recording session.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("no recording session is open")]
    NoActiveSession,

    /// The encoder could not be acquired for this session; frames are dropped
    /// until the session closes.
    #[error("video encoder unavailable for {path}")]
    EncoderUnavailable { path: String },

    #[error("encoder error: {0}")]
    Encoder(#[from] EncodeError),
}
