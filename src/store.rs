//! Append-only log of motion events.
//!
//! Events live in the `motions` collection keyed by their id encoded as 8
//! big-endian bytes, so key order is id order. Ids come from a durable
//! sequence that is advanced inside the same transaction as the insert: a
//! failed append leaves no gap and ids survive a restart.
//!
//! The SQLite store runs in WAL mode. One process writes (the capture worker);
//! any number of readers open their own connection and see a consistent
//! snapshot without blocking the writer.

use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::StoreError;
use crate::frame::Rect;
use crate::session::CompletedEpisode;

pub const MOTIONS_COLLECTION: &str = "motions";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A persisted, immutable motion episode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionEvent {
    pub id: u64,
    pub start_time: DateTime<Utc>,
    pub duration_ns: u64,
    pub video_path: String,
    /// Bytes written to the video file.
    pub video_size: u64,
    pub preview_path: String,
    pub preview_size: u64,
    #[serde(default)]
    pub video_frames: u64,
    /// Set when the episode's media is incomplete or missing.
    #[serde(default)]
    pub degraded: bool,
}

impl MotionEvent {
    pub fn from_episode(id: u64, episode: &CompletedEpisode) -> Self {
        let duration_ns = episode
            .duration
            .num_nanoseconds()
            .map(|ns| ns.max(0) as u64)
            .unwrap_or(u64::MAX);
        Self {
            id,
            start_time: episode.start_time,
            duration_ns,
            video_path: episode.video_path.display().to_string(),
            video_size: episode.video_size,
            preview_path: episode.preview_path.display().to_string(),
            preview_size: episode.preview_size,
            video_frames: episode.video_frame_count,
            degraded: episode.status.is_degraded(),
        }
    }

    pub fn duration(&self) -> TimeDelta {
        TimeDelta::nanoseconds(i64::try_from(self.duration_ns).unwrap_or(i64::MAX))
    }
}

pub trait EventStore: Send {
    /// Persist an episode and return its id.
    fn append(&mut self, episode: &CompletedEpisode) -> Result<u64, StoreError>;

    fn get(&self, id: u64) -> Result<MotionEvent, StoreError>;

    /// All readable events in ascending id order. Undecodable entries are
    /// skipped.
    fn list(&self) -> Result<Vec<MotionEvent>, StoreError>;

    /// Bounding regions recorded with an event, in the order observed.
    fn regions(&self, id: u64) -> Result<Vec<Rect>, StoreError>;
}

/// Big-endian key for an event id.
pub fn event_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn id_from_key(key: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = key.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

fn decode_event(id: u64, payload: &[u8]) -> Result<MotionEvent, StoreError> {
    let event: MotionEvent =
        serde_json::from_slice(payload).map_err(|e| StoreError::CorruptRecord {
            id,
            reason: e.to_string(),
        })?;
    if event.id != id {
        return Err(StoreError::CorruptRecord {
            id,
            reason: format!("payload carries id {}", event.id),
        });
    }
    Ok(event)
}

fn payload_bytes(id: u64, value: ValueRef<'_>) -> Result<Vec<u8>, StoreError> {
    value
        .as_bytes()
        .map(|b| b.to_vec())
        .map_err(|e| StoreError::CorruptRecord {
            id,
            reason: e.to_string(),
        })
}

pub(crate) fn open_db_connection(db_path: &str) -> rusqlite::Result<Connection> {
    if db_path.starts_with("file:") {
        return Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        );
    }
    Connection::open(db_path)
}

pub struct SqliteEventStore {
    conn: Connection,
}

impl SqliteEventStore {
    /// Open (creating if needed) a store for reading and writing.
    ///
    /// Failure here is fatal for a recorder: nothing could ever be persisted.
    pub fn open(db_path: &str) -> Result<Self, StoreError> {
        let open_err = |source| StoreError::Open {
            path: db_path.to_string(),
            source,
        };
        let conn = open_db_connection(db_path).map_err(open_err)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(open_err)?;
        let store = Self { conn };
        store.ensure_schema().map_err(open_err)?;
        Ok(store)
    }

    /// Open an existing store without write access.
    pub fn open_read_only(db_path: &str) -> Result<Self, StoreError> {
        let open_err = |source| StoreError::Open {
            path: db_path.to_string(),
            source,
        };
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(open_err)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(open_err)?;
        Ok(Self { conn })
    }

    fn ensure_schema(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS motions (
              key BLOB PRIMARY KEY NOT NULL,
              payload BLOB NOT NULL
            ) WITHOUT ROWID;

            CREATE TABLE IF NOT EXISTS motion_regions (
              key BLOB PRIMARY KEY NOT NULL,
              payload BLOB NOT NULL
            ) WITHOUT ROWID;

            CREATE TABLE IF NOT EXISTS sequences (
              name TEXT PRIMARY KEY NOT NULL,
              value INTEGER NOT NULL
            );
            "#,
        )
    }

    fn contains(&self, id: u64) -> Result<bool, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM motions WHERE key = ?1",
                params![&event_key(id)[..]],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

impl EventStore for SqliteEventStore {
    fn append(&mut self, episode: &CompletedEpisode) -> Result<u64, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<i64> = tx
            .query_row(
                "SELECT value FROM sequences WHERE name = ?1",
                params![MOTIONS_COLLECTION],
                |row| row.get(0),
            )
            .optional()?;
        let id = current.unwrap_or(0) as u64 + 1;
        tx.execute(
            r#"
            INSERT INTO sequences(name, value) VALUES (?1, ?2)
            ON CONFLICT(name) DO UPDATE SET value = excluded.value
            "#,
            params![MOTIONS_COLLECTION, id as i64],
        )?;

        let event = MotionEvent::from_episode(id, episode);
        let payload = serde_json::to_vec(&event).map_err(StoreError::Serialize)?;
        let regions =
            serde_json::to_vec(&episode.bounding_regions).map_err(StoreError::Serialize)?;
        let key = event_key(id);
        tx.execute(
            "INSERT INTO motions(key, payload) VALUES (?1, ?2)",
            params![&key[..], payload],
        )?;
        tx.execute(
            "INSERT INTO motion_regions(key, payload) VALUES (?1, ?2)",
            params![&key[..], regions],
        )?;
        tx.commit()?;
        Ok(id)
    }

    fn get(&self, id: u64) -> Result<MotionEvent, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM motions WHERE key = ?1")?;
        let mut rows = stmt.query(params![&event_key(id)[..]])?;
        let Some(row) = rows.next()? else {
            return Err(StoreError::NotFound(id));
        };
        let payload = payload_bytes(id, row.get_ref(0)?)?;
        decode_event(id, &payload)
    }

    fn list(&self) -> Result<Vec<MotionEvent>, StoreError> {
        // one read transaction so the scan sees a single snapshot
        let tx = self.conn.unchecked_transaction()?;
        let mut out = Vec::new();
        {
            let mut stmt = tx.prepare("SELECT key, payload FROM motions ORDER BY key ASC")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let Some(id) = row.get_ref(0)?.as_bytes().ok().and_then(id_from_key) else {
                    log::warn!("skipping motion entry with malformed key");
                    continue;
                };
                match payload_bytes(id, row.get_ref(1)?).and_then(|p| decode_event(id, &p)) {
                    Ok(event) => out.push(event),
                    Err(e) => log::warn!("skipping unreadable motion event: {}", e),
                }
            }
        }
        tx.finish()?;
        Ok(out)
    }

    fn regions(&self, id: u64) -> Result<Vec<Rect>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM motion_regions WHERE key = ?1")?;
        let mut rows = stmt.query(params![&event_key(id)[..]])?;
        let payload = match rows.next()? {
            Some(row) => Some(payload_bytes(id, row.get_ref(0)?)?),
            None => None,
        };
        match payload {
            Some(payload) => {
                serde_json::from_slice(&payload).map_err(|e| StoreError::CorruptRecord {
                    id,
                    reason: e.to_string(),
                })
            }
            None if self.contains(id)? => Ok(Vec::new()),
            None => Err(StoreError::NotFound(id)),
        }
    }
}

/// Volatile store with the same semantics, for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: BTreeMap<[u8; 8], Vec<u8>>,
    regions: BTreeMap<[u8; 8], Vec<Rect>>,
    sequence: u64,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn put_raw(&mut self, id: u64, payload: &[u8]) {
        self.events.insert(event_key(id), payload.to_vec());
    }
}

impl EventStore for InMemoryEventStore {
    fn append(&mut self, episode: &CompletedEpisode) -> Result<u64, StoreError> {
        let id = self.sequence + 1;
        let event = MotionEvent::from_episode(id, episode);
        let payload = serde_json::to_vec(&event).map_err(StoreError::Serialize)?;
        self.sequence = id;
        self.events.insert(event_key(id), payload);
        self.regions
            .insert(event_key(id), episode.bounding_regions.clone());
        Ok(id)
    }

    fn get(&self, id: u64) -> Result<MotionEvent, StoreError> {
        let payload = self
            .events
            .get(&event_key(id))
            .ok_or(StoreError::NotFound(id))?;
        decode_event(id, payload)
    }

    fn list(&self) -> Result<Vec<MotionEvent>, StoreError> {
        Ok(self
            .events
            .iter()
            .filter_map(|(key, payload)| {
                let id = u64::from_be_bytes(*key);
                match decode_event(id, payload) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        log::warn!("skipping unreadable motion event: {}", e);
                        None
                    }
                }
            })
            .collect())
    }

    fn regions(&self, id: u64) -> Result<Vec<Rect>, StoreError> {
        if !self.events.contains_key(&event_key(id)) {
            return Err(StoreError::NotFound(id));
        }
        Ok(self
            .regions
            .get(&event_key(id))
            .cloned()
            .unwrap_or_default())
    }
}
