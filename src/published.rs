//! Shared "current pupil positions" slot and its data-changed announcements.
//!
//! There is exactly one [`SlotWriter`]; every other part of the host holds a
//! [`SlotReader`] and receives whichever snapshot was installed at read time.

use crate::store::PupilSnapshot;
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Topic announced when pupil positions change
pub const PUPIL_POSITIONS_TOPIC: &str = "pupil_positions";

/// Create a slot holding an empty snapshot and return its writer and a reader
pub fn published_slot() -> (SlotWriter, SlotReader) {
    let inner = Arc::new(RwLock::new(PupilSnapshot::empty()));
    (
        SlotWriter {
            inner: Arc::clone(&inner),
        },
        SlotReader { inner },
    )
}

/// Single writer of the shared slot
pub struct SlotWriter {
    inner: Arc<RwLock<PupilSnapshot>>,
}

impl SlotWriter {
    /// Swap in a new snapshot; readers holding the old one keep it
    pub fn install(&self, snapshot: PupilSnapshot) {
        *self.inner.write() = snapshot;
    }

    pub fn reader(&self) -> SlotReader {
        SlotReader {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[derive(Clone)]
pub struct SlotReader {
    inner: Arc<RwLock<PupilSnapshot>>,
}

impl SlotReader {
    pub fn current(&self) -> PupilSnapshot {
        self.inner.read().clone()
    }
}

/// Why listeners are being told about the data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Freshly produced data
    New,
    /// Data that was already there, e.g. loaded from disk
    Existing,
}

/// Payload delivered to data-changed listeners
#[derive(Debug, Clone)]
pub struct DataChanged {
    pub topic: &'static str,
    pub rec_dir: PathBuf,
    pub token: Uuid,
    pub kind: ChangeKind,
    pub snapshot: PupilSnapshot,
}

type Listener = Arc<dyn Fn(&DataChanged) + Send + Sync>;

/// One producer, many listeners, called synchronously on every announcement
pub struct DataChangedAnnouncer {
    rec_dir: PathBuf,
    token: Mutex<Uuid>,
    listeners: RwLock<Vec<Listener>>,
}

impl DataChangedAnnouncer {
    pub fn new<P: AsRef<Path>>(rec_dir: P) -> Self {
        Self {
            rec_dir: rec_dir.as_ref().to_path_buf(),
            token: Mutex::new(Uuid::new_v4()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn add_listener<F>(&self, listener: F)
    where
        F: Fn(&DataChanged) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    pub fn token(&self) -> Uuid {
        *self.token.lock()
    }

    /// Announce new data under a fresh token
    pub fn announce_new(&self, snapshot: PupilSnapshot) -> Uuid {
        let token = Uuid::new_v4();
        *self.token.lock() = token;
        self.announce(token, ChangeKind::New, snapshot);
        token
    }

    /// Announce already existing data under the current token
    pub fn announce_existing(&self, snapshot: PupilSnapshot) -> Uuid {
        let token = self.token();
        self.announce(token, ChangeKind::Existing, snapshot);
        token
    }

    fn announce(&self, token: Uuid, kind: ChangeKind, snapshot: PupilSnapshot) {
        let change = DataChanged {
            topic: PUPIL_POSITIONS_TOPIC,
            rec_dir: self.rec_dir.clone(),
            token,
            kind,
            snapshot,
        };
        // called without the lock held so listeners may register others
        let listeners: Vec<Listener> = self.listeners.read().clone();
        debug!(
            "Announcing {:?} {} ({} records) to {} listeners",
            kind,
            PUPIL_POSITIONS_TOPIC,
            change.snapshot.len(),
            listeners.len()
        );
        for listener in listeners.iter() {
            listener(&change);
        }
    }
}

/// Writer plus announcer: installing a snapshot always announces it
pub struct PupilPublisher {
    writer: SlotWriter,
    announcer: Arc<DataChangedAnnouncer>,
}

impl PupilPublisher {
    pub fn new(writer: SlotWriter, announcer: Arc<DataChangedAnnouncer>) -> Self {
        Self { writer, announcer }
    }

    pub fn publish_new(&self, snapshot: PupilSnapshot) -> Uuid {
        self.writer.install(snapshot.clone());
        self.announcer.announce_new(snapshot)
    }

    pub fn publish_existing(&self, snapshot: PupilSnapshot) -> Uuid {
        self.writer.install(snapshot.clone());
        self.announcer.announce_existing(snapshot)
    }

    pub fn reader(&self) -> SlotReader {
        self.writer.reader()
    }
}
