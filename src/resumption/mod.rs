//! Resumption snapshot persistence.
//!
//! A snapshot carries what a cold restart needs to continue monitoring
//! without re-deriving membership from scratch: the registered regions, the
//! most recent crossing events, and the last known mode and authorization.
//!
//! Two backends are provided: an in-memory store for embedding and tests,
//! and a checksummed single-file store.

mod codec;
mod file;

pub use file::FileResumptionStore;

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::authorization::AuthorizationLevel;
use crate::controller::MonitoringMode;
use crate::detector::CrossingEvent;
use crate::region::Region;

/// Errors raised while loading or saving a snapshot.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored snapshot failed its integrity checks.
    #[error("Snapshot corrupted: {reason}")]
    Corrupted {
        reason: String,
    },
}

/// Persisted state read on startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumptionSnapshot {
    /// When the snapshot was written.
    pub saved_at: DateTime<Utc>,
    /// Last known authorization level.
    pub authorization: AuthorizationLevel,
    /// Last active monitoring mode.
    pub mode: MonitoringMode,
    /// Registered regions.
    pub regions: Vec<Region>,
    /// Most recent crossings, oldest first.
    pub events: Vec<CrossingEvent>,
}

/// Storage backend for the resumption snapshot.
pub trait ResumptionStore: Send {
    /// Reads the last saved snapshot, `None` if nothing was saved yet.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError` if the backend fails or the data is corrupt.
    fn load(&self) -> Result<Option<ResumptionSnapshot>, PersistenceError>;

    /// Replaces the saved snapshot.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError` if the backend fails.
    fn save(&self, snapshot: &ResumptionSnapshot) -> Result<(), PersistenceError>;
}

/// In-memory snapshot store.
///
/// Clones share the same slot, so a test can hand one clone to a controller,
/// drop the controller, and start a new one from the other clone to simulate
/// a relaunch.
#[derive(Debug, Clone, Default)]
pub struct InMemoryResumptionStore {
    slot: Arc<Mutex<Option<ResumptionSnapshot>>>,
}

impl InMemoryResumptionStore {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The currently stored snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Option<ResumptionSnapshot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl ResumptionStore for InMemoryResumptionStore {
    fn load(&self) -> Result<Option<ResumptionSnapshot>, PersistenceError> {
        Ok(self.snapshot())
    }

    fn save(&self, snapshot: &ResumptionSnapshot) -> Result<(), PersistenceError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
        Ok(())
    }
}

/// Store that never persists anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResumption;

impl ResumptionStore for NoResumption {
    fn load(&self) -> Result<Option<ResumptionSnapshot>, PersistenceError> {
        Ok(None)
    }

    fn save(&self, _snapshot: &ResumptionSnapshot) -> Result<(), PersistenceError> {
        Ok(())
    }
}
