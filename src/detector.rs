//! Boundary crossing detection.
//!
//! For each accepted sample the detector recomputes containment for every
//! active region and emits an event only when containment actually flips.
//! The first observation of a region establishes a baseline: entering on the
//! first fix is reported, but an initial "outside" is not an exit.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::filter::PositionSample;
use crate::geo::Coordinate;
use crate::region::{MembershipState, Region, RegionId, RegionStore};

/// Unique identifier for a crossing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Create a new random event id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Direction of a crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossingKind {
    #[allow(missing_docs)]
    Enter,
    #[allow(missing_docs)]
    Exit,
}

impl fmt::Display for CrossingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Enter => "enter",
            Self::Exit => "exit",
        })
    }
}

/// An Enter or Exit transition. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossingEvent {
    /// Unique id, used to deduplicate log entries across restarts.
    pub id: EventId,
    /// Region that was crossed.
    pub region_id: RegionId,
    /// Direction.
    pub kind: CrossingKind,
    /// Position of the sample that revealed the crossing.
    pub at_coordinate: Coordinate,
    /// Timestamp of that sample.
    pub at_time: DateTime<Utc>,
}

impl CrossingEvent {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new(region_id: RegionId, kind: CrossingKind, at_coordinate: Coordinate, at_time: DateTime<Utc>) -> Self {
        Self {
            id: EventId::new(),
            region_id,
            kind,
            at_coordinate,
            at_time,
        }
    }
}

/// Membership transition function.
///
/// Returns the event kind to emit, if any. The new state is always recorded
/// by the caller regardless of the notify flags.
#[must_use]
pub fn transition(region: &Region, previous: MembershipState, current: MembershipState) -> Option<CrossingKind> {
    match (previous, current) {
        (MembershipState::Unknown | MembershipState::Outside, MembershipState::Inside) => {
            region.notify_on_entry.then_some(CrossingKind::Enter)
        }
        (MembershipState::Inside, MembershipState::Outside) => region.notify_on_exit.then_some(CrossingKind::Exit),
        _ => None,
    }
}

/// Evaluates samples against the region store.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossingDetector;

impl CrossingDetector {
    #[allow(missing_docs)]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Updates membership for every active region and returns the crossings,
    /// ordered by region id.
    ///
    /// Inert regions (the platform refused to monitor them) are skipped and
    /// keep their previous membership.
    pub fn evaluate(&self, sample: &PositionSample, regions: &mut RegionStore) -> Vec<CrossingEvent> {
        let mut events = Vec::new();

        for entry in regions.entries_mut() {
            if entry.inert {
                continue;
            }

            let current = if entry.region.contains(&sample.coordinate) {
                MembershipState::Inside
            } else {
                MembershipState::Outside
            };
            let previous = std::mem::replace(&mut entry.membership, current);

            if let Some(kind) = transition(&entry.region, previous, current) {
                debug!(region_id = %entry.region.id, %kind, "boundary crossing detected");
                events.push(CrossingEvent::new(
                    entry.region.id.clone(),
                    kind,
                    sample.coordinate,
                    sample.timestamp,
                ));
            }
        }

        events
    }
}
