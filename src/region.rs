//! Regions and the region store.
//!
//! The store is the authoritative set of registered geofences. It exclusively
//! owns each `Region` and its `MembershipState`, keyed by region id.
//!
//! # Invariants
//! - Every region has exactly one membership entry, and vice versa. Both live
//!   in the same map entry, so they are created and destroyed together.
//! - The number of regions never exceeds the configured capacity.
//! - Iteration is in region-id order, which makes crossing batches
//!   deterministic.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::detector::{CrossingEvent, CrossingKind};
use crate::error::{GeofenceResult, MonitoringError, ValidationError};
use crate::geo::Coordinate;

/// Platform ceiling on concurrently monitored regions.
pub const DEFAULT_REGION_CAPACITY: usize = 20;

/// Unique identifier for a region.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(String);

impl RegionId {
    /// Creates an identifier.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyRegionId` for empty or blank input.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::EmptyRegionId);
        }
        Ok(Self(id))
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A circular geofence.
///
/// # Examples
///
/// ```
/// use geofence::{Coordinate, Region};
///
/// let center = Coordinate::new(37.3361, -122.0).unwrap();
/// let region = Region::new("campus", center, 200.0).unwrap();
/// assert!(region.notify_on_entry && region.notify_on_exit);
/// assert!(region.contains(&center));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Unique key.
    pub id: RegionId,
    /// Center of the circle.
    pub center: Coordinate,
    /// Radius in meters, always > 0.
    pub radius_meters: f64,
    /// Emit `Enter` events.
    pub notify_on_entry: bool,
    /// Emit `Exit` events.
    pub notify_on_exit: bool,
}

impl Region {
    /// Creates a region that notifies on both entry and exit.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for an empty id, an invalid center or a
    /// radius that is not a finite positive number.
    pub fn new(id: impl Into<String>, center: Coordinate, radius_meters: f64) -> Result<Self, ValidationError> {
        let region = Self {
            id: RegionId::new(id)?,
            center,
            radius_meters,
            notify_on_entry: true,
            notify_on_exit: true,
        };
        region.validate()?;
        Ok(region)
    }

    /// Sets whether entry crossings are reported.
    #[must_use]
    pub fn notify_on_entry(mut self, notify: bool) -> Self {
        self.notify_on_entry = notify;
        self
    }

    /// Sets whether exit crossings are reported.
    #[must_use]
    pub fn notify_on_exit(mut self, notify: bool) -> Self {
        self.notify_on_exit = notify;
        self
    }

    /// Checks the region's invariants. Deserialized regions bypass `new`, so the
    /// store calls this again on insert.
    ///
    /// # Errors
    ///
    /// See [`Region::new`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.as_str().trim().is_empty() {
            return Err(ValidationError::EmptyRegionId);
        }
        if !self.center.is_valid() {
            return Err(ValidationError::CoordinateOutOfRange {
                latitude: self.center.latitude,
                longitude: self.center.longitude,
            });
        }
        if !self.radius_meters.is_finite() || self.radius_meters <= 0.0 {
            return Err(ValidationError::InvalidRadius {
                value: self.radius_meters,
            });
        }
        Ok(())
    }

    /// Distance from the center to `point`, in meters.
    #[must_use]
    pub fn distance_from_center(&self, point: &Coordinate) -> f64 {
        self.center.distance_to(point)
    }

    /// Containment test: inside iff distance <= radius.
    #[must_use]
    pub fn contains(&self, point: &Coordinate) -> bool {
        self.distance_from_center(point) <= self.radius_meters
    }
}

/// Containment of the monitored subject relative to one region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipState {
    /// No accepted sample has been evaluated against the region yet.
    #[default]
    Unknown,
    /// The last accepted sample was within the radius.
    Inside,
    /// The last accepted sample was beyond the radius.
    Outside,
}

/// Region store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionStoreConfig {
    /// Maximum number of concurrently monitored regions.
    pub capacity: usize,
}

impl Default for RegionStoreConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_REGION_CAPACITY,
        }
    }
}

/// Result of a successful `RegionStore::add`.
#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    /// A new id was inserted.
    Inserted,
    /// An existing region with the same id was replaced; the prior region is returned.
    Replaced(Region),
}

#[derive(Debug, Clone)]
pub(crate) struct RegionEntry {
    pub(crate) region: Region,
    pub(crate) membership: MembershipState,
    pub(crate) inert: bool,
}

/// Authoritative set of registered regions and their membership state.
#[derive(Debug, Clone)]
pub struct RegionStore {
    capacity: usize,
    entries: BTreeMap<RegionId, RegionEntry>,
}

impl Default for RegionStore {
    fn default() -> Self {
        Self::new(&RegionStoreConfig::default())
    }
}

impl RegionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(cfg: &RegionStoreConfig) -> Self {
        Self {
            capacity: cfg.capacity,
            entries: BTreeMap::new(),
        }
    }

    /// Maximum number of regions.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of registered regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no region is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &RegionId) -> bool {
        self.entries.contains_key(id)
    }

    /// Inserts or replaces a region and initializes its membership to `Unknown`.
    ///
    /// Replacing an existing id does not count against capacity.
    ///
    /// # Errors
    ///
    /// - `ValidationError` if the region is malformed (regions deserialized
    ///   from a snapshot bypass `Region::new`); the store is unchanged.
    /// - `CapacityExceeded` if a new id would exceed the ceiling; the store is unchanged.
    pub fn add(&mut self, region: Region) -> GeofenceResult<AddOutcome> {
        region.validate()?;

        if !self.entries.contains_key(&region.id) && self.entries.len() >= self.capacity {
            return Err(MonitoringError::CapacityExceeded {
                region_id: region.id,
                capacity: self.capacity,
            }
            .into());
        }

        let id = region.id.clone();
        let previous = self.entries.insert(
            id,
            RegionEntry {
                region,
                membership: MembershipState::Unknown,
                inert: false,
            },
        );

        Ok(match previous {
            Some(prev) => AddOutcome::Replaced(prev.region),
            None => AddOutcome::Inserted,
        })
    }

    /// Removes a region and its membership state. No-op if absent.
    pub fn remove(&mut self, id: &RegionId) -> Option<Region> {
        self.entries.remove(id).map(|e| e.region)
    }

    /// All regions, in id order.
    #[must_use]
    pub fn list(&self) -> Vec<Region> {
        self.entries.values().map(|e| e.region.clone()).collect()
    }

    /// Looks up a region.
    #[must_use]
    pub fn get(&self, id: &RegionId) -> Option<&Region> {
        self.entries.get(id).map(|e| &e.region)
    }

    /// Membership of the subject relative to `id`.
    #[must_use]
    pub fn membership(&self, id: &RegionId) -> Option<MembershipState> {
        self.entries.get(id).map(|e| e.membership)
    }

    /// Ids of regions the platform reported as unmonitorable.
    #[must_use]
    pub fn inert_regions(&self) -> Vec<RegionId> {
        self.entries
            .iter()
            .filter(|(_, e)| e.inert)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Marks a region inert. Returns true only on the first marking, so callers
    /// can log the failure once.
    pub fn mark_inert(&mut self, id: &RegionId) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) if !entry.inert => {
                entry.inert = true;
                true
            }
            _ => false,
        }
    }

    /// Clears every inert flag, returning the ids that were revived.
    pub fn revive_inert(&mut self) -> Vec<RegionId> {
        let mut revived = Vec::new();
        for (id, entry) in &mut self.entries {
            if entry.inert {
                entry.inert = false;
                revived.push(id.clone());
            }
        }
        revived
    }

    /// Seeds membership from previously emitted crossings.
    ///
    /// Events are applied in order, so the most recent event per region wins.
    /// Events for unknown regions are ignored. Returns the number of regions
    /// whose membership changed.
    pub fn reconcile<'a>(&mut self, events: impl IntoIterator<Item = &'a CrossingEvent>) -> usize {
        let mut latest: BTreeMap<&RegionId, MembershipState> = BTreeMap::new();
        for event in events {
            let state = match event.kind {
                CrossingKind::Enter => MembershipState::Inside,
                CrossingKind::Exit => MembershipState::Outside,
            };
            latest.insert(&event.region_id, state);
        }

        let mut changed = 0;
        for (id, state) in latest {
            if let Some(entry) = self.entries.get_mut(id) {
                if entry.membership != state {
                    entry.membership = state;
                    changed += 1;
                }
            }
        }
        changed
    }

    pub(crate) fn entries_mut(&mut self) -> impl Iterator<Item = &mut RegionEntry> {
        self.entries.values_mut()
    }
}
