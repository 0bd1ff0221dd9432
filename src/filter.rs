//! Location sample filtering.
//!
//! Raw samples from the location provider are noisy: fixes arrive out of
//! order, with poor accuracy, or jitter a few meters around a stationary
//! device. The filter forwards only samples likely to indicate real movement.
//! Rejection is a filter decision, not an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ValidationError;
use crate::geo::Coordinate;

/// A timestamped position fix from the location provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    /// Reported position.
    pub coordinate: Coordinate,
    /// Radius of uncertainty in meters. Negative means the fix is invalid.
    pub horizontal_accuracy_meters: f64,
    /// When the fix was taken.
    pub timestamp: DateTime<Utc>,
}

impl PositionSample {
    #[allow(missing_docs)]
    #[must_use]
    pub const fn new(coordinate: Coordinate, horizontal_accuracy_meters: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            coordinate,
            horizontal_accuracy_meters,
            timestamp,
        }
    }

    /// Invalid when accuracy is negative or non-finite, or the coordinate is
    /// out of range or the `(0, 0)` no-fix sentinel.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.horizontal_accuracy_meters.is_finite()
            && self.horizontal_accuracy_meters >= 0.0
            && self.coordinate.is_valid()
            && !self.coordinate.is_null_island()
    }
}

/// Filter thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Samples with a worse accuracy are dropped.
    pub max_horizontal_accuracy_meters: f64,
    /// Samples closer than this to the last accepted one are treated as jitter.
    pub min_movement_meters: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_horizontal_accuracy_meters: 100.0,
            min_movement_meters: 10.0,
        }
    }
}

impl FilterConfig {
    /// Checks threshold sanity.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` for non-finite or non-positive
    /// accuracy, or a negative minimum movement.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.max_horizontal_accuracy_meters.is_finite() || self.max_horizontal_accuracy_meters <= 0.0 {
            return Err(ValidationError::InvalidConfig {
                field: "filter.max_horizontal_accuracy_meters".to_string(),
                reason: "must be a finite value greater than zero".to_string(),
            });
        }
        if !self.min_movement_meters.is_finite() || self.min_movement_meters < 0.0 {
            return Err(ValidationError::InvalidConfig {
                field: "filter.min_movement_meters".to_string(),
                reason: "must be a finite, non-negative value".to_string(),
            });
        }
        Ok(())
    }
}

/// Why a sample was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// Negative accuracy or sentinel coordinate.
    Invalid,
    /// Accuracy worse than the configured threshold.
    LowAccuracy,
    /// Timestamp not newer than the last accepted sample.
    Stale,
    /// Movement below the jitter threshold.
    Jitter,
}

/// Outcome of evaluating a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    #[allow(missing_docs)]
    Accepted,
    #[allow(missing_docs)]
    Rejected(RejectReason),
}

impl FilterDecision {
    #[allow(missing_docs)]
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Stateful per-subject sample filter.
#[derive(Debug, Clone, Default)]
pub struct LocationFilter {
    cfg: FilterConfig,
    last_accepted: Option<PositionSample>,
}

impl LocationFilter {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new(cfg: FilterConfig) -> Self {
        Self {
            cfg,
            last_accepted: None,
        }
    }

    /// Returns true when the sample should be forwarded to crossing detection.
    pub fn accept(&mut self, sample: &PositionSample) -> bool {
        self.evaluate(sample).is_accepted()
    }

    /// Like `accept`, but reports why a sample was dropped.
    ///
    /// Validity and accuracy apply to every sample. The first acceptable
    /// sample skips the staleness and movement checks since there is nothing
    /// to compare against.
    pub fn evaluate(&mut self, sample: &PositionSample) -> FilterDecision {
        let decision = self.decide(sample);
        match decision {
            FilterDecision::Accepted => self.last_accepted = Some(*sample),
            FilterDecision::Rejected(reason) => {
                debug!(
                    ?reason,
                    accuracy = sample.horizontal_accuracy_meters,
                    timestamp = %sample.timestamp,
                    "location sample dropped"
                );
            }
        }
        decision
    }

    fn decide(&self, sample: &PositionSample) -> FilterDecision {
        if !sample.is_valid() {
            return FilterDecision::Rejected(RejectReason::Invalid);
        }
        if sample.horizontal_accuracy_meters > self.cfg.max_horizontal_accuracy_meters {
            return FilterDecision::Rejected(RejectReason::LowAccuracy);
        }

        let Some(last) = self.last_accepted.as_ref() else {
            return FilterDecision::Accepted;
        };

        if sample.timestamp <= last.timestamp {
            return FilterDecision::Rejected(RejectReason::Stale);
        }
        if last.coordinate.distance_to(&sample.coordinate) < self.cfg.min_movement_meters {
            return FilterDecision::Rejected(RejectReason::Jitter);
        }

        FilterDecision::Accepted
    }

    /// Forgets the last accepted sample. Called when monitoring restarts.
    pub fn reset(&mut self) {
        self.last_accepted = None;
    }

    /// The most recently accepted sample, if any.
    #[must_use]
    pub const fn last_accepted(&self) -> Option<&PositionSample> {
        self.last_accepted.as_ref()
    }
}
