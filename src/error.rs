//! Error types for the geofence core.
//!
//! All errors are strongly typed using thiserror so hosts can pattern match
//! on the condition and decide how to surface it. Nothing in this crate
//! panics on these paths; every failure degrades monitoring instead.

use thiserror::Error;

use crate::authorization::AuthorizationLevel;
use crate::region::RegionId;
use crate::resumption::PersistenceError;

/// Validation errors that occur during input validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Region identifier cannot be empty")]
    EmptyRegionId,

    #[error("Region radius {value} must be a finite value greater than zero")]
    InvalidRadius {
        value: f64,
    },

    #[error("Coordinate ({latitude}, {longitude}) is out of range")]
    CoordinateOutOfRange {
        latitude: f64,
        longitude: f64,
    },

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },
}

/// Monitoring errors raised by the controller and its runtime.
#[derive(Debug, Error)]
pub enum MonitoringError {
    #[error("Authorization level {level} is insufficient for monitoring")]
    AuthorizationInsufficient {
        level: AuthorizationLevel,
    },

    #[error("Region '{region_id}' rejected: capacity of {capacity} monitored regions reached")]
    CapacityExceeded {
        region_id: RegionId,
        capacity: usize,
    },

    #[error("Region '{region_id}' cannot be monitored: {reason}")]
    RegionMonitoringUnavailable {
        region_id: RegionId,
        reason: String,
    },

    #[error("Geofencing is unavailable on this platform: {reason}")]
    GeofencingUnavailable {
        reason: String,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Queue full: {path}")]
    QueueFull {
        path: String,
    },
}

/// Top-level error type for the geofence core.
#[derive(Debug, Error)]
pub enum GeofenceError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Monitoring error: {0}")]
    Monitoring(#[from] MonitoringError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl GeofenceError {
    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a monitoring error.
    #[must_use]
    pub const fn is_monitoring(&self) -> bool {
        matches!(self, Self::Monitoring(_))
    }

    /// Returns true if the rejected region was refused for capacity reasons.
    #[must_use]
    pub const fn is_capacity_exceeded(&self) -> bool {
        matches!(self, Self::Monitoring(MonitoringError::CapacityExceeded { .. }))
    }

    /// Returns true if the host can recover by changing input or waiting for
    /// the next authorization cycle.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::Validation(_) => true,
            Self::Monitoring(e) => !matches!(
                e,
                MonitoringError::GeofencingUnavailable { .. } | MonitoringError::Disconnected { .. }
            ),
            Self::Persistence(_) => true,
        }
    }
}

/// Result type alias for geofence operations.
pub type GeofenceResult<T> = Result<T, GeofenceError>;
