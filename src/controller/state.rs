//! Controller state, input events and status snapshot types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::authorization::AuthorizationLevel;
use crate::filter::PositionSample;
use crate::region::RegionId;

/// Location update mode requested from the provider. Exactly one is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitoringMode {
    /// No updates requested.
    #[default]
    Idle,
    /// Low-power, coarse updates. Also the wake mechanism after termination.
    SignificantChangesOnly,
    /// Continuous updates plus platform boundary monitoring of every region.
    FineGrained,
}

impl MonitoringMode {
    /// Best mode an authorization level allows.
    #[must_use]
    pub const fn for_level(level: AuthorizationLevel) -> Self {
        match level {
            AuthorizationLevel::Always => Self::FineGrained,
            AuthorizationLevel::WhenInUse => Self::SignificantChangesOnly,
            AuthorizationLevel::NotDetermined | AuthorizationLevel::Restricted | AuthorizationLevel::Denied => {
                Self::Idle
            }
        }
    }
}

impl fmt::Display for MonitoringMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::SignificantChangesOnly => "significant_changes_only",
            Self::FineGrained => "fine_grained",
        })
    }
}

/// Controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "mode", rename_all = "snake_case")]
pub enum ControllerState {
    /// Constructed, `start` not yet called.
    #[default]
    Unstarted,
    /// Waiting for a level that permits monitoring.
    AwaitingAuthorization,
    /// Actively monitoring in the given mode.
    Monitoring(MonitoringMode),
    /// Host is terminating; significant changes keep the process wakeable.
    Suspended,
    /// Geofencing is permanently unavailable. No further monitoring actions.
    Terminated,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unstarted => f.write_str("unstarted"),
            Self::AwaitingAuthorization => f.write_str("awaiting_authorization"),
            Self::Monitoring(mode) => write!(f, "monitoring({mode})"),
            Self::Suspended => f.write_str("suspended"),
            Self::Terminated => f.write_str("terminated"),
        }
    }
}

/// Input to the controller's serialized event loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerEvent {
    /// A raw position fix.
    SampleReceived {
        #[allow(missing_docs)]
        sample: PositionSample,
    },
    /// The platform reported a new authorization level.
    AuthorizationChanged {
        #[allow(missing_docs)]
        level: AuthorizationLevel,
    },
    /// The platform cannot monitor a specific region.
    RegionMonitoringFailed {
        #[allow(missing_docs)]
        region_id: RegionId,
        #[allow(missing_docs)]
        reason: String,
    },
    /// General location delivery failure.
    LocationUpdatesFailed {
        #[allow(missing_docs)]
        reason: String,
    },
    /// The host process is about to terminate.
    HostTerminating,
    /// The host process was relaunched (typically by a significant change).
    Relaunched,
    /// Region monitoring is permanently unavailable on this device.
    GeofencingUnavailable {
        #[allow(missing_docs)]
        reason: String,
    },
}

impl ControllerEvent {
    /// Short name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SampleReceived { .. } => "sample_received",
            Self::AuthorizationChanged { .. } => "authorization_changed",
            Self::RegionMonitoringFailed { .. } => "region_monitoring_failed",
            Self::LocationUpdatesFailed { .. } => "location_updates_failed",
            Self::HostTerminating => "host_terminating",
            Self::Relaunched => "relaunched",
            Self::GeofencingUnavailable { .. } => "geofencing_unavailable",
        }
    }
}

/// Point-in-time view of the controller.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerStatus {
    pub state: ControllerState,
    pub mode: MonitoringMode,
    pub authorization: AuthorizationLevel,
    pub region_count: usize,
    pub inert_regions: Vec<RegionId>,
    pub registered_regions: Vec<RegionId>,
    pub dispatched_events: u64,
    pub delivery_failures: u64,
}
