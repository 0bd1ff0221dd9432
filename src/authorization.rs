//! Authorization gate.
//!
//! Tracks the permission level granted by the platform and translates level
//! transitions into capability changes the controller acts on. The gate never
//! talks to the platform itself; upgrade requests and unmonitor signals are
//! returned to the caller.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Location permission level granted by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationLevel {
    /// The user has not been asked yet.
    #[default]
    NotDetermined,
    /// Location services are restricted (parental controls, MDM).
    Restricted,
    /// The user refused access.
    Denied,
    /// Access only while the host is in the foreground.
    WhenInUse,
    /// Access at all times, including background wake for region monitoring.
    Always,
}

impl AuthorizationLevel {
    /// Capabilities available at this level.
    #[must_use]
    pub const fn capabilities(self) -> Capabilities {
        match self {
            Self::NotDetermined | Self::Restricted | Self::Denied => Capabilities::NONE,
            Self::WhenInUse => Capabilities {
                foreground_updates: true,
                background_monitoring: false,
            },
            Self::Always => Capabilities {
                foreground_updates: true,
                background_monitoring: true,
            },
        }
    }

    /// Returns true when any form of monitoring is permitted.
    #[must_use]
    pub const fn permits_monitoring(self) -> bool {
        matches!(self, Self::WhenInUse | Self::Always)
    }

    /// Returns true when the user has actively refused or the system forbids access.
    #[must_use]
    pub const fn is_refused(self) -> bool {
        matches!(self, Self::Denied | Self::Restricted)
    }
}

impl fmt::Display for AuthorizationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotDetermined => "not_determined",
            Self::Restricted => "restricted",
            Self::Denied => "denied",
            Self::WhenInUse => "when_in_use",
            Self::Always => "always",
        };
        f.write_str(s)
    }
}

/// Monitoring capabilities derived from an authorization level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Significant-change and foreground location updates.
    pub foreground_updates: bool,
    /// Region boundary monitoring and continuous updates with background wake.
    pub background_monitoring: bool,
}

impl Capabilities {
    /// No capabilities.
    pub const NONE: Self = Self {
        foreground_updates: false,
        background_monitoring: false,
    };
}

/// A single capability gained or lost by an authorization transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityChange {
    /// Foreground (significant-change) updates are now permitted.
    ForegroundGranted,
    /// Foreground updates are no longer permitted.
    ForegroundRevoked,
    /// Background region monitoring and fine-grained updates are now permitted.
    BackgroundGranted,
    /// Background region monitoring has been revoked.
    BackgroundRevoked,
}

/// Follow-up the gate asks the controller to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateSignal {
    /// Ask the platform to upgrade WhenInUse to Always. Approval is not guaranteed.
    RequestAlwaysUpgrade,
    /// Stop tracking: every active region must be unregistered.
    UnmonitorAll,
}

/// Outcome of `AuthorizationGate::update`.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationUpdate {
    pub previous: AuthorizationLevel,
    pub current: AuthorizationLevel,
    pub changes: Vec<CapabilityChange>,
    pub signals: Vec<GateSignal>,
}

impl AuthorizationUpdate {
    /// True when the update changed nothing (a repeated identical level).
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.previous == self.current
    }

    /// True when the update carries the given signal.
    #[must_use]
    pub fn has_signal(&self, signal: GateSignal) -> bool {
        self.signals.contains(&signal)
    }
}

/// Records the current authorization level and diffs transitions.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationGate {
    level: AuthorizationLevel,
}

impl AuthorizationGate {
    /// Creates a gate in `NotDetermined`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a gate seeded with a previously known level (cold restart).
    #[must_use]
    pub const fn with_level(level: AuthorizationLevel) -> Self {
        Self { level }
    }

    /// The current level.
    #[must_use]
    pub const fn current(&self) -> AuthorizationLevel {
        self.level
    }

    /// Records a new level and returns the resulting capability changes.
    ///
    /// Repeated identical updates are no-ops: no changes, no signals.
    pub fn update(&mut self, level: AuthorizationLevel) -> AuthorizationUpdate {
        let previous = self.level;
        self.level = level;

        let mut update = AuthorizationUpdate {
            previous,
            current: level,
            changes: Vec::new(),
            signals: Vec::new(),
        };
        if previous == level {
            return update;
        }

        let before = previous.capabilities();
        let after = level.capabilities();

        match (before.foreground_updates, after.foreground_updates) {
            (false, true) => update.changes.push(CapabilityChange::ForegroundGranted),
            (true, false) => update.changes.push(CapabilityChange::ForegroundRevoked),
            _ => {}
        }
        match (before.background_monitoring, after.background_monitoring) {
            (false, true) => update.changes.push(CapabilityChange::BackgroundGranted),
            (true, false) => update.changes.push(CapabilityChange::BackgroundRevoked),
            _ => {}
        }

        if level == AuthorizationLevel::WhenInUse {
            update.signals.push(GateSignal::RequestAlwaysUpgrade);
        }
        if level.is_refused() {
            update.signals.push(GateSignal::UnmonitorAll);
        }

        update
    }
}
