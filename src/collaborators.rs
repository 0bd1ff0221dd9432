//! External collaborator contracts.
//!
//! The core never touches platform APIs directly. The location provider, the
//! notification channel and the map surface are reached through these narrow
//! traits, which lets the controller run on its own worker thread and lets
//! tests substitute recording implementations.
//!
//! Calls are fire-and-forget from the controller's point of view: it does not
//! block on completion and never retries a failed delivery.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;

use crate::geo::Coordinate;
use crate::region::{Region, RegionId};

/// Permission the controller asks the platform for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthorizationRequest {
    /// Foreground access.
    WhenInUse,
    /// Upgrade to background access.
    Always,
}

/// Location sensing collaborator.
///
/// Samples, authorization changes and monitoring failures flow the other way,
/// as `ControllerEvent`s submitted to the runtime.
pub trait LocationProvider: Send {
    /// Ask the platform for a permission level. Approval arrives later as an
    /// authorization change, or never.
    fn request_authorization(&self, request: AuthorizationRequest);

    /// Begin continuous fine-grained updates with background delivery.
    fn start_fine(&self);

    /// Switch to low-power significant-change updates only.
    fn start_significant_only(&self);

    /// Halt all location updates.
    fn stop(&self);

    /// Begin platform boundary monitoring for a region.
    fn register_region(&self, region: &Region);

    /// End platform boundary monitoring for a region.
    fn unregister_region(&self, id: &RegionId);
}

/// Acknowledgement from the notification channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// Channel-assigned request identifier.
    pub request_id: String,
}

/// Failure reported by a delivery collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The collaborator refused the request (permissions, invalid content).
    #[error("delivery rejected: {reason}")]
    Rejected {
        reason: String,
    },

    /// The collaborator is not currently reachable.
    #[error("delivery channel unavailable: {reason}")]
    Unavailable {
        reason: String,
    },
}

/// Local notification channel.
pub trait NotificationSink: Send {
    /// Schedule a local notification after `delay`. `repeat` re-fires it on the
    /// same interval until cancelled by the host.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError` when the channel refuses the request.
    fn schedule(&self, message: &str, delay: Duration, repeat: bool) -> Result<Ack, DeliveryError>;
}

/// Map/annotation surface.
pub trait MapSurface: Send {
    /// Drop a labelled pin at `coordinate`.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError` when the surface cannot accept the annotation.
    fn place_annotation(&self, coordinate: Coordinate, label: &str) -> Result<(), DeliveryError>;

    /// Draw a region outline.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError` when the surface cannot accept the overlay.
    fn draw_region(&self, center: Coordinate, radius_meters: f64) -> Result<(), DeliveryError>;
}

/// Bundle of collaborators handed to the controller.
pub struct Collaborators {
    #[allow(missing_docs)]
    pub location: Box<dyn LocationProvider>,
    #[allow(missing_docs)]
    pub notifications: Box<dyn NotificationSink>,
    #[allow(missing_docs)]
    pub map: Box<dyn MapSurface>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Command issued to a location provider.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCommand {
    RequestAuthorization(AuthorizationRequest),
    StartFine,
    StartSignificantOnly,
    Stop,
    Register(RegionId),
    Unregister(RegionId),
}

/// Location provider that records every command.
///
/// Clones share the same log, so a test can keep one handle and give the
/// other to the controller.
#[derive(Debug, Clone, Default)]
pub struct RecordingLocationProvider {
    commands: Arc<Mutex<Vec<ProviderCommand>>>,
}

impl RecordingLocationProvider {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command issued so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<ProviderCommand> {
        lock(&self.commands).clone()
    }

    /// Forget recorded commands.
    pub fn clear(&self) {
        lock(&self.commands).clear();
    }

    /// Regions currently registered, replaying register/unregister commands.
    #[must_use]
    pub fn registered(&self) -> Vec<RegionId> {
        let mut out: Vec<RegionId> = Vec::new();
        for cmd in lock(&self.commands).iter() {
            match cmd {
                ProviderCommand::Register(id) => {
                    if !out.contains(id) {
                        out.push(id.clone());
                    }
                }
                ProviderCommand::Unregister(id) => out.retain(|r| r != id),
                _ => {}
            }
        }
        out.sort();
        out
    }

    fn push(&self, cmd: ProviderCommand) {
        lock(&self.commands).push(cmd);
    }
}

impl LocationProvider for RecordingLocationProvider {
    fn request_authorization(&self, request: AuthorizationRequest) {
        self.push(ProviderCommand::RequestAuthorization(request));
    }

    fn start_fine(&self) {
        self.push(ProviderCommand::StartFine);
    }

    fn start_significant_only(&self) {
        self.push(ProviderCommand::StartSignificantOnly);
    }

    fn stop(&self) {
        self.push(ProviderCommand::Stop);
    }

    fn register_region(&self, region: &Region) {
        self.push(ProviderCommand::Register(region.id.clone()));
    }

    fn unregister_region(&self, id: &RegionId) {
        self.push(ProviderCommand::Unregister(id.clone()));
    }
}

/// A notification accepted by `RecordingNotifier`.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledNotification {
    pub message: String,
    pub delay: Duration,
    pub repeat: bool,
}

#[derive(Debug, Default)]
struct NotifierState {
    scheduled: Vec<ScheduledNotification>,
    failing: Option<DeliveryError>,
    attempts: usize,
}

/// Notification sink that records scheduled notifications and can be told to fail.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    state: Arc<Mutex<NotifierState>>,
}

impl RecordingNotifier {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Successfully scheduled notifications.
    #[must_use]
    pub fn scheduled(&self) -> Vec<ScheduledNotification> {
        lock(&self.state).scheduled.clone()
    }

    /// Number of `schedule` calls, including failed ones.
    #[must_use]
    pub fn attempts(&self) -> usize {
        lock(&self.state).attempts
    }

    /// Make every subsequent call fail with `error` (or succeed again with `None`).
    pub fn set_failing(&self, error: Option<DeliveryError>) {
        lock(&self.state).failing = error;
    }
}

impl NotificationSink for RecordingNotifier {
    fn schedule(&self, message: &str, delay: Duration, repeat: bool) -> Result<Ack, DeliveryError> {
        let mut state = lock(&self.state);
        state.attempts += 1;
        if let Some(err) = state.failing.clone() {
            return Err(err);
        }
        state.scheduled.push(ScheduledNotification {
            message: message.to_string(),
            delay,
            repeat,
        });
        Ok(Ack {
            request_id: format!("notification-{}", state.scheduled.len()),
        })
    }
}

/// Map call recorded by `RecordingMap`.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum MapCall {
    Annotation { coordinate: Coordinate, label: String },
    Region { center: Coordinate, radius_meters: f64 },
}

#[derive(Debug, Default)]
struct MapState {
    calls: Vec<MapCall>,
    failing: Option<DeliveryError>,
}

/// Map surface that records annotations and region overlays.
#[derive(Debug, Clone, Default)]
pub struct RecordingMap {
    state: Arc<Mutex<MapState>>,
}

impl RecordingMap {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every successful call, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<MapCall> {
        lock(&self.state).calls.clone()
    }

    /// Labels of placed annotations, in order.
    #[must_use]
    pub fn annotation_labels(&self) -> Vec<String> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|c| match c {
                MapCall::Annotation { label, .. } => Some(label.clone()),
                MapCall::Region { .. } => None,
            })
            .collect()
    }

    /// Make every subsequent call fail with `error` (or succeed again with `None`).
    pub fn set_failing(&self, error: Option<DeliveryError>) {
        lock(&self.state).failing = error;
    }

    fn record(&self, call: MapCall) -> Result<(), DeliveryError> {
        let mut state = lock(&self.state);
        if let Some(err) = state.failing.clone() {
            return Err(err);
        }
        state.calls.push(call);
        Ok(())
    }
}

impl MapSurface for RecordingMap {
    fn place_annotation(&self, coordinate: Coordinate, label: &str) -> Result<(), DeliveryError> {
        self.record(MapCall::Annotation {
            coordinate,
            label: label.to_string(),
        })
    }

    fn draw_region(&self, center: Coordinate, radius_meters: f64) -> Result<(), DeliveryError> {
        self.record(MapCall::Region { center, radius_meters })
    }
}
