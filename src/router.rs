//! Event routing.
//!
//! Fans crossing events out to the map surface, the notification channel and
//! the bounded resumption log. Delivery is best-effort: collaborator failures
//! are logged and counted, never propagated and never retried.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::collaborators::{MapSurface, NotificationSink};
use crate::detector::{CrossingEvent, CrossingKind};
use crate::error::ValidationError;

/// Upper bound on the notification lead time, in seconds (one day).
pub const MAX_NOTIFICATION_DELAY_SECS: f64 = 86_400.0;
use crate::region::Region;

/// Router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Lead time before a crossing notification fires.
    pub notification_delay_secs: f64,
    /// Number of recent crossings retained for restart reconciliation.
    pub resumption_log_capacity: usize,
    /// Annotation label for entries.
    pub enter_label: String,
    /// Annotation label for exits.
    pub exit_label: String,
    /// Notification body for entries. `{region}` is replaced by the region id.
    pub enter_message: String,
    /// Notification body for exits. `{region}` is replaced by the region id.
    pub exit_message: String,
    /// Notification body for failures reported while suspended. `{reason}` is replaced.
    pub failure_message: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            notification_delay_secs: 2.0,
            resumption_log_capacity: 32,
            enter_label: "started".to_string(),
            exit_label: "end".to_string(),
            enter_message: "Entered geofence {region}".to_string(),
            exit_message: "Left geofence {region}".to_string(),
            failure_message: "Location monitoring failed while suspended: {reason}".to_string(),
        }
    }
}

impl RouterConfig {
    /// Checks delay and capacity.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` for a negative or non-finite
    /// delay, or a zero log capacity.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(0.0..=MAX_NOTIFICATION_DELAY_SECS).contains(&self.notification_delay_secs) {
            return Err(ValidationError::InvalidConfig {
                field: "router.notification_delay_secs".to_string(),
                reason: format!("must be between 0 and {MAX_NOTIFICATION_DELAY_SECS} seconds"),
            });
        }
        if self.resumption_log_capacity == 0 {
            return Err(ValidationError::InvalidConfig {
                field: "router.resumption_log_capacity".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Lead time as a `Duration`. Out-of-range values (configs that skipped
    /// `validate`) are clamped instead of panicking.
    fn delay(&self) -> Duration {
        let secs = self.notification_delay_secs.min(MAX_NOTIFICATION_DELAY_SECS);
        Duration::try_from_secs_f64(secs).unwrap_or_else(|e| {
            warn!(delay_secs = self.notification_delay_secs, error = %e, "invalid notification delay; using zero");
            Duration::ZERO
        })
    }
}

/// Bounded most-recent-N crossing log.
#[derive(Debug, Clone)]
pub struct ResumptionLog {
    capacity: usize,
    events: VecDeque<CrossingEvent>,
}

impl ResumptionLog {
    /// Creates an empty log. A zero capacity is raised to 1.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
        }
    }

    /// Appends an event, evicting the oldest when full. Events already present
    /// (same id) are ignored.
    pub fn push(&mut self, event: CrossingEvent) {
        if self.events.iter().any(|e| e.id == event.id) {
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &CrossingEvent> {
        self.events.iter()
    }

    /// Oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<CrossingEvent> {
        self.events.iter().cloned().collect()
    }
}

/// What reached the collaborators for one dispatched event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// The map surface accepted the annotation.
    pub annotated: bool,
    /// The notification channel accepted the notification.
    pub notified: bool,
}

/// Routes crossing and failure events to the outside world.
pub struct EventRouter {
    cfg: RouterConfig,
    notifications: Box<dyn NotificationSink>,
    map: Box<dyn MapSurface>,
    log: ResumptionLog,
    dispatched: u64,
    delivery_failures: u64,
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("cfg", &self.cfg)
            .field("log_len", &self.log.len())
            .field("dispatched", &self.dispatched)
            .field("delivery_failures", &self.delivery_failures)
            .finish_non_exhaustive()
    }
}

impl EventRouter {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new(cfg: RouterConfig, notifications: Box<dyn NotificationSink>, map: Box<dyn MapSurface>) -> Self {
        let log = ResumptionLog::new(cfg.resumption_log_capacity);
        Self {
            cfg,
            notifications,
            map,
            log,
            dispatched: 0,
            delivery_failures: 0,
        }
    }

    /// Delivers one crossing event.
    ///
    /// `degraded` is true while the host is suspended; the notification is
    /// then scheduled as repeating, which serves as a delivery heartbeat.
    pub fn dispatch(&mut self, event: CrossingEvent, degraded: bool) -> DispatchReport {
        let (label, template) = match event.kind {
            CrossingKind::Enter => (&self.cfg.enter_label, &self.cfg.enter_message),
            CrossingKind::Exit => (&self.cfg.exit_label, &self.cfg.exit_message),
        };
        let message = template.replace("{region}", event.region_id.as_str());

        let annotated = match self.map.place_annotation(event.at_coordinate, label) {
            Ok(()) => true,
            Err(e) => {
                self.delivery_failures += 1;
                warn!(region_id = %event.region_id, error = %e, "annotation delivery failed");
                false
            }
        };

        let notified = match self.notifications.schedule(&message, self.cfg.delay(), degraded) {
            Ok(ack) => {
                debug!(region_id = %event.region_id, request_id = %ack.request_id, "notification scheduled");
                true
            }
            Err(e) => {
                self.delivery_failures += 1;
                warn!(region_id = %event.region_id, error = %e, "notification delivery failed");
                false
            }
        };

        self.log.push(event);
        self.dispatched += 1;

        DispatchReport { annotated, notified }
    }

    /// Asks the map to draw a newly registered region.
    pub fn draw_region(&mut self, region: &Region) {
        if let Err(e) = self.map.draw_region(region.center, region.radius_meters) {
            self.delivery_failures += 1;
            warn!(region_id = %region.id, error = %e, "region overlay delivery failed");
        }
    }

    /// Reports a monitoring failure through the notification channel.
    ///
    /// Returns true when the channel accepted the notification.
    pub fn report_failure(&mut self, reason: &str, repeat: bool) -> bool {
        let message = self.cfg.failure_message.replace("{reason}", reason);
        match self.notifications.schedule(&message, self.cfg.delay(), repeat) {
            Ok(_) => true,
            Err(e) => {
                self.delivery_failures += 1;
                warn!(error = %e, "failure notification delivery failed");
                false
            }
        }
    }

    /// Re-seeds the log from a persisted snapshot (oldest first).
    pub fn seed_log(&mut self, events: impl IntoIterator<Item = CrossingEvent>) {
        for event in events {
            self.log.push(event);
        }
    }

    /// The resumption log.
    #[must_use]
    pub const fn log(&self) -> &ResumptionLog {
        &self.log
    }

    /// Number of crossing events dispatched.
    #[must_use]
    pub const fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Number of collaborator calls that failed.
    #[must_use]
    pub const fn delivery_failures(&self) -> u64 {
        self.delivery_failures
    }
}
