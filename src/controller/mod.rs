//! Monitoring controller.
//!
//! The controller is the single owner of all mutable monitoring state. It is
//! driven one `ControllerEvent` at a time, either directly (embedded use,
//! tests) or from the runtime's worker thread.
//!
//! # State machine
//!
//! ```text
//! Unstarted ──start──▶ AwaitingAuthorization ──WhenInUse──▶ Monitoring(SignificantChangesOnly)
//!                             ▲    │                                 │ Always
//!                             │    └──────────Always──────────┐      ▼
//!                  Denied/    │                               └─▶ Monitoring(FineGrained)
//!                  Restricted └────────── Monitoring(*) ◀─────────────┘
//!
//! Monitoring(*) ──HostTerminating──▶ Suspended ──Relaunched──▶ Monitoring(mode for level)
//! any ──GeofencingUnavailable──▶ Terminated
//! ```

mod state;

pub use state::{ControllerEvent, ControllerState, ControllerStatus, MonitoringMode};

use std::collections::BTreeSet;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::authorization::{AuthorizationGate, AuthorizationLevel, CapabilityChange, GateSignal};
use crate::collaborators::{AuthorizationRequest, Collaborators, LocationProvider};
use crate::config::MonitorConfig;
use crate::detector::{CrossingDetector, CrossingEvent};
use crate::error::{GeofenceResult, MonitoringError};
use crate::filter::{LocationFilter, PositionSample};
use crate::region::{AddOutcome, Region, RegionId, RegionStore};
use crate::resumption::{ResumptionSnapshot, ResumptionStore};
use crate::router::{EventRouter, ResumptionLog};

/// Orchestrates authorization, filtering, detection and routing.
pub struct MonitoringController {
    state: ControllerState,
    gate: AuthorizationGate,
    regions: RegionStore,
    filter: LocationFilter,
    detector: CrossingDetector,
    router: EventRouter,
    location: Box<dyn LocationProvider>,
    resumption: Box<dyn ResumptionStore>,
    /// Regions currently registered with the location provider.
    registered: BTreeSet<RegionId>,
}

impl std::fmt::Debug for MonitoringController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoringController")
            .field("state", &self.state)
            .field("authorization", &self.gate.current())
            .field("regions", &self.regions.len())
            .field("registered", &self.registered)
            .finish_non_exhaustive()
    }
}

impl MonitoringController {
    /// Creates an unstarted controller.
    #[must_use]
    pub fn new(cfg: &MonitorConfig, collaborators: Collaborators, resumption: Box<dyn ResumptionStore>) -> Self {
        let Collaborators {
            location,
            notifications,
            map,
        } = collaborators;

        Self {
            state: ControllerState::Unstarted,
            gate: AuthorizationGate::new(),
            regions: RegionStore::new(&cfg.regions),
            filter: LocationFilter::new(cfg.filter.clone()),
            detector: CrossingDetector::new(),
            router: EventRouter::new(cfg.router.clone(), notifications, map),
            location,
            resumption,
            registered: BTreeSet::new(),
        }
    }

    /// Like `new`, but rejects an invalid configuration up front.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` for the first invalid section.
    pub fn try_new(
        cfg: &MonitorConfig,
        collaborators: Collaborators,
        resumption: Box<dyn ResumptionStore>,
    ) -> GeofenceResult<Self> {
        cfg.validate()?;
        Ok(Self::new(cfg, collaborators, resumption))
    }

    /// Leaves `Unstarted`.
    ///
    /// Restores regions and recent crossings from the resumption store. If the
    /// last known authorization still permits monitoring, monitoring resumes
    /// directly in the matching mode; otherwise the controller waits for
    /// authorization and asks for WhenInUse. Calling `start` twice is a no-op.
    pub fn start(&mut self) -> ControllerState {
        if self.state != ControllerState::Unstarted {
            return self.state;
        }

        let restored_level = self.restore();
        let level = if self.gate.current().permits_monitoring() {
            self.gate.current()
        } else {
            restored_level.unwrap_or(self.gate.current())
        };

        if level.permits_monitoring() {
            self.gate = AuthorizationGate::with_level(level);
            info!(level = %level, "resuming monitoring with prior authorization");
            self.filter.reset();
            self.enter_mode(MonitoringMode::for_level(level));
            if level == AuthorizationLevel::WhenInUse {
                // The platform repeats the same level after a restart, which the
                // gate treats as a no-op, so the upgrade is requested here.
                self.location.request_authorization(AuthorizationRequest::Always);
            }
        } else {
            self.state = ControllerState::AwaitingAuthorization;
            self.location.request_authorization(AuthorizationRequest::WhenInUse);
            info!("awaiting location authorization");
        }

        self.persist();
        self.state
    }

    fn restore(&mut self) -> Option<AuthorizationLevel> {
        let snapshot = match self.resumption.load() {
            Ok(Some(s)) => s,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "resumption snapshot unreadable; starting fresh");
                return None;
            }
        };

        for region in snapshot.regions {
            let id = region.id.clone();
            if let Err(e) = self.regions.add(region) {
                warn!(region_id = %id, error = %e, "could not restore region");
            }
        }
        let reconciled = self.regions.reconcile(&snapshot.events);
        self.router.seed_log(snapshot.events);

        info!(
            regions = self.regions.len(),
            reconciled,
            mode = %snapshot.mode,
            level = %snapshot.authorization,
            "resumption snapshot restored"
        );
        Some(snapshot.authorization)
    }

    /// Processes one event. Returns the crossings dispatched as a result.
    pub fn handle(&mut self, event: ControllerEvent) -> Vec<CrossingEvent> {
        if self.state == ControllerState::Terminated {
            debug!(event = event.name(), "controller terminated; event ignored");
            return Vec::new();
        }

        match event {
            ControllerEvent::SampleReceived { sample } => return self.on_sample(&sample),
            ControllerEvent::AuthorizationChanged { level } => self.on_authorization(level),
            ControllerEvent::RegionMonitoringFailed { region_id, reason } => {
                self.on_region_failed(&region_id, &reason);
            }
            ControllerEvent::LocationUpdatesFailed { reason } => self.on_location_failed(&reason),
            ControllerEvent::HostTerminating => self.on_host_terminating(),
            ControllerEvent::Relaunched => self.on_relaunched(),
            ControllerEvent::GeofencingUnavailable { reason } => self.on_geofencing_unavailable(&reason),
        }
        Vec::new()
    }

    /// Registers or replaces a region.
    ///
    /// # Errors
    ///
    /// - `CapacityExceeded` when the store is full (the region is not added).
    /// - `ValidationError` when the region is malformed.
    /// - `GeofencingUnavailable` once the controller has terminated.
    pub fn add_region(&mut self, region: Region) -> GeofenceResult<AddOutcome> {
        if self.state == ControllerState::Terminated {
            return Err(MonitoringError::GeofencingUnavailable {
                reason: "controller terminated".to_string(),
            }
            .into());
        }

        let id = region.id.clone();
        let outcome = self.regions.add(region).map_err(|e| {
            warn!(region_id = %id, error = %e, "region rejected");
            e
        })?;

        if let Some(region) = self.regions.get(&id).cloned() {
            self.router.draw_region(&region);
            if self.mode() == MonitoringMode::FineGrained {
                if self.registered.remove(&id) {
                    self.location.unregister_region(&id);
                }
                self.location.register_region(&region);
                self.registered.insert(id.clone());
            }
        }

        info!(region_id = %id, replaced = matches!(outcome, AddOutcome::Replaced(_)), "region added");
        self.persist();
        Ok(outcome)
    }

    /// Removes a region and its membership state. No-op if absent.
    pub fn remove_region(&mut self, id: &RegionId) -> Option<Region> {
        let removed = self.regions.remove(id)?;
        if self.registered.remove(id) {
            self.location.unregister_region(id);
        }
        info!(region_id = %id, "region removed");
        self.persist();
        Some(removed)
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn state(&self) -> ControllerState {
        self.state
    }

    /// Active monitoring mode.
    #[must_use]
    pub const fn mode(&self) -> MonitoringMode {
        match self.state {
            ControllerState::Monitoring(mode) => mode,
            ControllerState::Suspended => MonitoringMode::SignificantChangesOnly,
            ControllerState::Unstarted | ControllerState::AwaitingAuthorization | ControllerState::Terminated => {
                MonitoringMode::Idle
            }
        }
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn authorization(&self) -> AuthorizationLevel {
        self.gate.current()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn regions(&self) -> &RegionStore {
        &self.regions
    }

    /// Recent crossings retained for restart reconciliation.
    #[must_use]
    pub const fn resumption_log(&self) -> &ResumptionLog {
        self.router.log()
    }

    /// Regions currently registered with the location provider.
    #[must_use]
    pub fn registered_regions(&self) -> Vec<RegionId> {
        self.registered.iter().cloned().collect()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            state: self.state,
            mode: self.mode(),
            authorization: self.gate.current(),
            region_count: self.regions.len(),
            inert_regions: self.regions.inert_regions(),
            registered_regions: self.registered_regions(),
            dispatched_events: self.router.dispatched(),
            delivery_failures: self.router.delivery_failures(),
        }
    }

    fn on_sample(&mut self, sample: &PositionSample) -> Vec<CrossingEvent> {
        let degraded = match self.state {
            ControllerState::Monitoring(_) => false,
            ControllerState::Suspended => true,
            _ => {
                debug!(state = %self.state, "sample ignored while not monitoring");
                return Vec::new();
            }
        };

        if !self.filter.accept(sample) {
            return Vec::new();
        }

        let events = self.detector.evaluate(sample, &mut self.regions);
        for event in &events {
            info!(region_id = %event.region_id, kind = %event.kind, degraded, "crossing dispatched");
            self.router.dispatch(event.clone(), degraded);
        }
        if !events.is_empty() {
            self.persist();
        }
        events
    }

    fn on_authorization(&mut self, level: AuthorizationLevel) {
        let update = self.gate.update(level);
        if update.is_noop() {
            debug!(level = %level, "authorization unchanged");
            return;
        }
        info!(previous = %update.previous, current = %update.current, changes = ?update.changes, "authorization changed");

        // A new authorization cycle gives previously failed regions another chance.
        self.revive_inert();

        if update.has_signal(GateSignal::RequestAlwaysUpgrade) {
            self.location.request_authorization(AuthorizationRequest::Always);
        }

        match self.state {
            ControllerState::Unstarted | ControllerState::Terminated => {}
            ControllerState::AwaitingAuthorization | ControllerState::Monitoring(_) => {
                let target = MonitoringMode::for_level(level);
                if target == MonitoringMode::Idle || update.has_signal(GateSignal::UnmonitorAll) {
                    let err = MonitoringError::AuthorizationInsufficient { level };
                    warn!(error = %err, "monitoring paused");
                    self.stop_all();
                    self.state = ControllerState::AwaitingAuthorization;
                } else if self.state == ControllerState::Monitoring(target) {
                    if target == MonitoringMode::FineGrained {
                        self.register_missing();
                    }
                } else {
                    self.enter_mode(target);
                }
            }
            ControllerState::Suspended => {
                if !level.permits_monitoring() {
                    let err = MonitoringError::AuthorizationInsufficient { level };
                    warn!(error = %err, "monitoring paused while suspended");
                    self.stop_all();
                    self.state = ControllerState::AwaitingAuthorization;
                } else if update.changes.contains(&CapabilityChange::BackgroundRevoked) {
                    // Boundary monitoring needs background access; keep only the
                    // significant-change wake mechanism.
                    info!(level = %level, "background access revoked while suspended");
                    self.unregister_all();
                    self.location.start_significant_only();
                }
            }
        }

        self.persist();
    }

    fn on_region_failed(&mut self, id: &RegionId, reason: &str) {
        if !self.regions.contains(id) {
            debug!(region_id = %id, reason, "monitoring failure for unknown region ignored");
            return;
        }
        if self.regions.mark_inert(id) {
            let err = MonitoringError::RegionMonitoringUnavailable {
                region_id: id.clone(),
                reason: reason.to_string(),
            };
            warn!(error = %err, "region left registered but inert until next authorization cycle");
        }
    }

    fn on_location_failed(&mut self, reason: &str) {
        if self.state == ControllerState::Suspended {
            warn!(reason, "location updates failed while suspended");
            self.router.report_failure(reason, true);
        } else {
            warn!(reason, state = %self.state, "location updates failed");
        }
    }

    fn on_host_terminating(&mut self) {
        let ControllerState::Monitoring(mode) = self.state else {
            debug!(state = %self.state, "host terminating while not monitoring");
            return;
        };

        self.location.start_significant_only();
        self.state = ControllerState::Suspended;
        info!(previous_mode = %mode, "host terminating; significant changes keep monitoring wakeable");
        self.persist();
    }

    fn on_relaunched(&mut self) {
        if self.state != ControllerState::Suspended {
            debug!(state = %self.state, "relaunch while not suspended");
            return;
        }

        self.filter.reset();
        self.revive_inert();

        let target = MonitoringMode::for_level(self.gate.current());
        info!(mode = %target, "relaunched; resuming monitoring");
        if target == MonitoringMode::Idle {
            self.stop_all();
            self.state = ControllerState::AwaitingAuthorization;
        } else {
            self.enter_mode(target);
        }
        self.persist();
    }

    fn on_geofencing_unavailable(&mut self, reason: &str) {
        self.stop_all();
        self.state = ControllerState::Terminated;

        let err = MonitoringError::GeofencingUnavailable {
            reason: reason.to_string(),
        };
        error!(error = %err, "geofencing unavailable; monitoring terminated");
        self.router.report_failure(reason, false);
        self.persist();
    }

    fn enter_mode(&mut self, mode: MonitoringMode) {
        match mode {
            MonitoringMode::FineGrained => {
                self.register_missing();
                self.location.start_fine();
                self.state = ControllerState::Monitoring(MonitoringMode::FineGrained);
            }
            MonitoringMode::SignificantChangesOnly => {
                self.unregister_all();
                self.location.start_significant_only();
                self.state = ControllerState::Monitoring(MonitoringMode::SignificantChangesOnly);
            }
            MonitoringMode::Idle => {
                self.stop_all();
                self.state = ControllerState::AwaitingAuthorization;
            }
        }
        info!(state = %self.state, "monitoring mode entered");
    }

    /// Clears inert flags. A revived region still registered with the provider
    /// is unregistered so the next `register_missing` retries it from scratch.
    fn revive_inert(&mut self) {
        let revived = self.regions.revive_inert();
        if revived.is_empty() {
            return;
        }
        for id in &revived {
            if self.registered.remove(id) {
                self.location.unregister_region(id);
            }
        }
        info!(regions = ?revived, "inert regions revived for retry");
    }

    fn register_missing(&mut self) {
        let inert = self.regions.inert_regions();
        for region in self.regions.list() {
            if inert.contains(&region.id) || self.registered.contains(&region.id) {
                continue;
            }
            self.location.register_region(&region);
            self.registered.insert(region.id);
        }
    }

    fn unregister_all(&mut self) {
        for id in std::mem::take(&mut self.registered) {
            self.location.unregister_region(&id);
        }
    }

    /// Unregisters every region and halts all updates.
    fn stop_all(&mut self) {
        self.unregister_all();
        self.location.stop();
    }

    fn persist(&mut self) {
        let snapshot = ResumptionSnapshot {
            saved_at: Utc::now(),
            authorization: self.gate.current(),
            mode: self.mode(),
            regions: self.regions.list(),
            events: self.router.log().to_vec(),
        };
        if let Err(e) = self.resumption.save(&snapshot) {
            warn!(error = %e, "resumption snapshot not saved");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration};

    use super::*;
    use crate::collaborators::{
        ProviderCommand, RecordingLocationProvider, RecordingMap, RecordingNotifier,
    };
    use crate::geo::Coordinate;
    use crate::region::MembershipState;
    use crate::resumption::InMemoryResumptionStore;

    struct Fixture {
        controller: MonitoringController,
        provider: RecordingLocationProvider,
        notifier: RecordingNotifier,
        map: RecordingMap,
        store: InMemoryResumptionStore,
    }

    fn fixture_with(cfg: &MonitorConfig, store: InMemoryResumptionStore) -> Fixture {
        let provider = RecordingLocationProvider::new();
        let notifier = RecordingNotifier::new();
        let map = RecordingMap::new();
        let controller = MonitoringController::new(
            cfg,
            Collaborators {
                location: Box::new(provider.clone()),
                notifications: Box::new(notifier.clone()),
                map: Box::new(map.clone()),
            },
            Box::new(store.clone()),
        );
        Fixture {
            controller,
            provider,
            notifier,
            map,
            store,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(&MonitorConfig::default(), InMemoryResumptionStore::new())
    }

    fn center() -> Coordinate {
        Coordinate::new(37.3361, -122.0).unwrap()
    }

    fn sample(coordinate: Coordinate, secs: i64) -> ControllerEvent {
        let t0 = DateTime::parse_from_rfc3339("2024-03-04T10:00:00Z").unwrap().with_timezone(&Utc);
        ControllerEvent::SampleReceived {
            sample: PositionSample::new(coordinate, 5.0, t0 + Duration::seconds(secs)),
        }
    }

    fn auth(level: AuthorizationLevel) -> ControllerEvent {
        ControllerEvent::AuthorizationChanged { level }
    }

    fn id(s: &str) -> RegionId {
        RegionId::new(s).unwrap()
    }

    #[test]
    fn test_start_requests_when_in_use() {
        let mut f = fixture();
        assert_eq!(f.controller.start(), ControllerState::AwaitingAuthorization);
        assert_eq!(
            f.provider.commands(),
            vec![ProviderCommand::RequestAuthorization(AuthorizationRequest::WhenInUse)]
        );
        // Second start is a no-op.
        f.controller.start();
        assert_eq!(f.provider.commands().len(), 1);
    }

    #[test]
    fn test_when_in_use_enables_significant_changes_and_requests_always() {
        let mut f = fixture();
        f.controller.start();
        f.provider.clear();

        f.controller.handle(auth(AuthorizationLevel::WhenInUse));
        assert_eq!(
            f.controller.state(),
            ControllerState::Monitoring(MonitoringMode::SignificantChangesOnly)
        );
        let cmds = f.provider.commands();
        assert!(cmds.contains(&ProviderCommand::RequestAuthorization(AuthorizationRequest::Always)));
        assert!(cmds.contains(&ProviderCommand::StartSignificantOnly));
    }

    #[test]
    fn test_upgrade_to_always_registers_regions_and_keeps_membership() {
        let mut f = fixture();
        f.controller.start();
        f.controller.add_region(Region::new("campus", center(), 200.0).unwrap()).unwrap();
        f.controller.handle(auth(AuthorizationLevel::WhenInUse));
        f.controller.handle(sample(center(), 0));
        assert_eq!(f.controller.regions().membership(&id("campus")), Some(MembershipState::Inside));

        f.controller.handle(auth(AuthorizationLevel::Always));
        assert_eq!(f.controller.state(), ControllerState::Monitoring(MonitoringMode::FineGrained));
        assert_eq!(f.provider.registered(), vec![id("campus")]);
        assert!(f.provider.commands().contains(&ProviderCommand::StartFine));
        assert_eq!(f.controller.regions().membership(&id("campus")), Some(MembershipState::Inside));
    }

    #[test]
    fn test_denied_soft_stops_all_regions() {
        let mut f = fixture();
        f.controller.start();
        f.controller.add_region(Region::new("a", center(), 200.0).unwrap()).unwrap();
        f.controller.add_region(Region::new("b", center(), 400.0).unwrap()).unwrap();
        f.controller.handle(auth(AuthorizationLevel::Always));
        assert_eq!(f.provider.registered().len(), 2);

        f.controller.handle(auth(AuthorizationLevel::Denied));
        assert_eq!(f.controller.state(), ControllerState::AwaitingAuthorization);
        assert!(f.provider.registered().is_empty());
        assert_eq!(f.provider.commands().last(), Some(&ProviderCommand::Stop));
        assert_eq!(f.controller.regions().len(), 2);
    }

    #[test]
    fn test_downgrade_from_always_falls_back_to_significant_changes() {
        let mut f = fixture();
        f.controller.start();
        f.controller.add_region(Region::new("a", center(), 200.0).unwrap()).unwrap();
        f.controller.handle(auth(AuthorizationLevel::Always));
        f.controller.handle(auth(AuthorizationLevel::WhenInUse));
        assert_eq!(
            f.controller.state(),
            ControllerState::Monitoring(MonitoringMode::SignificantChangesOnly)
        );
        assert!(f.provider.registered().is_empty());
    }

    #[test]
    fn test_samples_ignored_until_authorized() {
        let mut f = fixture();
        f.controller.start();
        f.controller.add_region(Region::new("a", center(), 200.0).unwrap()).unwrap();
        assert!(f.controller.handle(sample(center(), 0)).is_empty());
        assert_eq!(f.controller.regions().membership(&id("a")), Some(MembershipState::Unknown));
    }

    #[test]
    fn test_enter_exit_enter_dispatches_to_collaborators() {
        let mut f = fixture();
        f.controller.start();
        f.controller.add_region(Region::new("campus", center(), 200.0).unwrap()).unwrap();
        f.controller.handle(auth(AuthorizationLevel::Always));

        assert_eq!(f.controller.handle(sample(center(), 0)).len(), 1);
        assert_eq!(f.controller.handle(sample(center().offset_north(500.0), 1)).len(), 1);
        assert_eq!(f.controller.handle(sample(center().offset_north(50.0), 2)).len(), 1);

        assert_eq!(f.map.annotation_labels(), vec!["started", "end", "started"]);
        assert_eq!(f.notifier.scheduled().len(), 3);
        assert!(f.notifier.scheduled().iter().all(|n| !n.repeat));
        assert_eq!(f.controller.resumption_log().len(), 3);
    }

    #[test]
    fn test_capacity_exceeded_reports_region() {
        let mut cfg = MonitorConfig::default();
        cfg.regions.capacity = 1;
        let mut f = fixture_with(&cfg, InMemoryResumptionStore::new());
        f.controller.start();
        f.controller.add_region(Region::new("a", center(), 200.0).unwrap()).unwrap();
        let err = f.controller.add_region(Region::new("b", center(), 200.0).unwrap()).unwrap_err();
        assert!(err.is_capacity_exceeded());
        assert!(err.to_string().contains("'b'"));
        assert_eq!(f.controller.regions().len(), 1);
    }

    #[test]
    fn test_add_draws_region_and_registers_when_fine_grained() {
        let mut f = fixture();
        f.controller.start();
        f.controller.handle(auth(AuthorizationLevel::Always));
        f.controller.add_region(Region::new("late", center(), 300.0).unwrap()).unwrap();
        assert_eq!(f.provider.registered(), vec![id("late")]);
        assert_eq!(f.map.calls().len(), 1);

        // Replacing unregisters the old geometry before registering the new.
        f.provider.clear();
        f.controller.add_region(Region::new("late", center(), 600.0).unwrap()).unwrap();
        assert_eq!(
            f.provider.commands(),
            vec![ProviderCommand::Unregister(id("late")), ProviderCommand::Register(id("late"))]
        );

        f.controller.remove_region(&id("late"));
        assert!(f.provider.registered().is_empty());
        assert!(f.controller.remove_region(&id("late")).is_none());
    }

    #[test]
    fn test_region_failure_marks_inert_until_next_authorization_cycle() {
        let mut f = fixture();
        f.controller.start();
        f.controller.add_region(Region::new("a", center(), 200.0).unwrap()).unwrap();
        f.controller.handle(auth(AuthorizationLevel::WhenInUse));

        f.controller.handle(ControllerEvent::RegionMonitoringFailed {
            region_id: id("a"),
            reason: "too many regions".to_string(),
        });
        assert_eq!(f.controller.state(), ControllerState::Monitoring(MonitoringMode::SignificantChangesOnly));
        assert_eq!(f.controller.status().inert_regions, vec![id("a")]);
        assert!(f.controller.handle(sample(center(), 0)).is_empty());
        assert_eq!(f.controller.regions().len(), 1);

        f.controller.handle(auth(AuthorizationLevel::Always));
        assert!(f.controller.status().inert_regions.is_empty());
        assert_eq!(f.provider.registered(), vec![id("a")]);
        assert_eq!(f.controller.handle(sample(center().offset_north(20.0), 1)).len(), 1);
    }

    #[test]
    fn test_terminating_suspends_and_relaunch_resumes() {
        let mut f = fixture();
        f.controller.start();
        f.controller.add_region(Region::new("a", center(), 200.0).unwrap()).unwrap();
        f.controller.handle(auth(AuthorizationLevel::Always));
        f.controller.handle(sample(center().offset_north(1_000.0), 0));

        f.controller.handle(ControllerEvent::HostTerminating);
        assert_eq!(f.controller.state(), ControllerState::Suspended);
        assert_eq!(f.controller.mode(), MonitoringMode::SignificantChangesOnly);
        assert_eq!(f.provider.commands().last(), Some(&ProviderCommand::StartSignificantOnly));

        // Terminated-but-still-receiving: events are delivered as repeating notifications.
        assert_eq!(f.controller.handle(sample(center(), 10)).len(), 1);
        assert!(f.notifier.scheduled().last().unwrap().repeat);

        f.controller.handle(ControllerEvent::Relaunched);
        assert_eq!(f.controller.state(), ControllerState::Monitoring(MonitoringMode::FineGrained));
        assert_eq!(f.provider.commands().last(), Some(&ProviderCommand::StartFine));

        // Filter was reset, so an identical timestamp is accepted again; no crossing though.
        assert!(f.controller.handle(sample(center(), 10)).is_empty());
        assert_eq!(f.controller.regions().membership(&id("a")), Some(MembershipState::Inside));
    }

    #[test]
    fn test_location_failure_while_suspended_sends_repeating_notification() {
        let mut f = fixture();
        f.controller.start();
        f.controller.handle(auth(AuthorizationLevel::WhenInUse));

        f.controller.handle(ControllerEvent::LocationUpdatesFailed {
            reason: "denied".to_string(),
        });
        assert!(f.notifier.scheduled().is_empty());

        f.controller.handle(ControllerEvent::HostTerminating);
        f.controller.handle(ControllerEvent::LocationUpdatesFailed {
            reason: "kCLErrorLocationUnknown".to_string(),
        });
        let scheduled = f.notifier.scheduled();
        assert_eq!(scheduled.len(), 1);
        assert!(scheduled[0].repeat);
    }

    #[test]
    fn test_denied_while_suspended_stops_everything() {
        let mut f = fixture();
        f.controller.start();
        f.controller.handle(auth(AuthorizationLevel::Always));
        f.controller.handle(ControllerEvent::HostTerminating);
        f.controller.handle(auth(AuthorizationLevel::Denied));
        assert_eq!(f.controller.state(), ControllerState::AwaitingAuthorization);
        assert_eq!(f.provider.commands().last(), Some(&ProviderCommand::Stop));
    }

    #[test]
    fn test_geofencing_unavailable_terminates_once() {
        let mut f = fixture();
        f.controller.start();
        f.controller.add_region(Region::new("a", center(), 200.0).unwrap()).unwrap();
        f.controller.handle(auth(AuthorizationLevel::Always));

        f.controller.handle(ControllerEvent::GeofencingUnavailable {
            reason: "no hardware".to_string(),
        });
        f.controller.handle(ControllerEvent::GeofencingUnavailable {
            reason: "no hardware".to_string(),
        });
        assert_eq!(f.controller.state(), ControllerState::Terminated);
        assert_eq!(f.notifier.scheduled().len(), 1);
        assert!(f.provider.registered().is_empty());

        let before = f.provider.commands().len();
        f.controller.handle(auth(AuthorizationLevel::WhenInUse));
        f.controller.handle(sample(center(), 0));
        assert_eq!(f.provider.commands().len(), before);
        assert!(f.controller.add_region(Region::new("b", center(), 10.0).unwrap()).is_err());
    }

    #[test]
    fn test_cold_restart_restores_regions_membership_and_mode() {
        let store = InMemoryResumptionStore::new();
        {
            let mut f = fixture_with(&MonitorConfig::default(), store.clone());
            f.controller.start();
            f.controller.add_region(Region::new("a", center(), 200.0).unwrap()).unwrap();
            f.controller.handle(auth(AuthorizationLevel::Always));
            f.controller.handle(sample(center(), 0));
            f.controller.handle(ControllerEvent::HostTerminating);
        }

        let saved = store.snapshot().unwrap();
        assert_eq!(saved.authorization, AuthorizationLevel::Always);
        assert_eq!(saved.mode, MonitoringMode::SignificantChangesOnly);

        let mut f = fixture_with(&MonitorConfig::default(), store);
        assert_eq!(f.controller.start(), ControllerState::Monitoring(MonitoringMode::FineGrained));
        assert_eq!(f.controller.regions().membership(&id("a")), Some(MembershipState::Inside));
        assert_eq!(f.provider.registered(), vec![id("a")]);
        assert_eq!(f.controller.resumption_log().len(), 1);

        // Still inside: no duplicate Enter after restart. Same level again is a no-op.
        assert!(f.controller.handle(sample(center().offset_north(20.0), 5)).is_empty());
        let before = f.provider.commands().len();
        f.controller.handle(auth(AuthorizationLevel::Always));
        assert_eq!(f.provider.commands().len(), before);
        assert!(f.store.snapshot().is_some());
    }

    #[test]
    fn test_relaunch_retries_failed_region() {
        let mut f = fixture();
        f.controller.start();
        f.controller.handle(auth(AuthorizationLevel::Always));
        f.controller.add_region(Region::new("a", center(), 200.0).unwrap()).unwrap();
        f.controller.handle(ControllerEvent::RegionMonitoringFailed {
            region_id: id("a"),
            reason: "region ceiling".to_string(),
        });
        f.controller.handle(ControllerEvent::HostTerminating);
        f.provider.clear();

        f.controller.handle(ControllerEvent::Relaunched);
        assert_eq!(
            f.provider.commands(),
            vec![
                ProviderCommand::Unregister(id("a")),
                ProviderCommand::Register(id("a")),
                ProviderCommand::StartFine,
            ]
        );
        assert!(f.controller.status().inert_regions.is_empty());
        assert_eq!(f.controller.registered_regions(), vec![id("a")]);
    }

    #[test]
    fn test_authorization_change_retries_failed_region_in_fine_grained() {
        let mut f = fixture();
        f.controller.start();
        f.controller.handle(auth(AuthorizationLevel::Always));
        f.controller.add_region(Region::new("a", center(), 200.0).unwrap()).unwrap();
        f.controller.handle(ControllerEvent::RegionMonitoringFailed {
            region_id: id("a"),
            reason: "region ceiling".to_string(),
        });

        // Any effective change counts as a new cycle; Restricted then Always.
        f.controller.handle(auth(AuthorizationLevel::Restricted));
        f.provider.clear();
        f.controller.handle(auth(AuthorizationLevel::Always));
        assert!(f.provider.commands().contains(&ProviderCommand::Register(id("a"))));
        assert_eq!(f.provider.registered(), vec![id("a")]);
    }

    #[test]
    fn test_background_revoked_while_suspended_unregisters_regions() {
        let mut f = fixture();
        f.controller.start();
        f.controller.handle(auth(AuthorizationLevel::Always));
        f.controller.add_region(Region::new("a", center(), 200.0).unwrap()).unwrap();
        f.controller.handle(ControllerEvent::HostTerminating);
        assert_eq!(f.provider.registered(), vec![id("a")]);

        f.controller.handle(auth(AuthorizationLevel::WhenInUse));
        assert_eq!(f.controller.state(), ControllerState::Suspended);
        assert!(f.provider.registered().is_empty());
        assert!(f.controller.registered_regions().is_empty());
        assert_eq!(f.provider.commands().last(), Some(&ProviderCommand::StartSignificantOnly));

        f.controller.handle(ControllerEvent::Relaunched);
        assert_eq!(
            f.controller.state(),
            ControllerState::Monitoring(MonitoringMode::SignificantChangesOnly)
        );
        assert!(f.provider.registered().is_empty());
    }

    #[test]
    fn test_upgrade_while_suspended_applies_on_relaunch() {
        let mut f = fixture();
        f.controller.start();
        f.controller.handle(auth(AuthorizationLevel::WhenInUse));
        f.controller.add_region(Region::new("a", center(), 200.0).unwrap()).unwrap();
        f.controller.handle(ControllerEvent::HostTerminating);

        f.controller.handle(auth(AuthorizationLevel::Always));
        assert_eq!(f.controller.state(), ControllerState::Suspended);
        assert!(f.provider.registered().is_empty());

        f.controller.handle(ControllerEvent::Relaunched);
        assert_eq!(f.controller.state(), ControllerState::Monitoring(MonitoringMode::FineGrained));
        assert_eq!(f.provider.registered(), vec![id("a")]);
    }

    #[test]
    fn test_restart_at_when_in_use_requests_always_again() {
        let store = InMemoryResumptionStore::new();
        {
            let mut f = fixture_with(&MonitorConfig::default(), store.clone());
            f.controller.start();
            f.controller.handle(auth(AuthorizationLevel::WhenInUse));
        }

        let mut f = fixture_with(&MonitorConfig::default(), store);
        assert_eq!(
            f.controller.start(),
            ControllerState::Monitoring(MonitoringMode::SignificantChangesOnly)
        );
        assert!(f
            .provider
            .commands()
            .contains(&ProviderCommand::RequestAuthorization(AuthorizationRequest::Always)));
        assert!(!f
            .provider
            .commands()
            .contains(&ProviderCommand::RequestAuthorization(AuthorizationRequest::WhenInUse)));
    }

    #[test]
    fn test_try_new_rejects_invalid_config() {
        let mut cfg = MonitorConfig::default();
        cfg.router.notification_delay_secs = 1e20;
        let result = MonitoringController::try_new(
            &cfg,
            Collaborators {
                location: Box::new(RecordingLocationProvider::new()),
                notifications: Box::new(RecordingNotifier::new()),
                map: Box::new(RecordingMap::new()),
            },
            Box::new(InMemoryResumptionStore::new()),
        );
        assert!(result.unwrap_err().is_validation());
    }
}
