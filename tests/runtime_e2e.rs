//! Runtime tests: ordering, backpressure and shutdown across threads.

use std::thread;

use chrono::{DateTime, Duration, Utc};
use crossbeam_channel::{bounded, Receiver};

use geofence::collaborators::{AuthorizationRequest, RecordingLocationProvider, RecordingMap, RecordingNotifier};
use geofence::{
    AuthorizationLevel, Collaborators, ControllerEvent, ControllerState, Coordinate, GeofenceError, LocationProvider,
    MonitorConfig, MonitorRuntime, MonitoringController, MonitoringError, MonitoringMode, NoResumption,
    PositionSample, Region, RegionId, RuntimeConfig,
};

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-03-04T10:00:00Z").unwrap().with_timezone(&Utc)
}

fn campus() -> Coordinate {
    Coordinate::new(37.3361, -122.0).unwrap()
}

fn controller_with(location: Box<dyn LocationProvider>, notifier: &RecordingNotifier) -> MonitoringController {
    MonitoringController::new(
        &MonitorConfig::default(),
        Collaborators {
            location,
            notifications: Box::new(notifier.clone()),
            map: Box::new(RecordingMap::new()),
        },
        Box::new(NoResumption),
    )
}

/// Provider whose first authorization request parks the worker until released.
struct GatedProvider {
    release: Receiver<()>,
    inner: RecordingLocationProvider,
}

impl LocationProvider for GatedProvider {
    fn request_authorization(&self, request: AuthorizationRequest) {
        if request == AuthorizationRequest::WhenInUse {
            let _ = self.release.recv();
        }
        self.inner.request_authorization(request);
    }

    fn start_fine(&self) {
        self.inner.start_fine();
    }

    fn start_significant_only(&self) {
        self.inner.start_significant_only();
    }

    fn stop(&self) {
        self.inner.stop();
    }

    fn register_region(&self, region: &Region) {
        self.inner.register_region(region);
    }

    fn unregister_region(&self, id: &RegionId) {
        self.inner.unregister_region(id);
    }
}

#[test]
fn full_queue_drops_and_counts_events() {
    let (release_tx, release_rx) = bounded::<()>(1);
    let notifier = RecordingNotifier::new();
    let provider = GatedProvider {
        release: release_rx,
        inner: RecordingLocationProvider::new(),
    };
    let runtime = MonitorRuntime::spawn(
        controller_with(Box::new(provider), &notifier),
        &RuntimeConfig { queue_capacity: 2 },
    )
    .unwrap();

    runtime.submit(ControllerEvent::Relaunched).unwrap();
    runtime.submit(ControllerEvent::Relaunched).unwrap();
    let err = runtime.submit(ControllerEvent::Relaunched).unwrap_err();
    assert!(matches!(err, GeofenceError::Monitoring(MonitoringError::QueueFull { .. })));
    assert!(err.is_recoverable());
    assert_eq!(runtime.dropped_events(), 1);

    release_tx.send(()).unwrap();
    assert_eq!(runtime.status().unwrap().state, ControllerState::AwaitingAuthorization);
    runtime.shutdown().unwrap();
}

#[test]
fn producers_on_many_threads_are_serialized() {
    let notifier = RecordingNotifier::new();
    let runtime = MonitorRuntime::spawn(
        controller_with(Box::new(RecordingLocationProvider::new()), &notifier),
        &RuntimeConfig::default(),
    )
    .unwrap();
    for i in 0..4 {
        let center = campus().offset_north(f64::from(i) * 5_000.0);
        runtime.add_region(Region::new(format!("r{i}"), center, 300.0).unwrap()).unwrap();
    }
    runtime
        .submit(ControllerEvent::AuthorizationChanged {
            level: AuthorizationLevel::Always,
        })
        .unwrap();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let sender = runtime.sender();
            thread::spawn(move || {
                sender
                    .submit(ControllerEvent::RegionMonitoringFailed {
                        region_id: RegionId::new(format!("r{i}")).unwrap(),
                        reason: "ceiling".to_string(),
                    })
                    .unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let status = runtime.status().unwrap();
    assert_eq!(status.state, ControllerState::Monitoring(MonitoringMode::FineGrained));
    assert_eq!(status.inert_regions.len(), 4);
    assert_eq!(status.region_count, 4);
}

#[test]
fn shutdown_drains_queue_and_returns_controller() {
    let notifier = RecordingNotifier::new();
    let runtime = MonitorRuntime::spawn(
        controller_with(Box::new(RecordingLocationProvider::new()), &notifier),
        &RuntimeConfig::default(),
    )
    .unwrap();
    runtime.add_region(Region::new("campus", campus(), 200.0).unwrap()).unwrap();

    runtime
        .submit(ControllerEvent::AuthorizationChanged {
            level: AuthorizationLevel::Always,
        })
        .unwrap();
    for (i, meters) in [0.0, 500.0, 50.0, 800.0].into_iter().enumerate() {
        runtime
            .submit(ControllerEvent::SampleReceived {
                sample: PositionSample::new(
                    campus().offset_north(meters),
                    5.0,
                    t0() + Duration::seconds(i64::try_from(i).unwrap()),
                ),
            })
            .unwrap();
    }

    let controller = runtime.shutdown().unwrap();
    assert_eq!(controller.status().dispatched_events, 4);
    assert_eq!(notifier.scheduled().len(), 4);
}

#[test]
fn dropping_runtime_stops_worker() {
    let notifier = RecordingNotifier::new();
    let runtime = MonitorRuntime::spawn(
        controller_with(Box::new(RecordingLocationProvider::new()), &notifier),
        &RuntimeConfig::default(),
    )
    .unwrap();
    let sender = runtime.sender();
    drop(runtime);

    // The worker exits once it sees the shutdown request; submissions then fail.
    let mut disconnected = false;
    for _ in 0..200 {
        if sender.submit(ControllerEvent::Relaunched).is_err() {
            disconnected = true;
            break;
        }
        thread::sleep(std::time::Duration::from_millis(5));
    }
    assert!(disconnected);
}

#[test]
fn dropping_runtime_with_full_queue_still_stops_worker() {
    let (release_tx, release_rx) = bounded::<()>(1);
    let notifier = RecordingNotifier::new();
    let provider = GatedProvider {
        release: release_rx,
        inner: RecordingLocationProvider::new(),
    };
    let runtime = MonitorRuntime::spawn(
        controller_with(Box::new(provider), &notifier),
        &RuntimeConfig { queue_capacity: 1 },
    )
    .unwrap();
    runtime.submit(ControllerEvent::Relaunched).unwrap();
    let sender = runtime.sender();

    // Shutdown cannot be queued; the worker is parked inside start().
    drop(runtime);
    release_tx.send(()).unwrap();

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        match sender.submit(ControllerEvent::Relaunched) {
            Err(GeofenceError::Monitoring(MonitoringError::Disconnected { .. })) => break,
            Ok(()) | Err(_) => {
                assert!(std::time::Instant::now() < deadline, "worker kept running after drop");
                thread::sleep(std::time::Duration::from_millis(5));
            }
        }
    }
}
