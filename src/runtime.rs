//! Serialized event loop.
//!
//! The controller runs on one dedicated worker thread and sees every input in
//! arrival order. Platform callbacks submit `ControllerEvent`s with a
//! non-blocking `try_send`; when the bounded queue is full the event is
//! dropped and counted rather than stalling the caller. Region commands and
//! status queries travel through the same queue, so they are ordered with
//! respect to events, and wait for a reply.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::controller::{ControllerEvent, ControllerStatus, MonitoringController};
use crate::error::{GeofenceResult, MonitoringError, ValidationError};
use crate::region::{AddOutcome, Region, RegionId};

const EVENT_PATH: &str = "monitor_events";
const CONTROL_PATH: &str = "monitor_control";

/// Runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum queued inputs before new events are dropped.
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { queue_capacity: 1024 }
    }
}

impl RuntimeConfig {
    /// Checks the queue size.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` for a zero capacity.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.queue_capacity == 0 {
            return Err(ValidationError::InvalidConfig {
                field: "runtime.queue_capacity".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

enum Envelope {
    Event(ControllerEvent),
    AddRegion {
        region: Region,
        reply: Sender<GeofenceResult<AddOutcome>>,
    },
    RemoveRegion {
        id: RegionId,
        reply: Sender<Option<Region>>,
    },
    Status {
        reply: Sender<ControllerStatus>,
    },
    Shutdown,
}

fn disconnected(path: &str) -> MonitoringError {
    MonitoringError::Disconnected {
        path: path.to_string(),
    }
}

/// Cloneable, non-blocking handle for submitting events from any thread.
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<Envelope>,
    dropped: Arc<AtomicU64>,
}

impl std::fmt::Debug for EventSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSender")
            .field("queued", &self.tx.len())
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish()
    }
}

impl EventSender {
    /// Enqueue an event without blocking.
    ///
    /// # Errors
    ///
    /// - `QueueFull` when the queue is at capacity; the event is dropped and counted.
    /// - `Disconnected` when the worker has stopped.
    pub fn submit(&self, event: ControllerEvent) -> GeofenceResult<()> {
        match self.tx.try_send(Envelope::Event(event)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(MonitoringError::QueueFull {
                    path: EVENT_PATH.to_string(),
                }
                .into())
            }
            Err(TrySendError::Disconnected(_)) => Err(disconnected(EVENT_PATH).into()),
        }
    }

    /// Events dropped because the queue was full.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Owns the worker thread that drives a `MonitoringController`.
pub struct MonitorRuntime {
    sender: EventSender,
    /// Set on drop; the worker exits after its current message.
    closing: Arc<AtomicBool>,
    join: Option<JoinHandle<MonitoringController>>,
}

impl std::fmt::Debug for MonitorRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorRuntime")
            .field("sender", &self.sender)
            .field("running", &self.join.is_some())
            .finish()
    }
}

impl MonitorRuntime {
    /// Starts the controller on a new worker thread.
    ///
    /// The controller's `start` runs on the worker before any queued input.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` for a zero queue capacity, or
    /// `Disconnected` if the worker thread cannot be spawned.
    pub fn spawn(controller: MonitoringController, cfg: &RuntimeConfig) -> GeofenceResult<Self> {
        cfg.validate()?;
        let (tx, rx) = bounded::<Envelope>(cfg.queue_capacity);
        let closing = Arc::new(AtomicBool::new(false));
        let thread_closing = Arc::clone(&closing);

        let join = thread::Builder::new()
            .name("geofence-monitor".to_string())
            .spawn(move || {
                let mut controller = controller;
                let state = controller.start();
                info!(%state, "geofence monitor started");

                while let Ok(msg) = rx.recv() {
                    if thread_closing.load(Ordering::Acquire) {
                        debug!("runtime dropped; discarding queued input");
                        break;
                    }
                    match msg {
                        Envelope::Event(event) => {
                            debug!(event = event.name(), "processing event");
                            controller.handle(event);
                        }
                        Envelope::AddRegion { region, reply } => {
                            let _ = reply.send(controller.add_region(region));
                        }
                        Envelope::RemoveRegion { id, reply } => {
                            let _ = reply.send(controller.remove_region(&id));
                        }
                        Envelope::Status { reply } => {
                            let _ = reply.send(controller.status());
                        }
                        Envelope::Shutdown => break,
                    }
                }

                info!(state = %controller.state(), "geofence monitor stopped");
                controller
            })
            .map_err(|e| {
                warn!(error = %e, "failed to spawn geofence monitor worker");
                disconnected(CONTROL_PATH)
            })?;

        Ok(Self {
            sender: EventSender {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            closing,
            join: Some(join),
        })
    }

    /// Enqueue an event without blocking. See `EventSender::submit`.
    ///
    /// # Errors
    ///
    /// `QueueFull` or `Disconnected`.
    pub fn submit(&self, event: ControllerEvent) -> GeofenceResult<()> {
        self.sender.submit(event)
    }

    /// A handle for platform callbacks running on other threads.
    #[must_use]
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Adds or replaces a region, waiting for the worker's answer.
    ///
    /// # Errors
    ///
    /// Whatever `MonitoringController::add_region` returns, or `Disconnected`.
    pub fn add_region(&self, region: Region) -> GeofenceResult<AddOutcome> {
        let (reply, rx) = bounded(1);
        self.control(Envelope::AddRegion { region, reply })?;
        rx.recv().map_err(|_| disconnected(CONTROL_PATH))?
    }

    /// Removes a region.
    ///
    /// # Errors
    ///
    /// `Disconnected` if the worker has stopped.
    pub fn remove_region(&self, id: &RegionId) -> GeofenceResult<Option<Region>> {
        let (reply, rx) = bounded(1);
        self.control(Envelope::RemoveRegion { id: id.clone(), reply })?;
        Ok(rx.recv().map_err(|_| disconnected(CONTROL_PATH))?)
    }

    /// Snapshot of the controller after every previously queued input.
    ///
    /// # Errors
    ///
    /// `Disconnected` if the worker has stopped.
    pub fn status(&self) -> GeofenceResult<ControllerStatus> {
        let (reply, rx) = bounded(1);
        self.control(Envelope::Status { reply })?;
        Ok(rx.recv().map_err(|_| disconnected(CONTROL_PATH))?)
    }

    /// Events dropped because the queue was full.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.sender.dropped_events()
    }

    /// Drains queued input, stops the worker and hands back the controller.
    ///
    /// # Errors
    ///
    /// `Disconnected` if the worker already exited abnormally.
    pub fn shutdown(mut self) -> GeofenceResult<MonitoringController> {
        let join = self.join.take().ok_or_else(|| disconnected(CONTROL_PATH))?;
        // Blocking send: everything queued before this is processed first.
        if self.sender.tx.send(Envelope::Shutdown).is_err() {
            debug!("worker already gone at shutdown");
        }
        join.join().map_err(|_| disconnected(CONTROL_PATH).into())
    }

    fn control(&self, msg: Envelope) -> GeofenceResult<()> {
        self.sender
            .tx
            .send(msg)
            .map_err(|_| disconnected(CONTROL_PATH).into())
    }
}

impl Drop for MonitorRuntime {
    fn drop(&mut self) {
        if let Some(handle) = self.join.take() {
            // Cloned senders may outlive the runtime; ask the worker to stop
            // instead of joining, which could block on a full queue.
            self.closing.store(true, Ordering::Release);
            if let Err(e) = self.sender.tx.try_send(Envelope::Shutdown) {
                debug!(
                    full = e.is_full(),
                    "shutdown not queued on drop; worker stops after its next message"
                );
            }
            drop(handle);
        }
    }
}
