//! # geofence - Embedded geofence monitoring core
//!
//! Tracks a bounded set of circular regions against a stream of position
//! samples and reports boundary crossings, while adapting how aggressively
//! location is sensed to the authorization level the host currently holds.
//!
//! ## Core Concepts
//!
//! - **Region**: A circle (center + radius) with per-direction notify flags
//! - **Membership**: Whether the last accepted sample was inside each region
//! - **Crossing**: An Enter or Exit produced only when membership flips
//! - **Monitoring mode**: Fine-grained with Always, significant-changes with WhenInUse
//! - **Resumption log**: Recent crossings persisted so a restart does not re-announce them
//!
//! ## Usage
//!
//! ```rust,ignore
//! use geofence::{
//!     AuthorizationLevel, Collaborators, ControllerEvent, Coordinate, MonitorConfig,
//!     MonitorRuntime, MonitoringController, NoResumption, Region,
//! };
//!
//! let cfg = MonitorConfig::default();
//! let controller = MonitoringController::new(&cfg, collaborators, Box::new(NoResumption));
//! let runtime = MonitorRuntime::spawn(controller, &cfg.runtime)?;
//!
//! let campus = Coordinate::new(37.3361, -122.0)?;
//! runtime.add_region(Region::new("campus", campus, 200.0)?)?;
//! runtime.submit(ControllerEvent::AuthorizationChanged { level: AuthorizationLevel::Always })?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod authorization;
pub mod error;
pub mod geo;
pub mod region;

// Sample processing
pub mod detector;
pub mod filter;
pub mod router;

// Orchestration
pub mod collaborators;
pub mod config;
pub mod controller;
pub mod logging;
pub mod resumption;
pub mod runtime;

// Re-export primary types at crate root for convenience
pub use authorization::{AuthorizationGate, AuthorizationLevel, AuthorizationUpdate, Capabilities};
pub use collaborators::{Collaborators, DeliveryError, LocationProvider, MapSurface, NotificationSink};
pub use config::MonitorConfig;
pub use controller::{ControllerEvent, ControllerState, ControllerStatus, MonitoringController, MonitoringMode};
pub use detector::{CrossingDetector, CrossingEvent, CrossingKind, EventId};
pub use error::{GeofenceError, GeofenceResult, MonitoringError, ValidationError};
pub use filter::{FilterConfig, LocationFilter, PositionSample};
pub use geo::Coordinate;
pub use region::{AddOutcome, MembershipState, Region, RegionId, RegionStore};
pub use resumption::{
    FileResumptionStore, InMemoryResumptionStore, NoResumption, PersistenceError, ResumptionSnapshot,
    ResumptionStore,
};
pub use router::{EventRouter, ResumptionLog, RouterConfig};
pub use runtime::{EventSender, MonitorRuntime, RuntimeConfig};
