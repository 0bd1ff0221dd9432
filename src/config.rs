//! Monitor configuration.
//!
//! Every section has defaults, so an embedding host only needs to supply the
//! values it wants to change. Configuration is usually built in code, but can
//! also be read from JSON:
//!
//! ```json
//! { "regions": { "capacity": 10 }, "filter": { "min_movement_meters": 25.0 } }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{GeofenceResult, ValidationError};
use crate::filter::FilterConfig;
use crate::region::RegionStoreConfig;
use crate::router::RouterConfig;
use crate::runtime::RuntimeConfig;

/// Top-level configuration for the monitoring core.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub filter: FilterConfig,
    pub regions: RegionStoreConfig,
    pub router: RouterConfig,
    pub runtime: RuntimeConfig,
}

impl MonitorConfig {
    /// Parses and validates a JSON document. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` for malformed JSON or
    /// out-of-range values.
    pub fn from_json_str(json: &str) -> GeofenceResult<Self> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            field: "<document>".to_string(),
            reason: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first `ValidationError::InvalidConfig` found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.filter.validate()?;
        if self.regions.capacity == 0 {
            return Err(ValidationError::InvalidConfig {
                field: "regions.capacity".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        self.router.validate()?;
        self.runtime.validate()
    }
}
