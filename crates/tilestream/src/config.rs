//! Tuning constants for streaming, recentering and terrain updates.

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default distance from the origin, in meters, past which the camera
/// should trigger a recenter.
pub const DEFAULT_RECENTER_DISTANCE: f64 = 10_000.0;

/// Default movement, in meters, below which a terrain rebuild is skipped.
pub const DEFAULT_TERRAIN_SKIP_EPSILON: f64 = 0.01;

/// Default upper bound between wake-ups of a load waiting on another tile.
pub const DEFAULT_LOAD_RETRY_INTERVAL_MS: u64 = 100;

/// Streaming configuration.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// let config = tilestream::StreamingConfig::from_json(r#"{ "max_concurrent_loads": 8 }"#).unwrap();
/// assert_eq!(config.max_concurrent_loads, Some(8));
/// assert_eq!(config.recenter_distance, 10_000.0);
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Camera distance from the origin, in meters, that triggers a recenter.
    pub recenter_distance: f64,
    /// Terrain center movement, in meters, below which rebuilds are skipped.
    pub terrain_skip_epsilon: f64,
    /// Maximum number of tiles fetching or decoding at once. `None` is unlimited.
    pub max_concurrent_loads: Option<usize>,
    /// Upper bound, in milliseconds, between re-checks while a load waits on
    /// its ancestor or siblings. Waits are woken by load events first.
    pub load_retry_interval_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            recenter_distance: DEFAULT_RECENTER_DISTANCE,
            terrain_skip_epsilon: DEFAULT_TERRAIN_SKIP_EPSILON,
            max_concurrent_loads: None,
            load_retry_interval_ms: DEFAULT_LOAD_RETRY_INTERVAL_MS,
        }
    }
}

impl StreamingConfig {
    /// Parse a configuration from JSON, filling missing fields with defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::InvalidData {
            context: "streaming config",
            detail: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Set the recenter distance.
    #[must_use]
    pub fn with_recenter_distance(mut self, meters: f64) -> Self {
        self.recenter_distance = meters;
        self
    }

    /// Set the terrain skip epsilon.
    #[must_use]
    pub fn with_terrain_skip_epsilon(mut self, meters: f64) -> Self {
        self.terrain_skip_epsilon = meters;
        self
    }

    /// Limit the number of concurrent fetch/decode operations.
    #[must_use]
    pub fn with_max_concurrent_loads(mut self, limit: usize) -> Self {
        self.max_concurrent_loads = Some(limit);
        self
    }

    /// Set the wake-up interval for waiting loads.
    #[must_use]
    pub fn with_load_retry_interval_ms(mut self, millis: u64) -> Self {
        self.load_retry_interval_ms = millis;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(self.recenter_distance.is_finite() && self.recenter_distance > 0.0) {
            return Err(Error::InvalidData {
                context: "streaming config",
                detail: format!("recenter_distance must be positive, got {}", self.recenter_distance),
            });
        }
        if !(self.terrain_skip_epsilon.is_finite() && self.terrain_skip_epsilon >= 0.0) {
            return Err(Error::InvalidData {
                context: "streaming config",
                detail: format!(
                    "terrain_skip_epsilon must be non-negative, got {}",
                    self.terrain_skip_epsilon
                ),
            });
        }
        if self.max_concurrent_loads == Some(0) {
            return Err(Error::InvalidData {
                context: "streaming config",
                detail: "max_concurrent_loads must be at least 1".to_string(),
            });
        }
        if self.load_retry_interval_ms == 0 {
            return Err(Error::InvalidData {
                context: "streaming config",
                detail: "load_retry_interval_ms must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StreamingConfig::default();
        assert_eq!(config.recenter_distance, 10_000.0);
        assert_eq!(config.terrain_skip_epsilon, 0.01);
        assert_eq!(config.max_concurrent_loads, None);
    }

    #[test]
    fn test_partial_json() {
        let config = StreamingConfig::from_json(r#"{ "recenter_distance": 2500.0 }"#).unwrap();
        assert_eq!(config.recenter_distance, 2500.0);
        assert_eq!(config.load_retry_interval_ms, DEFAULT_LOAD_RETRY_INTERVAL_MS);
    }

    #[test]
    fn test_rejects_zero_limit() {
        let err = StreamingConfig::from_json(r#"{ "max_concurrent_loads": 0 }"#).unwrap_err();
        assert!(err.to_string().contains("max_concurrent_loads"));
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(StreamingConfig::from_json("{ nope").is_err());
    }

    #[test]
    fn test_builders() {
        let config = StreamingConfig::default()
            .with_recenter_distance(500.0)
            .with_max_concurrent_loads(4);
        assert_eq!(config.recenter_distance, 500.0);
        assert_eq!(config.max_concurrent_loads, Some(4));
    }
}
