//! Engine configuration.
//!
//! `Config` is small and serializable so it can be embedded in whatever
//! configuration file the host application already uses.

use crate::compute::distance::DistanceMetric;
use crate::error::{GeoQueryError, Result};
use serde::{Deserialize, Serialize};

/// Fan-out bounds for index nodes.
///
/// Every node other than the root holds between `min_entries` and
/// `max_entries` children (or leaf entries).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCapacity {
    pub min_entries: usize,
    pub max_entries: usize,
}

impl NodeCapacity {
    pub const DEFAULT_MIN: usize = 2;
    pub const DEFAULT_MAX: usize = 8;

    pub fn new(min_entries: usize, max_entries: usize) -> Result<Self> {
        let capacity = Self {
            min_entries,
            max_entries,
        };
        capacity.validate()?;
        Ok(capacity)
    }

    /// A split of `max_entries + 1` items must leave both halves with at
    /// least `min_entries`.
    pub fn validate(&self) -> Result<()> {
        if self.max_entries < 4 {
            return Err(GeoQueryError::Config(format!(
                "max_entries must be at least 4, got {}",
                self.max_entries
            )));
        }
        if self.min_entries < 2 || self.min_entries > self.max_entries / 2 {
            return Err(GeoQueryError::Config(format!(
                "min_entries must be in [2, {}], got {}",
                self.max_entries / 2,
                self.min_entries
            )));
        }
        Ok(())
    }
}

impl Default for NodeCapacity {
    fn default() -> Self {
        Self {
            min_entries: Self::DEFAULT_MIN,
            max_entries: Self::DEFAULT_MAX,
        }
    }
}

/// Engine configuration
///
/// # Example
///
/// ```rust
/// use geoquery::{Config, DistanceMetric};
///
/// let config = Config::default();
/// assert_eq!(config.distance_metric, DistanceMetric::Euclidean);
///
/// let json = r#"{
///     "distance_metric": "haversine",
///     "node_capacity": { "min_entries": 3, "max_entries": 12 }
/// }"#;
/// let config = Config::from_json(json).unwrap();
/// assert_eq!(config.distance_metric, DistanceMetric::Haversine);
/// assert!(config.validate_ranges);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Metric used to order nearest-neighbour results
    #[serde(default)]
    pub distance_metric: DistanceMetric,

    /// Index node fan-out bounds
    #[serde(default)]
    pub node_capacity: NodeCapacity,

    /// Reject coordinates outside [-180, 180] x [-90, 90]
    #[serde(default = "Config::default_validate_ranges")]
    pub validate_ranges: bool,
}

impl Config {
    const fn default_validate_ranges() -> bool {
        true
    }

    pub fn with_distance_metric(mut self, metric: DistanceMetric) -> Self {
        self.distance_metric = metric;
        self
    }

    pub fn with_node_capacity(mut self, capacity: NodeCapacity) -> Self {
        self.node_capacity = capacity;
        self
    }

    /// Toggle the longitude/latitude range check on stored geometries.
    pub fn with_range_validation(mut self, enabled: bool) -> Self {
        self.validate_ranges = enabled;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.node_capacity.validate()
    }

    /// Load configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)
            .map_err(|e| GeoQueryError::Config(format!("invalid JSON config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| GeoQueryError::Config(format!("failed to serialize config: {}", e)))
    }

    /// Load configuration from TOML string (requires toml feature)
    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml_str)
            .map_err(|e| GeoQueryError::Config(format!("invalid TOML config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as TOML string (requires toml feature)
    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| GeoQueryError::Config(format!("failed to serialize config: {}", e)))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            distance_metric: DistanceMetric::default(),
            node_capacity: NodeCapacity::default(),
            validate_ranges: Self::default_validate_ranges(),
        }
    }
}
