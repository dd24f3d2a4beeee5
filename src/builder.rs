//! Engine builder for wiring configuration and an optional initial load.

use crate::compute::distance::DistanceMetric;
use crate::config::{Config, NodeCapacity};
use crate::error::Result;
use crate::geojson::Loader;
use crate::query::QueryEngine;
use crate::sync::SharedStore;
use std::path::PathBuf;

/// A store together with the query and load front ends bound to it.
///
/// All three share the same underlying store; clone any of them freely.
#[derive(Debug, Clone)]
pub struct Engine {
    pub store: SharedStore,
    pub query: QueryEngine,
    pub loader: Loader,
}

impl Engine {
    /// In-memory engine with the default configuration.
    pub fn new() -> Self {
        let store = SharedStore::default();
        Self::from_store(store)
    }

    pub fn from_store(store: SharedStore) -> Self {
        Self {
            query: QueryEngine::new(store.clone()),
            loader: Loader::new(store.clone()),
            store,
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for an [`Engine`] with custom configuration and an optional
/// GeoJSON file loaded at startup.
///
/// # Examples
///
/// ```rust
/// use geoquery::{DistanceMetric, EngineBuilder};
///
/// let engine = EngineBuilder::new()
///     .distance_metric(DistanceMetric::Haversine)
///     .build()
///     .unwrap();
/// assert!(engine.store.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct EngineBuilder {
    config: Config,
    geojson_path: Option<PathBuf>,
}

impl EngineBuilder {
    /// Create a new builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn distance_metric(mut self, metric: DistanceMetric) -> Self {
        self.config = self.config.with_distance_metric(metric);
        self
    }

    pub fn node_capacity(mut self, capacity: NodeCapacity) -> Self {
        self.config = self.config.with_node_capacity(capacity);
        self
    }

    /// Load this GeoJSON file into the store during [`build`](Self::build).
    pub fn geojson_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.geojson_path = Some(path.into());
        self
    }

    /// Validate the configuration, create the store and run the initial
    /// load if one was requested.
    pub fn build(self) -> Result<Engine> {
        let engine = Engine::from_store(SharedStore::new(self.config)?);
        if let Some(path) = self.geojson_path {
            let count = engine.loader.load_path(&path)?;
            log::info!("Preloaded {} features from {}", count, path.display());
        }
        Ok(engine)
    }
}
