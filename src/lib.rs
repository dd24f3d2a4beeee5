//! Embedded spatial query engine over GeoJSON-style features.
//!
//! Features (points, polygons and their multi-part forms, each with an
//! attribute map) live in a [`FeatureStore`] backed by an R-tree. A
//! [`QueryEngine`] answers bounding-box, nearest-neighbour, containment,
//! name and aggregate queries; a [`Loader`] bulk-loads and exports GeoJSON
//! FeatureCollections.
//!
//! ```rust
//! use geoquery::prelude::*;
//!
//! let engine = Engine::new();
//! let a = engine.store.insert(Geometry::point(0.0, 0.0)?, Attributes::new())?;
//! let b = engine.store.insert(Geometry::point(1.0, 1.0)?, Attributes::new())?;
//! engine.store.insert(Geometry::point(10.0, 10.0)?, Attributes::new())?;
//!
//! let nearest = engine.query.query_nearest(0.0, 0.0, 2)?;
//! let ids: Vec<FeatureId> = nearest.iter().map(|n| n.feature.id()).collect();
//! assert_eq!(ids, vec![a, b]);
//! # Ok::<(), geoquery::GeoQueryError>(())
//! ```

pub mod builder;
pub mod compute;
pub mod config;
pub mod error;
pub mod feature;
pub mod geojson;
pub mod query;
pub mod store;
pub mod sync;

pub use builder::{Engine, EngineBuilder};
pub use config::{Config, NodeCapacity};
pub use error::{GeoQueryError, Result};
pub use feature::{Feature, FeatureId};
pub use query::{Neighbor, QueryEngine, StoreStats};
pub use store::FeatureStore;
pub use sync::SharedStore;

// A bare `geojson::` path is ambiguous with the `geojson` dependency.
pub use self::geojson::Loader;

pub use compute::cancel::CancellationToken;
pub use compute::distance::DistanceMetric;
pub use compute::spatial::{IndexStats, RTree};

pub use geoquery_types::{
    AttributeValue, Attributes, BoundingBox, Geometry, GeometryError, GeometryKind,
};

pub use geo::Point;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {
    pub use crate::{Engine, EngineBuilder, GeoQueryError, Result};

    pub use crate::{Feature, FeatureId, FeatureStore, SharedStore};

    pub use crate::{CancellationToken, Loader, Neighbor, QueryEngine};

    pub use crate::{AttributeValue, Attributes, BoundingBox, Geometry};

    pub use crate::{Config, DistanceMetric};
}
