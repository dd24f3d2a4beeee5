//! Read-side queries over a [`SharedStore`].
//!
//! Every query takes the store's read lock once, asks the index for
//! candidate ids, then hydrates those ids into owned [`Feature`] snapshots
//! before the lock is released.

use crate::compute::cancel::CancellationToken;
use crate::compute::distance::distance_to_geometry;
use crate::compute::spatial::IndexStats;
use crate::compute::validation::{validate_query_bbox, validate_query_point};
use crate::error::{GeoQueryError, Result};
use crate::feature::Feature;
use crate::sync::SharedStore;
use geo::{Intersects, Point};
use geoquery_types::{BoundingBox, Geometry, GeometryKind};
use serde::Serialize;
use std::collections::BTreeMap;

/// One nearest-neighbour hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighbor {
    pub feature: Feature,
    /// Distance under the store's configured metric
    pub distance: f64,
}

/// Aggregate numbers for a non-empty store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStats {
    pub count: usize,
    pub extent: BoundingBox,
    pub geometry_counts: BTreeMap<GeometryKind, usize>,
    pub index: IndexStats,
}

/// Query front end bound to one store.
///
/// # Examples
///
/// ```rust
/// use geoquery::{Attributes, Geometry, QueryEngine, SharedStore};
///
/// # fn main() -> geoquery::Result<()> {
/// let store = SharedStore::default();
/// for (lon, lat) in [(0.0, 0.0), (1.0, 1.0), (10.0, 10.0)] {
///     store.insert(Geometry::point(lon, lat)?, Attributes::new())?;
/// }
///
/// let engine = QueryEngine::new(store);
/// assert_eq!(engine.query_bbox(-0.5, -0.5, 1.5, 1.5)?.len(), 2);
///
/// let nearest = engine.query_nearest(0.0, 0.0, 2)?;
/// assert_eq!(nearest[0].distance, 0.0);
/// assert_eq!(engine.stats()?.count, 3);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct QueryEngine {
    store: SharedStore,
}

impl QueryEngine {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Features whose bounding box intersects the query box, boundaries
    /// included.
    pub fn query_bbox(
        &self,
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
    ) -> Result<Vec<Feature>> {
        let query = validate_query_bbox(min_lon, min_lat, max_lon, max_lat)?;
        let store = self.store.read();
        Ok(store
            .index()
            .query_bbox(&query)
            .into_iter()
            .filter_map(|id| store.lookup(id).cloned())
            .collect())
    }

    pub fn count_in_bbox(
        &self,
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
    ) -> Result<usize> {
        let query = validate_query_bbox(min_lon, min_lat, max_lon, max_lat)?;
        Ok(self.store.read().index().count_bbox(&query))
    }

    /// Up to `k` features nearest to `(lon, lat)`, closest first.
    ///
    /// Distances are measured to the actual geometry (zero inside a
    /// polygon). Equal distances come back in ascending id order.
    pub fn query_nearest(&self, lon: f64, lat: f64, k: usize) -> Result<Vec<Neighbor>> {
        self.nearest(lon, lat, k, None)
    }

    /// Like [`query_nearest`](Self::query_nearest), but gives up with
    /// [`GeoQueryError::Cancelled`] once `token` is cancelled.
    pub fn query_nearest_cancellable(
        &self,
        lon: f64,
        lat: f64,
        k: usize,
        token: &CancellationToken,
    ) -> Result<Vec<Neighbor>> {
        self.nearest(lon, lat, k, Some(token))
    }

    fn nearest(
        &self,
        lon: f64,
        lat: f64,
        k: usize,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Neighbor>> {
        validate_query_point(lon, lat)?;
        if k < 1 {
            log::warn!("Rejecting nearest query with k = 0");
            return Err(GeoQueryError::InvalidArgument(
                "k must be at least 1".to_string(),
            ));
        }

        let point = Point::new(lon, lat);
        let store = self.store.read();
        let metric = store.config().distance_metric;
        let hits = store.index().nearest(
            &point,
            k,
            metric,
            |id| {
                store
                    .lookup(id)
                    .map_or(f64::INFINITY, |f| distance_to_geometry(&point, f.geometry(), metric))
            },
            cancel,
        )?;

        Ok(hits
            .into_iter()
            .filter_map(|(id, distance)| {
                store.lookup(id).map(|feature| Neighbor {
                    feature: feature.clone(),
                    distance,
                })
            })
            .collect())
    }

    /// Count, extent and per-kind breakdown.
    pub fn stats(&self) -> Result<StoreStats> {
        let store = self.store.read();
        let extent = store.extent()?;
        let mut geometry_counts = BTreeMap::new();
        for feature in store.iter() {
            *geometry_counts.entry(feature.geometry().kind()).or_insert(0) += 1;
        }
        Ok(StoreStats {
            count: store.len(),
            extent,
            geometry_counts,
            index: store.index().stats(),
        })
    }

    /// Case-insensitive substring search over feature names, in id order.
    ///
    /// The name is the first string found under `name`, `NAME` or `Name`.
    pub fn search_by_name(&self, term: &str, limit: usize) -> Result<Vec<Feature>> {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return Err(GeoQueryError::InvalidArgument(
                "search term must not be empty".to_string(),
            ));
        }
        if limit == 0 {
            return Err(GeoQueryError::InvalidArgument(
                "limit must be at least 1".to_string(),
            ));
        }

        let store = self.store.read();
        Ok(store
            .iter()
            .filter(|feature| {
                feature
                    .name()
                    .is_some_and(|name| name.to_lowercase().contains(&needle))
            })
            .take(limit)
            .cloned()
            .collect())
    }

    /// Features whose geometry covers `(lon, lat)`, in id order.
    ///
    /// Polygons match on their interior and boundary, points only on exact
    /// equality.
    pub fn query_containing(&self, lon: f64, lat: f64) -> Result<Vec<Feature>> {
        validate_query_point(lon, lat)?;
        let point = Point::new(lon, lat);
        let store = self.store.read();

        let mut ids = store.index().query_bbox(&BoundingBox::from_point(lon, lat));
        ids.sort_unstable();
        Ok(ids
            .into_iter()
            .filter_map(|id| store.lookup(id))
            .filter(|feature| covers(feature.geometry(), &point))
            .cloned()
            .collect())
    }
}

fn covers(geometry: &Geometry, point: &Point) -> bool {
    match geometry {
        Geometry::Point(p) => p == point,
        Geometry::MultiPoint(mp) => mp.iter().any(|p| p == point),
        Geometry::Polygon(polygon) => polygon.intersects(point),
        Geometry::MultiPolygon(mp) => mp.iter().any(|polygon| polygon.intersects(point)),
    }
}
