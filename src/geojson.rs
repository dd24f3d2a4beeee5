//! GeoJSON FeatureCollection load and export.
//!
//! Loading is all-or-nothing: the document is parsed and every feature
//! validated before the store is touched, then the whole batch replaces the
//! store contents in one swap. Loading the same document twice leaves the
//! same set of features. Unlocated features (`"geometry": null`) are
//! skipped.

use crate::compute::validation::validate_geometry;
use crate::config::Config;
use crate::error::{GeoQueryError, Result};
use crate::feature::Feature;
use crate::sync::SharedStore;
use bytes::Bytes;
use geo::Polygon;
use ::geojson::feature::Id;
use ::geojson::{FeatureCollection, GeoJson, Value};
use geoquery_types::{AttributeValue, Attributes, BoundingBox, Geometry};
use std::path::Path;

type Rings = (Vec<(f64, f64)>, Vec<Vec<(f64, f64)>>);

/// Moves GeoJSON documents in and out of a [`SharedStore`].
///
/// # Examples
///
/// ```rust
/// use geoquery::{Loader, SharedStore};
///
/// # fn main() -> geoquery::Result<()> {
/// let store = SharedStore::default();
/// let loader = Loader::new(store.clone());
///
/// let doc = br#"{
///     "type": "FeatureCollection",
///     "features": [
///         {"type": "Feature", "properties": {"name": "Depot"},
///          "geometry": {"type": "Point", "coordinates": [-0.1276, 51.5072]}}
///     ]
/// }"#;
/// assert_eq!(loader.load(doc)?, 1);
/// assert_eq!(store.len(), 1);
///
/// let exported = loader.export()?;
/// assert_eq!(Loader::new(Default::default()).load(&exported)?, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Loader {
    store: SharedStore,
}

impl Loader {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Replace the store contents with the features in `bytes`.
    ///
    /// Accepts a FeatureCollection or a single Feature. Returns the number
    /// of features loaded.
    pub fn load(&self, bytes: &[u8]) -> Result<usize> {
        let config = self.store.config();
        let items = parse_feature_collection(bytes, &config).inspect_err(|e| {
            log::warn!("GeoJSON load rejected: {}", e);
        })?;
        log::debug!("Parsed {} features from {} bytes", items.len(), bytes.len());

        let count = self.store.bulk_load(items)?;
        log::info!("Loaded {} features from GeoJSON", count);
        Ok(count)
    }

    /// Read a GeoJSON file and [`load`](Self::load) it.
    pub fn load_path(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        log::debug!("Read {} bytes from {}", bytes.len(), path.display());
        self.load(&bytes)
    }

    /// Serialize every feature, in ascending id order, as a FeatureCollection.
    ///
    /// Each feature carries its numeric id and bounding box; the collection
    /// carries the store extent when the store is not empty.
    pub fn export(&self) -> Result<Bytes> {
        let store = self.store.read();
        let features: Vec<::geojson::Feature> = store.iter().map(feature_to_geojson).collect();
        let collection = FeatureCollection {
            bbox: store.extent().ok().as_ref().map(bbox_to_geojson),
            features,
            foreign_members: None,
        };
        drop(store);

        let json = serde_json::to_vec(&collection).map_err(|e| {
            GeoQueryError::Serialization(format!("Failed to serialize feature collection: {}", e))
        })?;
        log::info!(
            "Exported {} features ({} bytes)",
            collection.features.len(),
            json.len()
        );
        Ok(Bytes::from(json))
    }
}

/// Parse and validate a GeoJSON document into store-ready items.
///
/// Errors name the zero-based position of the first bad feature. Features
/// with geometry types other than Point, Polygon, MultiPoint and
/// MultiPolygon are rejected; features with a null geometry are skipped
/// with a warning. Positions need at least two values; extra values
/// (altitude) are ignored.
pub fn parse_feature_collection(
    bytes: &[u8],
    config: &Config,
) -> Result<Vec<(Geometry, Attributes)>> {
    let document: GeoJson = serde_json::from_slice(bytes)
        .map_err(|e| GeoQueryError::parse(format!("invalid GeoJSON: {}", e)))?;

    let features = match document {
        GeoJson::FeatureCollection(collection) => collection.features,
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::Geometry(_) => {
            return Err(GeoQueryError::parse(
                "expected a FeatureCollection or Feature, found a bare Geometry",
            ));
        }
    };

    let mut items = Vec::with_capacity(features.len());
    for (index, feature) in features.into_iter().enumerate() {
        if let Some(item) = convert_feature(feature, index, config)? {
            items.push(item);
        }
    }
    Ok(items)
}

fn convert_feature(
    feature: ::geojson::Feature,
    index: usize,
    config: &Config,
) -> Result<Option<(Geometry, Attributes)>> {
    let Some(geometry) = feature.geometry else {
        log::warn!("Skipping feature {}: no geometry", index);
        return Ok(None);
    };
    let geometry = convert_geometry(&geometry.value, index)?;
    validate_geometry(&geometry, config)
        .map_err(|e| GeoQueryError::parse_at(index, e.to_string()))?;

    let attributes = feature
        .properties
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, AttributeValue::from(value)))
        .collect();
    Ok(Some((geometry, attributes)))
}

fn convert_geometry(value: &Value, index: usize) -> Result<Geometry> {
    let geometry = match value {
        Value::Point(position) => {
            let (lon, lat) = convert_position(position, index)?;
            Geometry::point(lon, lat)
        }
        Value::MultiPoint(points) => Geometry::multi_point(convert_positions(points, index)?),
        Value::Polygon(rings) => {
            let (exterior, holes) = convert_rings(rings, index)?;
            Geometry::polygon(exterior, holes)
        }
        Value::MultiPolygon(polygons) => Geometry::multi_polygon(
            polygons
                .iter()
                .map(|rings| convert_rings(rings, index))
                .collect::<Result<Vec<_>>>()?,
        ),
        Value::LineString(_) => return Err(unsupported(index, "LineString")),
        Value::MultiLineString(_) => return Err(unsupported(index, "MultiLineString")),
        Value::GeometryCollection(_) => return Err(unsupported(index, "GeometryCollection")),
    };
    geometry.map_err(|e| GeoQueryError::parse_at(index, e.to_string()))
}

fn unsupported(index: usize, kind: &str) -> GeoQueryError {
    GeoQueryError::parse_at(index, format!("unsupported geometry type: {}", kind))
}

fn convert_position(position: &[f64], index: usize) -> Result<(f64, f64)> {
    match position {
        [lon, lat, ..] => Ok((*lon, *lat)),
        _ => Err(GeoQueryError::parse_at(
            index,
            format!("position needs at least 2 values, got {}", position.len()),
        )),
    }
}

fn convert_positions(positions: &[Vec<f64>], index: usize) -> Result<Vec<(f64, f64)>> {
    positions
        .iter()
        .map(|position| convert_position(position, index))
        .collect()
}

fn convert_rings(rings: &[Vec<Vec<f64>>], index: usize) -> Result<Rings> {
    let mut rings = rings.iter().map(|ring| convert_positions(ring, index));
    let exterior = rings
        .next()
        .ok_or_else(|| GeoQueryError::parse_at(index, "polygon has no rings"))??;
    let holes = rings.collect::<Result<Vec<_>>>()?;
    Ok((exterior, holes))
}

/// GeoJSON representation of one stored feature, including its id and box.
pub fn feature_to_geojson(feature: &Feature) -> ::geojson::Feature {
    let properties = feature
        .attributes()
        .iter()
        .map(|(key, value)| (key.clone(), serde_json::Value::from(value)))
        .collect();

    ::geojson::Feature {
        bbox: Some(bbox_to_geojson(&feature.bbox())),
        geometry: Some(::geojson::Geometry::new(geometry_to_value(feature.geometry()))),
        id: Some(Id::Number(feature.id().get().into())),
        properties: Some(properties),
        foreign_members: None,
    }
}

fn geometry_to_value(geometry: &Geometry) -> Value {
    match geometry {
        Geometry::Point(p) => Value::Point(vec![p.x(), p.y()]),
        Geometry::MultiPoint(mp) => Value::MultiPoint(mp.iter().map(|p| vec![p.x(), p.y()]).collect()),
        Geometry::Polygon(polygon) => Value::Polygon(polygon_rings(polygon)),
        Geometry::MultiPolygon(mp) => Value::MultiPolygon(mp.iter().map(polygon_rings).collect()),
    }
}

fn polygon_rings(polygon: &Polygon<f64>) -> Vec<Vec<Vec<f64>>> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(|ring| ring.coords().map(|c| vec![c.x, c.y]).collect())
        .collect()
}

fn bbox_to_geojson(bbox: &BoundingBox) -> Vec<f64> {
    vec![bbox.min_lon(), bbox.min_lat(), bbox.max_lon(), bbox.max_lat()]
}
