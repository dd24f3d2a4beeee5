//! Validated feature geometries.
//!
//! A [`Geometry`] can only be obtained through constructors that reject
//! malformed input (empty parts, short or open rings, NaN/infinite
//! coordinates), so everything downstream may assume well-formed shapes.

use crate::bbox::BoundingBox;
use geo::{BoundingRect, Coord, LineString, MultiPoint, MultiPolygon, Point, Polygon};
use serde::{Deserialize, Serialize};

/// Error type for rejected geometries.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// A coordinate was NaN or infinite
    NonFiniteCoordinate { lon: f64, lat: f64 },
    /// A coordinate fell outside [-180, 180] x [-90, 90]
    OutOfRange { lon: f64, lat: f64 },
    /// A multi-geometry had no parts, or a polygon had no rings
    Empty(&'static str),
    /// A polygon ring had fewer than four positions
    RingTooShort { ring: usize, len: usize },
    /// A polygon ring's first and last positions differ
    RingNotClosed { ring: usize },
    /// The geometry type is not one of the four supported kinds
    Unsupported(&'static str),
}

impl std::fmt::Display for GeometryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonFiniteCoordinate { lon, lat } => {
                write!(f, "coordinate must be finite, got ({}, {})", lon, lat)
            }
            Self::OutOfRange { lon, lat } => write!(
                f,
                "coordinate ({}, {}) outside [-180, 180] x [-90, 90]",
                lon, lat
            ),
            Self::Empty(what) => write!(f, "{} must not be empty", what),
            Self::RingTooShort { ring, len } => write!(
                f,
                "ring {} has {} positions, at least 4 are required",
                ring, len
            ),
            Self::RingNotClosed { ring } => {
                write!(f, "ring {} is not closed (first position != last)", ring)
            }
            Self::Unsupported(kind) => write!(f, "unsupported geometry type: {}", kind),
        }
    }
}

impl std::error::Error for GeometryError {}

/// Discriminant of a [`Geometry`], handy for statistics and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryKind {
    Point,
    Polygon,
    MultiPoint,
    MultiPolygon,
}

impl std::fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Point => "Point",
            Self::Polygon => "Polygon",
            Self::MultiPoint => "MultiPoint",
            Self::MultiPolygon => "MultiPolygon",
        };
        f.write_str(name)
    }
}

/// Feature geometry: a point, a polygon, or a multi-part form of either.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    Point(Point<f64>),
    Polygon(Polygon<f64>),
    MultiPoint(MultiPoint<f64>),
    MultiPolygon(MultiPolygon<f64>),
}

impl Geometry {
    /// Point at `(lon, lat)`.
    ///
    /// # Examples
    ///
    /// ```
    /// use geoquery_types::geometry::Geometry;
    ///
    /// assert!(Geometry::point(36.8219, -1.2921).is_ok());
    /// assert!(Geometry::point(f64::NAN, 0.0).is_err());
    /// ```
    pub fn point(lon: f64, lat: f64) -> Result<Self, GeometryError> {
        check_finite(lon, lat)?;
        Ok(Self::Point(Point::new(lon, lat)))
    }

    /// Polygon from an exterior ring and optional holes.
    ///
    /// Every ring must be explicitly closed and hold at least four
    /// positions; open rings are rejected rather than closed silently.
    pub fn polygon(
        exterior: Vec<(f64, f64)>,
        holes: Vec<Vec<(f64, f64)>>,
    ) -> Result<Self, GeometryError> {
        Ok(Self::Polygon(build_polygon(exterior, holes)?))
    }

    pub fn multi_point(points: Vec<(f64, f64)>) -> Result<Self, GeometryError> {
        if points.is_empty() {
            return Err(GeometryError::Empty("multi-point"));
        }
        for &(lon, lat) in &points {
            check_finite(lon, lat)?;
        }
        Ok(Self::MultiPoint(MultiPoint::from(points)))
    }

    /// Multi-polygon from `(exterior, holes)` pairs.
    pub fn multi_polygon(
        polygons: Vec<(Vec<(f64, f64)>, Vec<Vec<(f64, f64)>>)>,
    ) -> Result<Self, GeometryError> {
        if polygons.is_empty() {
            return Err(GeometryError::Empty("multi-polygon"));
        }
        let polygons = polygons
            .into_iter()
            .map(|(exterior, holes)| build_polygon(exterior, holes))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::MultiPolygon(MultiPolygon::new(polygons)))
    }

    /// Wrap an existing `geo` geometry after validating it.
    ///
    /// Only points, polygons, multi-points and multi-polygons are accepted.
    pub fn from_geo(geometry: geo::Geometry<f64>) -> Result<Self, GeometryError> {
        let geometry = match geometry {
            geo::Geometry::Point(p) => Self::Point(p),
            geo::Geometry::Polygon(p) => Self::Polygon(p),
            geo::Geometry::MultiPoint(mp) => Self::MultiPoint(mp),
            geo::Geometry::MultiPolygon(mp) => Self::MultiPolygon(mp),
            geo::Geometry::Line(_) => return Err(GeometryError::Unsupported("Line")),
            geo::Geometry::LineString(_) => return Err(GeometryError::Unsupported("LineString")),
            geo::Geometry::MultiLineString(_) => {
                return Err(GeometryError::Unsupported("MultiLineString"));
            }
            geo::Geometry::GeometryCollection(_) => {
                return Err(GeometryError::Unsupported("GeometryCollection"));
            }
            geo::Geometry::Rect(_) => return Err(GeometryError::Unsupported("Rect")),
            geo::Geometry::Triangle(_) => return Err(GeometryError::Unsupported("Triangle")),
        };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Re-check the structural invariants.
    pub fn validate(&self) -> Result<(), GeometryError> {
        match self {
            Self::Point(p) => check_finite(p.x(), p.y()),
            Self::Polygon(p) => validate_polygon(p),
            Self::MultiPoint(mp) => {
                if mp.0.is_empty() {
                    return Err(GeometryError::Empty("multi-point"));
                }
                mp.iter().try_for_each(|p| check_finite(p.x(), p.y()))
            }
            Self::MultiPolygon(mp) => {
                if mp.0.is_empty() {
                    return Err(GeometryError::Empty("multi-polygon"));
                }
                mp.iter().try_for_each(validate_polygon)
            }
        }
    }

    pub fn kind(&self) -> GeometryKind {
        match self {
            Self::Point(_) => GeometryKind::Point,
            Self::Polygon(_) => GeometryKind::Polygon,
            Self::MultiPoint(_) => GeometryKind::MultiPoint,
            Self::MultiPolygon(_) => GeometryKind::MultiPolygon,
        }
    }

    /// Minimal axis-aligned box containing every position of the geometry.
    pub fn bbox(&self) -> BoundingBox {
        let bbox = match self {
            Self::Point(p) => Some(BoundingBox::from_point(p.x(), p.y())),
            Self::Polygon(p) => polygon_bbox(p),
            Self::MultiPoint(mp) => mp.bounding_rect().map(BoundingBox::from_rect),
            Self::MultiPolygon(mp) => mp.iter().filter_map(polygon_bbox).reduce(|a, b| a.union(&b)),
        };
        // Validated geometries are never empty, so a box always exists.
        bbox.unwrap_or(BoundingBox::from_point(0.0, 0.0))
    }

    /// Every position in the geometry, rings included.
    pub fn coords(&self) -> Vec<Coord<f64>> {
        match self {
            Self::Point(p) => vec![p.0],
            Self::Polygon(p) => polygon_coords(p),
            Self::MultiPoint(mp) => mp.iter().map(|p| p.0).collect(),
            Self::MultiPolygon(mp) => mp.iter().flat_map(polygon_coords).collect(),
        }
    }

    pub fn to_geo(&self) -> geo::Geometry<f64> {
        match self {
            Self::Point(p) => geo::Geometry::Point(*p),
            Self::Polygon(p) => geo::Geometry::Polygon(p.clone()),
            Self::MultiPoint(mp) => geo::Geometry::MultiPoint(mp.clone()),
            Self::MultiPolygon(mp) => geo::Geometry::MultiPolygon(mp.clone()),
        }
    }
}

/// Holes are not required to lie inside the exterior, so they count too.
fn polygon_bbox(polygon: &Polygon<f64>) -> Option<BoundingBox> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .filter_map(|ring| ring.bounding_rect())
        .map(BoundingBox::from_rect)
        .reduce(|a, b| a.union(&b))
}

fn polygon_coords(polygon: &Polygon<f64>) -> Vec<Coord<f64>> {
    polygon
        .exterior()
        .coords()
        .chain(polygon.interiors().iter().flat_map(|ring| ring.coords()))
        .copied()
        .collect()
}

fn check_finite(lon: f64, lat: f64) -> Result<(), GeometryError> {
    if lon.is_finite() && lat.is_finite() {
        Ok(())
    } else {
        Err(GeometryError::NonFiniteCoordinate { lon, lat })
    }
}

fn check_ring(ring: &[(f64, f64)], index: usize) -> Result<(), GeometryError> {
    for &(lon, lat) in ring {
        check_finite(lon, lat)?;
    }
    if ring.len() < 4 {
        return Err(GeometryError::RingTooShort {
            ring: index,
            len: ring.len(),
        });
    }
    if ring.first() != ring.last() {
        return Err(GeometryError::RingNotClosed { ring: index });
    }
    Ok(())
}

fn build_polygon(
    exterior: Vec<(f64, f64)>,
    holes: Vec<Vec<(f64, f64)>>,
) -> Result<Polygon<f64>, GeometryError> {
    if exterior.is_empty() {
        return Err(GeometryError::Empty("polygon exterior ring"));
    }
    check_ring(&exterior, 0)?;
    for (i, hole) in holes.iter().enumerate() {
        check_ring(hole, i + 1)?;
    }
    Ok(Polygon::new(
        LineString::from(exterior),
        holes.into_iter().map(LineString::from).collect(),
    ))
}

fn validate_polygon(polygon: &Polygon<f64>) -> Result<(), GeometryError> {
    let rings = std::iter::once(polygon.exterior()).chain(polygon.interiors().iter());
    for (index, ring) in rings.enumerate() {
        if index == 0 && ring.0.is_empty() {
            return Err(GeometryError::Empty("polygon exterior ring"));
        }
        let positions: Vec<(f64, f64)> = ring.coords().map(|c| (c.x, c.y)).collect();
        check_ring(&positions, index)?;
    }
    Ok(())
}
