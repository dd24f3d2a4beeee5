use geo::{Point, Rect};
use serde::{Deserialize, Serialize};

/// A 2D axis-aligned bounding box in longitude/latitude degrees.
///
/// Degenerate boxes (zero width or height) are valid and are what every
/// point feature produces. Construction through [`BoundingBox::new`] does
/// not check ordering; use [`BoundingBox::try_new`] when the corners come
/// from untrusted input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    min_lon: f64,
    min_lat: f64,
    max_lon: f64,
    max_lat: f64,
}

impl BoundingBox {
    /// Create a new bounding box from its corners.
    ///
    /// # Examples
    ///
    /// ```
    /// use geoquery_types::bbox::BoundingBox;
    ///
    /// let bbox = BoundingBox::new(-74.0, 40.7, -73.9, 40.8);
    /// assert!(bbox.contains_point(-73.95, 40.75));
    /// ```
    pub const fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// Create a bounding box, rejecting non-finite corners and inverted axes.
    pub fn try_new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self, String> {
        if ![min_lon, min_lat, max_lon, max_lat]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(format!(
                "bounding box corners must be finite, got ({}, {}, {}, {})",
                min_lon, min_lat, max_lon, max_lat
            ));
        }
        if min_lon > max_lon {
            return Err(format!(
                "min_lon ({}) must be <= max_lon ({})",
                min_lon, max_lon
            ));
        }
        if min_lat > max_lat {
            return Err(format!(
                "min_lat ({}) must be <= max_lat ({})",
                min_lat, max_lat
            ));
        }
        Ok(Self::new(min_lon, min_lat, max_lon, max_lat))
    }

    /// Degenerate box covering a single position.
    pub const fn from_point(lon: f64, lat: f64) -> Self {
        Self::new(lon, lat, lon, lat)
    }

    /// Convert a `geo::Rect` (already normalised by `geo`).
    pub fn from_rect(rect: Rect) -> Self {
        Self::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }

    pub fn to_rect(&self) -> Rect {
        Rect::new(
            geo::coord! { x: self.min_lon, y: self.min_lat },
            geo::coord! { x: self.max_lon, y: self.max_lat },
        )
    }

    #[inline]
    pub fn min_lon(&self) -> f64 {
        self.min_lon
    }

    #[inline]
    pub fn min_lat(&self) -> f64 {
        self.min_lat
    }

    #[inline]
    pub fn max_lon(&self) -> f64 {
        self.max_lon
    }

    #[inline]
    pub fn max_lat(&self) -> f64 {
        self.max_lat
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    /// Area in square degrees. Zero for degenerate boxes.
    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Half the perimeter; used to break ties between zero-area boxes.
    pub fn margin(&self) -> f64 {
        self.width() + self.height()
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.min_lon + self.max_lon) / 2.0,
            (self.min_lat + self.max_lat) / 2.0,
        )
    }

    /// Smallest box covering both `self` and `other`.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox::new(
            self.min_lon.min(other.min_lon),
            self.min_lat.min(other.min_lat),
            self.max_lon.max(other.max_lon),
            self.max_lat.max(other.max_lat),
        )
    }

    pub fn expand_to_include(&mut self, other: &BoundingBox) {
        *self = self.union(other);
    }

    /// Area growth needed for `self` to also cover `other`.
    pub fn enlargement(&self, other: &BoundingBox) -> f64 {
        self.union(other).area() - self.area()
    }

    /// Boundary-inclusive overlap test.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && self.max_lon >= other.min_lon
            && self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
    }

    /// Boundary-inclusive point containment.
    pub fn contains_point(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    /// True when `other` lies entirely inside `self` (shared edges allowed).
    pub fn contains_box(&self, other: &BoundingBox) -> bool {
        other.min_lon >= self.min_lon
            && other.max_lon <= self.max_lon
            && other.min_lat >= self.min_lat
            && other.max_lat <= self.max_lat
    }

    /// True when `self` reaches any edge of `outer`.
    ///
    /// Extents are built by exact unions, so plain float equality is the
    /// right comparison here.
    pub fn touches_boundary_of(&self, outer: &BoundingBox) -> bool {
        self.min_lon == outer.min_lon
            || self.min_lat == outer.min_lat
            || self.max_lon == outer.max_lon
            || self.max_lat == outer.max_lat
    }

    /// Union of an iterator of boxes, `None` when it is empty.
    pub fn union_all<'a, I>(boxes: I) -> Option<BoundingBox>
    where
        I: IntoIterator<Item = &'a BoundingBox>,
    {
        boxes
            .into_iter()
            .copied()
            .reduce(|acc, bbox| acc.union(&bbox))
    }
}

impl From<Rect> for BoundingBox {
    fn from(rect: Rect) -> Self {
        Self::from_rect(rect)
    }
}
