//! Distance metrics between query points, geometries and index boxes.
//!
//! Every nearest-neighbour query uses exactly one [`DistanceMetric`] for
//! both the exact feature distances and the per-node lower bounds, so the
//! relative ordering of results is stable.
//!
//! Polygon edges are straight lines in longitude/latitude space (as GeoJSON
//! defines them). Under [`DistanceMetric::Haversine`] the distance to an
//! edge is the smallest great-circle distance to any position on that
//! edge. Every candidate position stays on the edge, and so inside the
//! feature's bounding box, which the index lower bound relies on.

use geo::{Closest, ClosestPoint, Distance, Euclidean, Haversine, HaversineMeasure, Intersects};
use geo::{Point, Polygon};
use geoquery_types::{BoundingBox, Geometry};
use serde::{Deserialize, Serialize};

/// Distance metrics for nearest-neighbour ordering.
///
/// - **Euclidean**: planar distance in degrees; fast and exact for the index
///   lower bound
/// - **Haversine**: great-circle distance in metres on a spherical Earth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Planar distance in coordinate units (degrees)
    #[default]
    Euclidean,
    /// Great-circle distance in metres
    Haversine,
}

/// Calculate the distance between two points using the specified metric.
///
/// # Examples
///
/// ```rust
/// use geo::Point;
/// use geoquery::compute::distance::{DistanceMetric, distance_between};
///
/// let a = Point::new(0.0, 0.0);
/// let b = Point::new(3.0, 4.0);
/// assert_eq!(distance_between(&a, &b, DistanceMetric::Euclidean), 5.0);
///
/// let nairobi = Point::new(36.8219, -1.2921);
/// let mombasa = Point::new(39.6682, -4.0435);
/// let metres = distance_between(&nairobi, &mombasa, DistanceMetric::Haversine);
/// assert!(metres > 400_000.0 && metres < 450_000.0);
/// ```
pub fn distance_between(a: &Point, b: &Point, metric: DistanceMetric) -> f64 {
    match metric {
        DistanceMetric::Euclidean => Euclidean.distance(*a, *b),
        DistanceMetric::Haversine => Haversine.distance(*a, *b),
    }
}

/// Distance from `point` to the nearest part of `geometry`.
///
/// Zero when the point lies inside (or on the boundary of) a polygon.
pub fn distance_to_geometry(point: &Point, geometry: &Geometry, metric: DistanceMetric) -> f64 {
    match geometry {
        Geometry::Point(p) => distance_between(point, p, metric),
        Geometry::MultiPoint(mp) => mp
            .iter()
            .map(|p| distance_between(point, p, metric))
            .fold(f64::INFINITY, f64::min),
        Geometry::Polygon(polygon) => distance_to_polygon(point, polygon, metric),
        Geometry::MultiPolygon(mp) => mp
            .iter()
            .map(|polygon| distance_to_polygon(point, polygon, metric))
            .fold(f64::INFINITY, f64::min),
    }
}

fn distance_to_polygon(point: &Point, polygon: &Polygon, metric: DistanceMetric) -> f64 {
    if polygon.intersects(point) {
        return 0.0;
    }
    match metric {
        DistanceMetric::Euclidean => match polygon.closest_point(point) {
            Closest::Intersection(_) => 0.0,
            Closest::SinglePoint(nearest) => Euclidean.distance(*point, nearest),
            Closest::Indeterminate => f64::INFINITY,
        },
        DistanceMetric::Haversine => std::iter::once(polygon.exterior())
            .chain(polygon.interiors())
            .flat_map(|ring| ring.lines())
            .map(|edge| haversine_to_edge(point, edge.start_point(), edge.end_point()))
            .fold(f64::INFINITY, f64::min),
    }
}

/// Samples per edge before the golden-section refinement.
const EDGE_SAMPLES: usize = 16;
const GOLDEN_ITERATIONS: usize = 48;
const INV_PHI: f64 = 0.618_033_988_749_894_9;

/// Smallest great-circle distance from `point` to the lon/lat segment `a`-`b`.
///
/// Meridian edges use the closed form. Other edges are sampled at even
/// steps and the best bracket is narrowed by golden-section search.
fn haversine_to_edge(point: &Point, a: Point, b: Point) -> f64 {
    if a.x() == b.x() {
        let (south, north) = if a.y() <= b.y() { (a.y(), b.y()) } else { (b.y(), a.y()) };
        return distance_to_meridian_segment(point, a.x(), south, north);
    }

    let at = |t: f64| {
        let on_edge = Point::new(a.x() + t * (b.x() - a.x()), a.y() + t * (b.y() - a.y()));
        Haversine.distance(*point, on_edge)
    };

    let step = 1.0 / EDGE_SAMPLES as f64;
    let (mut best_t, mut best) = (0.0, at(0.0));
    for i in 1..=EDGE_SAMPLES {
        let t = i as f64 * step;
        let d = at(t);
        if d < best {
            best = d;
            best_t = t;
        }
    }

    let (mut lo, mut hi) = ((best_t - step).max(0.0), (best_t + step).min(1.0));
    let mut x1 = hi - INV_PHI * (hi - lo);
    let mut x2 = lo + INV_PHI * (hi - lo);
    let (mut f1, mut f2) = (at(x1), at(x2));
    for _ in 0..GOLDEN_ITERATIONS {
        if f1 < f2 {
            hi = x2;
            x2 = x1;
            f2 = f1;
            x1 = hi - INV_PHI * (hi - lo);
            f1 = at(x1);
        } else {
            lo = x1;
            x1 = x2;
            f1 = f2;
            x2 = lo + INV_PHI * (hi - lo);
            f2 = at(x2);
        }
    }
    best.min(f1).min(f2)
}

/// Lower bound on the distance from `point` to anything inside `bbox`.
///
/// Zero when the point is inside the box. Used to order index nodes in the
/// best-first nearest-neighbour search, so it must never exceed the true
/// distance to any geometry the box covers.
pub fn min_distance_to_bbox(point: &Point, bbox: &BoundingBox, metric: DistanceMetric) -> f64 {
    let (lon, lat) = (point.x(), point.y());
    if bbox.contains_point(lon, lat) {
        return 0.0;
    }
    match metric {
        DistanceMetric::Euclidean => {
            let dx = (bbox.min_lon() - lon).max(0.0).max(lon - bbox.max_lon());
            let dy = (bbox.min_lat() - lat).max(0.0).max(lat - bbox.max_lat());
            dx.hypot(dy)
        }
        DistanceMetric::Haversine => haversine_min_distance_to_bbox(point, bbox),
    }
}

/// Great-circle lower bound to a lon/lat box.
///
/// When the point's longitude falls within the box, the nearest position is
/// straight north or south along the meridian. Otherwise the nearest
/// position lies on one of the two meridian edges, since along a parallel
/// the distance only grows with the longitude offset.
fn haversine_min_distance_to_bbox(point: &Point, bbox: &BoundingBox) -> f64 {
    let (lon, lat) = (point.x(), point.y());
    if lon >= bbox.min_lon() && lon <= bbox.max_lon() {
        let clamped = Point::new(lon, lat.clamp(bbox.min_lat(), bbox.max_lat()));
        return Haversine.distance(*point, clamped);
    }
    let west = distance_to_meridian_segment(point, bbox.min_lon(), bbox.min_lat(), bbox.max_lat());
    let east = distance_to_meridian_segment(point, bbox.max_lon(), bbox.min_lat(), bbox.max_lat());
    west.min(east)
}

fn distance_to_meridian_segment(point: &Point, meridian: f64, min_lat: f64, max_lat: f64) -> f64 {
    let d_lon = (meridian - point.x()).to_radians();
    let phi = point.y().to_radians();
    if d_lon.cos() > 0.0 {
        // Latitude of the closest position on the full meridian, clamped to
        // the segment; distance along a meridian is unimodal.
        let nearest_lat = phi.sin().atan2(phi.cos() * d_lon.cos()).to_degrees();
        let clamped = Point::new(meridian, nearest_lat.clamp(min_lat, max_lat));
        Haversine.distance(*point, clamped)
    } else {
        let south = Haversine.distance(*point, Point::new(meridian, min_lat));
        let north = Haversine.distance(*point, Point::new(meridian, max_lat));
        south.min(north)
    }
}

/// Mean Earth radius used by the haversine metric, in metres.
pub fn earth_radius_m() -> f64 {
    HaversineMeasure::GRS80_MEAN_RADIUS.radius()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(min: f64, max: f64) -> Geometry {
        Geometry::polygon(
            vec![(min, min), (max, min), (max, max), (min, max), (min, min)],
            vec![],
        )
        .unwrap()
    }

    #[test]
    fn test_point_inside_polygon_is_zero() {
        let poly = square(0.0, 10.0);
        for metric in [DistanceMetric::Euclidean, DistanceMetric::Haversine] {
            assert_eq!(distance_to_geometry(&Point::new(5.0, 5.0), &poly, metric), 0.0);
            assert_eq!(distance_to_geometry(&Point::new(10.0, 5.0), &poly, metric), 0.0);
        }
    }

    #[test]
    fn test_point_in_hole_measures_to_hole_edge() {
        let poly = Geometry::polygon(
            vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0), (0.0, 0.0)],
            vec![vec![(4.0, 4.0), (6.0, 4.0), (6.0, 6.0), (4.0, 6.0), (4.0, 4.0)]],
        )
        .unwrap();
        let d = distance_to_geometry(&Point::new(5.0, 5.0), &poly, DistanceMetric::Euclidean);
        assert!((d - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_euclidean_polygon_edge_distance() {
        let poly = square(0.0, 10.0);
        let d = distance_to_geometry(&Point::new(13.0, 14.0), &poly, DistanceMetric::Euclidean);
        assert!((d - 5.0).abs() < 1e-12);
        let d = distance_to_geometry(&Point::new(-2.0, 5.0), &poly, DistanceMetric::Euclidean);
        assert!((d - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_multi_point_takes_minimum() {
        let mp = Geometry::multi_point(vec![(10.0, 0.0), (0.0, 2.0)]).unwrap();
        let d = distance_to_geometry(&Point::new(0.0, 0.0), &mp, DistanceMetric::Euclidean);
        assert_eq!(d, 2.0);
    }

    #[test]
    fn test_euclidean_bbox_bound() {
        let bbox = BoundingBox::new(0.0, 0.0, 2.0, 2.0);
        assert_eq!(
            min_distance_to_bbox(&Point::new(1.0, 1.0), &bbox, DistanceMetric::Euclidean),
            0.0
        );
        assert_eq!(
            min_distance_to_bbox(&Point::new(5.0, 1.0), &bbox, DistanceMetric::Euclidean),
            3.0
        );
        assert_eq!(
            min_distance_to_bbox(&Point::new(5.0, 6.0), &bbox, DistanceMetric::Euclidean),
            5.0
        );
    }

    #[test]
    fn test_haversine_bound_never_exceeds_contents() {
        let bbox = BoundingBox::new(10.0, 40.0, 20.0, 60.0);
        let probes = [
            Point::new(0.0, 50.0),
            Point::new(30.0, 80.0),
            Point::new(15.0, -10.0),
            Point::new(-170.0, 50.0),
            Point::new(100.0, 0.0),
            Point::new(25.0, 61.0),
        ];
        let samples: Vec<Point> = (0..=10)
            .flat_map(|i| {
                (0..=10).map(move |j| {
                    Point::new(10.0 + i as f64, 40.0 + 2.0 * j as f64)
                })
            })
            .collect();

        for probe in probes {
            let bound = min_distance_to_bbox(&probe, &bbox, DistanceMetric::Haversine);
            let nearest = samples
                .iter()
                .map(|s| Haversine.distance(probe, *s))
                .fold(f64::INFINITY, f64::min);
            assert!(
                bound <= nearest + 1e-6,
                "bound {} exceeds sampled minimum {} for {:?}",
                bound,
                nearest,
                probe
            );
        }
    }

    /// Dense walk along every edge of a polygon's rings.
    fn sampled_haversine(point: Point, geometry: &Geometry) -> f64 {
        let Geometry::Polygon(polygon) = geometry else {
            panic!("expected polygon");
        };
        std::iter::once(polygon.exterior())
            .chain(polygon.interiors())
            .flat_map(|ring| ring.lines())
            .flat_map(|edge| {
                (0..=20_000).map(move |i| {
                    let t = i as f64 / 20_000.0;
                    Point::new(
                        edge.start.x + t * (edge.end.x - edge.start.x),
                        edge.start.y + t * (edge.end.y - edge.start.y),
                    )
                })
            })
            .map(|p| Haversine.distance(point, p))
            .fold(f64::INFINITY, f64::min)
    }

    #[test]
    fn test_haversine_polygon_distance_on_meridian_edge() {
        let poly = square(0.0, 60.0);
        let probe = Point::new(100.0, 10.0);
        let d = distance_to_geometry(&probe, &poly, DistanceMetric::Haversine);
        let sampled = sampled_haversine(probe, &poly);
        assert!(d <= sampled + 1e-6, "{} > sampled {}", d, sampled);
        assert!(sampled - d < 1.0, "{} far below sampled {}", d, sampled);
        // Planar-closest point (60, 10) is kilometres further away.
        assert!(Haversine.distance(probe, Point::new(60.0, 10.0)) - d > 5_000.0);
    }

    #[test]
    fn test_haversine_polygon_distance_on_slanted_edge() {
        let triangle = Geometry::polygon(
            vec![(0.0, 0.0), (50.0, 0.0), (0.0, 70.0), (0.0, 0.0)],
            vec![],
        )
        .unwrap();
        for probe in [Point::new(60.0, 40.0), Point::new(35.0, 65.0), Point::new(-20.0, 80.0)] {
            let d = distance_to_geometry(&probe, &triangle, DistanceMetric::Haversine);
            let sampled = sampled_haversine(probe, &triangle);
            assert!(d <= sampled + 1e-6, "{} > sampled {} for {:?}", d, sampled, probe);
            assert!(sampled - d < 1.0, "{} far below sampled {} for {:?}", d, sampled, probe);
            let bound = min_distance_to_bbox(&probe, &triangle.bbox(), DistanceMetric::Haversine);
            assert!(bound <= d + 1e-6);
        }
    }

    #[test]
    fn test_haversine_bound_tight_on_meridian() {
        let bbox = BoundingBox::new(0.0, 10.0, 1.0, 11.0);
        let probe = Point::new(0.5, 9.0);
        let bound = min_distance_to_bbox(&probe, &bbox, DistanceMetric::Haversine);
        let exact = Haversine.distance(probe, Point::new(0.5, 10.0));
        assert!((bound - exact).abs() < 1e-6);
        assert!((exact - earth_radius_m() * 1f64.to_radians()).abs() < 1e-3);
    }
}
