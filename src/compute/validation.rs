//! Validation for geographic coordinates, geometries and query inputs.

use crate::config::Config;
use crate::error::{GeoQueryError, Result};
use geoquery_types::{BoundingBox, Geometry, GeometryError};

/// Validates a longitude/latitude pair.
///
/// Coordinates must be finite. With `check_ranges`, longitude must also lie
/// in [-180.0, 180.0] and latitude in [-90.0, 90.0].
///
/// # Examples
///
/// ```
/// use geoquery::compute::validation::validate_coord;
///
/// assert!(validate_coord(-74.0060, 40.7128, true).is_ok());
/// assert!(validate_coord(200.0, 40.0, true).is_err());
/// assert!(validate_coord(200.0, 40.0, false).is_ok());
/// assert!(validate_coord(f64::NAN, 40.0, false).is_err());
/// ```
pub fn validate_coord(lon: f64, lat: f64, check_ranges: bool) -> std::result::Result<(), GeometryError> {
    if !lon.is_finite() || !lat.is_finite() {
        return Err(GeometryError::NonFiniteCoordinate { lon, lat });
    }
    if check_ranges && (!(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat)) {
        return Err(GeometryError::OutOfRange { lon, lat });
    }
    Ok(())
}

/// Validates a geometry's structure and, if configured, its coordinate ranges.
pub fn validate_geometry(geometry: &Geometry, config: &Config) -> std::result::Result<(), GeometryError> {
    geometry.validate()?;
    if config.validate_ranges {
        for coord in geometry.coords() {
            validate_coord(coord.x, coord.y, true)?;
        }
    }
    Ok(())
}

/// Validates the centre point of a nearest-neighbour or containment query.
pub fn validate_query_point(lon: f64, lat: f64) -> Result<()> {
    if !lon.is_finite() || !lat.is_finite() {
        log::warn!("Rejecting point query with non-finite coordinates");
        return Err(GeoQueryError::InvalidArgument(format!(
            "query point must be finite, got ({}, {})",
            lon, lat
        )));
    }
    Ok(())
}

/// Builds a query box, rejecting non-finite corners and inverted axes.
pub fn validate_query_bbox(
    min_lon: f64,
    min_lat: f64,
    max_lon: f64,
    max_lat: f64,
) -> Result<BoundingBox> {
    BoundingBox::try_new(min_lon, min_lat, max_lon, max_lat).map_err(|message| {
        log::warn!("Rejecting bounding box query: {}", message);
        GeoQueryError::InvalidArgument(message)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_coordinates_valid() {
        assert!(validate_coord(180.0, 0.0, true).is_ok());
        assert!(validate_coord(-180.0, 0.0, true).is_ok());
        assert!(validate_coord(0.0, 90.0, true).is_ok());
        assert!(validate_coord(0.0, -90.0, true).is_ok());
    }

    #[test]
    fn test_out_of_range_coordinates() {
        assert_eq!(
            validate_coord(180.1, 40.0, true),
            Err(GeometryError::OutOfRange {
                lon: 180.1,
                lat: 40.0
            })
        );
        assert!(validate_coord(-74.0, -90.1, true).is_err());
    }

    #[test]
    fn test_non_finite_coordinates() {
        assert!(validate_coord(f64::NAN, 40.0, false).is_err());
        assert!(validate_coord(-74.0, f64::INFINITY, false).is_err());
        assert!(validate_coord(f64::NEG_INFINITY, 0.0, true).is_err());
    }

    #[test]
    fn test_geometry_range_check_follows_config() {
        let far_east = Geometry::multi_point(vec![(10.0, 10.0), (250.0, 10.0)]).unwrap();

        let strict = Config::default();
        assert!(matches!(
            validate_geometry(&far_east, &strict),
            Err(GeometryError::OutOfRange { .. })
        ));

        let relaxed = Config::default().with_range_validation(false);
        assert!(validate_geometry(&far_east, &relaxed).is_ok());
    }

    #[test]
    fn test_query_bbox_validation() {
        assert!(validate_query_bbox(0.0, 0.0, 1.0, 1.0).is_ok());
        assert!(matches!(
            validate_query_bbox(2.0, 0.0, 1.0, 1.0),
            Err(GeoQueryError::InvalidArgument(_))
        ));
        assert!(matches!(
            validate_query_bbox(0.0, 0.0, 1.0, f64::NAN),
            Err(GeoQueryError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_query_point_validation() {
        assert!(validate_query_point(0.0, 0.0).is_ok());
        assert!(validate_query_point(f64::NAN, 0.0).is_err());
    }
}
