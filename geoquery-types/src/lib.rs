//! # geoquery-types
//!
//! Core value types for the geoquery spatial engine.
//!
//! - **Bounding boxes**: `BoundingBox`, the axis-aligned rectangle every
//!   feature and index node is summarised by
//! - **Geometries**: `Geometry`, a validated tagged union of points,
//!   polygons and their multi-part forms
//! - **Attributes**: `AttributeValue` and the `Attributes` map carried by
//!   every feature
//!
//! All types are serializable with Serde and built on top of the `geo`
//! crate's geometric primitives. Coordinates are `(longitude, latitude)`
//! pairs in degrees; no coordinate-system transform is ever applied.
//!
//! ## Examples
//!
//! ```rust
//! use geoquery_types::geometry::Geometry;
//!
//! let park = Geometry::polygon(
//!     vec![(0.0, 0.0), (2.0, 0.0), (2.0, 1.0), (0.0, 1.0), (0.0, 0.0)],
//!     vec![],
//! )
//! .unwrap();
//!
//! let bbox = park.bbox();
//! assert_eq!(bbox.max_lon(), 2.0);
//! assert_eq!(bbox.max_lat(), 1.0);
//! ```

pub mod attributes;
pub mod bbox;
pub mod geometry;

pub use attributes::{AttributeValue, Attributes};
pub use bbox::BoundingBox;
pub use geometry::{Geometry, GeometryError, GeometryKind};
