//! Geometry computations behind the store and query engine.
//!
//! - [`distance`]: metrics, exact feature distances and index lower bounds
//! - [`validation`]: coordinate, geometry and query-argument checks
//! - [`spatial`]: the bounding-box tree used for every spatial lookup
//!
//! Nothing here takes a lock; callers hold whatever guard they need.

pub mod cancel;
pub mod distance;
pub mod spatial;
pub mod validation;
