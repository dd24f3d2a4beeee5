//! Stored features and their identifiers.

use geoquery_types::{Attributes, BoundingBox, Geometry};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable feature identifier, assigned by the store on insert.
///
/// Ids increase monotonically and are never reused by the same store, even
/// across bulk reloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureId(u64);

impl FeatureId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for FeatureId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// A geometry plus its attribute payload.
///
/// The bounding box is derived from the geometry and cached; it is
/// recomputed every time the geometry is replaced, so it always equals the
/// minimal box of the current shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feature {
    id: FeatureId,
    geometry: Geometry,
    attributes: Attributes,
    bbox: BoundingBox,
}

impl Feature {
    pub(crate) fn new(id: FeatureId, geometry: Geometry, attributes: Attributes) -> Self {
        let bbox = geometry.bbox();
        Self {
            id,
            geometry,
            attributes,
            bbox,
        }
    }

    pub fn id(&self) -> FeatureId {
        self.id
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    /// Attribute lookup by key.
    pub fn attribute(&self, key: &str) -> Option<&geoquery_types::AttributeValue> {
        self.attributes.get(key)
    }

    /// Display name taken from the first of `name`, `NAME` or `Name` that
    /// holds a string.
    pub fn name(&self) -> Option<&str> {
        ["name", "NAME", "Name"]
            .iter()
            .find_map(|key| self.attributes.get(*key).and_then(|v| v.as_str()))
    }

    pub(crate) fn set_geometry(&mut self, geometry: Geometry) {
        self.bbox = geometry.bbox();
        self.geometry = geometry;
    }

    pub(crate) fn set_attributes(&mut self, attributes: Attributes) {
        self.attributes = attributes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoquery_types::AttributeValue;

    #[test]
    fn test_bbox_follows_geometry() {
        let mut feature = Feature::new(
            FeatureId::new(1),
            Geometry::point(1.0, 2.0).unwrap(),
            Attributes::new(),
        );
        assert_eq!(feature.bbox(), BoundingBox::from_point(1.0, 2.0));

        feature.set_geometry(Geometry::multi_point(vec![(0.0, 0.0), (3.0, 5.0)]).unwrap());
        assert_eq!(feature.bbox(), BoundingBox::new(0.0, 0.0, 3.0, 5.0));
    }

    #[test]
    fn test_name_lookup_order() {
        let mut attrs = Attributes::new();
        attrs.insert("NAME".into(), AttributeValue::from("Upper"));
        attrs.insert("Name".into(), AttributeValue::from("Title"));
        let feature = Feature::new(FeatureId::new(7), Geometry::point(0.0, 0.0).unwrap(), attrs);
        assert_eq!(feature.name(), Some("Upper"));

        let mut attrs = Attributes::new();
        attrs.insert("name".into(), AttributeValue::Number(3.0));
        attrs.insert("Name".into(), AttributeValue::from("Fallback"));
        let feature = Feature::new(FeatureId::new(8), Geometry::point(0.0, 0.0).unwrap(), attrs);
        assert_eq!(feature.name(), Some("Fallback"));
    }
}
