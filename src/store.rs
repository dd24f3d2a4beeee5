//! Feature storage with an always-synchronized spatial index.
//!
//! `FeatureStore` owns every [`Feature`] and the [`RTree`] over their
//! bounding boxes. All writes validate first and mutate second, so a failed
//! call leaves both the map and the index exactly as they were.

use crate::compute::spatial::{IndexEntry, RTree};
use crate::compute::validation::validate_geometry;
use crate::config::Config;
use crate::error::{GeoQueryError, Result};
use crate::feature::{Feature, FeatureId};
use geoquery_types::{Attributes, BoundingBox, Geometry};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Cached union of all feature boxes.
///
/// Inserts widen the cache in place. A delete only marks it dirty when the
/// removed box reached the cached boundary; the next [`FeatureStore::extent`]
/// call recomputes it.
#[derive(Debug, Clone, Copy, Default)]
struct ExtentCache {
    bounds: Option<BoundingBox>,
    dirty: bool,
}

impl ExtentCache {
    fn grow(&mut self, bbox: &BoundingBox) {
        if self.dirty {
            return;
        }
        self.bounds = Some(match self.bounds {
            Some(bounds) => bounds.union(bbox),
            None => *bbox,
        });
    }

    fn shrink(&mut self, removed: &BoundingBox) {
        if let Some(bounds) = self.bounds
            && removed.touches_boundary_of(&bounds)
        {
            self.dirty = true;
        }
    }
}

/// A validated replacement batch, indexed and ready to swap into a store.
///
/// Building one does not touch any store, so it can happen outside a lock.
#[derive(Debug)]
pub struct StagedLoad {
    features: FxHashMap<FeatureId, Feature>,
    index: RTree,
    extent: Option<BoundingBox>,
}

impl StagedLoad {
    /// Validate every item, assign ids from `first_id` upward, and pack the
    /// index. Fails on the first invalid item.
    pub fn build(
        config: &Config,
        first_id: u64,
        items: Vec<(Geometry, Attributes)>,
    ) -> Result<Self> {
        for (position, (geometry, _)) in items.iter().enumerate() {
            validate_geometry(geometry, config).map_err(|e| {
                log::warn!("Bulk load rejected: item {} is invalid: {}", position, e);
                GeoQueryError::Geometry(e)
            })?;
        }

        let mut features = FxHashMap::default();
        features.reserve(items.len());
        let mut entries = Vec::with_capacity(items.len());
        let mut extent: Option<BoundingBox> = None;

        for (offset, (geometry, attributes)) in items.into_iter().enumerate() {
            let id = FeatureId::new(first_id + offset as u64);
            let feature = Feature::new(id, geometry, attributes);
            let bbox = feature.bbox();
            extent = Some(extent.map_or(bbox, |e| e.union(&bbox)));
            entries.push(IndexEntry::new(id, bbox));
            features.insert(id, feature);
        }

        Ok(Self {
            features,
            index: RTree::bulk_load(config.node_capacity, entries),
            extent,
        })
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Id-keyed feature map plus its spatial index.
///
/// # Examples
///
/// ```rust
/// use geoquery::{FeatureStore, Geometry, Attributes, GeoQueryError};
///
/// let mut store = FeatureStore::default();
/// let a = store.insert(Geometry::point(0.0, 0.0)?, Attributes::new())?;
/// let b = store.insert(Geometry::point(4.0, 2.0)?, Attributes::new())?;
/// assert_eq!(store.len(), 2);
/// assert_eq!(store.extent()?.max_lon(), 4.0);
///
/// store.delete(b)?;
/// assert_eq!(store.extent()?.max_lon(), 0.0);
/// assert!(matches!(store.get(b), Err(GeoQueryError::NotFound(_))));
/// assert!(store.get(a).is_ok());
/// # Ok::<(), GeoQueryError>(())
/// ```
#[derive(Debug)]
pub struct FeatureStore {
    features: FxHashMap<FeatureId, Feature>,
    index: RTree,
    next_id: u64,
    extent: Mutex<ExtentCache>,
    config: Config,
}

impl Default for FeatureStore {
    fn default() -> Self {
        Self::empty(Config::default())
    }
}

impl FeatureStore {
    /// Create an empty store, rejecting invalid configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::empty(config))
    }

    fn empty(config: Config) -> Self {
        Self {
            features: FxHashMap::default(),
            index: RTree::new(config.node_capacity),
            next_id: 1,
            extent: Mutex::new(ExtentCache::default()),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Read access to the spatial index.
    pub fn index(&self) -> &RTree {
        &self.index
    }

    // ===== Writes =====

    /// Validate and store a new feature, returning its freshly assigned id.
    pub fn insert(&mut self, geometry: Geometry, attributes: Attributes) -> Result<FeatureId> {
        validate_geometry(&geometry, &self.config)?;

        let id = FeatureId::new(self.next_id);
        self.next_id += 1;

        let feature = Feature::new(id, geometry, attributes);
        let bbox = feature.bbox();
        self.index.insert(id, bbox);
        self.features.insert(id, feature);
        self.extent.get_mut().grow(&bbox);
        Ok(id)
    }

    /// Replace a feature's geometry, attributes, or both.
    ///
    /// The index entry is only rebuilt when the bounding box actually moves.
    pub fn update(
        &mut self,
        id: FeatureId,
        geometry: Option<Geometry>,
        attributes: Option<Attributes>,
    ) -> Result<()> {
        if let Some(geometry) = &geometry {
            validate_geometry(geometry, &self.config)?;
        }
        let feature = self
            .features
            .get_mut(&id)
            .ok_or(GeoQueryError::NotFound(id))?;

        if let Some(geometry) = geometry {
            let old_bbox = feature.bbox();
            feature.set_geometry(geometry);
            let new_bbox = feature.bbox();
            if old_bbox != new_bbox {
                self.index.remove(id, &old_bbox);
                self.index.insert(id, new_bbox);
                let extent = self.extent.get_mut();
                extent.shrink(&old_bbox);
                extent.grow(&new_bbox);
            }
        }
        if let Some(attributes) = attributes {
            feature.set_attributes(attributes);
        }
        Ok(())
    }

    /// Remove a feature and return it.
    pub fn delete(&mut self, id: FeatureId) -> Result<Feature> {
        let feature = self.features.remove(&id).ok_or(GeoQueryError::NotFound(id))?;
        let bbox = feature.bbox();
        if !self.index.remove(id, &bbox) {
            log::warn!("Feature {} was missing from the spatial index", id);
        }
        self.extent.get_mut().shrink(&bbox);
        Ok(feature)
    }

    /// Replace the whole contents with `items`.
    ///
    /// Every item is validated before anything changes; on error the store is
    /// untouched. New features get fresh ids, continuing after the highest
    /// id this store ever assigned.
    pub fn bulk_load(&mut self, items: Vec<(Geometry, Attributes)>) -> Result<usize> {
        let staged = StagedLoad::build(&self.config, self.next_id, items)?;
        self.reserve_ids(staged.len());
        Ok(self.commit(staged))
    }

    /// Claim `count` consecutive ids and return the first.
    pub fn reserve_ids(&mut self, count: usize) -> u64 {
        let first = self.next_id;
        self.next_id += count as u64;
        first
    }

    /// Swap a staged batch in, replacing every existing feature.
    pub fn commit(&mut self, staged: StagedLoad) -> usize {
        let count = staged.len();
        let replaced = self.features.len();
        self.features = staged.features;
        self.index = staged.index;
        *self.extent.get_mut() = ExtentCache {
            bounds: staged.extent,
            dirty: false,
        };
        log::info!(
            "Bulk load replaced {} features with {} (index height {})",
            replaced,
            count,
            self.index.height()
        );
        count
    }

    /// Drop every feature. Ids keep counting from where they were.
    pub fn clear(&mut self) {
        self.features.clear();
        self.index.clear();
        *self.extent.get_mut() = ExtentCache::default();
    }

    // ===== Reads =====

    pub fn get(&self, id: FeatureId) -> Result<&Feature> {
        self.features.get(&id).ok_or(GeoQueryError::NotFound(id))
    }

    pub(crate) fn lookup(&self, id: FeatureId) -> Option<&Feature> {
        self.features.get(&id)
    }

    pub fn contains(&self, id: FeatureId) -> bool {
        self.features.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// All features in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        let mut features: Vec<&Feature> = self.features.values().collect();
        features.sort_unstable_by_key(|feature| feature.id());
        features.into_iter()
    }

    /// Union of all feature boxes.
    pub fn extent(&self) -> Result<BoundingBox> {
        let mut cache = self.extent.lock();
        if cache.dirty {
            cache.bounds = self
                .features
                .values()
                .map(Feature::bbox)
                .reduce(|acc, bbox| acc.union(&bbox));
            cache.dirty = false;
            log::debug!("Recomputed extent over {} features", self.features.len());
        }
        cache.bounds.ok_or(GeoQueryError::EmptyStore)
    }
}
