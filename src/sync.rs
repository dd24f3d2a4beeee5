//! Thread-safe handle for concurrent store access.
//!
//! `SharedStore` wraps [`FeatureStore`] in `Arc<RwLock<_>>`. Any number of
//! readers (lookups, queries, export) proceed together; writers get
//! exclusive access. A reader therefore never sees a half-applied write,
//! including a half-applied bulk load.
//!
//! # Examples
//!
//! ```rust
//! use geoquery::{Attributes, Geometry, SharedStore};
//! use std::thread;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SharedStore::default();
//!
//! let writer = store.clone();
//! let handle = thread::spawn(move || {
//!     writer
//!         .insert(Geometry::point(13.4, 52.5).unwrap(), Attributes::new())
//!         .unwrap();
//! });
//!
//! store.insert(Geometry::point(2.35, 48.86)?, Attributes::new())?;
//! handle.join().unwrap();
//! assert_eq!(store.len(), 2);
//! # Ok(())
//! # }
//! ```

use crate::config::Config;
use crate::error::Result;
use crate::feature::{Feature, FeatureId};
use crate::store::{FeatureStore, StagedLoad};
use geoquery_types::{Attributes, BoundingBox, Geometry};
use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::Arc;

/// Cloneable, thread-safe handle to one [`FeatureStore`].
///
/// Reads take the shared lock, writes the exclusive one. Clones share the
/// same store.
#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    inner: Arc<RwLock<FeatureStore>>,
}

impl SharedStore {
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self::from_store(FeatureStore::new(config)?))
    }

    pub fn from_store(store: FeatureStore) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
        }
    }

    /// Hold the read lock for a batch of lookups.
    pub fn read(&self) -> RwLockReadGuard<'_, FeatureStore> {
        self.inner.read()
    }

    pub fn config(&self) -> Config {
        self.inner.read().config().clone()
    }

    // ===== Writes =====

    pub fn insert(&self, geometry: Geometry, attributes: Attributes) -> Result<FeatureId> {
        self.inner.write().insert(geometry, attributes)
    }

    pub fn update(
        &self,
        id: FeatureId,
        geometry: Option<Geometry>,
        attributes: Option<Attributes>,
    ) -> Result<()> {
        self.inner.write().update(id, geometry, attributes)
    }

    pub fn delete(&self, id: FeatureId) -> Result<Feature> {
        self.inner.write().delete(id)
    }

    /// Replace the store contents.
    ///
    /// Validation and index packing run without any lock held; only the id
    /// reservation and the final swap take the write lock. Ids reserved for
    /// a batch that then fails validation are skipped, never reused.
    pub fn bulk_load(&self, items: Vec<(Geometry, Attributes)>) -> Result<usize> {
        let config = self.config();
        let first_id = self.inner.write().reserve_ids(items.len());
        let staged = StagedLoad::build(&config, first_id, items)?;
        Ok(self.inner.write().commit(staged))
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }

    // ===== Reads =====

    /// Snapshot of one feature.
    pub fn get(&self, id: FeatureId) -> Result<Feature> {
        self.inner.read().get(id).cloned()
    }

    pub fn contains(&self, id: FeatureId) -> bool {
        self.inner.read().contains(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn extent(&self) -> Result<BoundingBox> {
        self.inner.read().extent()
    }

    /// Snapshot of every feature in ascending id order.
    pub fn features(&self) -> Vec<Feature> {
        self.inner.read().iter().cloned().collect()
    }
}
