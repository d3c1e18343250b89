use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use formats::GeoTable;
use tracing::info;

use crate::cache::TimedCache;
use crate::layer_store::{LayerStore, StoreError};

/// Everything the dashboard reads, loaded together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    /// Union of all layers; `None` when nothing has been published.
    pub projects: Option<GeoTable>,
    pub boundary: Option<GeoTable>,
}

/// Cached read path over a [`LayerStore`]. Every write through the service
/// invalidates the cache.
#[derive(Debug)]
pub struct DatasetService {
    store: LayerStore,
    cache: TimedCache<Dataset>,
}

impl DatasetService {
    pub fn new(store: LayerStore, ttl: Duration) -> Self {
        Self {
            store,
            cache: TimedCache::new(ttl),
        }
    }

    pub fn store(&self) -> &LayerStore {
        &self.store
    }

    pub fn dataset(&self) -> Result<Arc<Dataset>, StoreError> {
        self.cache.get_or_try_load(|| {
            let projects = self.store.load_all()?;
            let boundary = self.store.load_boundary()?;
            info!(
                "dataset loaded: {} records, boundary {}",
                projects.as_ref().map_or(0, GeoTable::len),
                if boundary.is_some() { "present" } else { "absent" }
            );
            Ok(Dataset { projects, boundary })
        })
    }

    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    pub fn publish_layer(&self, code: &str, table: &GeoTable) -> Result<PathBuf, StoreError> {
        let path = self.store.write_layer(code, table)?;
        self.invalidate();
        Ok(path)
    }

    pub fn remove_layer(&self, code: &str) -> Result<bool, StoreError> {
        let removed = self.store.delete_layer(code)?;
        self.invalidate();
        Ok(removed)
    }

    pub fn publish_boundary(&self, table: &GeoTable) -> Result<PathBuf, StoreError> {
        let path = self.store.write_boundary(table)?;
        self.invalidate();
        Ok(path)
    }
}
