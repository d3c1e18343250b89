//! On-disk layer artifacts and the cached dataset view built from them.

pub mod cache;
pub mod layer_store;
pub mod service;

pub use cache::TimedCache;
pub use layer_store::{
    artifact_file_name, LayerStore, StoreError, BOUNDARY_FILE, LEGACY_FILE,
};
pub use service::{Dataset, DatasetService};
