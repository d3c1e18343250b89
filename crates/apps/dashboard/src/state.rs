use std::sync::Arc;

use catalog::{CanonicalSchema, LayerCatalog};
use ingest::{Pipeline, PipelineOptions};
use store::{DatasetService, LayerStore};

use crate::auth::AuthConfig;
use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<LayerCatalog>,
    pub schema: Arc<CanonicalSchema>,
    pub pipeline: Arc<Pipeline>,
    pub data: Arc<DatasetService>,
    pub auth: Arc<AuthConfig>,
}

impl AppState {
    pub fn from_config(config: &Config) -> Result<Self, String> {
        let catalog = match &config.layer_catalog {
            Some(path) => LayerCatalog::load(path).map_err(|e| e.to_string())?,
            None => LayerCatalog::builtin(),
        };
        let catalog = Arc::new(catalog);
        let schema = Arc::new(CanonicalSchema::default());
        let store = LayerStore::open(&config.data_dir, catalog.clone(), schema.clone())
            .map_err(|e| e.to_string())?;
        let options = PipelineOptions {
            simplify_tolerance: (config.simplify_tolerance > 0.0)
                .then_some(config.simplify_tolerance),
            keep_extra_columns: config.keep_extra_columns,
        };
        let auth = AuthConfig {
            admin_password: config.admin_password.clone(),
            visitor_password: config.visitor_password.clone(),
        };
        Ok(Self::new(
            catalog.clone(),
            schema.clone(),
            Pipeline::new(catalog, schema, options),
            DatasetService::new(store, config.cache_ttl),
            auth,
        ))
    }

    pub fn new(
        catalog: Arc<LayerCatalog>,
        schema: Arc<CanonicalSchema>,
        pipeline: Pipeline,
        data: DatasetService,
        auth: AuthConfig,
    ) -> Self {
        Self {
            catalog,
            schema,
            pipeline: Arc::new(pipeline),
            data: Arc::new(data),
            auth: Arc::new(auth),
        }
    }
}
