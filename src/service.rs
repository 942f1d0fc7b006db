//! Startup wiring.
//!
//! [`ServiceContainer::build`] turns a configuration snapshot into the two
//! capability pairs (embedder, write/read index) plus the pipeline and the
//! search orchestrator. The wiring is explicit and side-effect-free: no
//! indexing happens here, and nothing global is mutated — callers decide
//! whether to run a pass, start the watcher, or serve tools.

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::config::Config;
use crate::db;
use crate::embedding::azure::AzureEmbedder;
use crate::embedding::local_onnx::LocalEmbedder;
use crate::embedding::Embedder;
use crate::pipeline::{IndexingPipeline, MANAGEMENT_FILE_NAME};
use crate::routing::{RoutingMap, RoutingSlot};
use crate::scanner::Scanner;
use crate::search::SearchOrchestrator;
use crate::store::azure::AzureSearchIndex;
use crate::store::local::LocalIndex;
use crate::store::{ReadIndex, WriteIndex};

pub struct ServiceContainer {
    pub config: Arc<Config>,
    pub embedder: Arc<dyn Embedder>,
    pub write_index: Arc<dyn WriteIndex>,
    pub read_index: Arc<dyn ReadIndex>,
    pub routing: Arc<RoutingSlot>,
    pub pipeline: Arc<IndexingPipeline>,
    pub orchestrator: Arc<SearchOrchestrator>,
}

impl std::fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContainer").finish_non_exhaustive()
    }
}

impl ServiceContainer {
    /// Assemble all services for the configured provider.
    pub async fn build(config: Config) -> Result<Self> {
        let config = Arc::new(config);

        let (embedder, write_index, read_index): (
            Arc<dyn Embedder>,
            Arc<dyn WriteIndex>,
            Arc<dyn ReadIndex>,
        ) = match config.provider.as_str() {
            "local" => {
                let db_path = config
                    .database_path()
                    .ok_or_else(|| anyhow::anyhow!(
                        "database_path or source_path is required for the local provider"
                    ))?;
                let pool = db::connect(&db_path)
                    .await
                    .with_context(|| format!("failed to open {}", db_path.display()))?;
                let index = Arc::new(LocalIndex::new(pool));
                let embedder = Arc::new(LocalEmbedder::new(config.model_path.as_deref())?);
                (embedder, index.clone(), index)
            }
            "azure" => {
                let azure = &config.azure;
                let embedder = Arc::new(AzureEmbedder::new(
                    azure.embedding_endpoint.as_deref().unwrap_or_default(),
                    azure.embedding_key.as_deref().unwrap_or_default(),
                    azure.embedding_deployment.as_deref().unwrap_or_default(),
                    azure.embedding_dims,
                )?);
                let index = Arc::new(AzureSearchIndex::new(
                    azure.search_endpoint.as_deref().unwrap_or_default(),
                    azure.search_key.as_deref().unwrap_or_default(),
                    azure
                        .search_index
                        .as_deref()
                        .unwrap_or(&config.index_name),
                    azure.embedding_dims,
                )?);
                (embedder, index.clone(), index)
            }
            other => bail!("unknown provider: {}", other),
        };

        let routing = Arc::new(RoutingSlot::new(load_routing(&config)));
        let scanner = Scanner::new(&config.exclude_patterns)?;

        let pipeline = Arc::new(IndexingPipeline::new(
            write_index.clone(),
            embedder.clone(),
            scanner,
            routing.clone(),
        ));

        let orchestrator = Arc::new(SearchOrchestrator::new(
            read_index.clone(),
            embedder.clone(),
            routing.clone(),
            config.source_path.clone(),
        ));

        Ok(Self {
            config,
            embedder,
            write_index,
            read_index,
            routing,
            pipeline,
            orchestrator,
        })
    }
}

/// Best-effort startup load of the management file; the pipeline refreshes
/// it on every pass.
fn load_routing(config: &Config) -> RoutingMap {
    let Some(root) = config.source_path.as_ref() else {
        return RoutingMap::default();
    };
    let path = root.join(MANAGEMENT_FILE_NAME);
    match std::fs::read_to_string(&path) {
        Ok(text) => RoutingMap::parse(&text),
        Err(_) => RoutingMap::default(),
    }
}
