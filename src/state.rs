//! Shared application state.
//!
//! Built once at startup and handed to whatever hosts the engine (an HTTP
//! layer, a desktop shell, tests). Orchestrators are created per developer
//! session on top of the shared cache and client.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::cache::{AnalysisCache, CacheBackend, MemoryCacheStore, SqliteCacheStore};
use crate::config::PrismConfig;
use crate::llm::ReviewClient;
use crate::orchestrator::{AnalysisOrchestrator, OrchestratorConfig};

#[derive(Clone)]
pub struct AppState {
    // -------- Configuration --------
    pub config: PrismConfig,

    // -------- HTTP --------
    pub http: reqwest::Client,

    // -------- Storage --------
    pub cache: Arc<AnalysisCache>,

    // -------- Analysis --------
    pub client: Arc<ReviewClient>,
}

impl AppState {
    /// One orchestrator per dashboard session, sharing the process-wide
    /// cache and review client.
    pub fn orchestrator(&self, developer_id: impl Into<String>) -> AnalysisOrchestrator {
        AnalysisOrchestrator::new(
            developer_id,
            self.cache.clone(),
            self.client.clone(),
            OrchestratorConfig::from(&self.config),
        )
    }
}

pub async fn create_app_state(config: PrismConfig) -> Result<AppState> {
    info!("🚀 Creating application state");

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout())
        .build()?;

    // The durable tier is best-effort: a broken database means degraded
    // caching, not a failed startup.
    let primary: Option<Arc<dyn CacheBackend>> =
        match SqliteCacheStore::connect(&config.database_url, config.sqlite_max_connections).await
        {
            Ok(store) => {
                info!("💾 Analysis cache ready at {}", config.database_url);
                Some(Arc::new(store))
            }
            Err(e) => {
                warn!(
                    "⚠️  SQLite cache unavailable ({}), falling back to memory-only",
                    e
                );
                None
            }
        };

    let cache = Arc::new(AnalysisCache::new(
        primary,
        Arc::new(MemoryCacheStore::new()),
    ));
    let client = Arc::new(ReviewClient::new(http.clone(), config.prompt_token_budget));

    info!("✅ Application state initialized");

    Ok(AppState {
        config,
        http,
        cache,
        client,
    })
}
