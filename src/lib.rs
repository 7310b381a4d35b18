pub mod api; // HTTP surface
pub mod collaborators; // Identity + history seams
pub mod config;
pub mod pipeline; // Claim verification core

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::api::ApiContext;
use crate::config::{AppConfig, ConfigError};
use crate::pipeline::cache::{MemoryCacheStore, ResultCache};
use crate::pipeline::evidence::{
    BraveSearchProvider, CachedEvidenceProvider, ChainedEvidenceProvider, DuckDuckGoProvider,
    EvidenceProvider,
};
use crate::pipeline::gateway::{ChatCompletionsBackend, ReasoningGateway, TextBackend};
use crate::pipeline::ollama::OllamaBackend;
use crate::pipeline::orchestrator::PipelineOrchestrator;
use crate::pipeline::review::DocumentReviewer;
use crate::pipeline::source_meta::SourceMetadataService;

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("Server error: {0}")]
    Server(String),
}

/// Reasoning backends in fallback order: one chat backend per configured
/// model, then the local Ollama instance if one is configured.
pub fn build_backends(config: &AppConfig, client: &reqwest::Client) -> Vec<Arc<dyn TextBackend>> {
    let mut backends: Vec<Arc<dyn TextBackend>> = Vec::new();
    if let Some(key) = &config.llm_api_key {
        for model in &config.llm_models {
            backends.push(Arc::new(ChatCompletionsBackend::new(
                client.clone(),
                &config.llm_base_url,
                key,
                model,
            )));
        }
    }
    if let (Some(url), Some(model)) = (&config.ollama_url, &config.ollama_model) {
        backends.push(Arc::new(OllamaBackend::new(client.clone(), url, model)));
    }
    backends
}

/// Search providers in fallback order, each with its own timeout, behind
/// the search-result cache.
pub fn build_evidence(
    config: &AppConfig,
    client: &reqwest::Client,
    cache: ResultCache,
) -> Arc<dyn EvidenceProvider> {
    let mut providers: Vec<Arc<dyn EvidenceProvider>> = Vec::new();
    if let Some(key) = &config.brave_api_key {
        providers.push(Arc::new(BraveSearchProvider::new(client.clone(), key)));
    }
    providers.push(Arc::new(DuckDuckGoProvider::new(client.clone())));
    let chain = Arc::new(ChainedEvidenceProvider::new(providers));
    Arc::new(CachedEvidenceProvider::new(chain, cache))
}

/// Assemble every service from configuration.
pub fn build_context(config: &AppConfig) -> Result<ApiContext, StartupError> {
    let client = reqwest::Client::builder()
        .connect_timeout(HTTP_CONNECT_TIMEOUT)
        .build()?;

    let store = Arc::new(MemoryCacheStore::new(config.cache_max_entries));
    store.spawn_sweeper(config::CACHE_EVICTION_INTERVAL);
    let cache = ResultCache::new(store);

    let backends = build_backends(config, &client);
    if backends.is_empty() {
        tracing::warn!("No reasoning backend configured; set LLM_API_KEY or OLLAMA_URL/OLLAMA_MODEL");
    }
    let gateway = Arc::new(ReasoningGateway::new(backends));
    let backend_names = gateway.backend_names();

    let evidence = build_evidence(config, &client, cache.clone());
    let orchestrator = Arc::new(
        PipelineOrchestrator::new(gateway, evidence, cache.clone())
            .with_concurrency(config.claim_concurrency),
    );
    let reviewer = Arc::new(DocumentReviewer::new(orchestrator.extractor()));
    let citations = Arc::new(SourceMetadataService::new(client, cache));

    Ok(
        ApiContext::new(orchestrator, reviewer, citations, backend_names)
            .with_content_filter(config.content_filter_enabled)
            .with_trusted_proxies(config.trusted_proxies.clone()),
    )
}

/// Start the service and block until Ctrl-C.
pub async fn run() -> Result<(), StartupError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let settings = AppConfig::from_env()?;
    let ctx = build_context(&settings)?;
    tracing::info!(
        backends = ?ctx.backends,
        concurrency = settings.claim_concurrency,
        content_filter = settings.content_filter_enabled,
        "Services ready"
    );

    let mut server = api::start_api_server(ctx, settings.bind_addr)
        .await
        .map_err(StartupError::Server)?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    server.shutdown();
    server.stopped().await;
    tracing::info!("{} stopped", config::APP_NAME);
    Ok(())
}
