//! Turns a loaded `Config` into the running service graph.

use std::sync::Arc;
use std::time::Duration;

use paperscout_common::SandboxClient;
use paperscout_discovery::{
    CachedEmbedder, DedupEngine, EmbeddingProvider, HashingEmbedder, HeuristicValidator, LlmEmbedder,
    LlmRelevanceValidator, Orchestrator, OrchestratorConfig, RelevanceValidator, SourceRegistry,
};
use paperscout_llm::backend::{GeminiBackend, OllamaBackend, OpenAiCompatibleBackend};
use paperscout_llm::router::RoutingPolicy;
use paperscout_llm::{LlmBackend, LlmRouter};
use paperscout_ranker::Ranker;
use paperscout_session::{KeywordSummarizer, LlmKeywordSummarizer, QueryAugmenter, SessionManager};
use paperscout_web::state::AppState;
use secrecy::ExposeSecret;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::{Config, EmbeddingBackend};

/// Builds the LLM router, or `None` when no backend survives configuration.
pub fn build_llm(config: &Config) -> Option<Arc<dyn LlmBackend>> {
    let llm = &config.llm;
    let mut router = LlmRouter::new(RoutingPolicy {
        local_only_mode: llm.local_only(),
        default_backend: llm.default_backend.clone(),
        embedding_backend: llm.default_backend.clone(),
    });

    if let Some(ollama) = &llm.ollama {
        let mut backend = OllamaBackend::new(&ollama.base_url, &ollama.model).with_timeout(llm.request_timeout());
        if let Some(model) = &ollama.embedding_model {
            backend = backend.with_embedding_model(model);
        }
        router.register_backend("ollama", Arc::new(backend));
    }

    if let Some(openai) = &llm.openai {
        match &openai.api_key {
            Some(key) => {
                let mut backend =
                    OpenAiCompatibleBackend::openai(key.expose_secret(), &openai.model).with_timeout(llm.request_timeout());
                if let Some(model) = &openai.embedding_model {
                    backend = backend.with_embedding_model(model);
                }
                router.register_backend("openai", Arc::new(backend));
            }
            None => warn!("OpenAI configured but no API key found (set llm.openai.api_key or PAPERSCOUT_OPENAI_API_KEY)"),
        }
    }

    if let Some(gemini) = &llm.gemini {
        match &gemini.api_key {
            Some(key) => {
                let mut backend = GeminiBackend::new(key.expose_secret(), &gemini.model).with_timeout(llm.request_timeout());
                if let Some(model) = &gemini.embedding_model {
                    backend = backend.with_embedding_model(model);
                }
                router.register_backend("gemini", Arc::new(backend));
            }
            None => warn!("Gemini configured but no API key found (set llm.gemini.api_key or PAPERSCOUT_GEMINI_API_KEY)"),
        }
    }

    if let Some(compat) = &llm.openai_compatible {
        let key = compat.api_key.as_ref().map(|k| k.expose_secret().to_string());
        let mut backend =
            OpenAiCompatibleBackend::new(&compat.base_url, &compat.model, key).with_timeout(llm.request_timeout());
        if let Some(model) = &compat.embedding_model {
            backend = backend.with_embedding_model(model);
        }
        router.register_backend("openai_compatible", Arc::new(backend));
    }

    if router.is_empty() {
        warn!("No LLM backends configured; relevance and query augmentation use offline heuristics");
        return None;
    }
    info!(backends = ?router.registered_backends(), local_only = llm.local_only(), "LLM router ready");
    Some(Arc::new(router))
}

pub fn build_embedder(config: &Config, llm: Option<&Arc<dyn LlmBackend>>) -> Arc<dyn EmbeddingProvider> {
    match (config.embedding.backend, llm) {
        (EmbeddingBackend::Llm, Some(backend)) => {
            let inner: Arc<dyn EmbeddingProvider> = Arc::new(LlmEmbedder::new(backend.clone()));
            Arc::new(CachedEmbedder::new(inner, config.embedding.cache_size))
        }
        (EmbeddingBackend::Llm, None) => {
            warn!(dim = config.embedding.dim, "LLM embeddings requested without a backend, using feature hashing");
            Arc::new(HashingEmbedder::new(config.embedding.dim))
        }
        (EmbeddingBackend::Hashing, _) => Arc::new(HashingEmbedder::new(config.embedding.dim)),
    }
}

pub fn build_validator(config: &Config, llm: Option<&Arc<dyn LlmBackend>>) -> Arc<dyn RelevanceValidator> {
    match llm {
        Some(backend) if config.llm.validate_relevance => Arc::new(LlmRelevanceValidator::new(backend.clone())),
        _ => Arc::new(HeuristicValidator),
    }
}

pub fn build_augmenter(config: &Config, llm: Option<&Arc<dyn LlmBackend>>) -> QueryAugmenter {
    let summarizer = llm.filter(|_| config.llm.summarize_keywords).map(|backend| {
        Arc::new(LlmKeywordSummarizer::new(backend.clone()).with_limits(&config.augment)) as Arc<dyn KeywordSummarizer>
    });
    QueryAugmenter::new(summarizer, config.augment.clone())
}

pub fn build_sources(config: &Config) -> anyhow::Result<SourceRegistry> {
    let user_agent = match &config.sources.mailto {
        Some(mailto) => format!("PaperScout/{} (mailto:{mailto})", env!("CARGO_PKG_VERSION")),
        None => format!("PaperScout/{}", env!("CARGO_PKG_VERSION")),
    };
    let client = SandboxClient::with_settings(Duration::from_secs(config.sources.request_timeout_secs), &user_agent)?;
    let registry = SourceRegistry::with_builtin(client, &config.sources.settings(), &config.sources.enabled);
    if registry.is_empty() {
        anyhow::bail!("no literature sources enabled");
    }
    Ok(registry)
}

/// Wires sources, validator, embedder, orchestrator and sessions into the
/// state shared by the HTTP handlers.
pub fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let llm = build_llm(config);
    let embedder = build_embedder(config, llm.as_ref());
    let registry = build_sources(config)?;
    info!(sources = ?registry.names(), "literature sources ready");

    let (progress_tx, _) = broadcast::channel(config.server.progress_buffer.max(1));
    let orchestrator = Orchestrator::new(
        registry,
        build_validator(config, llm.as_ref()),
        DedupEngine::new(config.dedup.clone()),
        OrchestratorConfig::from(&config.orchestrator),
    )
    .with_progress(progress_tx.clone());

    let sessions = SessionManager::new(
        Arc::new(orchestrator),
        Arc::new(build_augmenter(config, llm.as_ref())),
        Ranker::new(config.ranking.clone()),
        embedder,
    );
    Ok(AppState::new(Arc::new(sessions), progress_tx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config(toml: &str) -> Config {
        Config::from_toml_str(toml).unwrap()
    }

    #[test]
    fn test_no_backends_means_offline() {
        assert!(build_llm(&Config::default()).is_none());
    }

    #[test]
    fn test_remote_backend_without_key_is_skipped() {
        let cfg = config("[llm]\nmode = \"any\"\n[llm.openai]\nmodel = \"gpt-4o-mini\"\n");
        assert!(build_llm(&cfg).is_none());
    }

    #[test]
    fn test_local_backend_registered() {
        let cfg = config("[llm.ollama]\nmodel = \"llama3.1:8b\"\n");
        assert!(build_llm(&cfg).is_some());
    }

    #[test]
    fn test_sources_follow_enabled_list() {
        let cfg = config("[sources]\nenabled = [\"arxiv\", \"crossref\"]\n");
        let registry = build_sources(&cfg).unwrap();
        assert_eq!(registry.names(), vec!["arxiv".to_string(), "crossref".to_string()]);
    }

    #[test]
    fn test_empty_source_list_rejected() {
        let cfg = config("[sources]\nenabled = []\n");
        assert!(build_sources(&cfg).is_err());
    }

    #[test]
    fn test_default_state_uses_every_keyless_builtin_source() {
        let state = build_state(&Config::default()).unwrap();
        let sources = state.sessions.default_sources();
        assert_eq!(sources.len(), paperscout_discovery::BUILTIN_SOURCES.len() - 1);
        assert!(!sources.contains(&"google_scholar".to_string()));
        assert!(tokio_test::block_on(state.sessions.list_sessions()).is_empty());
    }

    #[test]
    fn test_serpapi_key_enables_google_scholar() {
        let cfg = config("[sources]\nenabled = [\"google_scholar\"]\nserpapi_api_key = \"serp\"\n");
        assert_eq!(build_sources(&cfg).unwrap().names(), vec!["google_scholar".to_string()]);
        let keyless = config("[sources]\nenabled = [\"google_scholar\"]\n");
        assert!(build_sources(&keyless).is_err());
    }
}
