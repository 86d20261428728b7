//! Configuration loading for PaperScout.
//! Reads paperscout.toml from the current directory or the path in the
//! PAPERSCOUT_CONFIG env var. Every section is optional.

use std::path::Path;
use std::time::Duration;

use paperscout_discovery::{DedupConfig, OrchestratorConfig, SourceSettings, BUILTIN_SOURCES};
use paperscout_ranker::RankerConfig;
use paperscout_session::AugmentConfig;
use secrecy::SecretString;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub sources: SourcesConfig,
    pub orchestrator: OrchestratorSection,
    pub dedup: DedupConfig,
    pub ranking: RankerConfig,
    pub augment: AugmentConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Capacity of the round-progress broadcast channel.
    pub progress_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:3000".to_string(), progress_buffer: 256 }
    }
}

// ── LLM ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// "local_only" skips remote backends entirely.
    pub mode: String,
    /// Backend tried first; the others form the fallback chain.
    pub default_backend: Option<String>,
    /// Ask the LLM for relevance scores (otherwise token overlap is used).
    pub validate_relevance: bool,
    /// Ask the LLM to rewrite augmented queries (otherwise term frequency).
    pub summarize_keywords: bool,
    /// HTTP timeout for every backend request.
    pub request_timeout_secs: u64,
    pub ollama: Option<OllamaConfig>,
    pub openai: Option<RemoteBackendConfig>,
    pub gemini: Option<RemoteBackendConfig>,
    pub openai_compatible: Option<CompatBackendConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            mode: "local_only".to_string(),
            default_backend: None,
            validate_relevance: true,
            summarize_keywords: true,
            request_timeout_secs: 60,
            ollama: None,
            openai: None,
            gemini: None,
            openai_compatible: None,
        }
    }
}

impl LlmConfig {
    pub fn local_only(&self) -> bool {
        self.mode == "local_only"
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    #[serde(default = "default_ollama_model")]
    pub model: String,
    pub embedding_model: Option<String>,
}

fn default_ollama_url()   -> String { "http://localhost:11434".to_string() }
fn default_ollama_model() -> String { "llama3.1:8b".to_string() }

#[derive(Debug, Deserialize)]
pub struct RemoteBackendConfig {
    /// Falls back to PAPERSCOUT_<BACKEND>_API_KEY.
    pub api_key: Option<SecretString>,
    pub model: String,
    pub embedding_model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompatBackendConfig {
    pub base_url: String,
    pub model: String,
    /// Falls back to PAPERSCOUT_COMPAT_API_KEY; may stay empty.
    pub api_key: Option<SecretString>,
    pub embedding_model: Option<String>,
}

// ── Embedding ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// Offline feature hashing.
    Hashing,
    /// The LLM router's embedding endpoint.
    Llm,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    /// Vector size of the hashing embedder.
    pub dim: usize,
    /// LRU capacity in front of the LLM embedder.
    pub cache_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { backend: EmbeddingBackend::Hashing, dim: 512, cache_size: 4096 }
    }
}

// ── Sources ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub enabled: Vec<String>,
    /// Per-call cap on papers from one source.
    pub max_results: usize,
    pub mailto: Option<String>,
    /// Falls back to PAPERSCOUT_SEMANTIC_SCHOLAR_API_KEY.
    pub semantic_scholar_api_key: Option<SecretString>,
    /// Google Scholar is skipped without it. Falls back to PAPERSCOUT_SERPAPI_API_KEY.
    pub serpapi_api_key: Option<SecretString>,
    pub request_timeout_secs: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            enabled: BUILTIN_SOURCES.iter().map(|s| s.to_string()).collect(),
            max_results: SourceSettings::default().max_results,
            mailto: None,
            semantic_scholar_api_key: None,
            serpapi_api_key: None,
            request_timeout_secs: 20,
        }
    }
}

impl SourcesConfig {
    pub fn settings(&self) -> SourceSettings {
        use secrecy::ExposeSecret;
        SourceSettings {
            max_results: self.max_results,
            mailto: self.mailto.clone(),
            semantic_scholar_key: self.semantic_scholar_api_key.as_ref().map(|k| k.expose_secret().to_string()),
            serpapi_key: self.serpapi_api_key.as_ref().map(|k| k.expose_secret().to_string()),
        }
    }
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// Source deadline. Fan-out gives up at round_timeout + abandon_grace.
    pub round_timeout_secs: u64,
    pub abandon_grace_secs: u64,
    /// Cap on each relevance or embedding call after fan-out.
    pub call_timeout_secs: u64,
    pub validation_concurrency: usize,
    pub embedding_concurrency: usize,
    pub query_weight: f32,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        let d = OrchestratorConfig::default();
        Self {
            round_timeout_secs: d.round_timeout.as_secs(),
            abandon_grace_secs: d.abandon_grace.as_secs(),
            call_timeout_secs: d.call_timeout.as_secs(),
            validation_concurrency: d.validation_concurrency,
            embedding_concurrency: d.embedding_concurrency,
            query_weight: d.query_weight,
        }
    }
}

impl From<&OrchestratorSection> for OrchestratorConfig {
    fn from(s: &OrchestratorSection) -> Self {
        OrchestratorConfig {
            round_timeout: Duration::from_secs(s.round_timeout_secs),
            abandon_grace: Duration::from_secs(s.abandon_grace_secs),
            call_timeout: Duration::from_secs(s.call_timeout_secs),
            validation_concurrency: s.validation_concurrency.max(1),
            embedding_concurrency: s.embedding_concurrency.max(1),
            query_weight: s.query_weight.clamp(0.0, 1.0),
        }
    }
}


impl Config {
    /// Load configuration from paperscout.toml.
    /// Checks PAPERSCOUT_CONFIG first, then the current directory. A missing
    /// default file yields the built-in defaults; a missing explicit file is
    /// an error.
    pub fn load() -> anyhow::Result<Self> {
        let explicit = std::env::var("PAPERSCOUT_CONFIG").ok();
        let path = explicit.clone().unwrap_or_else(|| "paperscout.toml".to_string());

        let mut config = if Path::new(&path).exists() {
            let content = std::fs::read_to_string(&path)?;
            Self::from_toml_str(&content)?
        } else if explicit.is_some() {
            anyhow::bail!("Config file not found: {path}");
        } else {
            tracing::info!("No paperscout.toml found, using defaults");
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Fills API keys and the bind address from the environment. Values
    /// already set in the file win, except the bind address.
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        fn fill(slot: &mut Option<SecretString>, value: Option<String>) {
            if slot.is_none() {
                *slot = value.filter(|v| !v.is_empty()).map(SecretString::from);
            }
        }

        if let Some(bind) = get("PAPERSCOUT_BIND").filter(|b| !b.is_empty()) {
            self.server.bind = bind;
        }
        if let Some(openai) = self.llm.openai.as_mut() {
            fill(&mut openai.api_key, get("PAPERSCOUT_OPENAI_API_KEY"));
        }
        if let Some(gemini) = self.llm.gemini.as_mut() {
            fill(&mut gemini.api_key, get("PAPERSCOUT_GEMINI_API_KEY"));
        }
        if let Some(compat) = self.llm.openai_compatible.as_mut() {
            fill(&mut compat.api_key, get("PAPERSCOUT_COMPAT_API_KEY"));
        }
        fill(&mut self.sources.semantic_scholar_api_key, get("PAPERSCOUT_SEMANTIC_SCHOLAR_API_KEY"));
        fill(&mut self.sources.serpapi_api_key, get("PAPERSCOUT_SERPAPI_API_KEY"));
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(name) = self.sources.enabled.iter().find(|s| !BUILTIN_SOURCES.contains(&s.as_str())) {
            anyhow::bail!("unknown source '{name}' in [sources].enabled (known: {})", BUILTIN_SOURCES.join(", "));
        }
        if !(self.dedup.fuzzy_threshold > 0.0 && self.dedup.fuzzy_threshold <= 1.0) {
            anyhow::bail!("[dedup].fuzzy_threshold must be in (0, 1], got {}", self.dedup.fuzzy_threshold);
        }
        if self.orchestrator.round_timeout_secs == 0 {
            anyhow::bail!("[orchestrator].round_timeout_secs must be positive");
        }
        if self.orchestrator.call_timeout_secs == 0 {
            anyhow::bail!("[orchestrator].call_timeout_secs must be positive");
        }
        if self.llm.request_timeout_secs == 0 {
            anyhow::bail!("[llm].request_timeout_secs must be positive");
        }
        if self.embedding.backend == EmbeddingBackend::Hashing && self.embedding.dim == 0 {
            anyhow::bail!("[embedding].dim must be positive");
        }
        let w = &self.ranking.weights;
        if [w.relevance, w.similarity, w.citation].iter().any(|x| *x < 0.0) || w.relevance + w.similarity + w.citation <= 0.0 {
            anyhow::bail!("[ranking].weights must be non-negative with a positive sum");
        }
        if self.augment.max_words == 0 {
            anyhow::bail!("[augment].max_words must be positive");
        }
        Ok(())
    }
}
