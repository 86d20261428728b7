//! Bibliographic source clients.
//!
//! Every adapter implements [`LiteratureSource`]. Paginated HTTP adapters
//! implement [`PagedSource`] and delegate to [`collect_pages`], which owns the
//! deadline, the per-call cap and the client-side filter pass.

pub mod arxiv;
pub mod crossref;
pub mod europepmc;
pub mod googlescholar;
pub mod openalex;
pub mod semanticscholar;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use paperscout_common::SandboxClient;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::models::{Filters, RawPaper};

pub use arxiv::ArxivClient;
pub use crossref::CrossRefClient;
pub use europepmc::EuropePmcClient;
pub use googlescholar::GoogleScholarClient;
pub use openalex::OpenAlexClient;
pub use semanticscholar::SemanticScholarClient;

/// Upper bound on page requests per search call.
pub const MAX_PAGES: usize = 10;

const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Result of one adapter call. `papers` may be partial when `error` is set or
/// `timed_out` is true.
#[derive(Debug, Default)]
pub struct SourceOutcome {
    pub papers: Vec<RawPaper>,
    pub error: Option<SourceError>,
    pub timed_out: bool,
}

impl SourceOutcome {
    pub fn ok(papers: Vec<RawPaper>) -> Self {
        Self { papers, ..Default::default() }
    }

    pub fn failed(error: SourceError) -> Self {
        Self { error: Some(error), ..Default::default() }
    }
}

/// Common interface for all literature source clients.
#[async_trait]
pub trait LiteratureSource: Send + Sync {
    fn name(&self) -> &str;

    /// Search for papers matching `query` under `filters`. Must return by
    /// `deadline` with whatever has been collected so far.
    async fn search(&self, query: &str, filters: &Filters, deadline: Instant) -> SourceOutcome;
}

/// Position of the next page for a paginated provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    Offset(usize),
    Token(String),
}

impl PageCursor {
    pub fn offset(&self) -> usize {
        match self {
            PageCursor::Offset(n) => *n,
            PageCursor::Token(_) => 0,
        }
    }

    pub fn token(&self) -> &str {
        match self {
            PageCursor::Token(t) => t,
            PageCursor::Offset(_) => "*",
        }
    }
}

#[derive(Debug, Default)]
pub struct Page {
    pub papers: Vec<RawPaper>,
    pub next: Option<PageCursor>,
}

/// A provider that returns results one page at a time.
#[async_trait]
pub trait PagedSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    /// Per-call cap on returned papers.
    fn max_results(&self) -> usize;

    fn first_cursor(&self) -> PageCursor {
        PageCursor::Offset(0)
    }

    /// Fetch one page of at most `want` papers starting at `cursor`.
    async fn fetch_page(
        &self,
        query: &str,
        filters: &Filters,
        cursor: &PageCursor,
        want: usize,
    ) -> Result<Page, SourceError>;
}

/// Drives a [`PagedSource`] until the cap, the last page, an error, or the
/// deadline. Filters the provider cannot express are applied here.
pub async fn collect_pages<S>(source: &S, query: &str, filters: &Filters, deadline: Instant) -> SourceOutcome
where
    S: PagedSource + ?Sized,
{
    let cap = source.max_results();
    let mut outcome = SourceOutcome::default();
    let mut cursor = source.first_cursor();

    for page_no in 0..MAX_PAGES {
        let want = cap.saturating_sub(outcome.papers.len());
        if want == 0 {
            break;
        }
        match timeout_at(deadline, source.fetch_page(query, filters, &cursor, want)).await {
            Err(_) => {
                warn!(source = source.source_name(), page = page_no, "deadline reached, returning partial results");
                outcome.timed_out = true;
                break;
            }
            Ok(Err(e)) => {
                warn!(source = source.source_name(), page = page_no, error = %e, "page request failed");
                outcome.error = Some(e);
                break;
            }
            Ok(Ok(page)) => {
                let fetched = page.papers.len();
                outcome.papers.extend(
                    page.papers
                        .into_iter()
                        .filter(|p| !p.title.trim().is_empty() && filters.accepts(p)),
                );
                debug!(source = source.source_name(), page = page_no, fetched, kept = outcome.papers.len(), "page fetched");
                match page.next {
                    Some(next) if fetched > 0 && next != cursor => cursor = next,
                    _ => break,
                }
            }
        }
    }

    outcome.papers.truncate(cap);
    outcome
}

/// Sends a request, retrying once after a short pause on HTTP 429.
pub(crate) async fn send_with_retry(req: reqwest::RequestBuilder) -> Result<reqwest::Response, SourceError> {
    let retry = req.try_clone();
    let resp = req.send().await?;
    if resp.status() == StatusCode::TOO_MANY_REQUESTS {
        let Some(retry) = retry else { return Err(SourceError::RateLimited) };
        let wait = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(RETRY_BACKOFF);
        debug!(wait_ms = wait.as_millis() as u64, "rate limited, retrying once");
        tokio::time::sleep(wait).await;
        let resp = retry.send().await?;
        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(SourceError::RateLimited);
        }
        return check_status(resp).await;
    }
    check_status(resp).await
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, SourceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(SourceError::Status { status: status.as_u16(), body: body.chars().take(200).collect() })
}

pub(crate) async fn get_json(req: reqwest::RequestBuilder) -> Result<serde_json::Value, SourceError> {
    let resp = send_with_retry(req).await?;
    let text = resp.text().await?;
    Ok(serde_json::from_str(&text)?)
}

/// Settings shared by the built-in adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    pub max_results: usize,
    /// Contact address for polite-pool APIs (CrossRef, OpenAlex).
    pub mailto: Option<String>,
    /// Semantic Scholar API key.
    pub semantic_scholar_key: Option<String>,
    /// SerpAPI key; Google Scholar is unavailable without one.
    pub serpapi_key: Option<String>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self { max_results: 25, mailto: None, semantic_scholar_key: None, serpapi_key: None }
    }
}

/// Names of the built-in adapters.
pub const BUILTIN_SOURCES: [&str; 6] = [
    googlescholar::SOURCE_NAME,
    crossref::SOURCE_NAME,
    openalex::SOURCE_NAME,
    semanticscholar::SOURCE_NAME,
    arxiv::SOURCE_NAME,
    europepmc::SOURCE_NAME,
];

/// Builds a built-in adapter by name.
pub fn builtin_source(name: &str, client: SandboxClient, settings: &SourceSettings) -> Option<Arc<dyn LiteratureSource>> {
    let s = settings.clone();
    let source: Arc<dyn LiteratureSource> = match name {
        crossref::SOURCE_NAME => Arc::new(CrossRefClient::new(client, s.max_results).with_mailto(s.mailto)),
        openalex::SOURCE_NAME => Arc::new(OpenAlexClient::new(client, s.max_results).with_mailto(s.mailto)),
        semanticscholar::SOURCE_NAME => {
            Arc::new(SemanticScholarClient::new(client, s.max_results).with_api_key(s.semantic_scholar_key))
        }
        googlescholar::SOURCE_NAME => {
            Arc::new(GoogleScholarClient::new(client, s.max_results).with_api_key(s.serpapi_key))
        }
        arxiv::SOURCE_NAME => Arc::new(ArxivClient::new(client, s.max_results)),
        europepmc::SOURCE_NAME => Arc::new(EuropePmcClient::new(client, s.max_results)),
        _ => return None,
    };
    Some(source)
}

/// Named set of adapters available to the orchestrator.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<String, Arc<dyn LiteratureSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in adapter whose name is in `enabled`.
    /// Unknown names, and Google Scholar without a SerpAPI key, are logged
    /// and skipped.
    pub fn with_builtin(client: SandboxClient, settings: &SourceSettings, enabled: &[String]) -> Self {
        let mut registry = Self::new();
        for name in enabled {
            if name == googlescholar::SOURCE_NAME && settings.serpapi_key.is_none() {
                warn!(source = %name, "no SerpAPI key configured, skipping");
                continue;
            }
            match builtin_source(name, client.clone(), settings) {
                Some(source) => registry.register(source),
                None => warn!(source = %name, "unknown source in configuration, skipping"),
            }
        }
        registry
    }

    pub fn register(&mut self, source: Arc<dyn LiteratureSource>) {
        self.sources.insert(source.name().to_string(), source);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LiteratureSource>> {
        self.sources.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry").field("sources", &self.names()).finish()
    }
}

/// Four-digit year at the start of a date-like string ("2021-03-04", "2021").
pub(crate) fn leading_year(s: &str) -> Option<i32> {
    let digits: String = s.trim().chars().take(4).collect();
    if digits.len() == 4 && digits.chars().all(|c| c.is_ascii_digit()) {
        digits.parse().ok()
    } else {
        None
    }
}

/// Collapses runs of whitespace; providers often wrap titles across lines.
pub(crate) fn clean_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
