//! Google Scholar results through SerpAPI.
//!
//! Endpoint: https://serpapi.com/search.json?engine=google_scholar
//! Requires a SerpAPI key. Scholar exposes no DOI and no abstract, so papers
//! carry the result snippet as their abstract and dedup falls back to titles.

use std::sync::OnceLock;

use async_trait::async_trait;
use paperscout_common::SandboxClient as Client;
use regex::Regex;
use tokio::time::Instant;
use tracing::instrument;

use crate::error::SourceError;
use crate::models::{Filters, PaperType, RawPaper};
use super::{clean_text, collect_pages, get_json, LiteratureSource, Page, PageCursor, PagedSource, SourceOutcome};

pub const SOURCE_NAME: &str = "google_scholar";

const SERPAPI_URL: &str = "https://serpapi.com/search.json";
const SERPAPI_MAX_NUM: usize = 20;
/// SerpAPI answers an empty result page with this error text.
const NO_RESULTS: &str = "hasn't returned any results";

pub struct GoogleScholarClient {
    client: Client,
    max_results: usize,
    api_key: Option<String>,
}

impl GoogleScholarClient {
    pub fn new(client: Client, max_results: usize) -> Self {
        Self { client, max_results, api_key: None }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Scholar only filters by year; citations and type are checked client-side.
    fn year_params(filters: &Filters) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(from) = filters.year_from {
            params.push(("as_ylo", from.to_string()));
        }
        if let Some(to) = filters.year_to {
            params.push(("as_yhi", to.to_string()));
        }
        params
    }
}

#[async_trait]
impl PagedSource for GoogleScholarClient {
    fn source_name(&self) -> &'static str { SOURCE_NAME }
    fn max_results(&self) -> usize { self.max_results }

    async fn fetch_page(
        &self,
        query: &str,
        filters: &Filters,
        cursor: &PageCursor,
        want: usize,
    ) -> Result<Page, SourceError> {
        let Some(key) = &self.api_key else {
            return Err(SourceError::Blocked("no SerpAPI key configured".to_string()));
        };
        let num = want.min(SERPAPI_MAX_NUM);
        let mut params = vec![
            ("engine", "google_scholar".to_string()),
            ("q", query.trim().to_string()),
            ("api_key", key.clone()),
            ("num", num.to_string()),
            ("start", cursor.offset().to_string()),
            ("hl", "en".to_string()),
        ];
        params.extend(Self::year_params(filters));

        let body = get_json(self.client.get(SERPAPI_URL)?.query(&params)).await?;
        if let Some(err) = body["error"].as_str() {
            if err.contains(NO_RESULTS) {
                return Ok(Page::default());
            }
            return Err(SourceError::Provider(err.to_string()));
        }
        let results = body["organic_results"].as_array().cloned().unwrap_or_default();
        let next = body["serpapi_pagination"]["next"]
            .as_str()
            .map(|_| PageCursor::Offset(cursor.offset() + results.len()));
        Ok(Page { papers: results.iter().map(result_to_paper).collect(), next })
    }
}

#[async_trait]
impl LiteratureSource for GoogleScholarClient {
    fn name(&self) -> &str { SOURCE_NAME }

    #[instrument(skip(self, filters, deadline), fields(source = SOURCE_NAME))]
    async fn search(&self, query: &str, filters: &Filters, deadline: Instant) -> SourceOutcome {
        collect_pages(self, query, filters, deadline).await
    }
}

fn year_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:19|20)\d{2}\b").expect("static regex"))
}

/// Splits a Scholar byline, "A Author, B Author - Venue, 2019 - host.org",
/// into authors, venue and year.
fn parse_summary(summary: &str) -> (Vec<String>, Option<String>, Option<i32>) {
    let parts: Vec<&str> = summary.split(" - ").map(str::trim).collect();
    let authors = parts
        .first()
        .map(|a| {
            a.split(',')
                .map(|n| n.trim().trim_end_matches('…').trim())
                .filter(|n| !n.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    let year = year_regex()
        .find_iter(summary)
        .last()
        .and_then(|m| m.as_str().parse().ok());
    let venue = parts
        .get(1)
        .filter(|_| parts.len() >= 3)
        .map(|v| {
            let v = year_regex().replace_all(v, "");
            v.trim().trim_end_matches(',').trim().trim_end_matches('…').trim().to_string()
        })
        .filter(|v| !v.is_empty());
    (authors, venue, year)
}

pub(crate) fn result_to_paper(r: &serde_json::Value) -> RawPaper {
    let title = r["title"].as_str().map(clean_text).unwrap_or_default();
    let info = &r["publication_info"];
    let (summary_authors, venue, year) = parse_summary(info["summary"].as_str().unwrap_or(""));

    let listed: Vec<String> = info["authors"]
        .as_array()
        .map(|a| a.iter().filter_map(|x| x["name"].as_str().map(String::from)).collect())
        .unwrap_or_default();

    RawPaper {
        paper_type: PaperType::infer(None, &title, venue.as_deref()),
        title,
        authors: if listed.is_empty() { summary_authors } else { listed },
        abstract_text: r["snippet"].as_str().map(clean_text).unwrap_or_default(),
        year,
        venue,
        doi: None,
        citation_count: r["inline_links"]["cited_by"]["total"].as_u64().unwrap_or(0),
        url: r["link"].as_str().map(String::from),
    }
}
