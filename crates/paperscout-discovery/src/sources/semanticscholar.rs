//! Semantic Scholar Graph API client.
//!
//! Endpoint: https://api.semanticscholar.org/graph/v1/paper/search
//! Unauthenticated requests share a small rate-limit pool; set an API key
//! for anything beyond light use.

use async_trait::async_trait;
use paperscout_common::SandboxClient as Client;
use tokio::time::Instant;
use tracing::instrument;

use crate::error::SourceError;
use crate::models::{Filters, PaperType, RawPaper};
use super::{clean_text, collect_pages, get_json, LiteratureSource, Page, PageCursor, PagedSource, SourceOutcome};

pub const SOURCE_NAME: &str = "semantic_scholar";

const S2_SEARCH_URL: &str = "https://api.semanticscholar.org/graph/v1/paper/search";
const S2_MAX_LIMIT: usize = 100;
const S2_FIELDS: &str = "title,authors,abstract,year,venue,externalIds,citationCount,url,publicationTypes";

pub struct SemanticScholarClient {
    client: Client,
    max_results: usize,
    api_key: Option<String>,
}

impl SemanticScholarClient {
    pub fn new(client: Client, max_results: usize) -> Self {
        Self { client, max_results, api_key: None }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    fn filter_params(filters: &Filters) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        match (filters.year_from, filters.year_to) {
            (None, None) => {}
            (from, to) => params.push((
                "year",
                format!(
                    "{}-{}",
                    from.map(|y| y.to_string()).unwrap_or_default(),
                    to.map(|y| y.to_string()).unwrap_or_default()
                ),
            )),
        }
        if filters.min_citations > 0 {
            params.push(("minCitationCount", filters.min_citations.to_string()));
        }
        match filters.paper_type {
            PaperType::Journal => params.push(("publicationTypes", "JournalArticle".to_string())),
            PaperType::Conference => params.push(("publicationTypes", "Conference".to_string())),
            PaperType::Review => params.push(("publicationTypes", "Review".to_string())),
            PaperType::Any => {}
        }
        params
    }
}

#[async_trait]
impl PagedSource for SemanticScholarClient {
    fn source_name(&self) -> &'static str { SOURCE_NAME }
    fn max_results(&self) -> usize { self.max_results }

    async fn fetch_page(
        &self,
        query: &str,
        filters: &Filters,
        cursor: &PageCursor,
        want: usize,
    ) -> Result<Page, SourceError> {
        let mut params = vec![
            ("query", query.trim().to_string()),
            ("offset", cursor.offset().to_string()),
            ("limit", want.min(S2_MAX_LIMIT).to_string()),
            ("fields", S2_FIELDS.to_string()),
        ];
        params.extend(Self::filter_params(filters));

        let mut req = self.client.get(S2_SEARCH_URL)?.query(&params);
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }
        let body = get_json(req).await?;
        let data = body["data"].as_array().cloned().unwrap_or_default();
        let next = body["next"].as_u64().map(|n| PageCursor::Offset(n as usize));
        Ok(Page { papers: data.iter().map(paper_to_raw).collect(), next })
    }
}

#[async_trait]
impl LiteratureSource for SemanticScholarClient {
    fn name(&self) -> &str { SOURCE_NAME }

    #[instrument(skip(self, filters, deadline), fields(source = SOURCE_NAME))]
    async fn search(&self, query: &str, filters: &Filters, deadline: Instant) -> SourceOutcome {
        collect_pages(self, query, filters, deadline).await
    }
}

pub(crate) fn paper_to_raw(p: &serde_json::Value) -> RawPaper {
    let title = p["title"].as_str().map(clean_text).unwrap_or_default();
    let venue = p["venue"].as_str().filter(|v| !v.is_empty()).map(String::from);

    let types: Vec<&str> = p["publicationTypes"]
        .as_array()
        .map(|a| a.iter().filter_map(|t| t.as_str()).collect())
        .unwrap_or_default();
    let type_hint = if types.contains(&"Review") {
        Some("review")
    } else if types.contains(&"Conference") {
        Some("conference")
    } else if types.contains(&"JournalArticle") {
        Some("journal")
    } else {
        None
    };

    RawPaper {
        paper_type: PaperType::infer(type_hint, &title, venue.as_deref()),
        title,
        authors: p["authors"]
            .as_array()
            .map(|a| a.iter().filter_map(|x| x["name"].as_str().map(String::from)).collect())
            .unwrap_or_default(),
        abstract_text: p["abstract"].as_str().unwrap_or("").to_string(),
        year: p["year"].as_i64().map(|y| y as i32),
        venue,
        doi: p["externalIds"]["DOI"].as_str().map(|d| d.to_lowercase()),
        citation_count: p["citationCount"].as_u64().unwrap_or(0),
        url: p["url"].as_str().map(String::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paper_to_raw() {
        let p = serde_json::json!({
            "paperId": "abc",
            "title": "Deep Residual Learning",
            "authors": [{ "authorId": "1", "name": "Kaiming He" }],
            "abstract": null,
            "year": 2016,
            "venue": "CVPR",
            "externalIds": { "DOI": "10.1109/CVPR.2016.90" },
            "citationCount": 150000,
            "url": "https://www.semanticscholar.org/paper/abc",
            "publicationTypes": ["Conference"]
        });
        let raw = paper_to_raw(&p);
        assert_eq!(raw.title, "Deep Residual Learning");
        assert_eq!(raw.abstract_text, "");
        assert_eq!(raw.doi.as_deref(), Some("10.1109/cvpr.2016.90"));
        assert_eq!(raw.paper_type, Some(PaperType::Conference));
        assert_eq!(raw.authors, vec!["Kaiming He".to_string()]);
    }

    #[test]
    fn test_open_ended_year_range() {
        let f = Filters { year_to: Some(2015), ..Default::default() };
        let params = SemanticScholarClient::filter_params(&f);
        assert_eq!(params, vec![("year", "-2015".to_string())]);
    }

    #[tokio::test]
    #[ignore = "hits the live Semantic Scholar API"]
    async fn test_live_search() {
        let client = SemanticScholarClient::new(Client::new().unwrap(), 5);
        let out = client
            .search("transformer language models", &Filters::default(), Instant::now() + std::time::Duration::from_secs(20))
            .await;
        assert!(!out.papers.is_empty() || out.error.is_some());
    }
}
