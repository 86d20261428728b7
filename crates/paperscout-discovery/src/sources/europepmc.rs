//! Europe PMC REST API client.
//!
//! Endpoint: https://www.ebi.ac.uk/europepmc/webservices/rest/search

use async_trait::async_trait;
use paperscout_common::SandboxClient as Client;
use tokio::time::Instant;
use tracing::instrument;

use crate::error::SourceError;
use crate::models::{Filters, PaperType, RawPaper};
use super::{clean_text, collect_pages, get_json, leading_year, LiteratureSource, Page, PageCursor, PagedSource, SourceOutcome};

pub const SOURCE_NAME: &str = "europe_pmc";

const EPMC_SEARCH_URL: &str = "https://www.ebi.ac.uk/europepmc/webservices/rest/search";
const EPMC_MAX_PAGE: usize = 1000;

pub struct EuropePmcClient {
    client: Client,
    max_results: usize,
}

impl EuropePmcClient {
    pub fn new(client: Client, max_results: usize) -> Self {
        Self { client, max_results }
    }

    /// Europe PMC takes filters inline in the query string.
    pub(crate) fn build_query(query: &str, filters: &Filters) -> String {
        let mut q = format!("({})", query.trim());
        match (filters.year_from, filters.year_to) {
            (None, None) => {}
            (from, to) => q.push_str(&format!(
                " AND (PUB_YEAR:[{} TO {}])",
                from.unwrap_or(1800),
                to.unwrap_or(2999)
            )),
        }
        if filters.paper_type == PaperType::Review {
            q.push_str(" AND (PUB_TYPE:\"review\")");
        }
        q
    }
}

#[async_trait]
impl PagedSource for EuropePmcClient {
    fn source_name(&self) -> &'static str { SOURCE_NAME }
    fn max_results(&self) -> usize { self.max_results }

    fn first_cursor(&self) -> PageCursor {
        PageCursor::Token("*".to_string())
    }

    async fn fetch_page(
        &self,
        query: &str,
        filters: &Filters,
        cursor: &PageCursor,
        want: usize,
    ) -> Result<Page, SourceError> {
        let params = [
            ("query", Self::build_query(query, filters)),
            ("resultType", "core".to_string()),
            ("pageSize", want.min(EPMC_MAX_PAGE).to_string()),
            ("cursorMark", cursor.token().to_string()),
            ("format", "json".to_string()),
        ];
        let body = get_json(self.client.get(EPMC_SEARCH_URL)?.query(&params)).await?;
        let results = body["resultList"]["result"].as_array().cloned().unwrap_or_default();
        let next = body["nextCursorMark"]
            .as_str()
            .map(|c| PageCursor::Token(c.to_string()));
        Ok(Page { papers: results.iter().map(result_to_paper).collect(), next })
    }
}

#[async_trait]
impl LiteratureSource for EuropePmcClient {
    fn name(&self) -> &str { SOURCE_NAME }

    #[instrument(skip(self, filters, deadline), fields(source = SOURCE_NAME))]
    async fn search(&self, query: &str, filters: &Filters, deadline: Instant) -> SourceOutcome {
        collect_pages(self, query, filters, deadline).await
    }
}

pub(crate) fn result_to_paper(r: &serde_json::Value) -> RawPaper {
    let title = r["title"].as_str().map(clean_text).unwrap_or_default();
    let title = title.trim_end_matches('.').to_string();

    let authors = match r["authorList"]["author"].as_array() {
        Some(list) => list
            .iter()
            .filter_map(|a| a["fullName"].as_str().map(String::from))
            .collect(),
        None => r["authorString"]
            .as_str()
            .map(|s| {
                s.trim_end_matches('.')
                    .split(", ")
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect()
            })
            .unwrap_or_default(),
    };

    let venue = r["journalInfo"]["journal"]["title"]
        .as_str()
        .or_else(|| r["journalTitle"].as_str())
        .map(String::from);

    let pub_types: Vec<String> = r["pubTypeList"]["pubType"]
        .as_array()
        .map(|a| a.iter().filter_map(|t| t.as_str().map(|s| s.to_lowercase())).collect())
        .unwrap_or_default();
    let type_hint = if pub_types.iter().any(|t| t.contains("review")) {
        Some("review")
    } else if pub_types.iter().any(|t| t == "journal article" || t == "research-article") {
        Some("journal")
    } else {
        None
    };

    let url = r["pmid"]
        .as_str()
        .map(|pmid| format!("https://europepmc.org/article/MED/{pmid}"))
        .or_else(|| {
            let (src, id) = (r["source"].as_str()?, r["id"].as_str()?);
            Some(format!("https://europepmc.org/article/{src}/{id}"))
        });

    RawPaper {
        paper_type: PaperType::infer(type_hint, &title, venue.as_deref()),
        title,
        authors,
        abstract_text: r["abstractText"].as_str().map(crate::sources::crossref::strip_jats).unwrap_or_default(),
        year: r["pubYear"].as_str().and_then(leading_year),
        venue,
        doi: r["doi"].as_str().map(|d| d.to_lowercase()),
        citation_count: r["citedByCount"].as_u64().unwrap_or(0),
        url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_to_paper_uses_author_string_fallback() {
        let r = serde_json::json!({
            "id": "123", "source": "MED", "pmid": "123",
            "title": "CRISPR screens in cancer cells.",
            "authorString": "Smith J, Doe A.",
            "abstractText": "Some <i>abstract</i> text.",
            "pubYear": "2020",
            "journalTitle": "Cell",
            "doi": "10.1016/J.CELL.2020.01.001",
            "citedByCount": 17,
            "pubTypeList": { "pubType": ["Journal Article"] }
        });
        let p = result_to_paper(&r);
        assert_eq!(p.title, "CRISPR screens in cancer cells");
        assert_eq!(p.authors, vec!["Smith J".to_string(), "Doe A".to_string()]);
        assert_eq!(p.abstract_text, "Some abstract text.");
        assert_eq!(p.year, Some(2020));
        assert_eq!(p.citation_count, 17);
        assert_eq!(p.paper_type, Some(PaperType::Journal));
        assert_eq!(p.url.as_deref(), Some("https://europepmc.org/article/MED/123"));
    }

    #[test]
    fn test_build_query() {
        let f = Filters { year_from: Some(2015), year_to: Some(2020), paper_type: PaperType::Review, ..Default::default() };
        assert_eq!(
            EuropePmcClient::build_query("tumour microenvironment", &f),
            "(tumour microenvironment) AND (PUB_YEAR:[2015 TO 2020]) AND (PUB_TYPE:\"review\")"
        );
    }

    #[tokio::test]
    #[ignore = "hits the live Europe PMC API"]
    async fn test_live_search() {
        let client = EuropePmcClient::new(Client::new().unwrap(), 5);
        let out = client
            .search("KRAS inhibitors", &Filters::default(), Instant::now() + std::time::Duration::from_secs(20))
            .await;
        assert!(out.error.is_none());
        assert!(!out.papers.is_empty());
    }
}
