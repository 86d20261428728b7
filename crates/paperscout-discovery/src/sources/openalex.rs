//! OpenAlex works search client.
//!
//! Endpoint: https://api.openalex.org/works (cursor pagination)

use async_trait::async_trait;
use paperscout_common::SandboxClient as Client;
use tokio::time::Instant;
use tracing::instrument;

use crate::error::SourceError;
use crate::models::{Filters, PaperType, RawPaper};
use super::{clean_text, collect_pages, get_json, LiteratureSource, Page, PageCursor, PagedSource, SourceOutcome};

pub const SOURCE_NAME: &str = "openalex";

const OA_WORKS_URL: &str = "https://api.openalex.org/works";
const OA_MAX_PER_PAGE: usize = 200;

pub struct OpenAlexClient {
    client: Client,
    max_results: usize,
    mailto: Option<String>,
}

impl OpenAlexClient {
    pub fn new(client: Client, max_results: usize) -> Self {
        Self { client, max_results, mailto: None }
    }

    pub fn with_mailto(mut self, mailto: Option<String>) -> Self {
        self.mailto = mailto;
        self
    }

    fn filter_param(filters: &Filters) -> Option<String> {
        let mut parts = Vec::new();
        match (filters.year_from, filters.year_to) {
            (Some(from), Some(to)) => parts.push(format!("publication_year:{from}-{to}")),
            (Some(from), None) => parts.push(format!("publication_year:>{}", from.saturating_sub(1))),
            (None, Some(to)) => parts.push(format!("publication_year:<{}", to.saturating_add(1))),
            (None, None) => {}
        }
        if filters.min_citations > 0 {
            parts.push(format!("cited_by_count:>{}", filters.min_citations - 1));
        }
        match filters.paper_type {
            PaperType::Review => parts.push("type:review".to_string()),
            PaperType::Journal => parts.push("type:article".to_string()),
            PaperType::Conference | PaperType::Any => {}
        }
        (!parts.is_empty()).then(|| parts.join(","))
    }
}

#[async_trait]
impl PagedSource for OpenAlexClient {
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
        let mut params = vec![
            ("search", query.trim().to_string()),
            ("per_page", want.min(OA_MAX_PER_PAGE).to_string()),
            ("cursor", cursor.token().to_string()),
        ];
        if let Some(filter) = Self::filter_param(filters) {
            params.push(("filter", filter));
        }
        if let Some(mailto) = &self.mailto {
            params.push(("mailto", mailto.clone()));
        }

        let body = get_json(self.client.get(OA_WORKS_URL)?.query(&params)).await?;
        let results = body["results"].as_array().cloned().unwrap_or_default();
        let next = body["meta"]["next_cursor"]
            .as_str()
            .map(|c| PageCursor::Token(c.to_string()));
        Ok(Page { papers: results.iter().map(work_to_paper).collect(), next })
    }
}

#[async_trait]
impl LiteratureSource for OpenAlexClient {
    fn name(&self) -> &str { SOURCE_NAME }

    #[instrument(skip(self, filters, deadline), fields(source = SOURCE_NAME))]
    async fn search(&self, query: &str, filters: &Filters, deadline: Instant) -> SourceOutcome {
        collect_pages(self, query, filters, deadline).await
    }
}

/// Rebuilds abstract text from OpenAlex's `abstract_inverted_index`
/// (word → list of positions).
pub(crate) fn rebuild_abstract(index: &serde_json::Value) -> String {
    let Some(map) = index.as_object() else { return String::new() };
    let mut positioned: Vec<(u64, &str)> = map
        .iter()
        .flat_map(|(word, positions)| {
            positions
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|p| p.as_u64())
                .map(move |p| (p, word.as_str()))
        })
        .collect();
    positioned.sort_by_key(|(p, _)| *p);
    positioned.into_iter().map(|(_, w)| w).collect::<Vec<_>>().join(" ")
}

pub(crate) fn work_to_paper(work: &serde_json::Value) -> RawPaper {
    let title = work["display_name"]
        .as_str()
        .or_else(|| work["title"].as_str())
        .map(clean_text)
        .unwrap_or_default();

    let authors = work["authorships"]
        .as_array()
        .map(|list| {
            list.iter()
                .filter_map(|a| a["author"]["display_name"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    let source = &work["primary_location"]["source"];
    let venue = source["display_name"].as_str().map(String::from);

    let doi = work["doi"].as_str().map(|d| {
        d.trim_start_matches("https://doi.org/")
            .trim_start_matches("http://doi.org/")
            .to_lowercase()
    });

    // OpenAlex "article" covers both journals and proceedings; the source
    // type disambiguates.
    let type_hint = match (work["type"].as_str(), source["type"].as_str()) {
        (Some("article"), Some("conference")) => Some("conference"),
        (Some("article"), Some("journal")) => Some("journal"),
        (Some("article"), _) => None,
        (t, _) => t,
    };

    RawPaper {
        paper_type: PaperType::infer(type_hint, &title, venue.as_deref()),
        title,
        authors,
        abstract_text: rebuild_abstract(&work["abstract_inverted_index"]),
        year: work["publication_year"].as_i64().map(|y| y as i32),
        venue,
        doi,
        citation_count: work["cited_by_count"].as_u64().unwrap_or(0),
        url: work["id"].as_str().map(String::from),
    }
}
