//! CrossRef works search client.
//!
//! API: https://api.crossref.org/works
//! Polite pool: pass `mailto` (see CrossRef etiquette).

use async_trait::async_trait;
use paperscout_common::SandboxClient as Client;
use tokio::time::Instant;
use tracing::instrument;

use crate::error::SourceError;
use crate::models::{Filters, PaperType, RawPaper};
use super::{clean_text, collect_pages, get_json, LiteratureSource, Page, PageCursor, PagedSource, SourceOutcome};

pub const SOURCE_NAME: &str = "crossref";

const CR_SEARCH_URL: &str = "https://api.crossref.org/works";
const CR_MAX_ROWS: usize = 100;
const CR_SELECT: &str = "DOI,title,abstract,author,container-title,published,issued,type,is-referenced-by-count,URL";

pub struct CrossRefClient {
    client: Client,
    max_results: usize,
    mailto: Option<String>,
}

impl CrossRefClient {
    pub fn new(client: Client, max_results: usize) -> Self {
        Self { client, max_results, mailto: None }
    }

    pub fn with_mailto(mut self, mailto: Option<String>) -> Self {
        self.mailto = mailto;
        self
    }

    fn filter_param(filters: &Filters) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(from) = filters.year_from {
            parts.push(format!("from-pub-date:{from}"));
        }
        if let Some(to) = filters.year_to {
            parts.push(format!("until-pub-date:{to}"));
        }
        match filters.paper_type {
            PaperType::Journal => parts.push("type:journal-article".to_string()),
            PaperType::Conference => parts.push("type:proceedings-article".to_string()),
            PaperType::Review | PaperType::Any => {}
        }
        (!parts.is_empty()).then(|| parts.join(","))
    }
}

#[async_trait]
impl PagedSource for CrossRefClient {
    fn source_name(&self) -> &'static str { SOURCE_NAME }
    fn max_results(&self) -> usize { self.max_results }

    async fn fetch_page(
        &self,
        query: &str,
        filters: &Filters,
        cursor: &PageCursor,
        want: usize,
    ) -> Result<Page, SourceError> {
        let offset = cursor.offset();
        let rows = want.min(CR_MAX_ROWS);
        let mut params = vec![
            ("query.bibliographic", query.trim().to_string()),
            ("rows", rows.to_string()),
            ("offset", offset.to_string()),
            ("select", CR_SELECT.to_string()),
        ];
        if let Some(filter) = Self::filter_param(filters) {
            params.push(("filter", filter));
        }
        if let Some(mailto) = &self.mailto {
            params.push(("mailto", mailto.clone()));
        }

        let body = get_json(self.client.get(CR_SEARCH_URL)?.query(&params)).await?;
        let items = body["message"]["items"].as_array().cloned().unwrap_or_default();
        let total = body["message"]["total-results"].as_u64().unwrap_or(0) as usize;
        let consumed = offset + items.len();
        let next = (items.len() == rows && consumed < total).then_some(PageCursor::Offset(consumed));
        Ok(Page { papers: items.iter().map(work_to_paper).collect(), next })
    }
}

#[async_trait]
impl LiteratureSource for CrossRefClient {
    fn name(&self) -> &str { SOURCE_NAME }

    #[instrument(skip(self, filters, deadline), fields(source = SOURCE_NAME))]
    async fn search(&self, query: &str, filters: &Filters, deadline: Instant) -> SourceOutcome {
        collect_pages(self, query, filters, deadline).await
    }
}

// ── Conversion ─────────────────────────────────────────────────────────────

/// Removes JATS markup from CrossRef abstracts.
pub(crate) fn strip_jats(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_tag = false;
    for c in raw.chars() {
        match c {
            '<' => { in_tag = true; out.push(' '); }
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    clean_text(&out)
}

fn date_year(v: &serde_json::Value) -> Option<i32> {
    v["date-parts"]
        .as_array()
        .and_then(|dp| dp.first())
        .and_then(|dp| dp.as_array())
        .and_then(|parts| parts.first()?.as_i64())
        .map(|y| y as i32)
}

pub(crate) fn work_to_paper(work: &serde_json::Value) -> RawPaper {
    let title = work["title"]
        .as_array()
        .and_then(|t| t.first())
        .and_then(|t| t.as_str())
        .map(clean_text)
        .unwrap_or_default();

    let authors = work["author"]
        .as_array()
        .map(|list| {
            list.iter()
                .filter_map(|a| {
                    let given  = a["given"].as_str().unwrap_or("").trim();
                    let family = a["family"].as_str().unwrap_or("").trim();
                    let name = match (given.is_empty(), family.is_empty()) {
                        (_, true) => a["name"].as_str()?.trim().to_string(),
                        (true, false) => family.to_string(),
                        (false, false) => format!("{given} {family}"),
                    };
                    (!name.is_empty()).then_some(name)
                })
                .collect()
        })
        .unwrap_or_default();

    let venue = work["container-title"]
        .as_array()
        .and_then(|j| j.first())
        .and_then(|j| j.as_str())
        .map(String::from);

    let year = date_year(&work["published"]).or_else(|| date_year(&work["issued"]));
    let type_hint = work["type"].as_str();

    RawPaper {
        paper_type: PaperType::infer(type_hint, &title, venue.as_deref()),
        title,
        authors,
        abstract_text: work["abstract"].as_str().map(strip_jats).unwrap_or_default(),
        year,
        venue,
        doi: work["DOI"].as_str().map(|d| d.to_lowercase()),
        citation_count: work["is-referenced-by-count"].as_u64().unwrap_or(0),
        url: work["URL"].as_str().map(String::from),
    }
}
