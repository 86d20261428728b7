//! arXiv API client (Atom feed).
//!
//! Endpoint: http://export.arxiv.org/api/query
//! arXiv exposes no citation counts; every paper reports 0.

use async_trait::async_trait;
use paperscout_common::SandboxClient as Client;
use quick_xml::events::Event;
use quick_xml::Reader;
use tokio::time::Instant;
use tracing::{instrument, warn};

use crate::error::SourceError;
use crate::models::{Filters, PaperType, RawPaper};
use super::{clean_text, collect_pages, leading_year, send_with_retry, LiteratureSource, Page, PageCursor, PagedSource, SourceOutcome};

pub const SOURCE_NAME: &str = "arxiv";

const ARXIV_QUERY_URL: &str = "http://export.arxiv.org/api/query";
const ARXIV_MAX_PAGE: usize = 100;

pub struct ArxivClient {
    client: Client,
    max_results: usize,
}

impl ArxivClient {
    pub fn new(client: Client, max_results: usize) -> Self {
        Self { client, max_results }
    }

    /// Builds the `search_query` expression, including the submission-date
    /// range when year bounds are set.
    pub(crate) fn search_query(query: &str, filters: &Filters) -> String {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric() && c != '-'))
            .filter(|t| !t.is_empty())
            .map(|t| format!("all:{t}"))
            .collect();
        let mut expr = terms.join(" AND ");
        if filters.has_year_bounds() {
            let from = filters.year_from.map(|y| format!("{y}01010000")).unwrap_or_else(|| "190001010000".to_string());
            let to = filters.year_to.map(|y| format!("{y}12312359")).unwrap_or_else(|| "299912312359".to_string());
            expr = format!("({expr}) AND submittedDate:[{from} TO {to}]");
        }
        expr
    }
}

#[async_trait]
impl PagedSource for ArxivClient {
    fn source_name(&self) -> &'static str { SOURCE_NAME }
    fn max_results(&self) -> usize { self.max_results }

    async fn fetch_page(
        &self,
        query: &str,
        filters: &Filters,
        cursor: &PageCursor,
        want: usize,
    ) -> Result<Page, SourceError> {
        let start = cursor.offset();
        let count = want.min(ARXIV_MAX_PAGE);
        let params = [
            ("search_query", Self::search_query(query, filters)),
            ("start", start.to_string()),
            ("max_results", count.to_string()),
            ("sortBy", "relevance".to_string()),
        ];
        let resp = send_with_retry(self.client.get(ARXIV_QUERY_URL)?.query(&params)).await?;
        let xml = resp.text().await?;
        let papers = parse_atom_feed(&xml)?;
        let next = (papers.len() == count).then_some(PageCursor::Offset(start + papers.len()));
        Ok(Page { papers, next })
    }
}

#[async_trait]
impl LiteratureSource for ArxivClient {
    fn name(&self) -> &str { SOURCE_NAME }

    #[instrument(skip(self, filters, deadline), fields(source = SOURCE_NAME))]
    async fn search(&self, query: &str, filters: &Filters, deadline: Instant) -> SourceOutcome {
        collect_pages(self, query, filters, deadline).await
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    None,
    Title,
    Summary,
    Published,
    Id,
    AuthorName,
    Doi,
    JournalRef,
}

/// Parses an arXiv Atom feed into RawPapers.
pub(crate) fn parse_atom_feed(xml: &str) -> Result<Vec<RawPaper>, SourceError> {
    let mut papers = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut current: Option<RawPaper> = None;
    let mut journal_ref: Option<String> = None;
    let mut field = Field::None;
    let mut in_author = false;
    let mut text = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                text.clear();
                match e.name().as_ref() {
                    b"entry" => {
                        current = Some(RawPaper::default());
                        journal_ref = None;
                    }
                    b"author" => in_author = true,
                    b"title" if current.is_some() => field = Field::Title,
                    b"summary" => field = Field::Summary,
                    b"published" => field = Field::Published,
                    b"id" if current.is_some() => field = Field::Id,
                    b"name" if in_author => field = Field::AuthorName,
                    b"arxiv:doi" => field = Field::Doi,
                    b"arxiv:journal_ref" => field = Field::JournalRef,
                    _ => {}
                }
            }
            Ok(Event::Text(ref e)) => {
                if field != Field::None {
                    let chunk = e.unescape().map_err(|err| SourceError::Parse(err.to_string()))?;
                    text.push_str(&chunk);
                }
            }
            Ok(Event::End(ref e)) => {
                let name = e.name();
                if let Some(ref mut p) = current {
                    match (field, name.as_ref()) {
                        (Field::Title, b"title") => p.title = clean_text(&text),
                        (Field::Summary, b"summary") => p.abstract_text = clean_text(&text),
                        (Field::Published, b"published") => p.year = leading_year(&text),
                        (Field::Id, b"id") => p.url = Some(text.trim().to_string()),
                        (Field::AuthorName, b"name") => p.authors.push(clean_text(&text)),
                        (Field::Doi, b"arxiv:doi") => p.doi = Some(text.trim().to_lowercase()),
                        (Field::JournalRef, b"arxiv:journal_ref") => journal_ref = Some(clean_text(&text)),
                        _ => {}
                    }
                }
                field = Field::None;
                match name.as_ref() {
                    b"author" => in_author = false,
                    b"entry" => {
                        if let Some(mut p) = current.take() {
                            // Preprints with a journal reference were published.
                            let hint = journal_ref.as_ref().map(|_| "journal");
                            p.paper_type = PaperType::infer(hint, &p.title, journal_ref.as_deref());
                            p.venue = journal_ref.take().or_else(|| Some("arXiv".to_string()));
                            if p.title.is_empty() {
                                warn!("Skipping arXiv entry with empty title");
                            } else {
                                papers.push(p);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SourceError::Parse(format!("arXiv feed: {e}")));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(papers)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title type="html">ArXiv Query: search_query=all:graph</title>
  <id>http://arxiv.org/api/xyz</id>
  <entry>
    <id>http://arxiv.org/abs/1609.02907v4</id>
    <published>2016-09-09T19:48:34Z</published>
    <title>Semi-Supervised Classification with
      Graph Convolutional Networks</title>
    <summary>We present a scalable approach &amp; more.</summary>
    <author><name>Thomas N. Kipf</name></author>
    <author><name>Max Welling</name></author>
    <arxiv:doi>10.48550/ARXIV.1609.02907</arxiv:doi>
    <arxiv:journal_ref>ICLR 2017 conference proceedings</arxiv:journal_ref>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2101.00001v1</id>
    <published>2021-01-01T00:00:00Z</published>
    <title>A Plain Preprint</title>
    <summary>Nothing here.</summary>
    <author><name>Ann Author</name></author>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_atom_feed() {
        let papers = parse_atom_feed(FEED).unwrap();
        assert_eq!(papers.len(), 2);
        let gcn = &papers[0];
        assert_eq!(gcn.title, "Semi-Supervised Classification with Graph Convolutional Networks");
        assert_eq!(gcn.abstract_text, "We present a scalable approach & more.");
        assert_eq!(gcn.year, Some(2016));
        assert_eq!(gcn.authors, vec!["Thomas N. Kipf".to_string(), "Max Welling".to_string()]);
        assert_eq!(gcn.doi.as_deref(), Some("10.48550/arxiv.1609.02907"));
        assert_eq!(gcn.citation_count, 0);
        assert_eq!(gcn.paper_type, Some(PaperType::Journal));

        let plain = &papers[1];
        assert_eq!(plain.venue.as_deref(), Some("arXiv"));
        assert_eq!(plain.paper_type, None);
        assert_eq!(plain.url.as_deref(), Some("http://arxiv.org/abs/2101.00001v1"));
    }

    #[test]
    fn test_search_query_with_dates() {
        let f = Filters { year_from: Some(2019), ..Default::default() };
        assert_eq!(
            ArxivClient::search_query("graph networks", &f),
            "(all:graph AND all:networks) AND submittedDate:[201901010000 TO 299912312359]"
        );
    }

    #[test]
    fn test_malformed_feed_is_parse_error() {
        let err = parse_atom_feed("<feed><entry><title>x</entry></feed>").unwrap_err();
        assert!(matches!(err, SourceError::Parse(_)));
    }

    #[tokio::test]
    #[ignore = "hits the live arXiv API"]
    async fn test_live_search() {
        let client = ArxivClient::new(Client::new().unwrap(), 5);
        let out = client
            .search("diffusion models", &Filters::default(), Instant::now() + std::time::Duration::from_secs(20))
            .await;
        assert!(out.error.is_none());
    }
}
