use paperscout_discovery::RawPaper;

/// A paper with a title, year and citation count.
pub fn paper(title: &str, year: i32, citations: u64) -> RawPaper {
    RawPaper {
        title: title.to_string(),
        abstract_text: format!("This work studies {}.", title.to_lowercase()),
        year: Some(year),
        citation_count: citations,
        authors: vec!["A. Author".to_string()],
        ..Default::default()
    }
}

pub fn paper_with_doi(title: &str, doi: &str, year: i32, citations: u64) -> RawPaper {
    RawPaper { doi: Some(doi.to_string()), ..paper(title, year, citations) }
}
