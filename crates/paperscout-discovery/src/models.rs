//! Data models for the discovery pipeline.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type PaperId = Uuid;

/// Provenance tag for papers injected through the upload path.
pub const UPLOAD_SOURCE: &str = "upload";
/// Provenance tag for papers first seen in an augmented round.
pub const AUGMENTED_SOURCE: &str = "augmented";

/// Coarse publication type, used by `Filters::paper_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperType {
    Journal,
    Conference,
    Review,
    #[default]
    Any,
}

impl PaperType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaperType::Journal    => "journal",
            PaperType::Conference => "conference",
            PaperType::Review     => "review",
            PaperType::Any        => "any",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "journal"    => Some(PaperType::Journal),
            "conference" => Some(PaperType::Conference),
            "review"     => Some(PaperType::Review),
            "any" | ""   => Some(PaperType::Any),
            _            => None,
        }
    }

    /// Classify a paper from a provider type hint, its title and its venue.
    /// Returns `None` when nothing points to a specific type.
    pub fn infer(type_hint: Option<&str>, title: &str, venue: Option<&str>) -> Option<Self> {
        let hint = type_hint.unwrap_or("").to_lowercase();
        let title = title.to_lowercase();
        if hint.contains("review") || title.contains("a review") || title.contains("survey")
            || title.starts_with("review") || title.contains(": review")
        {
            return Some(PaperType::Review);
        }
        match hint.as_str() {
            "journal-article" | "article" | "journalarticle" | "journal" | "research-article" => {
                return Some(PaperType::Journal)
            }
            "proceedings-article" | "conference" | "proceedings" | "conference-paper" => {
                return Some(PaperType::Conference)
            }
            _ => {}
        }
        let venue = venue.unwrap_or("").to_lowercase();
        if ["conference", "proceedings", "symposium", "workshop"].iter().any(|k| venue.contains(k)) {
            return Some(PaperType::Conference);
        }
        if venue.contains("journal") || venue.contains("transactions") || venue.contains("letters") {
            return Some(PaperType::Journal);
        }
        None
    }
}

/// Search filters shared by every source adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filters {
    /// Inclusive lower publication-year bound.
    #[serde(default)]
    pub year_from: Option<i32>,
    /// Inclusive upper publication-year bound.
    #[serde(default)]
    pub year_to: Option<i32>,
    #[serde(default)]
    pub min_citations: u64,
    #[serde(default)]
    pub paper_type: PaperType,
}

/// Publication years accepted in filters.
pub const YEAR_RANGE: std::ops::RangeInclusive<i32> = 1000..=9999;

impl Filters {
    pub fn validate(&self) -> Result<(), String> {
        for (name, year) in [("year_from", self.year_from), ("year_to", self.year_to)] {
            if let Some(y) = year.filter(|y| !YEAR_RANGE.contains(y)) {
                return Err(format!("{name} ({y}) must be between {} and {}", YEAR_RANGE.start(), YEAR_RANGE.end()));
            }
        }
        if let (Some(from), Some(to)) = (self.year_from, self.year_to) {
            if to < from {
                return Err(format!("year_to ({to}) must be >= year_from ({from})"));
            }
        }
        Ok(())
    }

    pub fn has_year_bounds(&self) -> bool {
        self.year_from.is_some() || self.year_to.is_some()
    }

    /// Client-side check for the constraints a provider could not express.
    /// A paper with an unknown year fails any year bound; an unclassified
    /// paper fails any specific paper type.
    pub fn accepts(&self, paper: &RawPaper) -> bool {
        if self.has_year_bounds() {
            let Some(year) = paper.year else { return false };
            if self.year_from.is_some_and(|from| year < from) {
                return false;
            }
            if self.year_to.is_some_and(|to| year > to) {
                return false;
            }
        }
        if paper.citation_count < self.min_citations {
            return false;
        }
        match self.paper_type {
            PaperType::Any => true,
            wanted => paper.paper_type == Some(wanted),
        }
    }
}

/// A paper exactly as one adapter (or the upload path) produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPaper {
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default, rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub citation_count: u64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub paper_type: Option<PaperType>,
}

impl RawPaper {
    pub fn new(title: impl Into<String>) -> Self {
        Self { title: title.into(), ..Default::default() }
    }

    /// Title plus abstract, the text that gets embedded.
    pub fn embedding_text(&self) -> String {
        if self.abstract_text.is_empty() {
            self.title.clone()
        } else {
            format!("{}\n\n{}", self.title, self.abstract_text)
        }
    }
}

/// Canonical record for one real-world paper within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperRecord {
    pub id: PaperId,
    pub title: String,
    pub authors: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub year: Option<i32>,
    pub venue: Option<String>,
    pub doi: Option<String>,
    pub citation_count: u64,
    pub url: Option<String>,
    pub paper_type: Option<PaperType>,
    /// Provenance, first entry is the primary source.
    pub sources: Vec<String>,
    pub relevance_score: Option<f64>,
    pub relevance_confidence: Option<f64>,
    pub similarity_score: Option<f64>,
    pub dedup_key: String,
    /// Round number in which the paper entered the session (0-based).
    pub first_seen_iteration: usize,
}

impl PaperRecord {
    pub fn from_raw(raw: RawPaper, source: &str, dedup_key: String, round: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: raw.title.trim().to_string(),
            authors: raw.authors,
            abstract_text: raw.abstract_text,
            year: raw.year,
            venue: raw.venue,
            doi: raw.doi,
            citation_count: raw.citation_count,
            url: raw.url,
            paper_type: raw.paper_type,
            sources: vec![source.to_string()],
            relevance_score: None,
            relevance_confidence: None,
            similarity_score: None,
            dedup_key,
            first_seen_iteration: round,
        }
    }

    pub fn source_name(&self) -> &str {
        self.sources.first().map(String::as_str).unwrap_or("unknown")
    }

    /// Adds a provenance tag; returns true if it was not already present.
    pub fn add_source(&mut self, source: &str) -> bool {
        if self.sources.iter().any(|s| s == source) {
            return false;
        }
        self.sources.push(source.to_string());
        true
    }

    pub fn embedding_text(&self) -> String {
        if self.abstract_text.is_empty() {
            self.title.clone()
        } else {
            format!("{}\n\n{}", self.title, self.abstract_text)
        }
    }
}

/// What kind of round produced an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationKind {
    Initial,
    Augmented,
    Upload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedSource {
    pub name: String,
    pub reason: String,
}

/// Immutable summary of one orchestration round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub query_used: String,
    pub kind: IterationKind,
    /// Adapters that completed without error, sorted by name.
    pub sources_queried: Vec<String>,
    pub failed_sources: Vec<FailedSource>,
    pub new_paper_ids: Vec<PaperId>,
    pub dedup_collisions: usize,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Insertion-ordered set of canonical papers with DOI / title lookups.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<PaperRecord>", into = "Vec<PaperRecord>")]
pub struct PaperSet {
    papers: Vec<PaperRecord>,
    by_id: HashMap<PaperId, usize>,
    by_doi: HashMap<String, PaperId>,
    by_title: HashMap<String, PaperId>,
}

impl PaperSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.papers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.papers.is_empty()
    }

    pub fn contains(&self, id: &PaperId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn get(&self, id: &PaperId) -> Option<&PaperRecord> {
        self.by_id.get(id).map(|&i| &self.papers[i])
    }

    pub fn get_mut(&mut self, id: &PaperId) -> Option<&mut PaperRecord> {
        match self.by_id.get(id) {
            Some(&i) => Some(&mut self.papers[i]),
            None => None,
        }
    }

    /// Papers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &PaperRecord> {
        self.papers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PaperRecord> {
        self.papers.iter_mut()
    }

    pub fn ids(&self) -> Vec<PaperId> {
        self.papers.iter().map(|p| p.id).collect()
    }

    /// Position of a paper in insertion order.
    pub fn position(&self, id: &PaperId) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub fn find_by_doi(&self, normalized_doi: &str) -> Option<PaperId> {
        self.by_doi.get(normalized_doi).copied()
    }

    pub fn find_by_title(&self, normalized_title: &str) -> Option<PaperId> {
        self.by_title.get(normalized_title).copied()
    }

    /// Inserts a new record. Records are never removed.
    pub fn insert(&mut self, record: PaperRecord) -> PaperId {
        let id = record.id;
        self.index_keys(&record);
        self.by_id.insert(id, self.papers.len());
        self.papers.push(record);
        id
    }

    /// Re-registers the lookup keys of a record whose bibliographic fields
    /// changed. Existing keys keep pointing at their first owner.
    pub fn reindex(&mut self, id: &PaperId) {
        if let Some(&i) = self.by_id.get(id) {
            let record = self.papers[i].clone();
            self.index_keys(&record);
        }
    }

    fn index_keys(&mut self, record: &PaperRecord) {
        if let Some(doi) = record.doi.as_deref().map(crate::dedup::normalize_doi) {
            if !doi.is_empty() {
                self.by_doi.entry(doi).or_insert(record.id);
            }
        }
        let title = crate::dedup::normalize_title(&record.title);
        if !title.is_empty() {
            self.by_title.entry(title).or_insert(record.id);
        }
    }
}

impl From<Vec<PaperRecord>> for PaperSet {
    fn from(records: Vec<PaperRecord>) -> Self {
        let mut set = PaperSet::new();
        for r in records {
            set.insert(r);
        }
        set
    }
}

impl From<PaperSet> for Vec<PaperRecord> {
    fn from(set: PaperSet) -> Self {
        set.papers
    }
}
