//! Cross-source deduplication.
//!
//! Staged matching against the session's paper set:
//! 1. DOI exact match (normalised)
//! 2. Normalised title match
//! 3. Fuzzy title match (token Jaccard) within a publication-year window
//!
//! Batches are consumed in canonical order (source name, then position in
//! the source's list), so the result does not depend on which adapter
//! finished first.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{PaperId, PaperRecord, PaperSet, RawPaper};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Minimum title-token Jaccard for a fuzzy match.
    pub fuzzy_threshold: f64,
    /// Maximum publication-year difference for a fuzzy match.
    pub year_window: i32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { fuzzy_threshold: 0.85, year_window: 1 }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// Ids created by this merge, in canonical order.
    pub new_ids: Vec<PaperId>,
    /// Incoming records that matched an existing (or earlier incoming) paper.
    pub collisions: usize,
    /// Existing papers whose bibliographic fields changed.
    pub updated_ids: Vec<PaperId>,
    /// Incoming records dropped for having no title.
    pub discarded: usize,
}

/// How an incoming record matched an existing paper.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchKind {
    Doi,
    Title,
    Fuzzy(f64),
}

#[derive(Debug, Clone, Default)]
pub struct DedupEngine {
    config: DedupConfig,
}

impl DedupEngine {
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Merges per-source batches into `papers`.
    ///
    /// New records get `marker` (if any) as their first provenance entry,
    /// followed by the batch's source name. `round` becomes their
    /// `first_seen_iteration`.
    pub fn merge(
        &self,
        papers: &mut PaperSet,
        batches: BTreeMap<String, Vec<RawPaper>>,
        round: usize,
        marker: Option<&str>,
    ) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        let mut updated: HashSet<PaperId> = HashSet::new();

        for (source, batch) in batches {
            for raw in batch {
                if raw.title.trim().is_empty() {
                    outcome.discarded += 1;
                    continue;
                }
                match self.find_match(papers, &raw) {
                    Some((id, kind)) => {
                        debug!(%source, ?kind, title = %raw.title, "duplicate paper merged");
                        outcome.collisions += 1;
                        if merge_into(papers, &id, raw, &source) && updated.insert(id) {
                            outcome.updated_ids.push(id);
                        }
                    }
                    None => {
                        let key = dedup_key(&raw);
                        let mut record = PaperRecord::from_raw(raw, &source, key, round);
                        if let Some(m) = marker {
                            if m != source {
                                record.sources.insert(0, m.to_string());
                            }
                        }
                        outcome.new_ids.push(papers.insert(record));
                    }
                }
            }
        }

        // Papers created in this merge are not "updated".
        let fresh: HashSet<_> = outcome.new_ids.iter().copied().collect();
        outcome.updated_ids.retain(|id| !fresh.contains(id));
        outcome
    }

    /// Finds the existing paper an incoming record duplicates.
    pub fn find_match(&self, papers: &PaperSet, raw: &RawPaper) -> Option<(PaperId, MatchKind)> {
        if let Some(doi) = raw.doi.as_deref().map(normalize_doi).filter(|d| !d.is_empty()) {
            if let Some(id) = papers.find_by_doi(&doi) {
                return Some((id, MatchKind::Doi));
            }
        }

        let title = normalize_title(&raw.title);
        if let Some(id) = papers.find_by_title(&title) {
            return Some((id, MatchKind::Title));
        }

        let year = raw.year?;
        let tokens = title_tokens(&raw.title);
        let mut best: Option<(PaperId, f64)> = None;
        for existing in papers.iter() {
            let Some(other_year) = existing.year else { continue };
            if (other_year - year).abs() > self.config.year_window {
                continue;
            }
            let score = jaccard(&tokens, &title_tokens(&existing.title));
            if score >= self.config.fuzzy_threshold && best.map_or(true, |(_, b)| score > b) {
                best = Some((existing.id, score));
            }
        }
        best.map(|(id, score)| (id, MatchKind::Fuzzy(score)))
    }
}

/// Folds an incoming duplicate into an existing record. Returns true if any
/// bibliographic field changed.
fn merge_into(papers: &mut PaperSet, id: &PaperId, raw: RawPaper, source: &str) -> bool {
    let Some(record) = papers.get_mut(id) else { return false };
    let before = record.clone();
    record.add_source(source);

    if raw.citation_count > record.citation_count {
        // Higher-cited variant wins; the old values only fill its gaps.
        let old = std::mem::replace(
            record,
            PaperRecord {
                title: raw.title.trim().to_string(),
                authors: raw.authors,
                abstract_text: raw.abstract_text,
                year: raw.year,
                venue: raw.venue,
                doi: raw.doi,
                citation_count: raw.citation_count,
                url: raw.url,
                paper_type: raw.paper_type,
                ..before.clone()
            },
        );
        record.sources = old.sources.clone();
        backfill(record, old.authors, old.abstract_text, old.year, old.venue, old.doi, old.url, old.paper_type);
    } else {
        backfill(record, raw.authors, raw.abstract_text, raw.year, raw.venue, raw.doi, raw.url, raw.paper_type);
    }
    record.dedup_key = key_for(record.doi.as_deref(), &record.title, record.year);

    let mut unchanged = before;
    unchanged.sources = record.sources.clone();
    let changed = unchanged != *record;
    if changed {
        papers.reindex(id);
    }
    changed
}

#[allow(clippy::too_many_arguments)]
fn backfill(
    record: &mut PaperRecord,
    authors: Vec<String>,
    abstract_text: String,
    year: Option<i32>,
    venue: Option<String>,
    doi: Option<String>,
    url: Option<String>,
    paper_type: Option<crate::models::PaperType>,
) {
    if record.authors.is_empty() {
        record.authors = authors;
    }
    if record.abstract_text.trim().is_empty() {
        record.abstract_text = abstract_text;
    }
    record.year = record.year.or(year);
    record.venue = record.venue.take().or(venue);
    record.doi = record.doi.take().or(doi);
    record.url = record.url.take().or(url);
    record.paper_type = record.paper_type.or(paper_type);
}

/// Lowercased DOI with resolver and `doi:` prefixes removed.
pub fn normalize_doi(doi: &str) -> String {
    let d = doi.trim().to_lowercase();
    let d = ["https://doi.org/", "http://doi.org/", "https://dx.doi.org/", "http://dx.doi.org/", "doi:"]
        .iter()
        .fold(d, |acc, prefix| acc.strip_prefix(prefix).map(str::to_string).unwrap_or(acc));
    d.trim().to_string()
}

/// Lowercased title with every non-alphanumeric character removed.
pub fn normalize_title(title: &str) -> String {
    title.chars().filter(|c| c.is_alphanumeric()).flat_map(char::to_lowercase).collect()
}

fn title_tokens(title: &str) -> HashSet<String> {
    title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Token-set Jaccard similarity of two titles, in [0, 1].
pub fn title_token_overlap(a: &str, b: &str) -> f64 {
    jaccard(&title_tokens(a), &title_tokens(b))
}

fn key_for(doi: Option<&str>, title: &str, year: Option<i32>) -> String {
    match doi.map(normalize_doi).filter(|d| !d.is_empty()) {
        Some(doi) => format!("doi:{doi}"),
        None => format!(
            "title:{}|{}",
            normalize_title(title),
            year.map(|y| y.to_string()).unwrap_or_default()
        ),
    }
}

/// `doi:<normalised>` when a DOI is present, else `title:<normalised>|<year>`.
pub fn dedup_key(raw: &RawPaper) -> String {
    key_for(raw.doi.as_deref(), &raw.title, raw.year)
}

/// FNV-1a 64-bit hash.
pub(crate) fn fnv64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 14695981039346656037;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    hash
}
