//! Literature index abstraction.
//!
//! The crawl driver and shard planner only need four operations from a
//! search index: a hit count for a date window, a page of identifiers,
//! summary metadata for a batch of identifiers and, as a last resort, the
//! plain-text abstract. [`crate::pubmed::PubMedClient`] implements them
//! against NCBI E-utilities.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Inclusive publication-year window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    pub fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }
}

impl std::fmt::Display for YearRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Bibliographic metadata for one paper
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaperMeta {
    pub pmid: String,
    pub title: String,
    pub journal: String,
    pub year: String,
    pub doi: String,
    pub pmcid: String,
}

impl PaperMeta {
    /// Metadata carrying only the identifier, used when the summary lookup came back empty.
    pub fn bare(pmid: &str) -> Self {
        Self {
            pmid: pmid.to_string(),
            ..Default::default()
        }
    }
}

/// Search index operations used by the planner and the crawl driver.
#[async_trait]
pub trait LiteratureIndex: Send + Sync {
    /// Total hits for `query` restricted to `range`.
    async fn count(&self, query: &str, range: YearRange) -> Result<u64>;

    /// One page of identifiers, `page_size` long, starting at `offset`.
    async fn ids(
        &self,
        query: &str,
        range: YearRange,
        offset: u64,
        page_size: u64,
    ) -> Result<Vec<String>>;

    /// Summary metadata for `ids`. Identifiers the index does not know are omitted.
    async fn summaries(&self, ids: &[String]) -> Result<Vec<PaperMeta>>;

    /// Plain-text abstract, empty when none is available.
    async fn abstract_text(&self, id: &str) -> Result<String>;
}
