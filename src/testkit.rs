//! In-memory collaborators for unit tests.

use crate::error::{BifError, Result};
use crate::fulltext::{ResolvedText, TextResolver, TextSource};
use crate::http::Sleeper;
use crate::index::{LiteratureIndex, PaperMeta, YearRange};
use crate::pipeline::{ClassifiedProjection, Extractor, ProjectionRecord};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Sleeper that records requested delays instead of sleeping.
#[derive(Default)]
pub(crate) struct RecordingSleeper {
    pub calls: AtomicUsize,
    pub delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.delays.lock().unwrap().push(duration);
    }
}

/// Literature index backed by fixed counts and identifier lists.
#[derive(Default)]
pub(crate) struct FakeIndex {
    counts: HashMap<(i32, i32), u64>,
    year_counts: Option<(i32, Vec<u64>)>,
    pages: HashMap<(i32, i32), Vec<String>>,
    abstracts: HashMap<String, String>,
    fail_ids: bool,
    fail_counts: bool,
    count_calls: Mutex<Vec<YearRange>>,
    id_calls: Mutex<Vec<(YearRange, u64)>>,
    summary_calls: Mutex<Vec<Vec<String>>>,
}

impl FakeIndex {
    /// Exact counts per (start, end) range; unlisted ranges count 0.
    pub fn with_counts(counts: &[((i32, i32), u64)]) -> Self {
        Self {
            counts: counts.iter().copied().collect(),
            ..Default::default()
        }
    }

    /// Per-year counts starting at `first_year`; a range counts the sum of its years.
    pub fn with_year_counts(first_year: i32, per_year: &[u64]) -> Self {
        Self {
            year_counts: Some((first_year, per_year.to_vec())),
            ..Default::default()
        }
    }

    /// Identifiers returned, in order, when paging through `range`.
    pub fn with_page_ids(mut self, range: (i32, i32), ids: &[&str]) -> Self {
        self.pages
            .insert(range, ids.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_abstract(mut self, id: &str, text: &str) -> Self {
        self.abstracts.insert(id.to_string(), text.to_string());
        self
    }

    /// Every page request fails as if retries were used up.
    pub fn failing_ids(mut self) -> Self {
        self.fail_ids = true;
        self
    }

    /// Every count request fails as if retries were used up.
    pub fn failing_counts(mut self) -> Self {
        self.fail_counts = true;
        self
    }

    pub fn count_calls(&self) -> Vec<YearRange> {
        self.count_calls.lock().unwrap().clone()
    }

    pub fn id_calls(&self) -> Vec<(YearRange, u64)> {
        self.id_calls.lock().unwrap().clone()
    }

    pub fn summary_calls(&self) -> Vec<Vec<String>> {
        self.summary_calls.lock().unwrap().clone()
    }

    fn known(&self, id: &str) -> bool {
        self.pages.values().any(|ids| ids.iter().any(|i| i == id))
    }
}

#[async_trait]
impl LiteratureIndex for FakeIndex {
    async fn count(&self, _query: &str, range: YearRange) -> Result<u64> {
        self.count_calls.lock().unwrap().push(range);
        if self.fail_counts {
            return Err(exhausted());
        }
        if let Some(count) = self.counts.get(&(range.start, range.end)) {
            return Ok(*count);
        }
        let total = match &self.year_counts {
            Some((first, per_year)) => (range.start..=range.end)
                .filter_map(|year| usize::try_from(year - first).ok())
                .filter_map(|idx| per_year.get(idx))
                .sum(),
            None => 0,
        };
        Ok(total)
    }

    async fn ids(
        &self,
        _query: &str,
        range: YearRange,
        offset: u64,
        page_size: u64,
    ) -> Result<Vec<String>> {
        self.id_calls.lock().unwrap().push((range, offset));
        if self.fail_ids {
            return Err(exhausted());
        }
        let ids = self
            .pages
            .get(&(range.start, range.end))
            .cloned()
            .unwrap_or_default();
        Ok(ids
            .into_iter()
            .skip(offset as usize)
            .take(page_size as usize)
            .collect())
    }

    async fn summaries(&self, ids: &[String]) -> Result<Vec<PaperMeta>> {
        self.summary_calls.lock().unwrap().push(ids.to_vec());
        Ok(ids
            .iter()
            .filter(|id| self.known(id))
            .map(|id| PaperMeta {
                pmid: id.clone(),
                title: format!("Paper {}", id),
                journal: "J Comp Neurol".into(),
                year: "2000".into(),
                ..Default::default()
            })
            .collect())
    }

    async fn abstract_text(&self, id: &str) -> Result<String> {
        Ok(self.abstracts.get(id).cloned().unwrap_or_default())
    }
}

fn exhausted() -> BifError {
    BifError::Exhausted {
        url: "esearch".into(),
        attempts: 6,
        last: "HTTP status 503".into(),
    }
}

/// Resolver returning canned text; unknown identifiers have none.
#[derive(Default)]
pub(crate) struct FakeResolver {
    texts: HashMap<String, String>,
    failures: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeResolver {
    pub fn with_text(mut self, id: &str, text: &str) -> Self {
        self.texts.insert(id.to_string(), text.to_string());
        self
    }

    pub fn failing(mut self, id: &str) -> Self {
        self.failures.insert(id.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextResolver for FakeResolver {
    async fn resolve(&self, meta: &PaperMeta) -> Result<ResolvedText> {
        self.calls.lock().unwrap().push(meta.pmid.clone());
        if self.failures.contains(&meta.pmid) {
            return Err(BifError::Status {
                status: 404,
                url: "europepmc".into(),
            });
        }
        let text = self.texts.get(&meta.pmid).cloned().unwrap_or_default();
        let source = if text.is_empty() {
            TextSource::Unavailable
        } else {
            TextSource::Abstract
        };
        Ok(ResolvedText {
            text,
            source,
            doi: format!("10.0/{}", meta.pmid),
            pmcid: String::new(),
        })
    }
}

/// Extractor emitting fixed (sender, receiver) pairs per identifier.
#[derive(Default)]
pub(crate) struct FakeExtractor {
    pairs: HashMap<String, Vec<(String, String)>>,
    failures: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeExtractor {
    pub fn with_pairs(mut self, id: &str, pairs: &[(&str, &str)]) -> Self {
        self.pairs.insert(
            id.to_string(),
            pairs
                .iter()
                .map(|(s, r)| (s.to_string(), r.to_string()))
                .collect(),
        );
        self
    }

    pub fn failing(mut self, id: &str) -> Self {
        self.failures.insert(id.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn extract(&self, _text: &str, meta: &PaperMeta) -> Result<Vec<ClassifiedProjection>> {
        self.calls.lock().unwrap().push(meta.pmid.clone());
        if self.failures.contains(&meta.pmid) {
            return Err(BifError::Parse("stage answer has no 'regions' array".into()));
        }
        Ok(self
            .pairs
            .get(&meta.pmid)
            .into_iter()
            .flatten()
            .map(|(sender, receiver)| {
                ClassifiedProjection::unclassified(ProjectionRecord {
                    sender: sender.clone(),
                    receiver: receiver.clone(),
                    connection_flag: 1,
                    quote: format!("{} projects to {}", sender, receiver),
                    confidence: 0.8,
                    ..Default::default()
                })
            })
            .collect())
    }
}
