//! Shard planner.
//!
//! PubMed refuses to page past roughly 10k hits for a single search, so the
//! crawl splits its year range into shards whose hit counts stay under a cap.
//! A range over the cap is bisected at its midpoint year; a single year that
//! is still over the cap is kept as-is, which makes the cap a soft ceiling
//! but guarantees termination.

use crate::error::{BifError, Result};
use crate::index::{LiteratureIndex, YearRange};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Default hit cap per shard (below the E-utilities paging limit)
pub const DEFAULT_SHARD_CAP: u64 = 9000;

/// A planned slice of the crawl: an inclusive year range and its hit count
/// at planning time. Persisted as `[start_year, end_year, count]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(i32, i32, u64)", into = "(i32, i32, u64)")]
pub struct Shard {
    pub start_year: i32,
    pub end_year: i32,
    pub estimated_count: u64,
}

impl Shard {
    pub fn range(&self) -> YearRange {
        YearRange::new(self.start_year, self.end_year)
    }

    pub fn is_single_year(&self) -> bool {
        self.start_year == self.end_year
    }
}

impl From<(i32, i32, u64)> for Shard {
    fn from((start_year, end_year, estimated_count): (i32, i32, u64)) -> Self {
        Self {
            start_year,
            end_year,
            estimated_count,
        }
    }
}

impl From<Shard> for (i32, i32, u64) {
    fn from(shard: Shard) -> Self {
        (shard.start_year, shard.end_year, shard.estimated_count)
    }
}

/// Split `[year_start, year_end]` into shards of at most `cap` hits.
///
/// Shards come back in ascending year order and cover the whole range.
/// One count query is issued per visited range.
///
/// # Errors
///
/// Returns a validation error for an inverted range or a zero cap, and
/// propagates count failures (a missing count would silently drop years).
pub async fn plan(
    index: &dyn LiteratureIndex,
    query: &str,
    year_start: i32,
    year_end: i32,
    cap: u64,
) -> Result<Vec<Shard>> {
    if year_start > year_end {
        return Err(BifError::Validation(format!(
            "year range is inverted: {} > {}",
            year_start, year_end
        )));
    }
    if cap == 0 {
        return Err(BifError::Validation("shard cap must be positive".to_string()));
    }

    info!(
        query = query,
        year_start = year_start,
        year_end = year_end,
        cap = cap,
        "Planning shards"
    );

    // Explicit stack; the left half is pushed last so it is visited first.
    let mut pending = vec![(year_start, year_end)];
    let mut shards = Vec::new();

    while let Some((y0, y1)) = pending.pop() {
        let count = index.count(query, YearRange::new(y0, y1)).await?;
        debug!(start = y0, end = y1, count = count, "Counted range");

        if count <= cap || y0 == y1 {
            shards.push(Shard::from((y0, y1, count)));
            continue;
        }

        let mid = (y0 + y1).div_euclid(2);
        pending.push((mid + 1, y1));
        pending.push((y0, mid));
    }

    info!(shards = shards.len(), "Shard planning complete");
    Ok(shards)
}

/// Drop shards with no hits; paging through them would only waste requests.
pub fn without_empty(shards: Vec<Shard>) -> Vec<Shard> {
    shards.into_iter().filter(|s| s.estimated_count > 0).collect()
}
