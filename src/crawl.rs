//! Resumable crawl driver.
//!
//! Walks the planned shards page by page, resolves text for every
//! identifier not yet processed, runs extraction and appends rows to the
//! output sink. The checkpoint is persisted after every page and every
//! shard transition, and right before stopping on the row target.
//!
//! Per-document failures (text resolution or extraction) are logged, the
//! document is marked processed and the crawl moves on after a doubled
//! pause. When the index stays unavailable through planning or a page
//! fetch, the run stops with [`CrawlOutcome::Interrupted`] and the
//! checkpoint stays at that page, so the next run picks up there.

use crate::config::CrawlConfig;
use crate::error::{BifError, Result};
use crate::fulltext::TextResolver;
use crate::http::Sleeper;
use crate::index::{LiteratureIndex, PaperMeta};
use crate::pipeline::Extractor;
use crate::shard::{self, Shard};
use crate::sink::{OutputRow, OutputSink};
use crate::state::CrawlState;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How a crawl run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlOutcome {
    /// Every shard was paged through
    Complete,
    /// The output reached the row target
    TargetReached,
    /// The literature index stayed unavailable; rerun to resume
    Interrupted,
}

/// Counters for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlSummary {
    pub outcome: CrawlOutcome,
    pub documents: u64,
    pub without_text: u64,
    pub failures: u64,
    pub rows_written: u64,
    pub total_rows: u64,
}

/// External collaborators of the driver
pub struct CrawlServices {
    pub index: Arc<dyn LiteratureIndex>,
    pub resolver: Arc<dyn TextResolver>,
    pub extractor: Arc<dyn Extractor>,
    pub sleeper: Arc<dyn Sleeper>,
}

enum DocOutcome {
    Extracted,
    NoText,
    Failed,
    TargetReached,
}

/// Crawl context: configuration, collaborators, checkpoint and output.
pub struct CrawlDriver {
    config: CrawlConfig,
    services: CrawlServices,
    state: CrawlState,
    sink: OutputSink,
    documents: u64,
    without_text: u64,
    failures: u64,
    rows_written: u64,
}

impl CrawlDriver {
    /// Load the checkpoint and open the output file named in `config`.
    pub fn new(config: CrawlConfig, services: CrawlServices) -> Result<Self> {
        config.validate()?;
        let state = CrawlState::load(&config.state_json)?;
        let sink = OutputSink::open(&config.out_csv)?;

        Ok(Self {
            config,
            services,
            state,
            sink,
            documents: 0,
            without_text: 0,
            failures: 0,
            rows_written: 0,
        })
    }

    pub fn state(&self) -> &CrawlState {
        &self.state
    }

    pub fn sink(&self) -> &OutputSink {
        &self.sink
    }

    /// Run until the shards are exhausted or the row target is reached.
    pub async fn run(&mut self) -> Result<CrawlSummary> {
        let target = self.config.target_rows;
        info!(rows = self.sink.rows(), target = target, "Starting crawl");

        if self.sink.rows() >= target {
            info!(
                rows = self.sink.rows(),
                target = target,
                "Output already at target"
            );
            return Ok(self.summary(CrawlOutcome::TargetReached));
        }

        if !self.state.has_plan() {
            if let Err(e) = self.plan().await {
                return self.interrupt(e);
            }
        }

        while let Some(shard) = self.state.current_shard().copied() {
            match self.crawl_page(shard).await {
                Ok(Some(outcome)) => return Ok(self.summary(outcome)),
                Ok(None) => {}
                Err(e) => return self.interrupt(e),
            }
        }

        info!(
            rows = self.sink.rows(),
            processed = self.state.processed_count(),
            "All shards complete"
        );
        Ok(self.summary(CrawlOutcome::Complete))
    }

    /// Stop on an unavailable index with the checkpoint saved; other errors propagate.
    fn interrupt(&mut self, err: BifError) -> Result<CrawlSummary> {
        if !err.is_unavailable() {
            return Err(err);
        }
        warn!(
            shard = self.state.current_shard_index,
            offset = self.state.page_offset,
            error = %err,
            "Literature index unavailable, stopping"
        );
        self.persist()?;
        Ok(self.summary(CrawlOutcome::Interrupted))
    }

    async fn plan(&mut self) -> Result<()> {
        let shards = shard::plan(
            self.services.index.as_ref(),
            &self.config.query,
            self.config.year_start,
            self.config.year_end,
            self.config.shard_cap,
        )
        .await?;
        let shards = shard::without_empty(shards);
        info!(shards = shards.len(), "Shards planned");

        self.state.set_plan(shards);
        self.persist()
    }

    /// Handle one page of the current shard. Returns `Some` when the run must stop.
    async fn crawl_page(&mut self, shard: Shard) -> Result<Option<CrawlOutcome>> {
        let shard_idx = self.state.current_shard_index;
        let offset = self.state.page_offset;
        info!(
            shard = shard_idx + 1,
            shards = self.state.shards.len(),
            range = %shard.range(),
            estimated = shard.estimated_count,
            offset = offset,
            "Fetching page"
        );

        let ids = self
            .services
            .index
            .ids(&self.config.query, shard.range(), offset, self.config.chunk_size)
            .await?;

        if ids.is_empty() {
            info!(shard = shard_idx + 1, "Shard exhausted");
            self.state.advance_shard();
            self.persist()?;
            return Ok(None);
        }

        let pending: Vec<String> = ids
            .into_iter()
            .filter(|id| !self.state.is_processed(id))
            .collect();
        debug!(pending = pending.len(), "Unprocessed identifiers on page");

        let mut metas = self.summaries(&pending).await;
        for id in &pending {
            let meta = metas.remove(id).unwrap_or_else(|| PaperMeta::bare(id));
            if let DocOutcome::TargetReached = self.process_document(meta).await? {
                info!(
                    rows = self.sink.rows(),
                    target = self.config.target_rows,
                    "Row target reached"
                );
                self.persist()?;
                return Ok(Some(CrawlOutcome::TargetReached));
            }
        }

        self.state.advance_page(self.config.chunk_size);
        self.persist()?;
        Ok(None)
    }

    async fn summaries(&self, ids: &[String]) -> HashMap<String, PaperMeta> {
        if ids.is_empty() {
            return HashMap::new();
        }
        match self.services.index.summaries(ids).await {
            Ok(metas) => metas.into_iter().map(|m| (m.pmid.clone(), m)).collect(),
            Err(e) => {
                warn!(
                    count = ids.len(),
                    error = %e,
                    "Summary lookup failed, continuing with bare identifiers"
                );
                HashMap::new()
            }
        }
    }

    async fn process_document(&mut self, mut meta: PaperMeta) -> Result<DocOutcome> {
        let pmid = meta.pmid.clone();
        self.documents += 1;
        debug!(pmid = %pmid, "Processing document");

        let resolved = match self.services.resolver.resolve(&meta).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(pmid = %pmid, error = %e, "Text resolution failed");
                return Ok(self.fail(&pmid).await);
            }
        };

        if resolved.is_empty() {
            info!(pmid = %pmid, "No text available, skipping");
            self.without_text += 1;
            self.state.mark_processed(&pmid);
            self.pause(self.config.pacing()).await;
            return Ok(DocOutcome::NoText);
        }

        if !resolved.doi.is_empty() {
            meta.doi = resolved.doi.clone();
        }
        meta.pmcid = resolved.pmcid.clone();

        let records = match self.services.extractor.extract(&resolved.text, &meta).await {
            Ok(records) => records,
            Err(e) => {
                warn!(pmid = %pmid, error = %e, "Extraction failed");
                return Ok(self.fail(&pmid).await);
            }
        };

        let mut written = 0;
        for record in &records {
            if self.sink.append(&OutputRow::new(&meta, record))? {
                written += 1;
                self.rows_written += 1;
                if self.sink.rows() >= self.config.target_rows {
                    return Ok(DocOutcome::TargetReached);
                }
            }
        }

        info!(
            pmid = %pmid,
            source = %resolved.source,
            records = records.len(),
            written = written,
            rows = self.sink.rows(),
            "Document extracted"
        );
        self.state.mark_processed(&pmid);
        self.pause(self.config.pacing()).await;
        Ok(DocOutcome::Extracted)
    }

    async fn fail(&mut self, pmid: &str) -> DocOutcome {
        self.failures += 1;
        self.state.mark_processed(pmid);
        self.pause(self.config.pacing() * 2).await;
        DocOutcome::Failed
    }

    async fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            self.services.sleeper.sleep(duration).await;
        }
    }

    fn persist(&mut self) -> Result<()> {
        self.state.persist(&self.config.state_json)
    }

    fn summary(&self, outcome: CrawlOutcome) -> CrawlSummary {
        CrawlSummary {
            outcome,
            documents: self.documents,
            without_text: self.without_text,
            failures: self.failures,
            rows_written: self.rows_written,
            total_rows: self.sink.rows(),
        }
    }
}
