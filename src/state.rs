//! Durable crawl checkpoint.
//!
//! The state file records where the crawl is (shard index and page offset),
//! the planned shard list and every identifier already handled. It is read
//! once at startup and rewritten after every page and shard transition, so a
//! restarted crawl resumes from the last completed page.

use crate::error::{BifError, Result};
use crate::shard::Shard;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// Resumable crawl progress.
///
/// Field aliases accept checkpoints written by the earlier script-based crawler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlState {
    #[serde(default, alias = "current_shard")]
    pub current_shard_index: usize,

    #[serde(default, alias = "retstart")]
    pub page_offset: u64,

    #[serde(default)]
    pub shards: Vec<Shard>,

    /// Set once planning ran, even when it produced no shards
    #[serde(default)]
    planned: bool,

    #[serde(default, alias = "processed_pmids")]
    processed_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,

    #[serde(skip)]
    processed_index: HashSet<String>,
}

impl CrawlState {
    /// Load the checkpoint at `path`, or a fresh state when the file does not exist.
    ///
    /// An unreadable checkpoint is an error rather than a silent restart, since
    /// starting over would forget every processed identifier.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No state file, starting fresh");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let mut state: CrawlState = serde_json::from_str(&content).map_err(|e| {
            BifError::Validation(format!(
                "state file {} is not a valid checkpoint: {}",
                path.display(),
                e
            ))
        })?;
        state.rebuild_index();

        info!(
            path = %path.display(),
            shard = state.current_shard_index,
            shards = state.shards.len(),
            offset = state.page_offset,
            processed = state.processed_ids.len(),
            "Loaded crawl state"
        );
        Ok(state)
    }

    /// Write the checkpoint, replacing the previous one atomically.
    pub fn persist(&mut self, path: &Path) -> Result<()> {
        self.updated_at = Some(chrono::Utc::now().to_rfc3339());
        let content = serde_json::to_string_pretty(self)?;

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = std::path::PathBuf::from(tmp_name);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;

        debug!(
            shard = self.current_shard_index,
            offset = self.page_offset,
            processed = self.processed_ids.len(),
            "Persisted crawl state"
        );
        Ok(())
    }

    fn rebuild_index(&mut self) {
        self.processed_index = self.processed_ids.iter().cloned().collect();
    }

    /// Whether a shard plan has been recorded
    pub fn has_plan(&self) -> bool {
        // Older checkpoints carry shards without the flag
        self.planned || !self.shards.is_empty()
    }

    /// Record a fresh plan and rewind to its start.
    pub fn set_plan(&mut self, shards: Vec<Shard>) {
        self.shards = shards;
        self.planned = true;
        self.current_shard_index = 0;
        self.page_offset = 0;
    }

    /// The shard being crawled, `None` once every shard is done.
    pub fn current_shard(&self) -> Option<&Shard> {
        self.shards.get(self.current_shard_index)
    }

    pub fn is_complete(&self) -> bool {
        self.current_shard_index >= self.shards.len()
    }

    /// Move to the next page of the current shard.
    pub fn advance_page(&mut self, page_size: u64) {
        self.page_offset += page_size;
    }

    /// Move to the start of the next shard.
    pub fn advance_shard(&mut self) {
        self.current_shard_index += 1;
        self.page_offset = 0;
    }

    pub fn is_processed(&self, id: &str) -> bool {
        self.processed_index.contains(id)
    }

    /// Mark `id` handled. Returns false if it already was.
    pub fn mark_processed(&mut self, id: &str) -> bool {
        if !self.processed_index.insert(id.to_string()) {
            return false;
        }
        self.processed_ids.push(id.to_string());
        true
    }

    pub fn processed_count(&self) -> usize {
        self.processed_ids.len()
    }

    /// Identifiers in the order they were processed
    pub fn processed_ids(&self) -> &[String] {
        &self.processed_ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_fresh_state() {
        let dir = TempDir::new().unwrap();
        let state = CrawlState::load(&dir.path().join("state.json")).unwrap();
        assert!(!state.has_plan());
        assert_eq!(state.current_shard_index, 0);
        assert_eq!(state.page_offset, 0);
        assert_eq!(state.processed_count(), 0);
    }

    #[test]
    fn test_persist_and_reload() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("nested").join("state.json");

        let mut state = CrawlState::default();
        state.set_plan(vec![
            Shard::from((1950, 1990, 800)),
            Shard::from((1991, 2000, 500)),
        ]);
        state.advance_page(50);
        state.mark_processed("111");
        state.mark_processed("222");
        state.persist(&path)?;

        let loaded = CrawlState::load(&path)?;
        assert_eq!(loaded.shards, state.shards);
        assert_eq!(loaded.page_offset, 50);
        assert!(loaded.is_processed("111"));
        assert!(loaded.is_processed("222"));
        assert!(!loaded.is_processed("333"));
        assert!(loaded.updated_at.is_some());
        assert!(!dir.path().join("nested").join("state.json.tmp").exists());
        Ok(())
    }

    #[test]
    fn test_on_disk_field_names() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("state.json");
        let mut state = CrawlState::default();
        state.set_plan(vec![Shard::from((2000, 2001, 10))]);
        state.mark_processed("9");
        state.persist(&path)?;

        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(raw["current_shard_index"], 0);
        assert_eq!(raw["page_offset"], 0);
        assert_eq!(raw["shards"], serde_json::json!([[2000, 2001, 10]]));
        assert_eq!(raw["processed_ids"], serde_json::json!(["9"]));
        Ok(())
    }

    #[test]
    fn test_loads_legacy_checkpoint() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("loop_state.json");
        std::fs::write(
            &path,
            r#"{"current_shard": 2, "retstart": 150,
                "shards": [[1950, 1980, 4000], [1981, 1990, 3000], [1991, 1995, 2000]],
                "processed_pmids": ["1", "2"]}"#,
        )?;

        let state = CrawlState::load(&path)?;
        assert!(state.has_plan());
        assert_eq!(state.current_shard_index, 2);
        assert_eq!(state.page_offset, 150);
        assert_eq!(state.current_shard(), Some(&Shard::from((1991, 1995, 2000))));
        assert!(state.is_processed("2"));
        Ok(())
    }

    #[test]
    fn test_empty_plan_survives_reload() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("state.json");
        let mut state = CrawlState::default();
        state.set_plan(Vec::new());
        state.persist(&path)?;

        let loaded = CrawlState::load(&path)?;
        assert!(loaded.has_plan());
        assert!(loaded.is_complete());
        Ok(())
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            CrawlState::load(&path),
            Err(BifError::Validation(_))
        ));
    }

    #[test]
    fn test_transitions() {
        let mut state = CrawlState::default();
        assert!(state.is_complete());
        state.set_plan(vec![Shard::from((2000, 2000, 5)), Shard::from((2001, 2001, 5))]);
        assert!(!state.is_complete());

        state.advance_page(50);
        state.advance_page(50);
        assert_eq!(state.page_offset, 100);

        state.advance_shard();
        assert_eq!(state.current_shard_index, 1);
        assert_eq!(state.page_offset, 0);

        state.advance_shard();
        assert!(state.is_complete());
        assert_eq!(state.current_shard(), None);
    }

    #[test]
    fn test_mark_processed_is_idempotent() {
        let mut state = CrawlState::default();
        assert!(state.mark_processed("42"));
        assert!(!state.mark_processed("42"));
        assert_eq!(state.processed_ids(), ["42".to_string()]);
    }
}
