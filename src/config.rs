//! Crawl configuration.
//!
//! Built by the binary from command-line flags and validated before any
//! network traffic happens.

use crate::error::{BifError, Result};
use crate::llm::{ANTHROPIC_BASE_URL, DEFAULT_MODEL};
use crate::pipeline::{DEFAULT_MAX_TEXT_CHARS, DEFAULT_REGION_HINTS};
use crate::shard::DEFAULT_SHARD_CAP;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_TARGET_ROWS: u64 = 60_100;
pub const DEFAULT_CHUNK_SIZE: u64 = 50;
pub const DEFAULT_YEAR_START: i32 = 1950;
pub const DEFAULT_OUT_CSV: &str = "bifextract_out.csv";
pub const DEFAULT_STATE_JSON: &str = "bifextract_state.json";

/// Everything a crawl run needs
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub query: String,
    /// Contact address sent to NCBI with every request
    pub email: String,
    pub ncbi_api_key: Option<String>,
    pub anthropic_api_key: String,
    pub anthropic_base_url: String,
    pub out_csv: PathBuf,
    pub state_json: PathBuf,
    pub target_rows: u64,
    /// Identifiers requested per search page
    pub chunk_size: u64,
    /// Pause after each document, in seconds
    pub sleep_base: f64,
    pub year_start: i32,
    pub year_end: i32,
    pub shard_cap: u64,
    pub model: String,
    pub temperature: f64,
    pub region_hints: String,
    pub max_text_chars: usize,
}

impl CrawlConfig {
    /// Configuration with defaults for everything but the required fields.
    pub fn new(query: &str, email: &str, anthropic_api_key: &str, year_end: i32) -> Self {
        Self {
            query: query.to_string(),
            email: email.to_string(),
            ncbi_api_key: None,
            anthropic_api_key: anthropic_api_key.to_string(),
            anthropic_base_url: ANTHROPIC_BASE_URL.to_string(),
            out_csv: PathBuf::from(DEFAULT_OUT_CSV),
            state_json: PathBuf::from(DEFAULT_STATE_JSON),
            target_rows: DEFAULT_TARGET_ROWS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            sleep_base: 1.0,
            year_start: DEFAULT_YEAR_START,
            year_end,
            shard_cap: DEFAULT_SHARD_CAP,
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.0,
            region_hints: DEFAULT_REGION_HINTS.to_string(),
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
        }
    }

    /// Reject configurations that cannot produce a useful run.
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(BifError::Config("query must not be empty".into()));
        }
        if self.email.trim().is_empty() {
            return Err(BifError::Config("NCBI email is required".into()));
        }
        if self.anthropic_api_key.trim().is_empty() {
            return Err(BifError::Config("ANTHROPIC_API_KEY is required".into()));
        }
        if self.chunk_size == 0 {
            return Err(BifError::Config("chunk size must be positive".into()));
        }
        if self.shard_cap == 0 {
            return Err(BifError::Config("shard cap must be positive".into()));
        }
        if self.year_start > self.year_end {
            return Err(BifError::Config(format!(
                "year range {}..{} is inverted",
                self.year_start, self.year_end
            )));
        }
        if !self.sleep_base.is_finite() || self.sleep_base < 0.0 {
            return Err(BifError::Config(format!(
                "sleep base must be a non-negative number of seconds, got {}",
                self.sleep_base
            )));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(BifError::Config(format!(
                "temperature must be within [0, 1], got {}",
                self.temperature
            )));
        }
        if self.max_text_chars == 0 {
            return Err(BifError::Config("max text chars must be positive".into()));
        }
        Ok(())
    }

    /// Pause after every processed document
    pub fn pacing(&self) -> Duration {
        Duration::from_secs_f64(self.sleep_base.max(0.0))
    }
}
