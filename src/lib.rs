//! # bifextract
//!
//! Resumable literature crawler that extracts directed brain-region
//! projections from PubMed papers with a three-stage LLM pipeline.
//!
//! ## Modules
//!
//! - [`shard`] - Year-range shard planner
//! - [`crawl`] - Resumable crawl driver
//! - [`state`] - Durable crawl checkpoint
//! - [`pubmed`] - NCBI E-utilities client
//! - [`fulltext`] - Europe PMC / PMC full-text resolution
//! - [`pipeline`] - Region, projection and classification stages
//! - [`llm`] - Anthropic Messages API client
//! - [`sink`] - Append-only CSV output with dedup
//! - [`http`] - Retrying HTTP fetcher
//! - [`config`] - Crawl configuration
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bifextract::{http::{HttpFetcher, TokioSleeper}, pubmed::PubMedClient, shard};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let fetcher = HttpFetcher::new(Duration::from_secs(60), Arc::new(TokioSleeper))?;
//!     let pubmed = PubMedClient::new(Arc::new(fetcher), "me@example.org", None);
//!     let shards = shard::plan(&pubmed, "motor cortex projection", 1950, 2025, 9000).await?;
//!     println!("Planned {} shards", shards.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crawl;
pub mod error;
pub mod fulltext;
pub mod http;
pub mod index;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod pubmed;
pub mod shard;
pub mod sink;
pub mod state;

#[cfg(test)]
pub(crate) mod testkit;

pub use error::{BifError, Result};
