//! bifextract - PubMed brain-projection extraction crawler
//!
//! ## Usage
//!
//! ```bash
//! bifextract crawl --query "motor cortex projection" --email me@example.org
//! bifextract plan --query "motor cortex projection" --email me@example.org
//! bifextract status --state-json bifextract_state.json
//! ```

use anyhow::{Context, Result};
use bifextract::config::{
    CrawlConfig, DEFAULT_CHUNK_SIZE, DEFAULT_OUT_CSV, DEFAULT_STATE_JSON, DEFAULT_TARGET_ROWS,
    DEFAULT_YEAR_START,
};
use bifextract::crawl::{CrawlDriver, CrawlOutcome, CrawlServices};
use bifextract::fulltext::FullTextResolver;
use bifextract::http::{HttpFetcher, TokioSleeper};
use bifextract::index::LiteratureIndex;
use bifextract::llm::{AnthropicClient, LlmConfig, ANTHROPIC_BASE_URL, DEFAULT_MODEL};
use bifextract::pipeline::{ExtractionPipeline, DEFAULT_MAX_TEXT_CHARS, DEFAULT_REGION_HINTS};
use bifextract::pubmed::PubMedClient;
use bifextract::shard::{self, DEFAULT_SHARD_CAP};
use bifextract::sink;
use bifextract::state::CrawlState;
use chrono::{Datelike, Local};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// Timeout for E-utilities, Europe PMC and full-text downloads
const FETCH_TIMEOUT_SECS: u64 = 60;

// ============================================================================
// CLI Definition
// ============================================================================

/// Crawl PubMed and extract directed brain-region projections with an LLM
#[derive(Parser)]
#[command(name = "bifextract")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl, extract and append projection rows until the target is reached
    Crawl(CrawlArgs),

    /// Plan year shards for a query without crawling
    Plan {
        /// PubMed search query
        #[arg(long)]
        query: String,

        #[command(flatten)]
        ncbi: NcbiArgs,

        #[command(flatten)]
        years: YearArgs,
    },

    /// Show progress recorded in a state file
    Status {
        /// Crawl state file
        #[arg(long, default_value = DEFAULT_STATE_JSON)]
        state_json: PathBuf,

        /// Output CSV
        #[arg(long, default_value = DEFAULT_OUT_CSV)]
        out_csv: PathBuf,
    },
}

#[derive(Args)]
struct NcbiArgs {
    /// NCBI-required contact email
    #[arg(long, env = "NCBI_EMAIL")]
    email: String,

    /// NCBI API key (raises the rate limit)
    #[arg(long, env = "NCBI_API_KEY")]
    ncbi_api_key: Option<String>,
}

#[derive(Args)]
struct YearArgs {
    /// First publication year
    #[arg(long, default_value_t = DEFAULT_YEAR_START)]
    year_start: i32,

    /// Last publication year (default: current year)
    #[arg(long)]
    year_end: Option<i32>,

    /// Maximum hits per shard before bisecting
    #[arg(long, default_value_t = DEFAULT_SHARD_CAP)]
    shard_cap: u64,
}

impl YearArgs {
    fn year_end(&self) -> i32 {
        self.year_end.unwrap_or_else(|| Local::now().year())
    }
}

#[derive(Args)]
struct CrawlArgs {
    /// PubMed search query
    #[arg(long)]
    query: String,

    #[command(flatten)]
    ncbi: NcbiArgs,

    /// Anthropic API key
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    anthropic_api_key: String,

    /// Anthropic API base URL
    #[arg(long, default_value = ANTHROPIC_BASE_URL)]
    anthropic_base_url: String,

    /// Output CSV (appended to)
    #[arg(long, default_value = DEFAULT_OUT_CSV)]
    out_csv: PathBuf,

    /// Crawl state file
    #[arg(long, default_value = DEFAULT_STATE_JSON)]
    state_json: PathBuf,

    /// Stop once the output holds this many rows
    #[arg(long, default_value_t = DEFAULT_TARGET_ROWS)]
    target_rows: u64,

    /// Identifiers per search page
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: u64,

    /// Seconds to pause after each paper (doubled after a failure)
    #[arg(long, default_value_t = 1.0)]
    sleep_base: f64,

    #[command(flatten)]
    years: YearArgs,

    /// Model used for all three extraction stages
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Sampling temperature
    #[arg(long, default_value_t = 0.0)]
    temperature: f64,

    /// Comma-separated canonical region abbreviations
    #[arg(long, default_value = DEFAULT_REGION_HINTS)]
    region_hints: String,

    /// Characters of paper text sent to the model
    #[arg(long, default_value_t = DEFAULT_MAX_TEXT_CHARS)]
    max_text_chars: usize,
}

impl CrawlArgs {
    fn into_config(self) -> CrawlConfig {
        let year_end = self.years.year_end();
        CrawlConfig {
            query: self.query,
            email: self.ncbi.email,
            ncbi_api_key: self.ncbi.ncbi_api_key.filter(|k| !k.trim().is_empty()),
            anthropic_api_key: self.anthropic_api_key,
            anthropic_base_url: self.anthropic_base_url,
            out_csv: self.out_csv,
            state_json: self.state_json,
            target_rows: self.target_rows,
            chunk_size: self.chunk_size,
            sleep_base: self.sleep_base,
            year_start: self.years.year_start,
            year_end,
            shard_cap: self.years.shard_cap,
            model: self.model,
            temperature: self.temperature,
            region_hints: self.region_hints,
            max_text_chars: self.max_text_chars,
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    match cli.command {
        Commands::Crawl(args) => run_crawl(args.into_config()).await,
        Commands::Plan { query, ncbi, years } => run_plan(query, ncbi, years).await,
        Commands::Status {
            state_json,
            out_csv,
        } => show_status(state_json, out_csv),
    }
}

fn fetcher() -> Result<Arc<HttpFetcher>> {
    let timeout = Duration::from_secs(FETCH_TIMEOUT_SECS);
    let fetcher = HttpFetcher::new(timeout, Arc::new(TokioSleeper))
        .context("Failed to create HTTP fetcher")?;
    Ok(Arc::new(fetcher))
}

// ============================================================================
// Crawl
// ============================================================================

async fn run_crawl(config: CrawlConfig) -> Result<()> {
    config.validate().context("Invalid crawl configuration")?;

    let fetcher = fetcher()?;
    let pubmed: Arc<dyn LiteratureIndex> = Arc::new(PubMedClient::new(
        fetcher.clone(),
        &config.email,
        config.ncbi_api_key.clone(),
    ));
    let resolver = Arc::new(FullTextResolver::new(fetcher, pubmed.clone()));

    let llm = AnthropicClient::new(LlmConfig {
        base_url: config.anthropic_base_url.clone(),
        api_key: config.anthropic_api_key.clone(),
        model: config.model.clone(),
        temperature: config.temperature,
    })
    .context("Failed to create LLM client")?;
    let pipeline = Arc::new(
        ExtractionPipeline::new(llm)
            .with_region_hints(&config.region_hints)
            .with_max_text_chars(config.max_text_chars),
    );

    println!("Query: {}", config.query);
    println!("Years: {}..{}", config.year_start, config.year_end);
    println!("Model: {}", config.model);
    println!("Output: {}", config.out_csv.display());
    println!("State: {}", config.state_json.display());

    let services = CrawlServices {
        index: pubmed,
        resolver,
        extractor: pipeline.clone(),
        sleeper: Arc::new(TokioSleeper),
    };
    let mut driver = CrawlDriver::new(config, services).context("Failed to initialise crawl")?;
    println!(
        "Initial rows: {} (processed papers: {})",
        driver.sink().rows(),
        driver.state().processed_count()
    );

    let summary = driver.run().await.context("Crawl aborted")?;
    let usage = pipeline.service().usage();
    info!(
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        "LLM usage"
    );

    println!("\n=== Crawl Summary ===");
    match summary.outcome {
        CrawlOutcome::Complete => println!("All shards complete."),
        CrawlOutcome::TargetReached => println!("Row target reached."),
        CrawlOutcome::Interrupted => {
            println!("Crawl interrupted (PubMed unavailable); rerun to resume.")
        }
    }
    println!("Papers processed: {}", summary.documents);
    println!("  without text:   {}", summary.without_text);
    println!("  failed:         {}", summary.failures);
    println!("Rows written:     {}", summary.rows_written);
    println!("Rows total:       {}", summary.total_rows);
    println!(
        "Tokens:           {} in / {} out",
        usage.input_tokens, usage.output_tokens
    );

    Ok(())
}

// ============================================================================
// Plan / Status
// ============================================================================

async fn run_plan(query: String, ncbi: NcbiArgs, years: YearArgs) -> Result<()> {
    if ncbi.email.trim().is_empty() {
        anyhow::bail!("NCBI email is required");
    }
    let pubmed = PubMedClient::new(fetcher()?, &ncbi.email, ncbi.ncbi_api_key);
    let shards = shard::plan(&pubmed, &query, years.year_start, years.year_end(), years.shard_cap)
        .await
        .context("Shard planning failed")?;

    let total: u64 = shards.iter().map(|s| s.estimated_count).sum();
    println!("{:>4}  {:<11}  {:>8}", "#", "years", "count");
    for (idx, shard) in shards.iter().enumerate() {
        println!(
            "{:>4}  {:<11}  {:>8}",
            idx + 1,
            shard.range().to_string(),
            shard.estimated_count
        );
    }
    let empty = shards.iter().filter(|s| s.estimated_count == 0).count();
    println!(
        "\n{} shards ({} empty), {} hits in total",
        shards.len(),
        empty,
        total
    );
    Ok(())
}

fn show_status(state_json: PathBuf, out_csv: PathBuf) -> Result<()> {
    let state = CrawlState::load(&state_json)
        .with_context(|| format!("Failed to read {}", state_json.display()))?;
    let rows = sink::count_rows(&out_csv)
        .with_context(|| format!("Failed to read {}", out_csv.display()))?;

    println!("State file: {}", state_json.display());
    if !state.has_plan() {
        println!("No shard plan recorded yet.");
    } else if let Some(shard) = state.current_shard() {
        println!(
            "Shard {}/{} ({}), offset {}",
            state.current_shard_index + 1,
            state.shards.len(),
            shard.range(),
            state.page_offset
        );
    } else {
        println!("All {} shards complete.", state.shards.len());
    }
    println!("Processed papers: {}", state.processed_count());
    if let Some(updated_at) = &state.updated_at {
        println!("Last saved: {}", updated_at);
    }
    println!("Output rows ({}): {}", out_csv.display(), rows);
    Ok(())
}
