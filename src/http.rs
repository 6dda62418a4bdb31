//! Rate-limited HTTP fetcher.
//!
//! Every literature lookup goes through [`HttpFetcher`], which retries
//! transient failures (transport errors, 429, 5xx gateway codes and
//! non-JSON bodies) with exponential backoff plus jitter. Once the attempt
//! budget is spent the fetch returns [`BifError::Exhausted`] instead of
//! looping forever; callers treat that as "unavailable".
//!
//! Sleeping goes through the [`Sleeper`] trait so the crawl driver's pacing
//! and the backoff here can be observed (and skipped) in tests.

use crate::error::{BifError, Result};
use async_trait::async_trait;
use rand::Rng;
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("bifextract/", env!("CARGO_PKG_VERSION"));

/// Something that can suspend the crawl for a while.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real sleeper backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Backoff parameters: `base * factor^attempt + U(0, jitter)`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub factor: f64,
    pub jitter: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base: Duration::from_millis(600),
            factor: 1.8,
            jitter: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the zero-based `attempt` failed.
    ///
    /// `jitter_fraction` in `[0, 1]` selects how much of the jitter window is added.
    pub fn delay_for(&self, attempt: u32, jitter_fraction: f64) -> Duration {
        let exp = self.base.as_secs_f64() * self.factor.powi(attempt as i32);
        let secs = exp + self.jitter.as_secs_f64() * jitter_fraction.clamp(0.0, 1.0);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        let fraction: f64 = rand::thread_rng().gen_range(0.0..=1.0);
        self.delay_for(attempt, fraction)
    }
}

/// A successful (2xx) response, fully buffered.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub status: u16,
    /// Lower-cased `Content-Type` header, empty when absent
    pub content_type: String,
    pub body: Vec<u8>,
}

impl Fetched {
    /// Body decoded as UTF-8 (lossy)
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP GET client with bounded retries
pub struct HttpFetcher {
    client: reqwest::Client,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl HttpFetcher {
    /// Create a fetcher with the default retry policy.
    pub fn new(timeout: Duration, sleeper: Arc<dyn Sleeper>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| BifError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            policy: RetryPolicy::default(),
            sleeper,
        })
    }

    /// Replace the retry policy
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// GET with retries, returning the raw response.
    pub async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<Fetched> {
        self.fetch_with_retry(url, query, Ok).await
    }

    /// GET with retries, parsing the body as JSON.
    ///
    /// A body that is not valid JSON counts as a transient failure.
    pub async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<serde_json::Value> {
        self.fetch_with_retry(url, query, |fetched| {
            serde_json::from_slice(&fetched.body).map_err(|e| {
                let head: String = fetched.text().chars().take(180).collect();
                debug!(
                    url = url,
                    content_type = %fetched.content_type,
                    head = %head.replace('\n', "\\n"),
                    "Non-JSON response"
                );
                BifError::Parse(format!(
                    "non-JSON response (content-type {}): {}",
                    fetched.content_type, e
                ))
            })
        })
        .await
    }

    /// Single GET without retries, used for best-effort full-text downloads.
    pub async fn get_once(&self, url: &str) -> Result<Fetched> {
        self.attempt(url, &[]).await
    }

    async fn fetch_with_retry<T>(
        &self,
        url: &str,
        query: &[(&str, String)],
        parse: impl Fn(Fetched) -> Result<T> + Send + Sync,
    ) -> Result<T> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last = String::new();

        for attempt in 0..max_attempts {
            let outcome = match self.attempt(url, query).await {
                Ok(fetched) => parse(fetched),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    last = e.to_string();
                    if attempt + 1 < max_attempts {
                        let delay = self.policy.next_delay(attempt);
                        warn!(
                            url = url,
                            attempt = attempt + 1,
                            max_attempts = max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Transient fetch failure, backing off"
                        );
                        self.sleeper.sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(BifError::Exhausted {
            url: url.to_string(),
            attempts: max_attempts,
            last,
        })
    }

    async fn attempt(&self, url: &str, query: &[(&str, String)]) -> Result<Fetched> {
        let response = self
            .client
            .get(url)
            .query(query)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BifError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_lowercase();
        let body = response.bytes().await?.to_vec();

        Ok(Fetched {
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}
