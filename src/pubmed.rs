//! PubMed E-utilities client.
//!
//! Implements [`LiteratureIndex`] on top of `esearch` (counts and ID pages
//! restricted by publication date), `esummary` (title/journal/year/DOI) and
//! `efetch` (plain-text abstracts). NCBI's usage policy asks for a contact
//! email and tool name on every request; an API key raises the rate limit.

use crate::error::{BifError, OptionExt, Result};
use crate::http::HttpFetcher;
use crate::index::{LiteratureIndex, PaperMeta, YearRange};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// E-utilities base URL
pub const EUTILS_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// Tool name reported to NCBI
pub const TOOL_NAME: &str = "bifextract";

/// Maximum identifiers per esummary request
const SUMMARY_CHUNK: usize = 200;

/// PubMed search index client
pub struct PubMedClient {
    fetcher: Arc<HttpFetcher>,
    base_url: String,
    email: String,
    api_key: Option<String>,
}

impl PubMedClient {
    /// Create a client identified by `email`, optionally with an NCBI API key.
    pub fn new(fetcher: Arc<HttpFetcher>, email: &str, api_key: Option<String>) -> Self {
        Self {
            fetcher,
            base_url: EUTILS_BASE.to_string(),
            email: email.to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    /// Point the client at another E-utilities host (mirrors, tests).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{}.fcgi", self.base_url, name)
    }

    fn policy_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("db", "pubmed".to_string()),
            ("email", self.email.clone()),
            ("tool", TOOL_NAME.to_string()),
        ];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        params
    }

    fn search_params(
        &self,
        query: &str,
        range: YearRange,
        retstart: u64,
        retmax: u64,
    ) -> Vec<(&'static str, String)> {
        let mut params = self.policy_params();
        params.extend([
            ("term", query.to_string()),
            ("retmode", "json".to_string()),
            ("retstart", retstart.to_string()),
            ("retmax", retmax.to_string()),
            ("mindate", range.start.to_string()),
            ("maxdate", range.end.to_string()),
            ("datetype", "pdat".to_string()),
        ]);
        params
    }
}

#[async_trait]
impl LiteratureIndex for PubMedClient {
    async fn count(&self, query: &str, range: YearRange) -> Result<u64> {
        let params = self.search_params(query, range, 0, 0);
        let body = self.fetcher.get_json(&self.endpoint("esearch"), &params).await?;
        let count = parse_count(&body)?;
        debug!(range = %range, count = count, "esearch count");
        Ok(count)
    }

    async fn ids(
        &self,
        query: &str,
        range: YearRange,
        offset: u64,
        page_size: u64,
    ) -> Result<Vec<String>> {
        let params = self.search_params(query, range, offset, page_size);
        let body = self.fetcher.get_json(&self.endpoint("esearch"), &params).await?;
        let ids = parse_id_list(&body)?;
        debug!(range = %range, offset = offset, count = ids.len(), "esearch page");
        Ok(ids)
    }

    async fn summaries(&self, ids: &[String]) -> Result<Vec<PaperMeta>> {
        let mut out = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(SUMMARY_CHUNK) {
            let mut params = self.policy_params();
            params.push(("id", chunk.join(",")));
            params.push(("retmode", "json".to_string()));

            match self.fetcher.get_json(&self.endpoint("esummary"), &params).await {
                Ok(body) => out.extend(parse_summaries(&body)),
                Err(e) if e.is_unavailable() => {
                    warn!(
                        ids = chunk.len(),
                        error = %e,
                        "esummary unavailable, continuing without metadata"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        info!(requested = ids.len(), found = out.len(), "Fetched summaries");
        Ok(out)
    }

    async fn abstract_text(&self, id: &str) -> Result<String> {
        let mut params = self.policy_params();
        params.extend([
            ("id", id.to_string()),
            ("retmode", "text".to_string()),
            ("rettype", "abstract".to_string()),
        ]);
        let fetched = self.fetcher.get(&self.endpoint("efetch"), &params).await?;
        Ok(fetched.text())
    }
}

/// Read `esearchresult.count` (a decimal string in E-utilities JSON).
fn parse_count(body: &Value) -> Result<u64> {
    let result = body
        .get("esearchresult")
        .ok_or_parse("esearch response without esearchresult")?;

    if let Some(message) = result.get("ERROR").and_then(Value::as_str) {
        return Err(BifError::Api {
            code: 200,
            message: format!("esearch: {}", message),
        });
    }

    match result.get("count") {
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| BifError::Parse(format!("esearch count is not a number: {}", s))),
        Some(Value::Number(n)) => n.as_u64().ok_or_parse("esearch count is negative"),
        _ => Err(BifError::Parse("esearch response without count".to_string())),
    }
}

/// Read `esearchresult.idlist`.
fn parse_id_list(body: &Value) -> Result<Vec<String>> {
    let list = body
        .get("esearchresult")
        .and_then(|r| r.get("idlist"))
        .and_then(Value::as_array)
        .ok_or_parse("esearch response without idlist")?;

    Ok(list
        .iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect())
}

/// Convert an esummary `result` map into metadata, in `uids` order.
fn parse_summaries(body: &Value) -> Vec<PaperMeta> {
    let Some(result) = body.get("result").and_then(Value::as_object) else {
        return Vec::new();
    };

    let uids: Vec<String> = match result.get("uids").and_then(Value::as_array) {
        Some(uids) => uids
            .iter()
            .filter_map(|u| u.as_str().map(str::to_string))
            .collect(),
        None => result.keys().filter(|k| *k != "uids").cloned().collect(),
    };

    uids.into_iter()
        .filter_map(|uid| {
            let doc = result.get(&uid)?;
            let text = |key: &str| {
                doc.get(key)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            let year = text("pubdate")
                .split(' ')
                .next()
                .unwrap_or_default()
                .to_string();
            let doi = doc
                .get("articleids")
                .and_then(Value::as_array)
                .and_then(|ids| {
                    ids.iter().find(|id| id.get("idtype").and_then(Value::as_str) == Some("doi"))
                })
                .and_then(|id| id.get("value").and_then(Value::as_str))
                .unwrap_or_default()
                .to_string();

            Some(PaperMeta {
                title: text("title"),
                journal: text("fulljournalname"),
                year,
                doi,
                pmcid: String::new(),
                pmid: uid,
            })
        })
        .collect()
}
