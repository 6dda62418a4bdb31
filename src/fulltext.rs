//! Full-text resolution.
//!
//! For a PubMed identifier the resolver asks Europe PMC for the PMCID, DOI
//! and full-text links, then tries in order: the PMC PDF, any PDF link, any
//! HTML link, and finally the plain-text abstract from PubMed. Download
//! failures are never fatal; they just move on to the next source.

use crate::error::Result;
use crate::http::HttpFetcher;
use crate::index::{LiteratureIndex, PaperMeta};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

/// Europe PMC REST search endpoint
pub const EUROPEPMC_SEARCH_URL: &str = "https://www.ebi.ac.uk/europepmc/webservices/rest/search";

/// PMC article base; the PDF lives at `{base}/{pmcid}/pdf`
pub const PMC_ARTICLES_URL: &str = "https://www.ncbi.nlm.nih.gov/pmc/articles";

/// Where the resolved text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSource {
    PmcPdf,
    Pdf,
    Html,
    Abstract,
    Unavailable,
}

impl std::fmt::Display for TextSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TextSource::PmcPdf => "pmc-pdf",
            TextSource::Pdf => "pdf",
            TextSource::Html => "html",
            TextSource::Abstract => "abstract",
            TextSource::Unavailable => "unavailable",
        };
        f.write_str(label)
    }
}

/// Text of a paper plus identifiers discovered along the way
#[derive(Debug, Clone)]
pub struct ResolvedText {
    pub text: String,
    pub source: TextSource,
    pub doi: String,
    pub pmcid: String,
}

impl ResolvedText {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Turns paper metadata into text for extraction.
#[async_trait]
pub trait TextResolver: Send + Sync {
    async fn resolve(&self, meta: &PaperMeta) -> Result<ResolvedText>;
}

/// Links reported by Europe PMC for one paper
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FullTextLinks {
    pub pmcid: Option<String>,
    pub doi: Option<String>,
    pub pdf: Option<String>,
    pub html: Option<String>,
}

/// Europe PMC / PMC backed resolver with PubMed abstract fallback
pub struct FullTextResolver {
    fetcher: Arc<HttpFetcher>,
    index: Arc<dyn LiteratureIndex>,
    europepmc_url: String,
    pmc_url: String,
}

impl FullTextResolver {
    pub fn new(fetcher: Arc<HttpFetcher>, index: Arc<dyn LiteratureIndex>) -> Self {
        Self {
            fetcher,
            index,
            europepmc_url: EUROPEPMC_SEARCH_URL.to_string(),
            pmc_url: PMC_ARTICLES_URL.to_string(),
        }
    }

    /// Override the Europe PMC and PMC endpoints (tests, mirrors).
    pub fn with_endpoints(mut self, europepmc_url: &str, pmc_url: &str) -> Self {
        self.europepmc_url = europepmc_url.trim_end_matches('/').to_string();
        self.pmc_url = pmc_url.trim_end_matches('/').to_string();
        self
    }

    /// Look up PMCID, DOI and full-text links for a PubMed identifier.
    pub async fn links(&self, pmid: &str) -> Result<FullTextLinks> {
        let params = [
            ("query", format!("EXT_ID:{} AND SRC:MED", pmid)),
            ("format", "json".to_string()),
        ];
        let body = self.fetcher.get_json(&self.europepmc_url, &params).await?;
        let response: EpmcResponse = serde_json::from_value(body)?;
        Ok(collect_links(response))
    }

    async fn pmc_pdf_text(&self, pmcid: &str) -> String {
        let url = format!("{}/{}/pdf", self.pmc_url, pmcid);
        match self.fetcher.get_once(&url).await {
            Ok(fetched) if fetched.content_type.starts_with("application/pdf") => {
                pdf_to_text(&fetched.body)
            }
            Ok(fetched) => {
                debug!(
                    pmcid = pmcid,
                    content_type = %fetched.content_type,
                    "PMC did not return a PDF"
                );
                String::new()
            }
            Err(e) => {
                debug!(pmcid = pmcid, error = %e, "PMC PDF download failed");
                String::new()
            }
        }
    }

    async fn url_text(&self, url: &str) -> String {
        match self.fetcher.get_once(url).await {
            Ok(fetched) => {
                let ct = &fetched.content_type;
                if ct.contains("pdf") {
                    pdf_to_text(&fetched.body)
                } else if ct.contains("html") || ct.contains("xml") || url.ends_with(".html") {
                    html_to_text(&fetched.text())
                } else {
                    debug!(url = url, content_type = %ct, "Unsupported full-text content type");
                    String::new()
                }
            }
            Err(e) => {
                debug!(url = url, error = %e, "Full-text download failed");
                String::new()
            }
        }
    }
}

#[async_trait]
impl TextResolver for FullTextResolver {
    async fn resolve(&self, meta: &PaperMeta) -> Result<ResolvedText> {
        let pmid = meta.pmid.as_str();
        let links = match self.links(pmid).await {
            Ok(links) => links,
            Err(e) => {
                warn!(pmid = pmid, error = %e, "Europe PMC lookup failed");
                FullTextLinks::default()
            }
        };

        let doi = links.doi.clone().unwrap_or_else(|| meta.doi.clone());
        let pmcid = links.pmcid.clone().unwrap_or_default();
        let found = |text: String, source: TextSource| ResolvedText {
            text,
            source,
            doi: doi.clone(),
            pmcid: pmcid.clone(),
        };

        if !pmcid.is_empty() {
            let text = self.pmc_pdf_text(&pmcid).await;
            if !text.trim().is_empty() {
                info!(pmid = pmid, pmcid = %pmcid, chars = text.len(), "Resolved PMC PDF");
                return Ok(found(text, TextSource::PmcPdf));
            }
        }

        for (url, source) in [(&links.pdf, TextSource::Pdf), (&links.html, TextSource::Html)] {
            if let Some(url) = url {
                let text = self.url_text(url).await;
                if !text.trim().is_empty() {
                    info!(pmid = pmid, source = %source, chars = text.len(), "Resolved full text");
                    return Ok(found(text, source));
                }
            }
        }

        let text = match self.index.abstract_text(pmid).await {
            Ok(text) => text,
            Err(e) => {
                warn!(pmid = pmid, error = %e, "Abstract unavailable");
                String::new()
            }
        };
        let source = if text.trim().is_empty() {
            TextSource::Unavailable
        } else {
            TextSource::Abstract
        };
        debug!(pmid = pmid, source = %source, "Fell back to abstract");
        Ok(found(text, source))
    }
}

// === Europe PMC response types ===

#[derive(Debug, Default, Deserialize)]
struct EpmcResponse {
    #[serde(rename = "resultList", default)]
    result_list: EpmcResultList,
}

#[derive(Debug, Default, Deserialize)]
struct EpmcResultList {
    #[serde(default)]
    result: Vec<EpmcHit>,
}

#[derive(Debug, Default, Deserialize)]
struct EpmcHit {
    pmcid: Option<String>,
    doi: Option<String>,
    #[serde(rename = "fullTextUrlList")]
    full_text_url_list: Option<EpmcUrlList>,
}

#[derive(Debug, Default, Deserialize)]
struct EpmcUrlList {
    #[serde(rename = "fullTextUrl", default)]
    full_text_url: Vec<EpmcUrl>,
}

#[derive(Debug, Default, Deserialize)]
struct EpmcUrl {
    #[serde(default)]
    url: String,
    #[serde(rename = "documentStyle", default)]
    document_style: String,
    #[serde(default)]
    availability: String,
}

fn collect_links(response: EpmcResponse) -> FullTextLinks {
    let mut links = FullTextLinks::default();

    for hit in response.result_list.result {
        if hit.pmcid.is_some() {
            links.pmcid = hit.pmcid;
        }
        if hit.doi.is_some() {
            links.doi = hit.doi;
        }
        for u in hit.full_text_url_list.map(|l| l.full_text_url).unwrap_or_default() {
            if u.url.is_empty() {
                continue;
            }
            let hint = format!("{}{}", u.document_style, u.availability).to_lowercase();
            if u.url.ends_with(".pdf") || hint.contains("pdf") {
                links.pdf = Some(u.url);
            } else {
                links.html = Some(u.url);
            }
        }
    }

    links
}

static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b.*?</script\s*>").expect("valid script regex"));
static STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b.*?</style\s*>").expect("valid style regex"));
static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</?(br|p|div|li|tr|h\d)\b[^>]*>").expect("valid block regex")
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid tag regex"));
static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid space regex"));

/// Flatten an HTML page to whitespace-normalised text.
pub fn html_to_text(html: &str) -> String {
    let text = SCRIPT_RE.replace_all(html, " ");
    let text = STYLE_RE.replace_all(&text, " ");
    let text = BLOCK_RE.replace_all(&text, "\n");
    let text = TAG_RE.replace_all(&text, " ");
    let text = html_escape::decode_html_entities(&text);
    SPACE_RE.replace_all(&text, " ").trim().to_string()
}

/// Extract text from PDF bytes; empty on any failure.
pub fn pdf_to_text(bytes: &[u8]) -> String {
    // pdf-extract panics on some malformed documents
    let outcome = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes));
    match outcome {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            debug!(error = %e, "PDF text extraction failed");
            String::new()
        }
        Err(_) => {
            warn!("PDF text extraction panicked");
            String::new()
        }
    }
}
