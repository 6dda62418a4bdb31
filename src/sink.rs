//! Append-only CSV output with duplicate suppression.
//!
//! One row per (paper, sender, receiver). The header is written only when
//! the file is created; reopening an existing file counts its rows and
//! seeds the duplicate index from its `PMID`, `sender` and `receiver`
//! columns, so a restarted crawl never writes the same triple twice.
//! An existing file with a different header is refused rather than
//! appended to with misaligned columns.

use crate::error::{BifError, Result};
use crate::index::PaperMeta;
use crate::pipeline::ClassifiedProjection;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::Path;
use tracing::{debug, info};

/// Output columns, in order
pub const HEADER: [&str; 15] = [
    "PMID",
    "sender",
    "receiver",
    "connection_flag",
    "reference",
    "journal",
    "DOI",
    "Taxon",
    "Method",
    "Pointer",
    "Figure",
    "Section",
    "Confidence",
    "Method_Confidence",
    "Neurotransmitter",
];

/// Quotes longer than this are cut in the `Pointer` column
pub const POINTER_MAX_CHARS: usize = 240;

type DedupKey = (String, String, String);

/// One output row, already formatted
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRow {
    pub pmid: String,
    pub sender: String,
    pub receiver: String,
    pub connection_flag: u8,
    pub reference: String,
    pub journal: String,
    pub doi: String,
    pub taxon: String,
    pub method: String,
    pub pointer: String,
    pub figure: String,
    pub section: String,
    pub confidence: f64,
    pub method_confidence: f64,
    pub neurotransmitter: String,
}

impl OutputRow {
    pub fn new(meta: &PaperMeta, record: &ClassifiedProjection) -> Self {
        let projection = &record.projection;
        Self {
            pmid: meta.pmid.clone(),
            sender: projection.sender.clone(),
            receiver: projection.receiver.clone(),
            connection_flag: projection.connection_flag,
            reference: meta.title.trim().to_string(),
            journal: meta.journal.clone(),
            doi: meta.doi.clone(),
            taxon: record.taxon.to_string(),
            method: record.method.to_string(),
            pointer: projection.quote.chars().take(POINTER_MAX_CHARS).collect(),
            figure: projection.figure_ids.join(", "),
            section: projection.section.to_string(),
            confidence: projection.confidence,
            method_confidence: record.method_confidence,
            neurotransmitter: record.neurotransmitter.clone(),
        }
    }

    fn key(&self) -> DedupKey {
        (self.pmid.clone(), self.sender.clone(), self.receiver.clone())
    }

    fn to_record(&self) -> [String; 15] {
        [
            self.pmid.clone(),
            self.sender.clone(),
            self.receiver.clone(),
            self.connection_flag.to_string(),
            self.reference.clone(),
            self.journal.clone(),
            self.doi.clone(),
            self.taxon.clone(),
            self.method.clone(),
            self.pointer.clone(),
            self.figure.clone(),
            self.section.clone(),
            format!("{:.2}", self.confidence),
            format!("{:.2}", self.method_confidence),
            self.neurotransmitter.clone(),
        ]
    }
}

/// CSV sink tracking row count and written triples
pub struct OutputSink {
    writer: csv::Writer<File>,
    seen: HashSet<DedupKey>,
    rows: u64,
}

impl OutputSink {
    /// Open (or create) the output file for appending.
    pub fn open(path: &Path) -> Result<Self> {
        let existing = path.exists() && std::fs::metadata(path)?.len() > 0;
        let (rows, seen) = if existing {
            scan_existing(path)?
        } else {
            (0, HashSet::new())
        };

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if !existing {
            writer.write_record(HEADER)?;
            writer.flush()?;
            debug!(path = %path.display(), "Created output file");
        } else {
            info!(
                path = %path.display(),
                rows = rows,
                keys = seen.len(),
                "Reopened output file"
            );
        }

        Ok(Self {
            writer,
            seen,
            rows,
        })
    }

    /// Write `row` unless its (PMID, sender, receiver) triple was written before.
    ///
    /// Returns whether a row was written. The row is flushed before returning.
    pub fn append(&mut self, row: &OutputRow) -> Result<bool> {
        let key = row.key();
        if self.seen.contains(&key) {
            debug!(
                pmid = %row.pmid,
                sender = %row.sender,
                receiver = %row.receiver,
                "Duplicate row suppressed"
            );
            return Ok(false);
        }

        self.writer.write_record(row.to_record())?;
        self.writer.flush()?;
        self.seen.insert(key);
        self.rows += 1;
        Ok(true)
    }

    /// Data rows in the file, including rows from earlier runs
    pub fn rows(&self) -> u64 {
        self.rows
    }

    #[cfg(test)]
    fn contains(&self, pmid: &str, sender: &str, receiver: &str) -> bool {
        self.seen
            .contains(&(pmid.to_string(), sender.to_string(), receiver.to_string()))
    }
}

/// Count data rows without building the dedup index.
pub fn count_rows(path: &Path) -> Result<u64> {
    if !path.exists() {
        return Ok(0);
    }
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut rows = 0;
    for record in reader.records() {
        record?;
        rows += 1;
    }
    Ok(rows)
}

fn scan_existing(path: &Path) -> Result<(u64, HashSet<DedupKey>)> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?;
    if !headers.iter().map(str::trim).eq(HEADER) {
        return Err(BifError::Validation(format!(
            "{} has columns [{}], expected [{}]; use a new output file",
            path.display(),
            headers.iter().collect::<Vec<_>>().join(","),
            HEADER.join(",")
        )));
    }

    let mut rows = 0;
    let mut seen = HashSet::new();
    for record in reader.records() {
        let record = record?;
        rows += 1;
        let field = |i: usize| record.get(i).unwrap_or_default().to_string();
        seen.insert((field(0), field(1), field(2)));
    }

    Ok((rows, seen))
}
