//! Paper records, the session result map and the external paper collaborators
//!
//! Two collaborators live here:
//! 1. `SearchProvider` - query in, ordered records out (arXiv in `arxiv.rs`)
//! 2. `DocumentSource` - file in, extracted text out (PDF in `pdf_extractor.rs`)

pub mod arxiv;
pub mod pdf_extractor;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

/// One search hit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaperRecord {
    pub title: String,
    pub authors: Vec<String>,
    pub summary: String,
    pub published: Option<DateTime<Utc>>,
    /// Abstract page
    pub abs_url: Option<String>,
    pub pdf_url: Option<String>,
    pub journal_ref: Option<String>,
    /// Subject category tags (e.g. `cs.CL`)
    pub categories: Vec<String>,
}

impl PaperRecord {
    /// Minimal record, mostly useful to tests and stubs
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            authors: Vec::new(),
            summary: String::new(),
            published: None,
            abs_url: None,
            pdf_url: None,
            journal_ref: None,
            categories: Vec::new(),
        }
    }
}

/// Every paper seen in a session, keyed by title.
///
/// Append-only: records are replaced on duplicate titles, never removed.
/// Iteration is in key order, which makes nearest-title ties deterministic.
#[derive(Debug, Clone, Default)]
pub struct ResultMap {
    records: BTreeMap<String, PaperRecord>,
}

impl ResultMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert by title, last write wins
    pub fn insert(&mut self, record: PaperRecord) {
        self.records.insert(record.title.clone(), record);
    }

    pub fn get(&self, title: &str) -> Option<&PaperRecord> {
        self.records.get(title)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PaperRecord)> {
        self.records.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Extend<PaperRecord> for ResultMap {
    fn extend<I: IntoIterator<Item = PaperRecord>>(&mut self, iter: I) {
        for record in iter {
            self.insert(record);
        }
    }
}

/// Result ordering requested from the search provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortCriterion {
    #[default]
    Relevance,
    LastUpdatedDate,
    SubmittedDate,
}

impl SortCriterion {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortCriterion::Relevance => "relevance",
            SortCriterion::LastUpdatedDate => "updated",
            SortCriterion::SubmittedDate => "submitted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "relevance" => Some(SortCriterion::Relevance),
            "updated" | "lastUpdatedDate" => Some(SortCriterion::LastUpdatedDate),
            "submitted" | "submittedDate" => Some(SortCriterion::SubmittedDate),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Transport(String),
    #[error("search provider returned status {0}")]
    Status(u16),
    #[error("could not parse search response: {0}")]
    Parse(String),
}

/// Paper search backend
#[allow(async_fn_in_trait)]
pub trait SearchProvider {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        sort: SortCriterion,
    ) -> Result<Vec<PaperRecord>, SearchError>;
}

impl<S: SearchProvider> SearchProvider for &S {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        sort: SortCriterion,
    ) -> Result<Vec<PaperRecord>, SearchError> {
        (**self).search(query, max_results, sort).await
    }
}

/// Text pulled out of one input file
#[derive(Debug, Clone, Default)]
pub struct ExtractedDocument {
    pub text: String,
    pub title: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("cannot read {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("cannot extract text from {}: {message}", .path.display())]
    Unreadable { path: PathBuf, message: String },
}

/// Turns input files into text for classification
pub trait DocumentSource {
    /// Whether `path` is a document this source handles
    fn recognizes(&self, path: &Path) -> bool {
        has_pdf_extension(path)
    }

    fn extract(&self, path: &Path) -> Result<ExtractedDocument, ExtractionError>;
}

pub fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}
