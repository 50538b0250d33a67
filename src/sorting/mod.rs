//! Paper sorting: LLM category inference and category-directory filing
//!
//! Batch flow: categories -> prompt -> classifier -> organizer -> categories (updated).

pub mod categories;
pub mod classifier;
pub mod organizer;
pub mod parser;
pub mod pipeline;
pub mod prompt;

use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;

use crate::llm::LlmError;

/// How a sorted file is named inside its category directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Naming {
    /// File named after the title the model extracted
    #[default]
    Title,
    /// Original file name kept
    Original,
}

impl Naming {
    pub fn as_str(&self) -> &'static str {
        match self {
            Naming::Title => "title",
            Naming::Original => "original",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "title" => Some(Naming::Title),
            "original" => Some(Naming::Original),
            _ => None,
        }
    }
}

/// A paper waiting to be sorted
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    /// Extracted text, possibly empty
    pub text: String,
    pub title: Option<String>,
}

/// Category decision for one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationResult {
    pub category: String,
    pub explanation: String,
    /// Present when the response grammar asks for a title
    pub title: Option<String>,
}

/// Coarse failure class reported per document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Classification,
    RateLimit,
    Collision,
    Filesystem,
}

#[derive(Debug, thiserror::Error)]
pub enum SortError {
    #[error("malformed model response: {raw}")]
    MalformedResponse { raw: String },
    #[error("invalid category format: {0:?}")]
    InvalidCategoryFormat(String),
    #[error("invalid category name: {0:?}")]
    InvalidCategoryName(String),
    #[error("provider error: {0}")]
    Provider(#[from] LlmError),
    #[error("failed after {attempts} attempts due to rate limiting (last error: {last})")]
    RetryExhausted { attempts: u32, last: LlmError },
    #[error("destination already exists: {}", .0.display())]
    Collision(PathBuf),
    #[error("{}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
}

impl SortError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SortError::Io { path: path.into(), source }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            SortError::MalformedResponse { .. }
            | SortError::InvalidCategoryFormat(_)
            | SortError::InvalidCategoryName(_)
            | SortError::Provider(_) => FailureKind::Classification,
            SortError::RetryExhausted { .. } => FailureKind::RateLimit,
            SortError::Collision(_) => FailureKind::Collision,
            SortError::Io { .. } => FailureKind::Filesystem,
        }
    }
}
