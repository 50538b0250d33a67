//! Batch sorting: extract → classify → organize, one document at a time
//!
//! A failing document never stops the batch. Every input PDF ends up with exactly one
//! outcome in the `BatchReport`.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use super::categories::list_categories;
use super::classifier::Classifier;
use super::organizer::FileOrganizer;
use super::parser::ResponseGrammar;
use super::{ClassificationResult, Document, FailureKind, Naming, SortError};
use crate::llm::LlmProvider;
use crate::papers::DocumentSource;

/// What happened to one input document
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentOutcome {
    Sorted {
        target: PathBuf,
        category: String,
        title: Option<String>,
        explanation: String,
    },
    Skipped {
        reason: String,
    },
    Failed {
        kind: FailureKind,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    pub source: PathBuf,
    #[serde(flatten)]
    pub outcome: DocumentOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub documents: Vec<DocumentReport>,
    /// Categories that did not exist before this run
    pub new_categories: Vec<String>,
}

impl BatchReport {
    pub fn sorted_count(&self) -> usize {
        self.count(|o| matches!(o, DocumentOutcome::Sorted { .. }))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|o| matches!(o, DocumentOutcome::Skipped { .. }))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|o| matches!(o, DocumentOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&DocumentOutcome) -> bool) -> usize {
        self.documents.iter().filter(|d| pred(&d.outcome)).count()
    }

    /// Sorted documents per category
    pub fn per_category(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for doc in &self.documents {
            if let DocumentOutcome::Sorted { category, .. } = &doc.outcome {
                *counts.entry(category.as_str()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Failed documents per failure kind
    pub fn per_failure(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for doc in &self.documents {
            if let DocumentOutcome::Failed { kind, .. } = &doc.outcome {
                *counts.entry(failure_label(*kind)).or_insert(0) += 1;
            }
        }
        counts
    }

    pub fn print_summary(&self) {
        println!("\nSorting Results:");
        println!("  {:12} {:3}", "Sorted:", self.sorted_count());
        println!("  {:12} {:3}", "Skipped:", self.skipped_count());
        println!("  {:12} {:3}", "Failed:", self.failed_count());

        let per_failure = self.per_failure();
        for (kind, count) in &per_failure {
            println!("    {:18} {:3}", format!("{}:", kind), count);
        }

        let per_category = self.per_category();
        if !per_category.is_empty() {
            println!("\nBy category:");
            for (category, count) in &per_category {
                let marker = if self.new_categories.iter().any(|c| c == category) { " (new)" } else { "" };
                println!("  {:3}  {}{}", count, category, marker);
            }
        }
    }
}

fn failure_label(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::Classification => "classification",
        FailureKind::RateLimit => "rate limit",
        FailureKind::Collision => "name collision",
        FailureKind::Filesystem => "filesystem",
    }
}

/// Grammar the classifier must use for a naming mode
pub fn grammar_for(naming: Naming) -> ResponseGrammar {
    match naming {
        Naming::Title => ResponseGrammar::TitledCategory,
        Naming::Original => ResponseGrammar::Category,
    }
}

pub struct SortPipeline<P, D> {
    classifier: Classifier<P>,
    organizer: FileOrganizer,
    source: D,
}

impl<P: LlmProvider, D: DocumentSource> SortPipeline<P, D> {
    pub fn new(classifier: Classifier<P>, organizer: FileOrganizer, source: D) -> Self {
        Self { classifier, organizer, source }
    }

    /// Classifier with the grammar matching `naming`, default retry policy
    pub fn for_naming(provider: P, naming: Naming, source: D) -> Self {
        Self::new(
            Classifier::new(provider, grammar_for(naming)),
            FileOrganizer::new(naming),
            source,
        )
    }

    pub fn classifier(&self) -> &Classifier<P> {
        &self.classifier
    }

    pub async fn run(&self, input_dir: &Path, output_dir: &Path) -> Result<BatchReport, SortError> {
        self.run_with_progress(input_dir, output_dir, |_| {}).await
    }

    /// Sort every recognized document of `input_dir` into `output_dir`.
    ///
    /// Only listing the input or output directory can fail the whole run;
    /// everything per document lands in the report.
    pub async fn run_with_progress(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        mut on_document: impl FnMut(&DocumentReport),
    ) -> Result<BatchReport, SortError> {
        let mut known = list_categories(output_dir)?;
        let existing = known.clone();
        let inputs = self.collect_inputs(input_dir)?;
        tracing::info!(
            input = %input_dir.display(),
            documents = inputs.len(),
            categories = known.len(),
            "Starting batch"
        );

        let mut report = BatchReport {
            input_dir: input_dir.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            ..Default::default()
        };

        for (i, path) in inputs.into_iter().enumerate() {
            tracing::debug!("[{}] {}", i + 1, path.display());
            let outcome = match self.process(&path, output_dir, &mut known).await {
                Ok(Processed::Sorted(result, target)) => {
                    tracing::info!(
                        source = %path.display(),
                        target = %target.display(),
                        category = %result.category,
                        "Sorted"
                    );
                    DocumentOutcome::Sorted {
                        target,
                        category: result.category,
                        title: result.title,
                        explanation: result.explanation,
                    }
                }
                Ok(Processed::Skipped(reason)) => {
                    tracing::warn!(source = %path.display(), reason = %reason, "Skipping document");
                    DocumentOutcome::Skipped { reason }
                }
                Err(e) => {
                    tracing::warn!(source = %path.display(), kind = ?e.kind(), error = %e, "Failed to sort document");
                    DocumentOutcome::Failed {
                        kind: e.kind(),
                        message: e.to_string(),
                    }
                }
            };

            let doc_report = DocumentReport { source: path, outcome };
            on_document(&doc_report);
            report.documents.push(doc_report);
        }

        report.new_categories = known.difference(&existing).cloned().collect();
        Ok(report)
    }

    /// Recognized input files, sorted by path
    fn collect_inputs(&self, input_dir: &Path) -> Result<Vec<PathBuf>, SortError> {
        let entries = fs::read_dir(input_dir).map_err(|e| SortError::io(input_dir, e))?;
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| SortError::io(input_dir, e))?.path();
            if path.is_file() && self.source.recognizes(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Skipped documents (unreadable or without text) are left in place
    async fn process(
        &self,
        path: &Path,
        output_dir: &Path,
        known: &mut BTreeSet<String>,
    ) -> Result<Processed, SortError> {
        let extracted = match self.source.extract(path) {
            Ok(extracted) => extracted,
            Err(e) => return Ok(Processed::Skipped(e.to_string())),
        };

        if extracted.text.trim().is_empty() {
            return Ok(Processed::Skipped("no text extracted".to_string()));
        }

        let document = Document {
            path: path.to_path_buf(),
            text: extracted.text,
            title: extracted.title,
        };

        let result = self.classifier.classify(&document.text, known).await?;
        let target = self.organizer.organize(&document, &result, output_dir)?;
        known.insert(result.category.clone());

        Ok(Processed::Sorted(result, target))
    }
}

enum Processed {
    Sorted(ClassificationResult, PathBuf),
    Skipped(String),
}
