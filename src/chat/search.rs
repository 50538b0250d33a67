//! Running model-proposed search queries against the paper search provider

use regex::Regex;
use std::sync::LazyLock;

use crate::papers::{PaperRecord, ResultMap, SearchProvider, SortCriterion};

static QUERY_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<query>(.*?)</query>").expect("static query tag pattern")
});

/// Header of the result summary fed back to the model
pub const RESULTS_HEADER: &str = "### RESULTS:\n";

/// Every `<query>…</query>` in a model turn, trimmed, empties dropped
pub fn extract_queries(text: &str) -> Vec<String> {
    QUERY_TAG
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|q| !q.is_empty())
        .collect()
}

/// One result in the summary block
pub fn summary_entry(record: &PaperRecord) -> String {
    let journal = record
        .journal_ref
        .as_deref()
        .map(|j| format!("\n##### Journal Reference: {}", j))
        .unwrap_or_default();
    format!("- ####'{}':\n##### Abstract: {}{}\n", record.title, record.summary, journal)
}

/// What a batch of queries produced
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    /// Summary entries in provider order, query after query
    pub entries: Vec<String>,
    /// Titles added or refreshed in the result map
    pub titles: Vec<String>,
    /// Inline notices for queries that failed
    pub notices: Vec<String>,
}

impl SearchOutcome {
    pub fn found(&self) -> usize {
        self.titles.len()
    }

    /// Result block for the next prompt
    pub fn summary(&self) -> String {
        let mut summary = String::from(RESULTS_HEADER);
        for entry in &self.entries {
            summary.push_str(entry);
        }
        summary
    }

    /// Accumulate a later round into this one
    pub fn absorb(&mut self, other: SearchOutcome) {
        self.entries.extend(other.entries);
        self.titles.extend(other.titles);
        self.notices.extend(other.notices);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SearchOrchestrator {
    max_results: usize,
    sort: SortCriterion,
}

impl Default for SearchOrchestrator {
    fn default() -> Self {
        Self {
            max_results: 100,
            sort: SortCriterion::Relevance,
        }
    }
}

impl SearchOrchestrator {
    pub fn new(max_results: usize, sort: SortCriterion) -> Self {
        Self { max_results, sort }
    }

    /// Run each query in order and merge its records into `results`.
    ///
    /// A failing query becomes a notice; the remaining queries still run.
    pub async fn execute<S: SearchProvider>(
        &self,
        queries: &[String],
        provider: &S,
        results: &mut ResultMap,
    ) -> SearchOutcome {
        let mut outcome = SearchOutcome::default();

        for query in queries {
            tracing::info!(query = %query, "Processing query");
            match provider.search(query, self.max_results, self.sort).await {
                Ok(records) => {
                    tracing::debug!(query = %query, count = records.len(), "Query returned");
                    for record in records {
                        outcome.entries.push(summary_entry(&record));
                        outcome.titles.push(record.title.clone());
                        results.insert(record);
                    }
                }
                Err(e) => {
                    tracing::warn!(query = %query, error = %e, "Query failed");
                    outcome.notices.push(format!("**Error processing query '{}': {}**", query, e));
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::papers::SearchError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Search provider answering from a fixed table; unknown queries return nothing
    pub(crate) struct TableSearch {
        table: HashMap<String, Result<Vec<PaperRecord>, u16>>,
        pub calls: Mutex<Vec<(String, usize, SortCriterion)>>,
    }

    impl TableSearch {
        pub(crate) fn new(entries: Vec<(&str, Result<Vec<PaperRecord>, u16>)>) -> Self {
            Self {
                table: entries.into_iter().map(|(q, r)| (q.to_string(), r)).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn queries(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(q, _, _)| q.clone()).collect()
        }
    }

    impl SearchProvider for TableSearch {
        async fn search(
            &self,
            query: &str,
            max_results: usize,
            sort: SortCriterion,
        ) -> Result<Vec<PaperRecord>, SearchError> {
            self.calls.lock().unwrap().push((query.to_string(), max_results, sort));
            match self.table.get(query) {
                Some(Ok(records)) => Ok(records.clone()),
                Some(Err(status)) => Err(SearchError::Status(*status)),
                None => Ok(Vec::new()),
            }
        }
    }

    pub(crate) fn paper(title: &str, summary: &str, journal_ref: Option<&str>) -> PaperRecord {
        let mut record = PaperRecord::titled(title);
        record.summary = summary.to_string();
        record.journal_ref = journal_ref.map(String::from);
        record
    }

    #[test]
    fn test_extract_queries() {
        let text = "Sure:\n<query>ti:(reasoning AND llm)</query>\n<query>\n  au:hinton \n</query><query>  </query>";
        assert_eq!(extract_queries(text), vec!["ti:(reasoning AND llm)", "au:hinton"]);
        assert!(extract_queries("no queries").is_empty());
    }

    #[test]
    fn test_summary_entry_format() {
        assert_eq!(
            summary_entry(&paper("T", "An abstract.", Some("NeurIPS 2017"))),
            "- ####'T':\n##### Abstract: An abstract.\n##### Journal Reference: NeurIPS 2017\n"
        );
        assert_eq!(summary_entry(&paper("T", "A.", None)), "- ####'T':\n##### Abstract: A.\n");
    }

    #[tokio::test]
    async fn test_execute_merges_in_provider_order() {
        let provider = TableSearch::new(vec![
            ("q1", Ok(vec![paper("B", "b", None), paper("A", "a", None)])),
            ("q2", Ok(vec![paper("A", "a2", Some("JR"))])),
        ]);
        let mut results = ResultMap::new();
        let orchestrator = SearchOrchestrator::new(100, SortCriterion::Relevance);

        let outcome = orchestrator
            .execute(&["q1".to_string(), "q2".to_string()], &provider, &mut results)
            .await;

        assert_eq!(outcome.found(), 3);
        assert_eq!(
            outcome.summary(),
            "### RESULTS:\n- ####'B':\n##### Abstract: b\n- ####'A':\n##### Abstract: a\n- ####'A':\n##### Abstract: a2\n##### Journal Reference: JR\n"
        );
        assert_eq!(results.len(), 2);
        assert_eq!(results.get("A").unwrap().summary, "a2");
        assert_eq!(
            *provider.calls.lock().unwrap(),
            vec![
                ("q1".to_string(), 100, SortCriterion::Relevance),
                ("q2".to_string(), 100, SortCriterion::Relevance)
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_query_becomes_notice() {
        let provider = TableSearch::new(vec![
            ("bad", Err(503)),
            ("good", Ok(vec![paper("A", "a", None)])),
        ]);
        let mut results = ResultMap::new();

        let outcome = SearchOrchestrator::default()
            .execute(&["bad".to_string(), "good".to_string()], &provider, &mut results)
            .await;

        assert_eq!(outcome.notices, vec!["**Error processing query 'bad': search provider returned status 503**"]);
        assert_eq!(outcome.found(), 1);
        assert!(results.get("A").is_some());
    }

    #[test]
    fn test_absorb_accumulates_rounds() {
        let mut first = SearchOutcome {
            entries: vec!["e1\n".to_string()],
            titles: vec!["t1".to_string()],
            notices: vec![],
        };
        first.absorb(SearchOutcome {
            entries: vec!["e2\n".to_string()],
            titles: vec!["t2".to_string()],
            notices: vec!["n".to_string()],
        });
        assert_eq!(first.summary(), "### RESULTS:\ne1\ne2\n");
        assert_eq!(first.found(), 2);
        assert_eq!(first.notices.len(), 1);
    }
}
