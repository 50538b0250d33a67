//! Fuzzy lookup of cited paper titles in the session result map

use crate::papers::{PaperRecord, ResultMap};

/// Maximum edit distance between a cited title and a known one
pub const DEFAULT_TOLERANCE: usize = 5;

/// Levenshtein distance counted in characters
pub fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != *cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Closest known paper to `query_title`, if it is within `tolerance` edits.
///
/// Linear scan; on equal distance the first title in map order wins.
pub fn resolve<'a>(results: &'a ResultMap, query_title: &str, tolerance: usize) -> Option<&'a PaperRecord> {
    let query = query_title.trim();
    let query_len = query.chars().count();
    let mut best: Option<(usize, &PaperRecord)> = None;

    for (title, record) in results.iter() {
        // Length difference is a lower bound on the distance
        let lower_bound = title.chars().count().abs_diff(query_len);
        if best.is_some_and(|(d, _)| lower_bound >= d) {
            continue;
        }

        let distance = levenshtein(title, query);
        if best.map_or(true, |(d, _)| distance < d) {
            best = Some((distance, record));
            if distance == 0 {
                break;
            }
        }
    }

    match best {
        Some((distance, record)) if distance <= tolerance => Some(record),
        Some((distance, _)) => {
            tracing::debug!(query, distance, "No paper close enough to cited title");
            None
        }
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(titles: &[&str]) -> ResultMap {
        let mut results = ResultMap::new();
        for title in titles {
            results.insert(PaperRecord::titled(*title));
        }
        results
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("flaw", "lawn"), 2);
        // Characters, not bytes
        assert_eq!(levenshtein("Über", "Uber"), 1);
    }

    #[test]
    fn test_case_difference_within_tolerance() {
        let results = map(&["Attention Is All You Need"]);
        let found = resolve(&results, "Attention is all you need", 5).unwrap();
        assert_eq!(found.title, "Attention Is All You Need");
    }

    #[test]
    fn test_unrelated_title_is_not_found() {
        let results = map(&["A"]);
        assert!(resolve(&results, "Completely Different Title", 5).is_none());
        assert!(resolve(&ResultMap::new(), "Anything", 5).is_none());
    }

    #[test]
    fn test_closest_title_wins() {
        let results = map(&["Deep Residual Learning", "Deep Residual Networks", "Residual"]);
        let found = resolve(&results, "Deep Residual Network", 5).unwrap();
        assert_eq!(found.title, "Deep Residual Networks");
    }

    #[test]
    fn test_surrounding_whitespace_is_ignored() {
        let results = map(&["BERT"]);
        assert_eq!(resolve(&results, "  BERT \n", 0).unwrap().title, "BERT");
    }

    #[test]
    fn test_tie_goes_to_first_title_in_order() {
        let results = map(&["abcd", "abce"]);
        assert_eq!(resolve(&results, "abcx", 5).unwrap().title, "abcd");
    }

    #[test]
    fn test_tolerance_is_inclusive() {
        let results = map(&["abcdef"]);
        assert!(resolve(&results, "abc", 3).is_some());
        assert!(resolve(&results, "abc", 2).is_none());
    }
}
