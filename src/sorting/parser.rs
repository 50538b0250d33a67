//! Tagged response grammar for category inference
//!
//! The model must answer with an ordered sequence of tagged segments:
//!
//! ```text
//! [<title>TITLE</title>]  <explanation>WHY</explanation>  <category>NAME</category>
//! ```
//!
//! The title segment only exists in the title-extraction grammar. The whole response is
//! matched at once (non-greedy, spanning lines); anything outside the segments is ignored.

use regex::Regex;
use std::sync::LazyLock;

use super::categories::validate_category_name;
use super::{ClassificationResult, SortError};

pub const TITLE_TAG: &str = "title";
pub const EXPLANATION_TAG: &str = "explanation";
pub const CATEGORY_TAG: &str = "category";

static WITH_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    compile(&[TITLE_TAG, EXPLANATION_TAG, CATEGORY_TAG])
});

static WITHOUT_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    compile(&[EXPLANATION_TAG, CATEGORY_TAG])
});

fn compile(tags: &[&str]) -> Regex {
    let pattern = tags
        .iter()
        .map(|tag| format!("<{tag}>(.*?)</{tag}>"))
        .collect::<Vec<_>>()
        .join(".*?");
    // Tag names are fixed identifiers, the pattern is always valid
    Regex::new(&format!("(?s){}", pattern)).expect("static response grammar")
}

/// Which segments the model is asked to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseGrammar {
    /// `<explanation>` then `<category>`
    Category,
    /// `<title>`, `<explanation>`, then `<category>`
    TitledCategory,
}

impl ResponseGrammar {
    pub fn has_title(&self) -> bool {
        matches!(self, ResponseGrammar::TitledCategory)
    }

    /// Segment tag names in the order they must appear
    pub fn tags(&self) -> &'static [&'static str] {
        match self {
            ResponseGrammar::Category => &[EXPLANATION_TAG, CATEGORY_TAG],
            ResponseGrammar::TitledCategory => &[TITLE_TAG, EXPLANATION_TAG, CATEGORY_TAG],
        }
    }

    fn regex(&self) -> &'static Regex {
        match self {
            ResponseGrammar::Category => &WITHOUT_TITLE,
            ResponseGrammar::TitledCategory => &WITH_TITLE,
        }
    }

    /// Extract and validate the segments of a raw model response.
    pub fn parse(&self, raw: &str) -> Result<ClassificationResult, SortError> {
        let caps = self.regex().captures(raw).ok_or_else(|| SortError::MalformedResponse {
            raw: raw.to_string(),
        })?;

        // Groups are numbered in segment order
        let segment = |i: usize| caps.get(i).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
        let (title, explanation, category) = if self.has_title() {
            (Some(segment(1)), segment(2), segment(3))
        } else {
            (None, segment(1), segment(2))
        };

        if validate_category_name(&category).is_err() {
            return Err(SortError::InvalidCategoryFormat(category));
        }

        Ok(ClassificationResult { category, explanation, title })
    }

    /// Render a result in this grammar (used in prompts as the answer template)
    pub fn render(&self, result: &ClassificationResult) -> String {
        let mut out = String::new();
        if self.has_title() {
            let title = result.title.as_deref().unwrap_or_default();
            out.push_str(&format!("<{TITLE_TAG}>{title}</{TITLE_TAG}>\n\n"));
        }
        out.push_str(&format!(
            "<{EXPLANATION_TAG}>{}</{EXPLANATION_TAG}>\n\n<{CATEGORY_TAG}>{}</{CATEGORY_TAG}>",
            result.explanation, result.category
        ));
        out
    }
}
