//! Classification prompt construction

use std::collections::BTreeSet;

use super::parser::ResponseGrammar;
use super::ClassificationResult;
use crate::utils::truncate_chars;

/// Characters of document text sent to the model unless configured otherwise
pub const DEFAULT_EXCERPT_CHARS: usize = 15_000;

/// Shown in place of the category list when no category exists yet
pub const NO_CATEGORIES: &str = "None";

/// Known categories as a bulleted block, or the `None` sentinel
pub fn render_category_list(known_categories: &BTreeSet<String>) -> String {
    if known_categories.is_empty() {
        return format!("- {}", NO_CATEGORIES);
    }
    known_categories
        .iter()
        .map(|c| format!("- {}", c))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the category-inference prompt for one document.
///
/// The excerpt is cut at `excerpt_chars` characters, no smarter boundary. Whether a
/// near-duplicate existing category should be reused is left to the model.
pub fn build_classification_prompt(
    document_excerpt: &str,
    known_categories: &BTreeSet<String>,
    grammar: ResponseGrammar,
    excerpt_chars: usize,
) -> String {
    let excerpt = truncate_chars(document_excerpt, excerpt_chars);
    let categories = render_category_list(known_categories);

    let title_task = if grammar.has_title() {
        "\nAlso, extract verbatim the title of the document.\n"
    } else {
        ""
    };

    let template = grammar.render(&ClassificationResult {
        title: Some("Extracted Title of the Document".to_string()),
        explanation: "Step by step reasoning about the categorization, for example:\n\
- The document discusses the nature of consciousness and its relation to the brain\n\
- It uses LLMs to explain details about some cognitive architectures\n\
- Some computational models are described, so it could be Computer Science\n\
After all the considerations, the document mainly falls in the Consciousness category"
            .to_string(),
        category: "CategoryName".to_string(),
    });

    let tags = grammar.tags().join(", ");

    format!(
        r#"Read carefully this document looking for the most restrictive main object or area of study.
{title_task}
Propose a category for the document and explain your reasoning.
Existing categories:
{categories}

Guidelines:
1. Use an existing category if it is VERY similar (prefer reusing it over creating a near-duplicate).
2. If creating a new one, make it DISTINCT from the existing ones.
3. Use a SINGLE category name, without "/" and on one line.
4. Consider the document's primary focus.
5. Use keywords if available.

Example categories:
- Consciousness
- Reasoning
- Psychology
- NLP
- Neuroscience

Document content:
{excerpt}

Respond EXACTLY in this XML-like format, with the {tags} tags in this order:

{template}"#
    )
}
