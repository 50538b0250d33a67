//! Rendering of cited papers inside the chat transcript
//!
//! Every interpolated value is HTML-escaped, so a rendered card can never contain a
//! reference tag and rewriting stays idempotent.

use html_escape::{encode_double_quoted_attribute, encode_text};
use serde::{Deserialize, Serialize};

use crate::papers::PaperRecord;

/// Replacement for a reference that matches no known paper
pub const NOT_FOUND_MARKER: &str = "\n[NOT FOUND]\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardStyle {
    /// Bordered `<div>` card with links, authors, categories and abstract
    #[default]
    Html,
    /// Single markdown heading line with the title
    Heading,
}

impl CardStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardStyle::Html => "html",
            CardStyle::Heading => "heading",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "html" => Some(CardStyle::Html),
            "heading" => Some(CardStyle::Heading),
            _ => None,
        }
    }

    pub fn render(&self, record: &PaperRecord) -> String {
        match self {
            CardStyle::Heading => format!("- ###### {}", encode_text(&record.title)),
            CardStyle::Html => render_html(record),
        }
    }
}

fn render_html(record: &PaperRecord) -> String {
    let link = |url: &Option<String>| {
        url.as_deref()
            .map(|u| encode_double_quoted_attribute(u).into_owned())
            .unwrap_or_else(|| "#".to_string())
    };
    let date = record
        .published
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let mut card = String::new();
    card.push_str(
        "<div style=\"border: 1px solid #e6e9ef; border-radius: 5px; padding: 10px; margin-bottom: 10px;\">\n",
    );
    card.push_str(&format!(
        "    <h4><a href=\"{}\" target=\"_blank\">{}</a> <a href=\"{}\" target=\"_blank\">[PDF]</a></h4>\n",
        link(&record.abs_url),
        encode_text(&record.title),
        link(&record.pdf_url),
    ));
    card.push_str(&format!("    <p><b>Authors:</b> {}</p>\n", encode_text(&record.authors.join(", "))));
    card.push_str(&format!(
        "    <p><b>Categories:</b> {}</p>\n",
        encode_text(&record.categories.join(", "))
    ));
    if let Some(journal_ref) = &record.journal_ref {
        card.push_str(&format!("    <p><b>Journal Reference:</b> {}</p>\n", encode_text(journal_ref)));
    }
    card.push_str(&format!("    <p><b>Date:</b> {}</p>\n", date));
    card.push_str(&format!("    <p>{}</p>\n", encode_text(&record.summary)));
    card.push_str("</div>");
    card
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record() -> PaperRecord {
        PaperRecord {
            title: "Attention Is All You Need".to_string(),
            authors: vec!["Ashish Vaswani".to_string(), "Noam Shazeer".to_string()],
            summary: "Transformers & <b>attention</b>.".to_string(),
            published: Some(Utc.with_ymd_and_hms(2017, 6, 12, 17, 57, 34).unwrap()),
            abs_url: Some("http://arxiv.org/abs/1706.03762v7".to_string()),
            pdf_url: Some("http://arxiv.org/pdf/1706.03762v7".to_string()),
            journal_ref: Some("NeurIPS 2017".to_string()),
            categories: vec!["cs.CL".to_string(), "cs.LG".to_string()],
        }
    }

    #[test]
    fn test_heading_card() {
        assert_eq!(CardStyle::Heading.render(&record()), "- ###### Attention Is All You Need");
    }

    #[test]
    fn test_html_card_fields() {
        let card = CardStyle::Html.render(&record());
        assert!(card.starts_with("<div"));
        assert!(card.contains("<a href=\"http://arxiv.org/abs/1706.03762v7\" target=\"_blank\">Attention Is All You Need</a>"));
        assert!(card.contains("<a href=\"http://arxiv.org/pdf/1706.03762v7\" target=\"_blank\">[PDF]</a>"));
        assert!(card.contains("<p><b>Authors:</b> Ashish Vaswani, Noam Shazeer</p>"));
        assert!(card.contains("<p><b>Categories:</b> cs.CL, cs.LG</p>"));
        assert!(card.contains("<p><b>Journal Reference:</b> NeurIPS 2017</p>"));
        assert!(card.contains("<p><b>Date:</b> 2017-06-12</p>"));
        assert!(card.contains("Transformers &amp; &lt;b&gt;attention&lt;/b&gt;."));
    }

    #[test]
    fn test_html_card_without_journal_ref() {
        let mut paper = record();
        paper.journal_ref = None;
        assert!(!CardStyle::Html.render(&paper).contains("Journal Reference"));
    }

    #[test]
    fn test_titles_cannot_inject_tags() {
        let mut paper = record();
        paper.title = "<paper>Nested</paper>".to_string();
        for style in [CardStyle::Html, CardStyle::Heading] {
            let card = style.render(&paper);
            assert!(!card.contains("<paper>"));
            assert!(!card.contains("</paper>"));
        }
    }

    #[test]
    fn test_style_names() {
        assert_eq!(CardStyle::from_str("heading"), Some(CardStyle::Heading));
        assert_eq!(CardStyle::from_str(CardStyle::Html.as_str()), Some(CardStyle::Html));
        assert_eq!(CardStyle::from_str("fancy"), None);
    }
}
