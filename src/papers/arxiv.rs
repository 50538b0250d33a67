//! arXiv search provider
//!
//! Atom API at export.arxiv.org, no API key required.
//! Rate limit: at most one request every 3 seconds.

use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Client;
use std::sync::{LazyLock, Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::{PaperRecord, SearchError, SearchProvider, SortCriterion};
use crate::utils::normalize_whitespace;

const ARXIV_API_BASE: &str = "https://export.arxiv.org/api/query";
const USER_AGENT: &str = "papere/0.3 (arXiv literature search)";
const MIN_REQUEST_GAP: Duration = Duration::from_secs(3);

static NEW_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4}\.\d{4,5})(?:v\d+)?").expect("static arXiv id pattern")
});
static OLD_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([a-z\-]+(?:\.[A-Z]{2})?/\d{7})").expect("static arXiv id pattern")
});

/// Extract the arXiv ID from an abstract/PDF URL or a bare identifier
///
/// - `http://arxiv.org/abs/2301.12345v2` → `2301.12345`
/// - `arXiv:hep-th/9901001` → `hep-th/9901001`
pub fn extract_arxiv_id(identifier: &str) -> Option<String> {
    NEW_ID
        .captures(identifier)
        .or_else(|| OLD_ID.captures(identifier))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub struct ArxivClient {
    client: Client,
    last_request: Mutex<Option<Instant>>,
}

impl ArxivClient {
    pub fn new() -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;
        Ok(Self {
            client,
            last_request: Mutex::new(None),
        })
    }

    /// Keep at least `MIN_REQUEST_GAP` between two API calls
    async fn rate_limit(&self) {
        let wait = {
            let last = self.last_request.lock().unwrap_or_else(PoisonError::into_inner);
            last.and_then(|instant| MIN_REQUEST_GAP.checked_sub(instant.elapsed()))
        }; // guard dropped before the await

        if let Some(wait) = wait {
            tokio::time::sleep(wait).await;
        }

        *self.last_request.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }
}

impl SearchProvider for ArxivClient {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        sort: SortCriterion,
    ) -> Result<Vec<PaperRecord>, SearchError> {
        self.rate_limit().await;
        let url = build_search_url(query, max_results, sort);
        tracing::debug!(url = %url, "arXiv search");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SearchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SearchError::Transport(format!("Failed to read arXiv response: {}", e)))?;

        let records = parse_atom_feed(&body)?;
        tracing::debug!(query, count = records.len(), "arXiv results");
        Ok(records)
    }
}

fn sort_by_param(sort: SortCriterion) -> &'static str {
    match sort {
        SortCriterion::Relevance => "relevance",
        SortCriterion::LastUpdatedDate => "lastUpdatedDate",
        SortCriterion::SubmittedDate => "submittedDate",
    }
}

/// Query strings are passed through as-is (`ti:`, `au:`, `AND`, ... are arXiv syntax)
pub fn build_search_url(query: &str, max_results: usize, sort: SortCriterion) -> String {
    format!(
        "{}?search_query={}&start=0&max_results={}&sortBy={}&sortOrder=descending",
        ARXIV_API_BASE,
        urlencoding::encode(query.trim()),
        max_results,
        sort_by_param(sort),
    )
}

/// Parse an Atom feed into records, in feed order.
///
/// The API reports query syntax errors as a feed with a single entry titled "Error".
pub fn parse_atom_feed(xml: &str) -> Result<Vec<PaperRecord>, SearchError> {
    if !xml.contains("<feed") {
        return Err(SearchError::Parse("response is not an Atom feed".to_string()));
    }

    let mut records = Vec::new();
    for entry in blocks(xml, "entry") {
        let Some(record) = parse_entry(entry) else {
            continue;
        };
        if record.title == "Error" && entry.contains("/api/errors") {
            return Err(SearchError::Parse(record.summary));
        }
        records.push(record);
    }
    Ok(records)
}

fn parse_entry(entry: &str) -> Option<PaperRecord> {
    let title = normalize_whitespace(&tag_text(entry, "title")?);
    if title.is_empty() {
        return None;
    }

    let id_url = tag_text(entry, "id").unwrap_or_default();
    let authors = blocks(entry, "author")
        .filter_map(|author| tag_text(author, "name"))
        .map(|name| normalize_whitespace(&name))
        .collect();
    let summary = normalize_whitespace(&tag_text(entry, "summary").unwrap_or_default());
    let published = tag_text(entry, "published")
        .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
        .map(|d| d.with_timezone(&Utc));

    let mut abs_url = None;
    let mut pdf_url = None;
    for link in opening_tags(entry, "link") {
        let href = attribute(link, "href");
        let is_pdf = attribute(link, "title").as_deref() == Some("pdf")
            || attribute(link, "type").as_deref() == Some("application/pdf");
        if is_pdf {
            pdf_url = href;
        } else if attribute(link, "rel").as_deref() == Some("alternate") {
            abs_url = href;
        }
    }
    if abs_url.is_none() && !id_url.is_empty() {
        abs_url = Some(id_url.clone());
    }
    if pdf_url.is_none() {
        pdf_url = extract_arxiv_id(&id_url).map(|id| format!("https://arxiv.org/pdf/{}", id));
    }

    let journal_ref = tag_text(entry, "arxiv:journal_ref")
        .map(|j| normalize_whitespace(&j))
        .filter(|j| !j.is_empty());
    let categories = opening_tags(entry, "category")
        .filter_map(|tag| attribute(tag, "term"))
        .collect();

    Some(PaperRecord {
        title,
        authors,
        summary,
        published,
        abs_url,
        pdf_url,
        journal_ref,
        categories,
    })
}

fn decode(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}

/// Every `<tag ...>...</tag>` block, in order
fn blocks<'a>(xml: &'a str, tag: &str) -> impl Iterator<Item = &'a str> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let mut search_from = 0;
    std::iter::from_fn(move || loop {
        let start = search_from + xml[search_from..].find(&open)?;
        let after_name = start + open.len();
        // `<entry` must not match `<entryfoo`
        if !xml[after_name..].starts_with(['>', ' ', '\n', '\t', '\r']) {
            search_from = after_name;
            continue;
        }
        let end = after_name + xml[after_name..].find(&close)? + close.len();
        search_from = end;
        return Some(&xml[start..end]);
    })
}

/// Every opening (or self-closing) `<tag .../>`
fn opening_tags<'a>(xml: &'a str, tag: &str) -> impl Iterator<Item = &'a str> {
    let open = format!("<{}", tag);
    let mut search_from = 0;
    std::iter::from_fn(move || loop {
        let start = search_from + xml[search_from..].find(&open)?;
        let after_name = start + open.len();
        let end = after_name + xml[after_name..].find('>')? + 1;
        search_from = end;
        if xml[after_name..].starts_with([' ', '/', '>', '\n', '\t']) {
            return Some(&xml[start..end]);
        }
    })
}

/// Decoded text content of the first `<tag>text</tag>`, attributes allowed
fn tag_text(xml: &str, tag: &str) -> Option<String> {
    let block = blocks(xml, tag).next()?;
    let content_start = block.find('>')? + 1;
    let content_end = block.len() - format!("</{}>", tag).len();
    if content_start > content_end {
        return None;
    }
    Some(text_content(block[content_start..content_end].trim()))
}

/// Entity-decode character data; `<![CDATA[...]]>` sections are taken verbatim
fn text_content(raw: &str) -> String {
    const CDATA_OPEN: &str = "<![CDATA[";
    const CDATA_CLOSE: &str = "]]>";

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find(CDATA_OPEN) {
        out.push_str(&decode(&rest[..start]));
        let body = &rest[start + CDATA_OPEN.len()..];
        match body.find(CDATA_CLOSE) {
            Some(end) => {
                out.push_str(&body[..end]);
                rest = &body[end + CDATA_CLOSE.len()..];
            }
            None => {
                out.push_str(body);
                rest = "";
            }
        }
    }
    out.push_str(&decode(rest));
    out
}

/// Value of `name="..."` or `name='...'` inside an opening tag
fn attribute(tag: &str, name: &str) -> Option<String> {
    let needle = format!("{}=", name);
    let mut search_from = 0;
    while let Some(found) = tag[search_from..].find(&needle) {
        let at = search_from + found;
        search_from = at + needle.len();
        // `title=` must not match inside `subtitle=`
        if !tag[..at].ends_with(char::is_whitespace) {
            continue;
        }
        let value = &tag[search_from..];
        let quote = value.chars().next().filter(|c| *c == '"' || *c == '\'')?;
        let end = value[1..].find(quote)?;
        return Some(decode(&value[1..1 + end]));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title type="html">ArXiv Query: search_query=ti:attention</title>
  <id>http://arxiv.org/api/abc</id>
  <entry>
    <id>http://arxiv.org/abs/1706.03762v7</id>
    <updated>2023-08-02T00:41:18Z</updated>
    <published>2017-06-12T17:57:34Z</published>
    <title>Attention Is All
      You Need</title>
    <summary>  The dominant sequence transduction models are based on complex
recurrent &amp; convolutional neural networks.  </summary>
    <author><name>Ashish Vaswani</name></author>
    <author><name>Noam Shazeer</name></author>
    <arxiv:journal_ref xmlns:arxiv="http://arxiv.org/schemas/atom">NeurIPS 2017</arxiv:journal_ref>
    <link href="http://arxiv.org/abs/1706.03762v7" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/1706.03762v7" rel="related" type="application/pdf"/>
    <arxiv:primary_category xmlns:arxiv="http://arxiv.org/schemas/atom" term="cs.CL" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.CL" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.LG" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/hep-th/9901001v1</id>
    <published>1999-01-01T00:00:00Z</published>
    <title>Old Style Identifier</title>
    <summary>Short.</summary>
    <author><name>A. Physicist</name></author>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_feed_fields() {
        let records = parse_atom_feed(FEED).unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.title, "Attention Is All You Need");
        assert_eq!(first.authors, vec!["Ashish Vaswani", "Noam Shazeer"]);
        assert_eq!(
            first.summary,
            "The dominant sequence transduction models are based on complex recurrent & convolutional neural networks."
        );
        assert_eq!(first.journal_ref.as_deref(), Some("NeurIPS 2017"));
        assert_eq!(first.abs_url.as_deref(), Some("http://arxiv.org/abs/1706.03762v7"));
        assert_eq!(first.pdf_url.as_deref(), Some("http://arxiv.org/pdf/1706.03762v7"));
        assert_eq!(first.categories, vec!["cs.CL", "cs.LG"]);
        assert_eq!(first.published.unwrap().to_rfc3339(), "2017-06-12T17:57:34+00:00");
    }

    #[test]
    fn test_missing_links_fall_back_to_id() {
        let records = parse_atom_feed(FEED).unwrap();
        let old = &records[1];
        assert_eq!(old.abs_url.as_deref(), Some("http://arxiv.org/abs/hep-th/9901001v1"));
        assert_eq!(old.pdf_url.as_deref(), Some("https://arxiv.org/pdf/hep-th/9901001"));
        assert_eq!(old.journal_ref, None);
        assert!(old.categories.is_empty());
    }

    #[test]
    fn test_cdata_and_single_quoted_attributes() {
        let feed = r#"<feed xmlns='http://www.w3.org/2005/Atom'>
  <entry>
    <id>http://arxiv.org/abs/2401.00001v1</id>
    <title><![CDATA[Bounds for <em>sparse</em> & dense graphs]]></title>
    <summary>Uses &lt;k&gt; colors <![CDATA[&amp; stays literal]]></summary>
    <link rel='alternate' href='http://arxiv.org/abs/2401.00001v1' type='text/html'/>
    <link title='pdf' href='http://arxiv.org/pdf/2401.00001v1' rel='related'/>
    <category term='math.CO'/>
  </entry>
</feed>"#;
        let records = parse_atom_feed(feed).unwrap();
        assert_eq!(records.len(), 1);
        let paper = &records[0];
        assert_eq!(paper.title, "Bounds for <em>sparse</em> & dense graphs");
        assert_eq!(paper.summary, "Uses <k> colors &amp; stays literal");
        assert_eq!(paper.abs_url.as_deref(), Some("http://arxiv.org/abs/2401.00001v1"));
        assert_eq!(paper.pdf_url.as_deref(), Some("http://arxiv.org/pdf/2401.00001v1"));
        assert_eq!(paper.categories, vec!["math.CO"]);
    }

    #[test]
    fn test_attribute_needs_whole_name() {
        let tag = r#"<link subtitle="no" title="pdf" href="x"/>"#;
        assert_eq!(attribute(tag, "title").as_deref(), Some("pdf"));
        assert_eq!(attribute(tag, "rel"), None);
    }

    #[test]
    fn test_empty_feed() {
        let feed = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>ArXiv Query</title></feed>"#;
        assert!(parse_atom_feed(feed).unwrap().is_empty());
    }

    #[test]
    fn test_error_entry_is_reported() {
        let feed = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/api/errors#incorrect_id_format_for_1234</id>
    <title>Error</title>
    <summary>incorrect id format for 1234</summary>
  </entry>
</feed>"#;
        match parse_atom_feed(feed) {
            Err(SearchError::Parse(msg)) => assert_eq!(msg, "incorrect id format for 1234"),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_not_a_feed() {
        assert!(matches!(parse_atom_feed("<html>oops</html>"), Err(SearchError::Parse(_))));
    }

    #[test]
    fn test_build_search_url() {
        let url = build_search_url("ti:(reasoning AND llm)", 100, SortCriterion::Relevance);
        assert_eq!(
            url,
            "https://export.arxiv.org/api/query?search_query=ti%3A%28reasoning%20AND%20llm%29&start=0&max_results=100&sortBy=relevance&sortOrder=descending"
        );
        let url = build_search_url("au:hinton", 5, SortCriterion::SubmittedDate);
        assert!(url.contains("sortBy=submittedDate"));
    }

    #[test]
    fn test_extract_arxiv_id() {
        assert_eq!(extract_arxiv_id("http://arxiv.org/abs/2301.12345v2").as_deref(), Some("2301.12345"));
        assert_eq!(extract_arxiv_id("arXiv:hep-th/9901001").as_deref(), Some("hep-th/9901001"));
        assert_eq!(extract_arxiv_id("not an id"), None);
    }
}
