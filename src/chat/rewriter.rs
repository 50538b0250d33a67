//! In-place rewriting of paper reference tags in a streamed answer
//!
//! The model cites papers as `<paper>TITLE</paper>` on their own line. As chunks
//! arrive, every complete tag is swapped for a rendered card (or the not-found
//! marker). Scanning resumes from the first byte that could still start an
//! unfinished tag, so each pass only looks at new text.
//!
//! A tag must open and close on the same line. An opening tag followed by a newline
//! before its close is left as plain text.

use crate::papers::{PaperRecord, ResultMap};
use crate::utils::floor_char_boundary;

use super::cards::{CardStyle, NOT_FOUND_MARKER};
use super::resolver::{resolve, DEFAULT_TOLERANCE};

/// Reference tag flavour the model is told to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferenceTag {
    #[default]
    Paper,
    PaperCard,
}

impl ReferenceTag {
    pub fn name(&self) -> &'static str {
        match self {
            ReferenceTag::Paper => "paper",
            ReferenceTag::PaperCard => "paper-card",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "paper" => Some(ReferenceTag::Paper),
            "paper-card" => Some(ReferenceTag::PaperCard),
            _ => None,
        }
    }

    pub fn open(&self) -> &'static str {
        match self {
            ReferenceTag::Paper => "<paper>",
            ReferenceTag::PaperCard => "<paper-card>",
        }
    }

    pub fn close(&self) -> &'static str {
        match self {
            ReferenceTag::Paper => "</paper>",
            ReferenceTag::PaperCard => "</paper-card>",
        }
    }

    /// `<paper>TITLE</paper>`
    pub fn wrap(&self, title: &str) -> String {
        format!("{}{}{}", self.open(), title, self.close())
    }
}

/// Final text of a rewritten stream plus every paper it cites
#[derive(Debug, Clone)]
pub struct RewriteOutput {
    pub text: String,
    pub cited: Vec<PaperRecord>,
}

pub struct StreamingTagRewriter<'a> {
    results: &'a ResultMap,
    tag: ReferenceTag,
    style: CardStyle,
    tolerance: usize,
    rescan_every: usize,
    buffer: String,
    /// Everything before this offset is final
    scan_from: usize,
    chunks: usize,
    cited: Vec<PaperRecord>,
}

impl<'a> StreamingTagRewriter<'a> {
    pub fn new(results: &'a ResultMap, tag: ReferenceTag, style: CardStyle) -> Self {
        Self {
            results,
            tag,
            style,
            tolerance: DEFAULT_TOLERANCE,
            rescan_every: 1,
            buffer: String::new(),
            scan_from: 0,
            chunks: 0,
            cited: Vec::new(),
        }
    }

    pub fn with_tolerance(mut self, tolerance: usize) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Rewrite after every `n` chunks (0 is treated as 1)
    pub fn with_rescan_every(mut self, n: usize) -> Self {
        self.rescan_every = n.max(1);
        self
    }

    /// Append a chunk; returns true when a rewrite pass ran
    pub fn push(&mut self, chunk: &str) -> bool {
        self.buffer.push_str(chunk);
        self.chunks += 1;
        if self.chunks % self.rescan_every == 0 {
            self.rewrite();
            true
        } else {
            false
        }
    }

    /// Current text, as it should be displayed
    pub fn text(&self) -> &str {
        &self.buffer
    }

    pub fn cited(&self) -> &[PaperRecord] {
        &self.cited
    }

    /// Final pass over whatever is left unscanned
    pub fn finish(mut self) -> RewriteOutput {
        self.rewrite();
        RewriteOutput {
            text: self.buffer,
            cited: self.cited,
        }
    }

    /// Replace every complete tag after `scan_from`
    pub fn rewrite(&mut self) {
        let open = self.tag.open();
        let close = self.tag.close();

        loop {
            let Some(found) = self.buffer[self.scan_from..].find(open) else {
                // Keep room for an opening tag split across chunks
                let keep = self.buffer.len().saturating_sub(open.len() - 1);
                self.scan_from = self.scan_from.max(floor_char_boundary(&self.buffer, keep));
                return;
            };

            let open_start = self.scan_from + found;
            let content_start = open_start + open.len();
            let rest = &self.buffer[content_start..];
            let close_at = rest.find(close);
            let newline_at = rest.find('\n');

            match (close_at, newline_at) {
                (_, Some(n)) if close_at.map_or(true, |c| n < c) => {
                    // This tag can no longer close on its line
                    self.scan_from = content_start + n + 1;
                }
                (Some(c), _) => {
                    let content = &rest[..c];
                    // `<paper>x <paper>Title</paper>`: the innermost opening tag wins
                    let (span_start, reference) = match content.rfind(open) {
                        Some(inner) => (content_start + inner, content[inner + open.len()..].to_string()),
                        None => (open_start, content.to_string()),
                    };
                    let span_end = content_start + c + close.len();

                    let replacement = self.render(&reference);
                    self.buffer.replace_range(span_start..span_end, &replacement);
                    self.scan_from = span_start + replacement.len();
                }
                (None, _) => {
                    self.scan_from = open_start;
                    return;
                }
            }
        }
    }

    fn render(&mut self, reference: &str) -> String {
        match resolve(self.results, reference, self.tolerance) {
            Some(record) => {
                if !self.cited.iter().any(|c| c.title == record.title) {
                    self.cited.push(record.clone());
                }
                self.style.render(record)
            }
            None => {
                tracing::debug!(reference, "Cited paper not in results");
                NOT_FOUND_MARKER.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results(titles: &[&str]) -> ResultMap {
        let mut map = ResultMap::new();
        for title in titles {
            map.insert(PaperRecord::titled(*title));
        }
        map
    }

    fn rewriter(map: &ResultMap) -> StreamingTagRewriter<'_> {
        StreamingTagRewriter::new(map, ReferenceTag::Paper, CardStyle::Heading)
    }

    #[test]
    fn test_tag_split_across_chunks() {
        let map = results(&["Title A"]);
        let mut rw = rewriter(&map);

        rw.push("Intro <paper");
        assert_eq!(rw.text(), "Intro <paper");
        assert!(rw.cited().is_empty());

        rw.push(">Title A</paper> more");
        assert_eq!(rw.text(), "Intro - ###### Title A more");

        let out = rw.finish();
        assert_eq!(out.text, "Intro - ###### Title A more");
        assert_eq!(out.cited.len(), 1);
    }

    #[test]
    fn test_unknown_title_becomes_not_found_marker() {
        let map = results(&["Title A"]);
        let mut rw = rewriter(&map);
        rw.push("See <paper>Completely Different Title</paper>.");
        let out = rw.finish();
        assert_eq!(out.text, "See \n[NOT FOUND]\n.");
        assert!(out.cited.is_empty());
    }

    #[test]
    fn test_unclosed_tag_waits_for_more_text() {
        let map = results(&["Title A"]);
        let mut rw = rewriter(&map);
        rw.push("<paper>Title");
        rw.push(" A</pa");
        assert_eq!(rw.text(), "<paper>Title A</pa");
        rw.push("per>");
        assert_eq!(rw.text(), "- ###### Title A");
    }

    #[test]
    fn test_unclosed_tag_is_left_at_stream_end() {
        let map = results(&["Title A"]);
        let mut rw = rewriter(&map);
        rw.push("Done <paper>Title A");
        assert_eq!(rw.finish().text, "Done <paper>Title A");
    }

    #[test]
    fn test_rewriting_is_idempotent() {
        let map = results(&["Title A", "Title B"]);
        for style in [CardStyle::Heading, CardStyle::Html] {
            let mut rw = StreamingTagRewriter::new(&map, ReferenceTag::Paper, style);
            rw.push("<paper>Title A</paper>\n<paper>Title B</paper>\n");
            let first = rw.finish().text;

            let mut again = StreamingTagRewriter::new(&map, ReferenceTag::Paper, style);
            again.push(&first);
            assert_eq!(again.finish().text, first);
        }
    }

    #[test]
    fn test_cadence_defers_rewrites() {
        let map = results(&["Title A"]);
        let mut rw = rewriter(&map).with_rescan_every(3);
        assert!(!rw.push("<paper>Title A</paper>"));
        assert_eq!(rw.text(), "<paper>Title A</paper>");
        assert!(!rw.push("\n"));
        assert!(rw.push("end"));
        assert_eq!(rw.text(), "- ###### Title A\nend");
    }

    #[test]
    fn test_newline_inside_tag_leaves_it_alone() {
        let map = results(&["Title A"]);
        let mut rw = rewriter(&map);
        rw.push("<paper>Title\nA</paper> then <paper>Title A</paper>");
        assert_eq!(rw.finish().text, "<paper>Title\nA</paper> then - ###### Title A");
    }

    #[test]
    fn test_close_versus_newline_ordering() {
        let map = results(&["Title A"]);

        // closes with no newline anywhere after
        let mut rw = rewriter(&map);
        rw.push("x <paper>Title A</paper>");
        assert_eq!(rw.text(), "x - ###### Title A");

        // closes before a later newline
        let mut rw = rewriter(&map);
        rw.push("<paper>Title A</paper> ok\nnext");
        assert_eq!(rw.text(), "- ###### Title A ok\nnext");

        // newline comes first, and no close at all
        let mut rw = rewriter(&map);
        rw.push("<paper>Title A\n<paper>Title A");
        assert_eq!(rw.finish().text, "<paper>Title A\n<paper>Title A");
    }

    #[test]
    fn test_innermost_open_tag_wins() {
        let map = results(&["Title A"]);
        let mut rw = rewriter(&map);
        rw.push("<paper>oops <paper>Title A</paper>");
        assert_eq!(rw.finish().text, "<paper>oops - ###### Title A");
    }

    #[test]
    fn test_fuzzy_match_and_dedup_of_cited() {
        let map = results(&["Attention Is All You Need"]);
        let mut rw = rewriter(&map);
        rw.push("<paper>Attention is all you need</paper>\n<paper> Attention Is All You Need </paper>\n");
        let out = rw.finish();
        assert_eq!(out.text, "- ###### Attention Is All You Need\n- ###### Attention Is All You Need\n");
        assert_eq!(out.cited.len(), 1);
    }

    #[test]
    fn test_paper_card_flavour() {
        let map = results(&["Title A"]);
        let mut rw = StreamingTagRewriter::new(&map, ReferenceTag::PaperCard, CardStyle::Heading);
        rw.push("<paper>Title A</paper> <paper-card>Title A</paper-card>");
        assert_eq!(rw.finish().text, "<paper>Title A</paper> - ###### Title A");
    }

    #[test]
    fn test_multibyte_text_around_partial_tag() {
        let map = results(&["Über Lernen"]);
        let mut rw = rewriter(&map);
        rw.push("Schöne Grüße <pap");
        rw.push("er>Über Lernen</paper> ✓");
        assert_eq!(rw.finish().text, "Schöne Grüße - ###### Über Lernen ✓");
    }

    #[test]
    fn test_tag_names() {
        assert_eq!(ReferenceTag::from_name("paper-card"), Some(ReferenceTag::PaperCard));
        assert_eq!(ReferenceTag::Paper.wrap("T"), "<paper>T</paper>");
        assert_eq!(ReferenceTag::from_name("card"), None);
    }
}
