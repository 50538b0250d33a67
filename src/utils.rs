/// Shared utility functions

/// Largest char boundary at or below `index`
pub fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() { return s.len(); }
    let mut end = index;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

/// Keep at most `max_chars` characters (not bytes) of `s`
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Collapse runs of whitespace into single spaces
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Turn a paper title into a filesystem-safe file stem.
///
/// Drops every character that is not a letter, digit, whitespace, `.` or `-`.
pub fn slugify_filename(title: &str) -> String {
    title
        .trim()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '.' || *c == '-')
        .collect::<String>()
        .trim()
        .to_string()
}
