//! Splitting text into the fragments a reveal appends one tick at a time.
//!
//! Both policies are pure and total: every string and every size yields a
//! finite sequence, and concatenating the fragments gives back the input.
//! Sizes count characters, not bytes.

use regex::Regex;
use std::sync::LazyLock;

// Whitespace runs and the text between them, as alternating tokens.
static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+|\S+").expect("Invalid token regex"));

/// Split `text` into fragments of at most `size` characters without breaking
/// a whitespace-delimited word.
///
/// A word longer than `size` is emitted whole. Whitespace runs are kept as
/// their own tokens, so a fragment may start with the run that overflowed
/// the previous one.
pub fn chunk_by_whitespace(text: &str, size: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if text.chars().count() <= size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    // Tokens are never mixed whitespace/non-whitespace, so a token that
    // seeds a new buffer has no leading whitespace to strip unless it is a
    // pure whitespace run, which is kept as-is.
    for token in TOKEN_PATTERN.find_iter(text).map(|m| m.as_str()) {
        let token_len = token.chars().count();
        if !current.is_empty() && current_len + token_len > size {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push_str(token);
        current_len += token_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Split `text` into fragments made of whole lines, each at most `size`
/// characters unless a single line is longer on its own.
///
/// A line keeps its trailing newline. Used where line structure matters:
/// generated queries and markdown tables.
pub fn chunk_preserving_newlines(text: &str, size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if !current.is_empty() && current_len + line_len > size {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push_str(line);
        current_len += line_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Convert Windows line endings so both policies see one newline style.
pub fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n")
}
