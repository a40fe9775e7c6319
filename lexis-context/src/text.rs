//! Text normalisation and sentence segmentation.
//!
//! Knowledge-base records arrive as free text typed by humans, usually in
//! Vietnamese, so everything here is Unicode-aware: `\w` in the retained set
//! covers accented letters and all non-Latin scripts, and lengths are counted
//! in `char`s rather than bytes.
//!
//! ```
//! use lexis_context::text::{normalize_text, split_sentences};
//!
//! let cleaned = normalize_text("  Rắn lục  đuôi đỏ™ có độc!\n\nCẩn thận.  ");
//! assert_eq!(cleaned, "Rắn lục đuôi đỏ có độc! Cẩn thận.");
//!
//! let sentences = split_sentences(&cleaned);
//! assert_eq!(sentences, vec!["Rắn lục đuôi đỏ có độc!", "Cẩn thận."]);
//! ```

use regex::Regex;
use std::sync::LazyLock;

/// Characters outside alphanumerics, whitespace and `.,!?;:-'"()`.
static DISALLOWED_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[^\w\s.,!?;:\-'"()]"#).expect("disallowed-character pattern is valid")
});

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Sentence terminator followed by the whitespace that separates it from the next sentence.
static SENTENCE_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]\s+").expect("sentence boundary pattern is valid"));

/// Cleans raw text before chunking.
///
/// Characters outside the retained set are dropped, every run of whitespace
/// becomes a single space and the result is trimmed. Empty input yields an
/// empty string.
pub fn normalize_text(text: &str) -> String {
    let stripped = DISALLOWED_CHARS.replace_all(text, "");
    WHITESPACE_RUN
        .replace_all(&stripped, " ")
        .trim()
        .to_string()
}

/// Splits text after every `.`, `!` or `?` that is followed by whitespace.
///
/// The terminator stays with its sentence and the separating whitespace is
/// dropped. Empty pieces are never returned.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for boundary in SENTENCE_BOUNDARY.find_iter(text) {
        // Terminators are ASCII, so the sentence ends one byte into the match.
        let end = boundary.start() + 1;
        if end > start {
            sentences.push(&text[start..end]);
        }
        start = boundary.end();
    }

    if start < text.len() {
        sentences.push(&text[start..]);
    }

    sentences.retain(|s| !s.trim().is_empty());
    sentences
}

/// Length of `text` in Unicode scalar values.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// The last `n` characters of `text`, or all of it when it is shorter.
pub fn tail_chars(text: &str, n: usize) -> &str {
    let total = char_len(text);
    if n >= total {
        return text;
    }
    let skip = total - n;
    match text.char_indices().nth(skip) {
        Some((byte_idx, _)) => &text[byte_idx..],
        None => "",
    }
}

/// Splits `text` into consecutive pieces of at most `max_chars` characters.
pub fn split_chars(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 {
        return Vec::new();
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|piece| piece.iter().collect())
        .collect()
}
