use std::sync::LazyLock;

use regex::Regex;

/// Title every conversation starts with. A conversation still carrying it is
/// eligible for automatic titling.
pub const DEFAULT_TITLE: &str = "New Conversation";

const MAX_TITLE_CHARS: usize = 50;

/// A word break is only used when it keeps more than this many characters.
const MIN_WORD_BREAK: usize = 20;

static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s\-.,!?]").expect("DISALLOWED pattern is valid"));

/// Derive a conversation title from the first user message.
///
/// Falls back to [`DEFAULT_TITLE`] when nothing printable survives cleaning.
pub fn derive_title(text: &str) -> String {
    let stripped = DISALLOWED.replace_all(text.trim(), "");
    let cleaned = stripped.trim();

    if cleaned.is_empty() {
        return DEFAULT_TITLE.to_string();
    }

    if cleaned.chars().count() <= MAX_TITLE_CHARS {
        return cleaned.to_string();
    }

    let head: String = cleaned.chars().take(MAX_TITLE_CHARS).collect();
    let cut = match head.rfind(' ') {
        Some(byte_idx) if head[..byte_idx].chars().count() > MIN_WORD_BREAK => &head[..byte_idx],
        _ => head.as_str(),
    };

    format!("{}...", cut.trim_end())
}

pub fn is_default_title(title: &str) -> bool {
    title == DEFAULT_TITLE
}
