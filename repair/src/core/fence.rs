//! Markdown fence stripping for oracle responses.
//!
//! Models are told not to wrap code in fences but often do anyway. At most
//! one leading fence token (bare or language-tagged, e.g. "```python") and at
//! most one trailing fence token are removed; each is attempted once and
//! independently of the other.

const FENCE: &str = "```";

/// Strip one leading and one trailing fence marker, then trim.
///
/// Text without fences comes back trimmed and otherwise unchanged.
pub fn strip_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    text = strip_leading_fence(text);
    text = strip_trailing_fence(text);
    text.trim()
}

fn strip_leading_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix(FENCE) else {
        return text;
    };
    // A language tag is the rest of the fence line, so it needs a newline after it.
    match rest.split_once('\n') {
        Some((tag, body)) if is_language_tag(tag.trim_end()) => body,
        _ => rest,
    }
}

fn is_language_tag(tag: &str) -> bool {
    !tag.chars().any(|c| c.is_whitespace() || c == '`')
}

fn strip_trailing_fence(text: &str) -> &str {
    text.trim_end().strip_suffix(FENCE).unwrap_or(text)
}
