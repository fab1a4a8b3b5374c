use once_cell::sync::Lazy;
use regex::Regex;

static PYTHON_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```python\b\s*(.*?)\s*```").expect("python block regex"));
static ANY_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(.*?)```").expect("fenced block regex"));
static INFO_STRING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_+.#-]+[ \t]*\n").expect("info string regex"));

fn non_empty(code: &str) -> Option<String> {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Pulls the code to execute out of a model reply.
///
/// The first ```` ```python ```` block wins; otherwise the first fenced block of any
/// language, with its info string removed. A block holding only whitespace counts
/// as no code.
pub fn extract_code(reply: &str) -> Option<String> {
    if let Some(captures) = PYTHON_BLOCK_RE.captures(reply) {
        if let Some(code) = captures.get(1).and_then(|m| non_empty(m.as_str())) {
            return Some(code);
        }
    }

    let captures = ANY_BLOCK_RE.captures(reply)?;
    let inner = captures.get(1)?.as_str();
    let body = match INFO_STRING_RE.find(inner) {
        Some(tag) => &inner[tag.end()..],
        None => inner,
    };
    non_empty(body)
}
