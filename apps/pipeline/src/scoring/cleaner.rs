//! Text Normalizer — converts raw HTML-ish job description text into clean
//! plain text, preserving newline and bullet structure.
//!
//! Pure and idempotent: normalizing already-normalized text returns it
//! unchanged, and empty input yields empty output.

use std::sync::LazyLock;

use regex::Regex;

static RE_SCRIPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script[^>]*>.*?</script>").expect("constant regex pattern is valid")
});
static RE_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<style[^>]*>.*?</style>").expect("constant regex pattern is valid")
});
static RE_IMG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<img[^>]*>").expect("constant regex pattern is valid"));
static RE_BR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("constant regex pattern is valid"));
static RE_LI_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<li[^>]*>").expect("constant regex pattern is valid"));
static RE_LI_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</li>").expect("constant regex pattern is valid"));
static RE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("constant regex pattern is valid"));
static RE_BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n+").expect("constant regex pattern is valid"));

/// Converts raw HTML into clean plain text with bullet and newline
/// preservation. Rules are applied in a fixed order; see module docs.
pub fn clean_html_to_text(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let text = RE_SCRIPT.replace_all(raw, "");
    let text = RE_STYLE.replace_all(&text, "");
    let text = RE_IMG.replace_all(&text, "");
    let text = RE_BR.replace_all(&text, "\n");
    let text = RE_LI_OPEN.replace_all(&text, "- ");
    let text = RE_LI_CLOSE.replace_all(&text, "\n");
    let text = RE_TAG.replace_all(&text, "");

    let text = unescape_entities(&text);

    // Normalize line terminators, then trim each line
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = text
        .split('\n')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");

    let text = RE_BLANK_RUNS.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Decodes the HTML entities that show up in job feeds: the named basics plus
/// decimal and hex numeric references.
fn unescape_entities(text: &str) -> String {
    static RE_NUMERIC: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"&#(x[0-9a-fA-F]+|[0-9]+);").expect("constant regex pattern is valid")
    });

    let text = RE_NUMERIC.replace_all(text, |caps: &regex::Captures| {
        let body = &caps[1];
        let code = if let Some(hex) = body.strip_prefix('x').or_else(|| body.strip_prefix('X')) {
            u32::from_str_radix(hex, 16).ok()
        } else {
            body.parse::<u32>().ok()
        };
        code.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });

    // &amp; last so it cannot re-introduce entities
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
