//! Text unwrapping and content-processing helpers for the normalizer.
//!
//! Real-world feeds represent the "same" text three ways: a plain element,
//! a CDATA section, or an attribute-carrying wrapper element (the `#text`
//! shape, e.g. `<title type="html">…</title>`). Every field extraction in
//! the item normalizer goes through [`TextValue`] so the unwrapping rules
//! live in exactly one place.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use super::xml::XmlNode;

/// Maximum length of a derived content snippet, in characters.
pub const SNIPPET_MAX_CHARS: usize = 200;

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag regex is valid"));
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex is valid"));
static IMG_SRC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(<img[^>]+src=["'])([^"']+)(["'])"#).expect("img src regex is valid")
});
static FIRST_IMG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<img[^>]+src=["']([^"']+)["']"#).expect("first img regex is valid")
});

/// The shapes element text arrives in, made explicit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextValue {
    /// Ordinary element text.
    Plain(String),
    /// Text that arrived inside a CDATA section.
    CData(String),
    /// Text on an element that also carries attributes (the `#text`
    /// wrapper shape, common for Atom `type="html"` fields).
    TextWrapped(String),
    /// Element absent, or present with no text at all.
    Missing,
}

impl TextValue {
    /// Classifies an optional tree node into its text shape.
    pub fn from_node(node: Option<&XmlNode>) -> Self {
        let Some(node) = node else {
            return TextValue::Missing;
        };
        let Some(text) = node.text() else {
            return TextValue::Missing;
        };
        if node.cdata {
            TextValue::CData(text.to_string())
        } else if node.attrs.is_empty() {
            TextValue::Plain(text.to_string())
        } else {
            TextValue::TextWrapped(text.to_string())
        }
    }

    /// Unwraps to the inner string; `Missing` becomes the empty string.
    pub fn into_string(self) -> String {
        match self {
            TextValue::Plain(s) | TextValue::CData(s) | TextValue::TextWrapped(s) => s,
            TextValue::Missing => String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            TextValue::Missing => true,
            TextValue::Plain(s) | TextValue::CData(s) | TextValue::TextWrapped(s) => s.is_empty(),
        }
    }
}

/// Strips HTML tags and collapses whitespace.
///
/// Tags are removed wholesale, `&nbsp;` entities and whitespace runs
/// collapse to single spaces, and the result is trimmed.
pub fn strip_html(html: &str) -> String {
    let without_tags = TAG_RE.replace_all(html, "");
    let spaced = without_tags.replace("&nbsp;", " ");
    WHITESPACE_RE.replace_all(&spaced, " ").trim().to_string()
}

/// Derives a plain-text snippet (≤ [`SNIPPET_MAX_CHARS`] characters) from
/// item content. Deterministic and replayable from the content alone.
pub fn snippet(html: &str) -> String {
    let stripped = strip_html(html);
    match stripped.char_indices().nth(SNIPPET_MAX_CHARS) {
        Some((idx, _)) => stripped[..idx].to_string(),
        None => stripped,
    }
}

/// Resolves a possibly-relative URL against a base.
///
/// Absolute http(s) URLs pass through unchanged. Anything else is joined
/// against `base`; if either side is malformed, `None` is returned and the
/// caller keeps the original value.
pub fn resolve_url(base: &str, candidate: &str) -> Option<String> {
    if candidate.starts_with("http://") || candidate.starts_with("https://") {
        return Some(candidate.to_string());
    }
    Url::parse(base)
        .ok()?
        .join(candidate)
        .ok()
        .map(|u| u.to_string())
}

/// Rewrites every `<img src>` in `content` that is not already an absolute
/// http(s) URL to an absolute URL resolved against `base`. Srcs that fail
/// resolution are left untouched.
pub fn rewrite_img_srcs(content: &str, base: &str) -> String {
    IMG_SRC_RE
        .replace_all(content, |caps: &regex::Captures<'_>| {
            let src = &caps[2];
            let resolved = resolve_url(base, src).unwrap_or_else(|| src.to_string());
            format!("{}{}{}", &caps[1], resolved, &caps[3])
        })
        .into_owned()
}

/// First `<img src>` value found in `content`, if any.
pub fn first_img_src(content: &str) -> Option<&str> {
    FIRST_IMG_RE
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Best-effort timestamp for sorting.
///
/// Feeds supply dates as RFC-822, ISO-8601, or garbage; the raw string is
/// stored as-is and this helper only orders items. Unparseable or empty
/// strings sort as epoch 0 ("oldest").
pub fn pub_date_timestamp(raw: &str) -> i64 {
    if raw.is_empty() {
        return 0;
    }
    chrono::DateTime::parse_from_rfc2822(raw)
        .or_else(|_| chrono::DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.timestamp())
        .unwrap_or(0)
}
