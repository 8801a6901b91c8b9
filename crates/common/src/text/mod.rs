//! Plain-text helpers shared by the producer and the consumer

use regex_lite::Regex;
use std::sync::OnceLock;

/// Characters of `title + " " + summary` sent to the classifier
pub const SNIPPET_CHARS: usize = 512;

fn script_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("valid script regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"))
}

fn ws_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace regex"))
}

/// Upper bound on nested entity escaping we unwrap
const MAX_DECODE_PASSES: usize = 4;

/// Decode entities until nothing changes, so `&amp;lt;` ends up as `<`
fn decode_entities(text: &str) -> String {
    let mut current = text.to_string();
    for _ in 0..MAX_DECODE_PASSES {
        let decoded = html_escape::decode_html_entities(&current);
        if decoded == current {
            break;
        }
        current = decoded.into_owned();
    }
    current
}

/// Decode entities, remove tags and collapse whitespace.
///
/// Tags are replaced by a space so adjacent blocks do not run together.
/// Decoding happens first, so escaped markup is stripped as well and a
/// second pass over the output changes nothing.
pub fn strip_markup(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }

    let decoded = decode_entities(html).replace('\u{a0}', " ");
    let without_scripts = script_re().replace_all(&decoded, " ");
    let without_tags = tag_re().replace_all(&without_scripts, " ");
    ws_re().replace_all(&without_tags, " ").trim().to_string()
}

/// Join title and summary the way both loops build their model input
pub fn join_title_summary(title: &str, summary: &str) -> String {
    format!("{} {}", title, summary).trim().to_string()
}

/// First `SNIPPET_CHARS` characters, cut on a char boundary
pub fn snippet(text: &str) -> &str {
    match text.char_indices().nth(SNIPPET_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_markup_basic() {
        assert_eq!(strip_markup("<p>violence erupted</p>"), "violence erupted");
        assert_eq!(
            strip_markup("<div>Police&nbsp;said <b>3</b>\n\n were &amp; hurt</div>"),
            "Police said 3 were & hurt"
        );
    }

    #[test]
    fn test_strip_markup_drops_scripts() {
        assert_eq!(
            strip_markup("before<script>var x = '<p>';</script>after"),
            "before after"
        );
    }

    #[test]
    fn test_strip_markup_is_idempotent() {
        let once = strip_markup("<p>Shots fired &amp; two hurt</p>");
        assert_eq!(strip_markup(&once), once);
        assert_eq!(strip_markup(""), "");
    }

    #[test]
    fn test_strip_markup_unwraps_escaped_markup() {
        let once = strip_markup("Curfew &amp;lt;b&amp;gt;extended&amp;lt;/b&amp;gt; in Jos");
        assert_eq!(once, "Curfew extended in Jos");
        assert_eq!(strip_markup(&once), once);

        let escaped = strip_markup("&lt;p&gt;Police fired tear gas&lt;/p&gt;");
        assert_eq!(escaped, "Police fired tear gas");
    }

    #[test]
    fn test_snippet_char_boundary() {
        let text = "é".repeat(600);
        assert_eq!(snippet(&text).chars().count(), SNIPPET_CHARS);
        assert_eq!(snippet("short"), "short");
    }

    #[test]
    fn test_join_title_summary() {
        assert_eq!(join_title_summary("Title", "body"), "Title body");
        assert_eq!(join_title_summary("Title", ""), "Title");
    }
}
