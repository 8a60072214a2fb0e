//! Post-processing of untrusted generator output.
//!
//! Generators wrap their answers in code fences, quotes, or chatter. These
//! helpers peel that off, check that outline output actually has markup
//! structure, and derive the Markdown form from the HTML form.

use regex::Regex;
use std::sync::OnceLock;

/// Marker embedded in every failure placeholder.
pub const FAILURE_MARKER: &str = "generation failed";

/// Remove code fences and one pair of surrounding quotes.
pub fn strip_wrapping(raw: &str) -> String {
    let mut text = raw.trim();

    // A leading fenced block: keep only what is inside it.
    let owned;
    if text.starts_with("```") {
        let body = match text.find('\n') {
            Some(idx) => &text[idx + 1..],
            None => "",
        };
        let body = match body.find("```") {
            Some(end) => &body[..end],
            None => body,
        };
        owned = body.trim().to_string();
        text = &owned;
    }

    let mut cleaned: String = text
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n");
    cleaned = cleaned.trim().to_string();

    for quote in ['"', '\''] {
        if cleaned.len() >= 2 && cleaned.starts_with(quote) && cleaned.ends_with(quote) {
            cleaned = cleaned[1..cleaned.len() - 1].trim().to_string();
        }
    }

    cleaned
}

/// Accept outline markup if it has a heading or paragraph tag.
///
/// Returns the text with control characters removed, or `None` when the
/// output has no markup structure.
pub fn validate_markup(text: &str) -> Option<String> {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    if structure_tag().is_match(cleaned) {
        Some(cleaned.to_string())
    } else {
        None
    }
}

/// Convert the small HTML subset generators emit into Markdown.
pub fn html_to_markdown(html: &str) -> String {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    let rules = RULES.get_or_init(|| {
        let rule = |pattern: &str, replacement: &'static str| {
            (
                Regex::new(pattern).unwrap_or_else(|e| panic!("bad pattern {}: {}", pattern, e)),
                replacement,
            )
        };
        vec![
            rule(r"(?is)<h1[^>]*>(.*?)</h1>", "\n# $1\n"),
            rule(r"(?is)<h2[^>]*>(.*?)</h2>", "\n## $1\n"),
            rule(r"(?is)<h3[^>]*>(.*?)</h3>", "\n### $1\n"),
            rule(r"(?is)<h4[^>]*>(.*?)</h4>", "\n#### $1\n"),
            rule(r"(?is)<h5[^>]*>(.*?)</h5>", "\n##### $1\n"),
            rule(r"(?is)<h6[^>]*>(.*?)</h6>", "\n###### $1\n"),
            rule(r"(?is)<(?:strong|b)>(.*?)</(?:strong|b)>", "**$1**"),
            rule(r"(?is)<(?:em|i)>(.*?)</(?:em|i)>", "*$1*"),
            rule(r"(?is)<li[^>]*>(.*?)</li>", "- $1\n"),
            rule(r"(?is)<p[^>]*>(.*?)</p>", "\n$1\n"),
            rule(r"(?i)<br\s*/?>", "\n"),
            rule(r"(?s)<[^>]+>", ""),
            rule(r"\n{3,}", "\n\n"),
        ]
    });

    let mut text = html.to_string();
    for (re, replacement) in rules {
        text = re.replace_all(&text, *replacement).into_owned();
    }
    text.trim().to_string()
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Visible stand-in for a chunk whose generation failed.
///
/// Returns `(structured, display)`.
pub fn failure_placeholder(reason: &str) -> (String, String) {
    (
        format!("> **{}**: {}", FAILURE_MARKER, reason),
        format!(
            "<p class=\"generation-failed\"><strong>{}</strong>: {}</p>",
            FAILURE_MARKER,
            escape_html(reason)
        ),
    )
}

/// Placeholder that keeps the unusable response around for inspection.
pub fn malformed_placeholder(raw: &str) -> (String, String) {
    let reason = "response had no outline structure";
    let (structured, display) = failure_placeholder(reason);
    (
        format!("{}\n\n```\n{}\n```", structured, raw.trim()),
        format!("{}\n<pre>{}</pre>", display, escape_html(raw.trim())),
    )
}

fn structure_tag() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| {
        Regex::new(r"(?i)<(?:h[1-6]|p)[\s>]").unwrap_or_else(|e| panic!("bad pattern: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fenced_block() {
        let raw = "```html\n<h2>Title</h2>\n<p>Body</p>\n```\nHope this helps!";
        assert_eq!(strip_wrapping(raw), "<h2>Title</h2>\n<p>Body</p>");
    }

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_wrapping("  \"<p>x</p>\" "), "<p>x</p>");
        assert_eq!(strip_wrapping("'plain'"), "plain");
        assert_eq!(strip_wrapping("\"'both'\""), "both");
        assert_eq!(strip_wrapping("\""), "\"");
    }

    #[test]
    fn test_strip_stray_fence_lines() {
        assert_eq!(strip_wrapping("<p>a</p>\n```"), "<p>a</p>");
    }

    #[test]
    fn test_validate_markup() {
        assert!(validate_markup("<H2>Upper</H2>").is_some());
        assert!(validate_markup("<p class=\"x\">para</p>").is_some());
        assert!(validate_markup("just prose, no tags").is_none());
        assert!(validate_markup("<pre>code</pre>").is_none());
        assert!(validate_markup("   ").is_none());
        assert_eq!(
            validate_markup("<p>a\u{0}b\tc</p>").as_deref(),
            Some("<p>ab\tc</p>")
        );
    }

    #[test]
    fn test_html_to_markdown() {
        let html = "<h2>Money</h2><p>It is <strong>scarce</strong>.</p><ul><li>one</li><li>two</li></ul>";
        let md = html_to_markdown(html);
        assert_eq!(md, "## Money\n\nIt is **scarce**.\n- one\n- two");
    }

    #[test]
    fn test_placeholders_are_marked() {
        let (md, html) = failure_placeholder("timeout <5s>");
        assert!(md.contains(FAILURE_MARKER));
        assert!(html.contains("timeout &lt;5s&gt;"));

        let (md, html) = malformed_placeholder("<script>x</script>");
        assert!(md.contains("<script>x</script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
    }
}
