//! Text helpers for message composition.
//!
//! Output is Telegram-flavoured HTML; every helper also has to behave on
//! arbitrary forum text (angle brackets, half-typed phone numbers).

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // +7 912 345-67-89, 8(912)345-67-89 and the usual forum variations
    static ref PHONE_RE: Regex =
        Regex::new(r"(?:\+7|7|8)[\s\-\(]?\d{3}[\s\-\)]?\d{3}[\s\-]?\d{2}[\s\-]?\d{2}").unwrap();
    static ref HTML_TAG_RE: Regex = Regex::new(r"<[^>]+>").unwrap();
}

/// Wrap phone numbers in `<code>` so the chat client makes them tappable
/// and copyable.
pub fn linkify_phones(text: &str) -> String {
    PHONE_RE
        .replace_all(text, |caps: &regex::Captures| {
            format!("<code>{}</code>", &caps[0])
        })
        .into_owned()
}

/// Escape angle brackets so nicknames like `<admin>` cannot break the
/// HTML markup of a composed message.
pub fn escape_angle_brackets(text: &str) -> String {
    text.replace('<', "&lt;").replace('>', "&gt;")
}

/// Truncate to at most `limit` visible characters, the appended ellipsis
/// included. Operates on chars, never splits a code point.
pub fn truncate_visible(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let cut: String = text.chars().take(limit.saturating_sub(3)).collect();
    format!("{}...", cut)
}

/// Strip HTML tags for the plain-text rendering persisted alongside the
/// markup variant.
pub fn strip_html(text: &str) -> String {
    let stripped = HTML_TAG_RE.replace_all(text, "");
    stripped
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linkify_phones() {
        let text = "Звонить +7 912 345-67-89 или 8(912)111-22-33";
        let out = linkify_phones(text);
        assert!(out.contains("<code>+7 912 345-67-89</code>"));
        assert!(out.contains("<code>8(912)111-22-33</code>"));
    }

    #[test]
    fn test_linkify_leaves_plain_text_alone() {
        let text = "сбор в 19:00 у школы №112";
        assert_eq!(linkify_phones(text), text);
    }

    #[test]
    fn test_escape_angle_brackets() {
        assert_eq!(escape_angle_brackets("<admin>"), "&lt;admin&gt;");
        assert_eq!(escape_angle_brackets("Мария"), "Мария");
    }

    #[test]
    fn test_truncate_visible() {
        assert_eq!(truncate_visible("привет", 10), "привет");
        assert_eq!(truncate_visible("привет", 4), "п...");

        // the ellipsis counts against the cap: output never exceeds it
        let long = "а".repeat(600);
        let out = truncate_visible(&long, 500);
        assert_eq!(out.chars().count(), 500);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_strip_html() {
        let html = "<b>Новый поиск</b> <a href=\"https://example.com\">тут</a>";
        assert_eq!(strip_html(html), "Новый поиск тут");
    }
}
