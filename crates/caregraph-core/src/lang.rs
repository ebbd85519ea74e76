//! PII redaction and lightweight language handling
//!
//! Redaction runs before anything else touches the query. Language support
//! covers English and Hebrew; the pivot is a best-effort phrase-table
//! translation used only to improve retrieval recall.

use lazy_static::lazy_static;
use regex::Regex;

pub const SUPPORTED_LANGS: [&str; 2] = ["en", "he"];
pub const DEFAULT_LANGUAGE: &str = "en";

lazy_static! {
    static ref CREDIT_CARD: Regex =
        Regex::new(r"\b\d{4}[\s\-]?\d{4}[\s\-]?\d{4}[\s\-]?\d{4}\b").unwrap();
    static ref SSN: Regex = Regex::new(r"\b\d{3}[\s\-]?\d{2}[\s\-]?\d{4}\b").unwrap();
    static ref PHONE: Regex = Regex::new(r"\s*\b[+]?\d[\d\s\-]{7,}\b\s*").unwrap();
    static ref EMAIL: Regex = Regex::new(r"\s*[\w.\-]+@[\w.\-]+\s*").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref HEBREW_CHARS: Regex = Regex::new(r"[\x{0590}-\x{05FF}]").unwrap();
    static ref HE_TO_EN: Vec<(Regex, &'static str)> = [
        ("כאבי בטן", "stomach pain"),
        ("כאב בטן", "stomach pain"),
        ("כאב ראש", "headache"),
        ("אקמול", "acetaminophen"),
        ("נורופן", "ibuprofen"),
        ("מתי זה אמור להשפיע", "when will it start working"),
        ("מתי זה מתחיל להשפיע", "when does it start working"),
        ("מתי זה משפיע", "when does it start working"),
        ("כמה זמן", "how long"),
        ("תופעות לוואי", "side effects"),
        ("חום", "fever"),
    ]
    .into_iter()
    .map(|(phrase, english)| {
        let pattern = format!(r"(^|\W){}(\W|$)", regex::escape(phrase));
        (Regex::new(&pattern).unwrap(), english)
    })
    .collect();
}

/// Replace credit cards, SSNs, phone numbers and e-mail addresses with
/// placeholder tokens, most specific pattern first.
pub fn redact_pii(text: &str) -> String {
    let red = CREDIT_CARD.replace_all(text, "[credit-card]");
    let red = SSN.replace_all(&red, "[ssn]");
    let red = PHONE.replace_all(&red, " [phone] ");
    let red = EMAIL.replace_all(&red, " [email] ");
    WHITESPACE.replace_all(&red, " ").trim().to_string()
}

/// Map a caller-supplied code to a supported one (`iw` aliases `he`).
pub fn normalize_language_code(lang: Option<&str>) -> Option<&'static str> {
    let code = lang?.trim().to_lowercase();
    let code = if code == "iw" { "he".to_string() } else { code };
    SUPPORTED_LANGS.iter().find(|l| **l == code).copied()
}

fn likely_hebrew(text: &str) -> bool {
    let hebrew_count = HEBREW_CHARS.find_iter(text).count();
    if hebrew_count == 0 {
        return false;
    }
    if hebrew_count >= 3 {
        return true;
    }
    let letter_count = text.chars().filter(|c| c.is_alphabetic()).count();
    if letter_count > 0 {
        hebrew_count as f64 / letter_count as f64 >= 0.2
    } else {
        true
    }
}

pub fn detect_language(text: &str) -> &'static str {
    if likely_hebrew(text) {
        "he"
    } else {
        DEFAULT_LANGUAGE
    }
}

/// Caller override wins when it names a supported language; otherwise detect.
pub fn resolve_language(override_code: Option<&str>, text: &str) -> &'static str {
    normalize_language_code(override_code).unwrap_or_else(|| detect_language(text))
}

/// Best-effort HE→EN pivot for retrieval. Returns lowercase English text
/// when common phrases can be replaced; `None` when no useful pivot exists.
pub fn pivot_to_english(text: &str, language: Option<&str>) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    let Some(lang) = normalize_language_code(language) else {
        // Unsupported but explicit code: pass the cleaned text through.
        if language.is_some_and(|l| !l.trim().is_empty()) {
            let cleaned = collapse_whitespace(text);
            return (!cleaned.is_empty()).then(|| cleaned.to_lowercase());
        }
        return None;
    };
    if lang == "en" || !HEBREW_CHARS.is_match(text) {
        return None;
    }

    let mut pivot = text.to_lowercase();
    let mut replaced = false;
    for (pattern, english) in HE_TO_EN.iter() {
        let next = pattern
            .replace_all(&pivot, format!("${{1}}{english}${{2}}"))
            .to_string();
        if next != pivot {
            replaced = true;
        }
        pivot = next;
    }

    let cleaned = collapse_whitespace(&HEBREW_CHARS.replace_all(&pivot, ""));
    if !cleaned.is_empty() {
        return Some(cleaned);
    }
    replaced.then_some(pivot)
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_credit_card_and_ssn() {
        let out = redact_pii("card 4111 1111 1111 1111 and ssn 123-45-6789 end");
        assert!(out.contains("[credit-card]"));
        assert!(out.contains("[ssn]"));
        assert!(!out.contains("4111"));
    }

    #[test]
    fn test_redact_phone_and_email() {
        let out = redact_pii("call +972 52-123-4567 or mail me@example.com now");
        assert!(out.contains("[phone]"));
        assert!(out.contains("[email]"));
        assert!(!out.contains("example.com"));
        // whitespace collapsed
        assert!(!out.contains("  "));
    }

    #[test]
    fn test_redact_leaves_clean_text_alone() {
        assert_eq!(redact_pii("I have a fever"), "I have a fever");
    }

    #[test]
    fn test_normalize_language_code() {
        assert_eq!(normalize_language_code(Some("EN")), Some("en"));
        assert_eq!(normalize_language_code(Some("iw")), Some("he"));
        assert_eq!(normalize_language_code(Some("fr")), None);
        assert_eq!(normalize_language_code(None), None);
    }

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language("I have a headache"), "en");
        assert_eq!(detect_language("יש לי חום"), "he");
    }

    #[test]
    fn test_resolve_language_override_wins() {
        assert_eq!(resolve_language(Some("he"), "plain english"), "he");
        assert_eq!(resolve_language(Some("xx"), "plain english"), "en");
    }

    #[test]
    fn test_pivot_replaces_known_phrases() {
        let pivot = pivot_to_english("יש לי חום גבוה", Some("he")).unwrap();
        assert!(pivot.contains("fever"));
        assert!(!HEBREW_CHARS.is_match(&pivot));
    }

    #[test]
    fn test_pivot_none_for_english() {
        assert_eq!(pivot_to_english("I have a fever", Some("en")), None);
        assert_eq!(pivot_to_english("no hebrew here", Some("he")), None);
    }

    #[test]
    fn test_pivot_medication_alias() {
        let pivot = pivot_to_english("לקחתי אקמול", Some("he")).unwrap();
        assert!(pivot.contains("acetaminophen"));
    }
}
