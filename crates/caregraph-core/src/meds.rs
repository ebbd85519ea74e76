//! Medication alias lexicon
//!
//! Maps brand and multilingual aliases to canonical lowercase ingredients.
//! The lexicon is a lookup table; retrieval and sub-intent gating only ever
//! consume the canonical keys.

use crate::state::{MemoryFact, NormalizedMedication};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

/// Base lexicon: canonical ingredient -> aliases (lowercase).
const LEXICON: &[(&str, &[&str])] = &[
    (
        "acetaminophen",
        &[
            "acetaminophen",
            "paracetamol",
            "tylenol",
            "panadol",
            "aca mol",
            "acamol",
            "אקמול",
            "אדקס",
            "דקסמול",
        ],
    ),
    (
        "ibuprofen",
        &["ibuprofen", "advil", "motrin", "nurofen", "נורופן", "איבופרופן"],
    ),
    ("aspirin", &["aspirin", "אספירין", "cartia", "ecotrin"]),
    (
        "naproxen",
        &["naproxen", "aleve", "naproxen sodium", "נקסין", "נרקסן"],
    ),
];

/// Generic tokens that count as medication-context evidence when no known
/// medication name appears in the text.
const CONTEXT_TOKENS: &[&str] = &[
    "medication",
    "medicine",
    "meds",
    "pill",
    "pills",
    "dose",
    "prescription",
    "תרופה",
    "תרופות",
    "כדור",
    "מרשם",
    "מינון",
];

lazy_static! {
    static ref ALIAS_TO_CANONICAL: BTreeMap<&'static str, &'static str> = {
        let mut map = BTreeMap::new();
        for (canonical, aliases) in LEXICON {
            for alias in *aliases {
                map.insert(*alias, *canonical);
            }
        }
        map
    };
    /// Aliases sorted longest-first for substring fallback.
    static ref ALIASES_BY_LENGTH: Vec<&'static str> = {
        let mut aliases: Vec<&str> = ALIAS_TO_CANONICAL.keys().copied().collect();
        aliases.sort_by_key(|a| std::cmp::Reverse(a.len()));
        aliases
    };
    /// Word-bounded matcher per alias. The Hebrew variant tolerates the
    /// conjunctive prefix ו.
    static ref ALIAS_PATTERNS: Vec<(Regex, Regex, &'static str)> = ALIAS_TO_CANONICAL
        .iter()
        .map(|(alias, canonical)| {
            let escaped = regex::escape(alias);
            let plain = Regex::new(&format!(r"(^|\W){escaped}(\W|$)")).unwrap();
            let hebrew = Regex::new(&format!(r"(^|\W)(?:ו)?{escaped}(\W|$)")).unwrap();
            (plain, hebrew, *canonical)
        })
        .collect();
    static ref DOSAGE: Regex = Regex::new(r"(?i)\b\d+(\.\d+)?\s?(mg|mcg|ml|g)\b").unwrap();
    static ref BASE_DOSAGE: Regex = Regex::new(r"(?i)\b\d+\s?(mg|mcg|ml)\b").unwrap();
    static ref NON_WORD: Regex = Regex::new(r"[^\w\s]").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

// Dosage units as written in Hebrew (mg, gram).
const HEBREW_DOSAGE_UNITS: &[&str] = &["מג", "גרם"];

fn strip_dosage(value: &str) -> String {
    let mut cleaned = DOSAGE.replace_all(value, "").to_string();
    for unit in HEBREW_DOSAGE_UNITS {
        cleaned = cleaned.replace(unit, "");
    }
    cleaned
}

fn normalize_token(value: &str) -> String {
    let value = strip_dosage(value);
    let value = NON_WORD.replace_all(&value, " ");
    WHITESPACE
        .replace_all(&value, " ")
        .trim()
        .to_lowercase()
}

/// Dosage-stripped lowercase base of a free-text medication name, used as a
/// dedup key when no canonical ingredient is known.
pub fn base_name(name: &str) -> String {
    BASE_DOSAGE.replace_all(name, "").trim().to_lowercase()
}

/// Resolve a medication name to its canonical ingredient.
///
/// Falls back to the cleaned token when the alias is unknown, so callers
/// always get a usable key.
pub fn normalize_medication_name(name: &str) -> Option<NormalizedMedication> {
    if name.is_empty() {
        return None;
    }
    let cleaned = normalize_token(name);
    if cleaned.is_empty() {
        return None;
    }

    if let Some(canonical) = ALIAS_TO_CANONICAL.get(cleaned.as_str()) {
        return Some(NormalizedMedication {
            ingredient: canonical.to_string(),
            alias: Some(cleaned),
        });
    }

    // Longest matching alias contained in the cleaned string.
    for alias in ALIASES_BY_LENGTH.iter() {
        if alias.chars().count() > 2 && cleaned.contains(*alias) {
            return Some(NormalizedMedication {
                ingredient: ALIAS_TO_CANONICAL[*alias].to_string(),
                alias: Some(alias.to_string()),
            });
        }
    }

    Some(NormalizedMedication {
        ingredient: cleaned,
        alias: None,
    })
}

/// Attach a canonical ingredient to a medication memory fact in place.
pub fn normalize_fact(fact: &mut MemoryFact) {
    if fact.entity != "medication" {
        return;
    }
    if let Some(normalized) = normalize_medication_name(&fact.name) {
        fact.normalized = Some(normalized);
    }
}

/// Canonical ingredients named in free text, sorted and deduplicated.
pub fn find_medications_in_text(text: &str, language: Option<&str>) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let lowered = text.to_lowercase();
    let hebrew = matches!(crate::lang::normalize_language_code(language), Some("he"));
    let mut found: BTreeSet<&str> = BTreeSet::new();
    for (plain, with_prefix, canonical) in ALIAS_PATTERNS.iter() {
        let pattern = if hebrew { with_prefix } else { plain };
        if pattern.is_match(&lowered) {
            found.insert(canonical);
        }
    }
    found.into_iter().map(str::to_string).collect()
}

/// Whether the text carries medication-context evidence: a known medication
/// name, or a generic medication token.
pub fn has_medication_context(text: &str, language: Option<&str>) -> bool {
    if !find_medications_in_text(text, language).is_empty() {
        return true;
    }
    let lowered = text.to_lowercase();
    CONTEXT_TOKENS.iter().any(|token| lowered.contains(token))
}
