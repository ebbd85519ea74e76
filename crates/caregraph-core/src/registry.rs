//! Symptom-phrase registry
//!
//! YAML lookup table mapping a symptom key to multilingual phrases and
//! pinned knowledge documents. The file is parsed into an immutable
//! snapshot cached against its modification time; a reload swaps the
//! `Arc` so concurrent readers never observe a torn state.

use crate::state::KnowledgeSnippet;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

/// One registry entry: phrases per language plus pinned documents.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryEntry {
    #[serde(default)]
    pub phrases: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub docs: Vec<KnowledgeSnippet>,
}

type Snapshot = Arc<BTreeMap<String, RegistryEntry>>;

#[derive(Debug, Default)]
struct CacheSlot {
    snapshot: Snapshot,
    mtime: Option<SystemTime>,
}

/// File-backed registry with mtime-gated reload.
#[derive(Debug)]
pub struct SymptomRegistry {
    path: Option<PathBuf>,
    cache: RwLock<CacheSlot>,
}

impl SymptomRegistry {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            cache: RwLock::new(CacheSlot::default()),
        }
    }

    /// Registry disabled entirely (no file configured).
    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// Current snapshot, reloading if the file changed on disk.
    pub fn snapshot(&self) -> Snapshot {
        let Some(path) = &self.path else {
            return Snapshot::default();
        };

        let mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        if mtime.is_none() {
            tracing::debug!("symptom registry not found at {}", path.display());
            return Snapshot::default();
        }

        {
            let cache = self.cache.read().expect("registry lock poisoned");
            if cache.mtime == mtime && cache.mtime.is_some() {
                return cache.snapshot.clone();
            }
        }

        let snapshot: Snapshot = match std::fs::read_to_string(path)
            .map_err(crate::error::CareGraphError::from)
            .and_then(|raw| {
                serde_yaml::from_str::<BTreeMap<String, RegistryEntry>>(&raw)
                    .map_err(Into::into)
            }) {
            Ok(entries) => Arc::new(entries),
            Err(e) => {
                tracing::warn!("failed loading symptom registry {}: {e}", path.display());
                Snapshot::default()
            }
        };

        let mut cache = self.cache.write().expect("registry lock poisoned");
        cache.snapshot = snapshot.clone();
        cache.mtime = mtime;
        snapshot
    }

    /// Entries whose phrases (any language) appear in `text`.
    pub fn match_query(&self, text: &str) -> Vec<(String, RegistryEntry)> {
        let snapshot = self.snapshot();
        if snapshot.is_empty() || text.is_empty() {
            return Vec::new();
        }
        let text_norm = text.to_lowercase();
        snapshot
            .iter()
            .filter(|(_, entry)| {
                entry.phrases.values().flatten().any(|term| {
                    let term = term.trim().to_lowercase();
                    !term.is_empty() && text_norm.contains(&term)
                })
            })
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }
}

/// Deduplicated expansion terms for the matched entries: English synonyms
/// first for cross-language recall, then other languages, then variants in
/// the preferred language.
pub fn expansion_terms(matches: &[(String, RegistryEntry)], preferred_language: &str) -> Vec<String> {
    let pref = preferred_language.to_lowercase();
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut expansions = Vec::new();
    let mut push = |term: &str, expansions: &mut Vec<String>| {
        let cleaned = term.trim();
        if cleaned.is_empty() {
            return;
        }
        if seen.insert(cleaned.to_lowercase()) {
            expansions.push(cleaned.to_string());
        }
    };

    for (_, entry) in matches {
        if let Some(terms) = entry.phrases.get("en") {
            for term in terms {
                push(term, &mut expansions);
            }
        }
        for (lang, terms) in &entry.phrases {
            let lang = lang.to_lowercase();
            if lang == "en" || lang == pref {
                continue;
            }
            for term in terms {
                push(term, &mut expansions);
            }
        }
        if pref != "en" {
            if let Some(terms) = entry.phrases.get(pref.as_str()) {
                for term in terms {
                    push(term, &mut expansions);
                }
            }
        }
    }
    expansions
}

/// Pinned documents declared by the matched entries, deduplicated by
/// snippet identity.
pub fn pinned_docs(matches: &[(String, RegistryEntry)]) -> Vec<KnowledgeSnippet> {
    let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
    let mut docs = Vec::new();
    for (_, entry) in matches {
        for doc in &entry.docs {
            if seen.insert(doc.identity()) {
                docs.push(doc.clone());
            }
        }
    }
    docs
}
