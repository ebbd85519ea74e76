//! Hybrid knowledge retrieval and safety-alert gating
//!
//! Vector search first, weighted keyword search as the fallback. Registry
//! matches pin curated documents ahead of search results. Alerts come only
//! from the top of the merged list, and citations only from documents that
//! actually produced an alert.

use crate::backends::{Embedder, KeywordClause, KeywordQuery, KnowledgeIndex};
use crate::config::RetrievalConfig;
use crate::registry::{self, SymptomRegistry};
use crate::state::{ConversationState, KnowledgeSnippet, Message};
use std::collections::BTreeSet;
use std::sync::Arc;

const SECTION_BOOSTS: &[(&str, f32)] = &[("general", 1.2), ("warnings", 1.5)];

/// Retrieves public knowledge for the current query and derives alerts and
/// citations from it.
pub struct RetrievalEngine {
    embedder: Arc<dyn Embedder>,
    knowledge: Arc<dyn KnowledgeIndex>,
    registry: Arc<SymptomRegistry>,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        knowledge: Arc<dyn KnowledgeIndex>,
        registry: Arc<SymptomRegistry>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            knowledge,
            registry,
            config,
        }
    }

    /// Populate `public_snippets`, `alerts` and `citations` on the state.
    pub async fn run(&self, state: &mut ConversationState) {
        let text = state.retrieval_text().to_string();
        if text.trim().is_empty() {
            return;
        }

        let med_tokens = medication_tokens(state);
        // Match the registry against both the original and the pivoted text
        // so either language's phrases can hit.
        let match_text = match &state.pivot_query {
            Some(pivot) => format!("{} {}", state.redacted_query, pivot),
            None => state.redacted_query.clone(),
        };
        let matches = self.registry.match_query(&match_text);
        let expansions = registry::expansion_terms(&matches, &state.language);
        let pinned = registry::pinned_docs(&matches);

        let mut results = match self.embedder.embed(&text).await {
            Ok(vector) => match self
                .knowledge
                .search_vector(&vector, self.config.top_k)
                .await
            {
                Ok(docs) => docs,
                Err(e) => {
                    tracing::warn!("vector search failed: {e}");
                    Vec::new()
                }
            },
            Err(e) => {
                tracing::warn!("query embedding failed: {e}");
                Vec::new()
            }
        };
        if results.is_empty() {
            results = self.keyword_fallback(state, &med_tokens, &expansions).await;
        }

        // Pinned documents go first; search results fill in behind them.
        let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
        let mut merged: Vec<KnowledgeSnippet> = Vec::new();
        for doc in pinned.into_iter().chain(results) {
            if seen.insert(doc.identity()) {
                merged.push(doc);
            }
        }

        // Stable reorder: documents in the user's language first, original
        // relative order otherwise preserved.
        if !state.language.is_empty() {
            let lang = state.language.clone();
            merged.sort_by_key(|doc| doc.language != lang);
        }

        let mut alerted = false;
        for doc in merged.iter().take(self.config.alert_window) {
            if !alert_qualifies(doc, &med_tokens) {
                continue;
            }
            alerted = true;
            state.push_alert(format!("Check: {} — {}", doc.title, doc.section));
            state.push_citation(normalize_citation(&doc.source_url));
        }

        // Nothing alert-worthy: one generic guidance message, unless an
        // earlier stage already said something.
        if !alerted && state.messages.is_empty() {
            state
                .messages
                .push(Message::assistant(guidance_line(&state.language)));
        }

        state.public_snippets = merged;
    }

    async fn keyword_fallback(
        &self,
        state: &ConversationState,
        med_tokens: &[String],
        expansions: &[String],
    ) -> Vec<KnowledgeSnippet> {
        let mut clauses = vec![KeywordClause::new(state.redacted_query.clone(), 1.0)];
        if let Some(pivot) = &state.pivot_query {
            clauses.push(KeywordClause::new(pivot.clone(), 1.5));
        }
        for token in med_tokens {
            clauses.push(KeywordClause::new(token.clone(), 2.0));
        }
        for term in expansions {
            clauses.push(KeywordClause::new(term.clone(), 1.2));
        }
        let query = KeywordQuery {
            clauses,
            section_boosts: SECTION_BOOSTS
                .iter()
                .map(|(name, boost)| (name.to_string(), *boost))
                .collect(),
            k: self.config.top_k,
        };
        match self.knowledge.search_keyword(&query).await {
            Ok(docs) => docs,
            Err(e) => {
                tracing::warn!("keyword search failed: {e}");
                Vec::new()
            }
        }
    }
}

fn guidance_line(language: &str) -> &'static str {
    if language == "he" {
        "עברתי על המידע הזמין; אם התסמינים נמשכים או מחמירים, פנה לרופא."
    } else {
        "Review the guidance below; if symptoms persist or worsen, talk to a clinician."
    }
}

/// Canonical medication tokens from the user's memory facts, sorted and
/// deduplicated. Unrecognized names contribute their dosage-stripped base.
fn medication_tokens(state: &ConversationState) -> Vec<String> {
    let mut tokens: BTreeSet<String> = BTreeSet::new();
    for fact in &state.memory_facts {
        if fact.entity != "medication" {
            continue;
        }
        let token = fact
            .normalized
            .as_ref()
            .map(|n| n.ingredient.clone())
            .unwrap_or_else(|| crate::meds::base_name(&fact.name));
        if !token.is_empty() {
            tokens.insert(token);
        }
    }
    tokens.into_iter().collect()
}

/// Whether a document warrants a safety alert.
///
/// Warnings sections always qualify. Interactions sections qualify only
/// when at least two distinct medications the user actually takes are named
/// in the title and body; a page listing drugs the user is not on is
/// background reading, not an interaction.
fn alert_qualifies(doc: &KnowledgeSnippet, known_meds: &[String]) -> bool {
    let section = doc.section.to_lowercase();
    if section.contains("warning") {
        return true;
    }
    if !section.contains("interaction") {
        return false;
    }
    let haystack = format!("{} {}", doc.title, doc.text).to_lowercase();
    let implicated = known_meds
        .iter()
        .filter(|token| haystack.contains(token.as_str()))
        .collect::<BTreeSet<_>>();
    implicated.len() >= 2
}

/// Canonicalize a citation URL: drop the fragment and tracking query
/// parameters, trim a trailing slash on non-root paths. Non-URL strings
/// pass through trimmed.
pub fn normalize_citation(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = url::Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (key, value) in &kept {
            pairs.append_pair(key, value);
        }
        drop(pairs);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }
    url.to_string()
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || key == "fbclid" || key == "gclid"
}
