//! Pipeline orchestration
//!
//! A small explicit state machine: each node reads and mutates the shared
//! `ConversationState`, then a pure routing function picks the next node.
//! Appointment queries branch through provider ranking, everything else
//! through knowledge retrieval and risk classification; all branches
//! converge on planning, composition and the final safety review.

use crate::backends::Backends;
use crate::compose::Composer;
use crate::config::PipelineConfig;
use crate::critic;
use crate::error::{CareGraphError, Result};
use crate::intent::{self, IntentClassifier};
use crate::lang;
use crate::meds;
use crate::places::ProviderRanker;
use crate::plan::Planner;
use crate::registry::SymptomRegistry;
use crate::retrieval::RetrievalEngine;
use crate::risk::RiskStage;
use crate::state::{ConversationState, Intent, Preferences};
use std::collections::BTreeSet;
use std::sync::Arc;

const MEMORY_TOP_K: usize = 5;

/// Pipeline nodes in the orchestration graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Scrub,
    Supervisor,
    Memory,
    Health,
    Risk,
    Places,
    Planner,
    Compose,
    Critic,
    End,
}

impl Node {
    pub fn name(&self) -> &'static str {
        match self {
            Node::Scrub => "scrub",
            Node::Supervisor => "supervisor",
            Node::Memory => "memory",
            Node::Health => "health",
            Node::Risk => "risk",
            Node::Places => "places",
            Node::Planner => "planner",
            Node::Compose => "compose",
            Node::Critic => "critic",
            Node::End => "end",
        }
    }
}

/// Routing function. Pure over the current state.
pub fn next(node: Node, state: &ConversationState) -> Node {
    match node {
        Node::Scrub => Node::Supervisor,
        Node::Supervisor => Node::Memory,
        Node::Memory => match state.intent {
            Intent::Appointment => Node::Places,
            _ => Node::Health,
        },
        Node::Health => Node::Risk,
        Node::Risk => Node::Planner,
        Node::Places => Node::Planner,
        Node::Planner => Node::Compose,
        Node::Compose => Node::Critic,
        Node::Critic => Node::End,
        Node::End => Node::End,
    }
}

/// The assembled decision pipeline. Construct once, run per query.
pub struct Pipeline {
    backends: Backends,
    intent: IntentClassifier,
    retrieval: RetrievalEngine,
    risk: RiskStage,
    places: ProviderRanker,
    planner: Planner,
    composer: Composer,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, backends: Backends) -> Self {
        let registry = Arc::new(SymptomRegistry::new(config.symptom_registry_path.clone()));
        let intent = IntentClassifier::new(backends.embedder.clone(), config.intent.clone());
        let retrieval = RetrievalEngine::new(
            backends.embedder.clone(),
            backends.knowledge.clone(),
            registry,
            config.retrieval.clone(),
        );
        let risk = RiskStage::new(backends.risk.clone(), config.risk.clone());
        let places = ProviderRanker::new(
            backends.embedder.clone(),
            backends.places.clone(),
            config.ranking.clone(),
        );
        let planner = Planner::new(backends.calendar.clone());
        let composer = Composer::new(backends.answer.clone());
        Self {
            backends,
            intent,
            retrieval,
            risk,
            places,
            planner,
            composer,
        }
    }

    /// Run the full pipeline for one query with default preferences.
    pub async fn run(
        &self,
        user_id: Option<&str>,
        query: &str,
        language_hint: Option<&str>,
    ) -> Result<ConversationState> {
        self.run_with_preferences(user_id, query, language_hint, Preferences::default())
            .await
    }

    /// Run the full pipeline for one query.
    pub async fn run_with_preferences(
        &self,
        user_id: Option<&str>,
        query: &str,
        language_hint: Option<&str>,
        preferences: Preferences,
    ) -> Result<ConversationState> {
        if query.trim().is_empty() {
            return Err(CareGraphError::InvalidInput("empty query".to_string()));
        }

        let mut state = ConversationState::new(user_id, query);
        state.preferences = preferences;

        let mut node = Node::Scrub;
        while node != Node::End {
            state.debug.trace.push(node.name().to_string());
            tracing::debug!(node = node.name(), "executing");
            self.execute(node, &mut state, language_hint).await;
            node = next(node, &state);
        }

        tracing::info!(
            intent = ?state.intent,
            alerts = state.alerts.len(),
            snippets = state.public_snippets.len(),
            candidates = state.candidates.len(),
            "pipeline run complete"
        );
        Ok(state)
    }

    async fn execute(&self, node: Node, state: &mut ConversationState, hint: Option<&str>) {
        match node {
            Node::Scrub => {
                state.redacted_query = lang::redact_pii(&state.query);
                state.language =
                    lang::resolve_language(hint, &state.redacted_query).to_string();
                state.pivot_query =
                    lang::pivot_to_english(&state.redacted_query, Some(&state.language));
            }
            Node::Supervisor => {
                state.intent = self.intent.classify(state.retrieval_text()).await;
                let combined = match &state.pivot_query {
                    Some(pivot) => format!("{} {}", state.redacted_query, pivot),
                    None => state.redacted_query.clone(),
                };
                state.debug.normalized_query_meds =
                    meds::find_medications_in_text(&combined, Some(&state.language));
                if let Some(sub) = intent::detect_sub_intent(&combined, Some(&state.language)) {
                    state.sub_intent = Some(sub);
                    // A medication sub-intent reclassifies the query as Meds;
                    // appointment requests keep their branch.
                    if state.intent != Intent::Appointment {
                        state.intent = Intent::Meds;
                    }
                }
            }
            Node::Memory => self.recall_memory(state).await,
            Node::Health => self.retrieval.run(state).await,
            Node::Risk => self.risk.run(state).await,
            Node::Places => self.places.run(state).await,
            Node::Planner => self.planner.run(state),
            Node::Compose => self.composer.run(state).await,
            Node::Critic => critic::review(state),
            Node::End => {}
        }
    }

    async fn recall_memory(&self, state: &mut ConversationState) {
        let Some(store) = &self.backends.memory else {
            return;
        };
        let Some(user_id) = state.user_id.clone() else {
            return;
        };
        let vector = match self.backends.embedder.embed(state.retrieval_text()).await {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!("memory embedding failed: {e}");
                return;
            }
        };
        let facts = match store.recall(&user_id, &vector, MEMORY_TOP_K).await {
            Ok(facts) => facts,
            Err(e) => {
                tracing::warn!("memory recall failed: {e}");
                return;
            }
        };

        // Normalize and dedup by canonical identity, first occurrence wins.
        let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
        let mut deduped = Vec::new();
        for mut fact in facts {
            meds::normalize_fact(&mut fact);
            let key = fact
                .normalized
                .as_ref()
                .map(|n| n.ingredient.clone())
                .unwrap_or_else(|| meds::base_name(&fact.name));
            if seen.insert((fact.entity.clone(), key)) {
                deduped.push(fact);
            }
        }
        state.memory_facts = deduped;
    }
}
