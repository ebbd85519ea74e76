//! Conversation state and the records threaded through the pipeline
//!
//! One `ConversationState` is created per inbound query and discarded after
//! the response is returned. Nodes append to `alerts`, `citations` and
//! `messages`; they never overwrite fields they do not own.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Coarse category of the user's request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Meds,
    Appointment,
    Symptom,
    Routine,
    #[default]
    Other,
}

/// Finer medication-related question type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubIntent {
    Onset,
    Interaction,
    Schedule,
    SideEffects,
    Refill,
}

/// Canonicalized medication identity attached to a memory fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedMedication {
    /// Canonical lowercase ingredient key (e.g. "ibuprofen").
    pub ingredient: String,
    /// The alias that matched, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// A previously stored fact about the user. Read-only to the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryFact {
    pub entity: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized: Option<NormalizedMedication>,
}

impl MemoryFact {
    pub fn medication(name: impl Into<String>) -> Self {
        Self {
            entity: "medication".to_string(),
            name: name.into(),
            value: None,
            normalized: None,
        }
    }
}

/// A retrieved document from the public knowledge source. Immutable once
/// retrieved; missing fields deserialize as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSnippet {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub text: String,
}

impl KnowledgeSnippet {
    /// Identity used when merging pinned documents with search results.
    pub fn identity(&self) -> (String, String) {
        (
            self.source_url.clone(),
            format!("{}|{}|{}", self.title, self.section, self.language),
        )
    }
}

/// Geographic point (WGS84).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Machine-checkable tag explaining why a provider candidate scored as it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    HoursMatch,
    TravelWithinLimit,
    PreferredKind,
    InsuranceMatch,
}

/// A point of care returned by the places index, enriched during ranking.
/// Deduplicated by `(name, phone)`; lifecycle is query-scoped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderCandidate {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub kind: String,
    /// Free-text opening hours (e.g. "Sun-Fri 07:00-14:00").
    #[serde(default)]
    pub hours: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insurance_plans: Vec<String>,
    /// Upstream relevance score from the places index.
    #[serde(default, rename = "_score")]
    pub relevance: f64,
    /// Derived during ranking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
    /// Final composite score.
    #[serde(default)]
    pub score: f64,
    /// Human-readable scoring rationale, in scoring order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub reason_codes: BTreeSet<ReasonCode>,
    /// Display label of the insurance plan that matched the preference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_insurance_label: Option<String>,
}

/// One entry of a medication cadence plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleItem {
    pub title: String,
    pub time: chrono::DateTime<chrono::Utc>,
}

/// Output record of the planner. `type` is always one of a closed set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Plan {
    MedSchedule {
        items: Vec<ScheduleItem>,
    },
    Appointment {
        provider: Box<ProviderCandidate>,
        event_path: String,
        rationale: String,
        explanations: Vec<String>,
    },
    #[default]
    None,
}

impl Plan {
    pub fn is_none(&self) -> bool {
        matches!(self, Plan::None)
    }
}

/// A role/content record appended along the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<String>,
}

impl Message {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            citations: Vec::new(),
        }
    }
}

/// Per-label confidence score from the risk classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f64,
}

/// Raw risk-classifier output retained for traceability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskDebug {
    /// All per-label scores, classifier order.
    pub scores: Vec<LabelScore>,
    /// The subset that crossed its configured threshold.
    pub triggered: Vec<LabelScore>,
}

/// Diagnostic bag; not part of the durable record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskDebug>,
    /// Canonical medication ingredients detected in the query text.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub normalized_query_meds: Vec<String>,
    /// Node names in execution order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<String>,
}

/// Preferred time-of-day window for appointments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoursWindow {
    Morning,
    Afternoon,
    Evening,
}

impl HoursWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoursWindow::Morning => "morning",
            HoursWindow::Afternoon => "afternoon",
            HoursWindow::Evening => "evening",
        }
    }
}

/// Caller-supplied preferences influencing provider ranking and planning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preferences {
    /// Hard travel-limit radius; candidates strictly beyond it are dropped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_travel_km: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours_window: Option<HoursWindow>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferred_kinds: Vec<String>,
    /// Insurance plan names; matching is case-insensitive.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insurance_plans: Vec<String>,
}

impl Preferences {
    /// Travel limit, validated: non-positive values are ignored.
    pub fn travel_limit_km(&self) -> Option<f64> {
        self.max_travel_km.filter(|v| *v > 0.0)
    }
}

/// The single mutable record threaded through the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Raw query as submitted.
    pub query: String,
    /// Query after PII redaction; all downstream stages read this.
    #[serde(default)]
    pub redacted_query: String,
    /// Optional English normalization of a non-English query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pivot_query: Option<String>,
    /// Two-letter language code.
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub intent: Intent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_intent: Option<SubIntent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub memory_facts: Vec<MemoryFact>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub public_snippets: Vec<KnowledgeSnippet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<ProviderCandidate>,
    #[serde(default)]
    pub preferences: Preferences,
    #[serde(default)]
    pub plan: Plan,
    /// Append-only, deduplicated within a run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alerts: Vec<String>,
    /// Normalized source URLs, deduplicated within a run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub debug: Diagnostics,
}

impl ConversationState {
    pub fn new(user_id: Option<&str>, query: &str) -> Self {
        Self {
            user_id: user_id.map(str::to_string),
            query: query.to_string(),
            redacted_query: query.to_string(),
            ..Default::default()
        }
    }

    /// Append an alert unless an identical one is already present.
    pub fn push_alert(&mut self, alert: impl Into<String>) {
        let alert = alert.into();
        if !alert.is_empty() && !self.alerts.contains(&alert) {
            self.alerts.push(alert);
        }
    }

    /// Append a citation unless an identical one is already present.
    pub fn push_citation(&mut self, citation: impl Into<String>) {
        let citation = citation.into();
        if !citation.is_empty() && !self.citations.contains(&citation) {
            self.citations.push(citation);
        }
    }

    /// Text used for retrieval and classification: the English pivot when
    /// available, otherwise the redacted query.
    pub fn retrieval_text(&self) -> &str {
        self.pivot_query.as_deref().unwrap_or(&self.redacted_query)
    }

    /// Sorted, deduplicated names of known medications from memory.
    pub fn known_medication_names(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = BTreeSet::new();
        for fact in &self.memory_facts {
            if fact.entity != "medication" {
                continue;
            }
            let name = if !fact.name.is_empty() {
                fact.name.clone()
            } else if let Some(norm) = &fact.normalized {
                norm.ingredient.clone()
            } else {
                continue;
            };
            names.insert(name);
        }
        names.into_iter().collect()
    }
}
