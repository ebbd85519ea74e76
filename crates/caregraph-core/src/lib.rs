//! Caregraph Core Library
//!
//! Decision pipeline for personal health queries.
//!
//! # Features
//! - Embedding exemplar intent classification with abstention
//! - Hybrid vector/keyword retrieval with safety-alert gating
//! - Multi-label risk classification behind configurable thresholds
//! - Geo/hours/insurance-aware provider ranking with reason codes
//! - Plan construction (medication cadence, calendar-backed appointments)
//! - PII redaction and Hebrew/English language handling throughout

pub mod backends;
pub mod compose;
pub mod config;
pub mod critic;
pub mod error;
pub mod graph;
pub mod intent;
pub mod lang;
pub mod meds;
pub mod places;
pub mod plan;
pub mod registry;
pub mod retrieval;
pub mod risk;
pub mod state;

pub use backends::{
    AnswerBackend, Backends, CalendarEvent, CalendarService, Embedder, HttpEmbedder,
    HttpRiskModel, IcsCalendar, KeywordClause, KeywordQuery, KnowledgeIndex, MemoryStore,
    PlacesIndex, RiskModel,
};
pub use config::{
    IntentConfig, PipelineConfig, RankingConfig, RetrievalConfig, RiskConfig, ScoringWeights,
};
pub use error::{CareGraphError, Error, Result};
pub use graph::{next, Node, Pipeline};
pub use state::{
    ConversationState, Diagnostics, GeoPoint, HoursWindow, Intent, KnowledgeSnippet, LabelScore,
    MemoryFact, Message, NormalizedMedication, Plan, Preferences, ProviderCandidate, ReasonCode,
    RiskDebug, ScheduleItem, SubIntent,
};
