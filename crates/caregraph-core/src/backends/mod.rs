//! Collaborator trait definitions
//!
//! Every external capability the pipeline consumes sits behind one of these
//! traits. A failing call maps to `CareGraphError::Backend`; node logic
//! treats that as "no data" and degrades rather than aborting the run.

mod http_embedder;
mod http_risk;

pub use http_embedder::HttpEmbedder;
pub use http_risk::HttpRiskModel;

use crate::error::Result;
use crate::state::{GeoPoint, KnowledgeSnippet, LabelScore, MemoryFact, ProviderCandidate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;

/// Embedding generation trait. Vectors are normalized and fixed-length,
/// so cosine similarity reduces to a dot product.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for batch of texts
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get embedding dimensions
    fn dimensions(&self) -> usize;
}

/// Independent multi-label text classification.
#[async_trait]
pub trait RiskModel: Send + Sync {
    /// Score each candidate label independently (scores do not sum to 1).
    async fn classify(
        &self,
        text: &str,
        labels: &[String],
        hypothesis_template: &str,
    ) -> Result<Vec<LabelScore>>;
}

/// One boosted clause of a keyword query.
#[derive(Debug, Clone)]
pub struct KeywordClause {
    pub text: String,
    pub boost: f32,
}

impl KeywordClause {
    pub fn new(text: impl Into<String>, boost: f32) -> Self {
        Self {
            text: text.into(),
            boost,
        }
    }
}

/// Weighted keyword query over title/text/section fields.
#[derive(Debug, Clone, Default)]
pub struct KeywordQuery {
    pub clauses: Vec<KeywordClause>,
    /// Section-name boosts biasing toward safe, actionable content.
    pub section_boosts: Vec<(String, f32)>,
    pub k: usize,
}

/// Public knowledge index: nearest-neighbor plus keyword search.
#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    async fn search_vector(&self, vector: &[f32], k: usize) -> Result<Vec<KnowledgeSnippet>>;

    async fn search_keyword(&self, query: &KeywordQuery) -> Result<Vec<KnowledgeSnippet>>;
}

/// Geo/semantic places index for provider candidates.
#[async_trait]
pub trait PlacesIndex: Send + Sync {
    /// Nearest candidates to the query vector within `radius_km` of
    /// `origin`, each carrying an upstream relevance score.
    async fn search(
        &self,
        vector: &[f32],
        origin: GeoPoint,
        radius_km: f64,
        k: usize,
    ) -> Result<Vec<ProviderCandidate>>;
}

/// Per-user memory store of previously recorded facts.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Facts nearest to the query vector for this user.
    async fn recall(&self, user_id: &str, vector: &[f32], k: usize) -> Result<Vec<MemoryFact>>;
}

/// Calendar event to materialize for an appointment plan.
#[derive(Debug, Clone)]
pub struct CalendarEvent {
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

/// Calendar artifact emission.
pub trait CalendarService: Send + Sync {
    /// Materialize the event, returning an opaque artifact path.
    fn create_event(&self, event: &CalendarEvent) -> Result<String>;
}

/// Optional generative backend for free-form answer composition. When it is
/// absent or fails, the composer falls back to reviewed templates.
#[async_trait]
pub trait AnswerBackend: Send + Sync {
    async fn generate(&self, system_prompt: &str, prompt: &str) -> Result<String>;
}

/// ICS-file calendar backend writing under a data directory.
pub struct IcsCalendar {
    data_dir: PathBuf,
}

impl IcsCalendar {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }
}

impl CalendarService for IcsCalendar {
    fn create_event(&self, event: &CalendarEvent) -> Result<String> {
        let ics = format!(
            "BEGIN:VCALENDAR\nVERSION:2.0\nBEGIN:VEVENT\nSUMMARY:{}\nDTSTART:{}\nDTEND:{}\nLOCATION:{}\nDESCRIPTION:{}\nEND:VEVENT\nEND:VCALENDAR\n",
            event.title,
            event.start.format("%Y%m%dT%H%M%SZ"),
            event.end.format("%Y%m%dT%H%M%SZ"),
            event.location.as_deref().unwrap_or(""),
            event.notes.as_deref().unwrap_or(""),
        );
        let safe_title: String = event
            .title
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .take(40)
            .collect();
        let stamp = event.start.format("%Y%m%dT%H%M%S");
        let dir = self.data_dir.join("calendar_events");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{safe_title}_{stamp}.ics"));
        std::fs::write(&path, ics)?;
        Ok(path.to_string_lossy().into_owned())
    }
}

/// All collaborators the pipeline needs, ready for injection. Backends are
/// created once and reused across requests.
#[derive(Clone)]
pub struct Backends {
    pub embedder: Arc<dyn Embedder>,
    pub knowledge: Arc<dyn KnowledgeIndex>,
    pub places: Arc<dyn PlacesIndex>,
    pub memory: Option<Arc<dyn MemoryStore>>,
    pub risk: Option<Arc<dyn RiskModel>>,
    pub calendar: Arc<dyn CalendarService>,
    pub answer: Option<Arc<dyn AnswerBackend>>,
}
