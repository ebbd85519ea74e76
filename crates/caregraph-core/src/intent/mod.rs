//! Intent classification
//!
//! Embedding exemplar classifier with an abstain gate (threshold + margin),
//! plus an independent keyword-based sub-intent detector for medication
//! questions. Exemplars come from a built-in seed table, overridable by a
//! JSON file that is reloaded when its modification time changes.

use crate::backends::Embedder;
use crate::config::IntentConfig;
use crate::error::Result;
use crate::state::{Intent, SubIntent};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

const BUCKETS: [Intent; 4] = [
    Intent::Symptom,
    Intent::Meds,
    Intent::Appointment,
    Intent::Routine,
];

fn default_exemplars() -> Vec<(Intent, Vec<String>)> {
    let seed: [(Intent, &[&str]); 4] = [
        (
            Intent::Symptom,
            &[
                "I have a fever",
                "my head hurts",
                "I feel dizzy",
                "יש לי חום",
                "כואב לי הראש",
                "אני מרגיש חלש",
            ],
        ),
        (
            Intent::Meds,
            &[
                "refill my prescription",
                "took ibuprofen",
                "morning pill schedule",
                "אני צריך תרופה",
                "נטלתי תרופה",
                "תזכיר לי לקחת תרופה",
            ],
        ),
        (
            Intent::Appointment,
            &[
                "book a lab appointment",
                "schedule a doctor visit",
                "reschedule my appointment",
                "קבע תור לרופא",
                "קבע בדיקות דם",
                "שנה תור",
            ],
        ),
        (
            Intent::Routine,
            &[
                "set a reminder",
                "weekly check-in",
                "add a to-do",
                "הוסף תזכורת",
                "בדיקה שבועית",
            ],
        ),
    ];
    seed.into_iter()
        .map(|(intent, phrases)| (intent, phrases.iter().map(|s| s.to_string()).collect()))
        .collect()
}

fn bucket_key(intent: Intent) -> &'static str {
    match intent {
        Intent::Symptom => "symptom",
        Intent::Meds => "meds",
        Intent::Appointment => "appointment",
        Intent::Routine => "routine",
        Intent::Other => "other",
    }
}

type ExemplarSnapshot = Arc<Vec<(Intent, Vec<String>)>>;

#[derive(Default)]
struct TableSlot {
    snapshot: Option<ExemplarSnapshot>,
    mtime: Option<SystemTime>,
}

/// Exemplar phrases per bucket, with optional file override and mtime-gated
/// reload. Reload swaps an immutable snapshot.
pub struct ExemplarTable {
    path: Option<PathBuf>,
    cache: RwLock<TableSlot>,
}

impl ExemplarTable {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            cache: RwLock::new(TableSlot::default()),
        }
    }

    pub fn snapshot(&self) -> ExemplarSnapshot {
        let Some(path) = &self.path else {
            let mut cache = self.cache.write().expect("exemplar lock poisoned");
            return cache
                .snapshot
                .get_or_insert_with(|| Arc::new(default_exemplars()))
                .clone();
        };

        let mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        {
            let cache = self.cache.read().expect("exemplar lock poisoned");
            if let Some(snapshot) = &cache.snapshot {
                if cache.mtime == mtime {
                    return snapshot.clone();
                }
            }
        }

        let snapshot = Arc::new(Self::load(path).unwrap_or_else(|e| {
            tracing::warn!(
                "failed loading intent exemplars from {}: {e}; using defaults",
                path.display()
            );
            default_exemplars()
        }));
        let mut cache = self.cache.write().expect("exemplar lock poisoned");
        cache.snapshot = Some(snapshot.clone());
        cache.mtime = mtime;
        snapshot
    }

    fn load(path: &PathBuf) -> Result<Vec<(Intent, Vec<String>)>> {
        let raw = std::fs::read_to_string(path)?;
        let parsed: BTreeMap<String, Vec<String>> = serde_json::from_str(&raw)?;
        let mut out = Vec::new();
        for intent in BUCKETS {
            if let Some(values) = parsed.get(bucket_key(intent)) {
                let phrases: Vec<String> = values
                    .iter()
                    .filter(|v| !v.trim().is_empty())
                    .cloned()
                    .collect();
                if !phrases.is_empty() {
                    out.push((intent, phrases));
                }
            }
        }
        if out.is_empty() {
            return Err(crate::error::CareGraphError::Config(
                "exemplar file is empty or names no known buckets".into(),
            ));
        }
        tracing::info!("loaded intent exemplars from {}", path.display());
        Ok(out)
    }
}

struct VectorCache {
    key: usize,
    buckets: Arc<Vec<(Intent, Vec<Vec<f32>>)>>,
}

/// Embedding exemplar classifier with abstain.
pub struct IntentClassifier {
    embedder: Arc<dyn Embedder>,
    table: ExemplarTable,
    config: IntentConfig,
    vectors: RwLock<Option<VectorCache>>,
}

impl IntentClassifier {
    pub fn new(embedder: Arc<dyn Embedder>, config: IntentConfig) -> Self {
        let table = ExemplarTable::new(config.exemplars_path.clone());
        Self {
            embedder,
            table,
            config,
            vectors: RwLock::new(None),
        }
    }

    /// Classify the query into a bucket, or abstain with `Intent::Other`
    /// when the top score is below the threshold or too close to the
    /// runner-up. Pure over the current exemplar state.
    pub async fn classify(&self, text: &str) -> Intent {
        let snapshot = self.table.snapshot();
        if snapshot.iter().all(|(_, phrases)| phrases.is_empty()) {
            return Intent::Other;
        }

        let buckets = match self.bucket_vectors(&snapshot).await {
            Ok(buckets) => buckets,
            Err(e) => {
                tracing::warn!("exemplar embedding failed: {e}; abstaining");
                return Intent::Other;
            }
        };
        let query = match self.embedder.embed(text).await {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!("query embedding failed: {e}; abstaining");
                return Intent::Other;
            }
        };

        // Cosine reduces to dot product on normalized vectors.
        let mut scores: Vec<(Intent, f32)> = buckets
            .iter()
            .map(|(intent, vectors)| {
                let best = vectors
                    .iter()
                    .map(|v| dot(v, &query))
                    .fold(-1.0f32, f32::max);
                (*intent, best)
            })
            .collect();
        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        tracing::debug!(?scores, "intent scores");

        let Some(&(top, top_score)) = scores.first() else {
            return Intent::Other;
        };
        let second_score = scores.get(1).map(|s| s.1).unwrap_or(-1.0);
        if top_score >= self.config.threshold && top_score - second_score >= self.config.margin {
            top
        } else {
            Intent::Other
        }
    }

    async fn bucket_vectors(
        &self,
        snapshot: &ExemplarSnapshot,
    ) -> Result<Arc<Vec<(Intent, Vec<Vec<f32>>)>>> {
        let key = Arc::as_ptr(snapshot) as usize;
        {
            let cache = self.vectors.read().expect("vector cache lock poisoned");
            if let Some(cached) = cache.as_ref() {
                if cached.key == key {
                    return Ok(cached.buckets.clone());
                }
            }
        }

        let mut buckets = Vec::with_capacity(snapshot.len());
        for (intent, phrases) in snapshot.iter() {
            let vectors = self.embedder.embed_batch(phrases).await?;
            buckets.push((*intent, vectors));
        }
        let buckets = Arc::new(buckets);
        let mut cache = self.vectors.write().expect("vector cache lock poisoned");
        *cache = Some(VectorCache {
            key,
            buckets: buckets.clone(),
        });
        Ok(buckets)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

const SUB_INTENT_FAMILIES: &[(SubIntent, &[&str])] = &[
    (
        SubIntent::Onset,
        &[
            "when will it start working",
            "when does it start working",
            "how long until",
            "how long before",
            "kick in",
            "start working",
            "מתי זה משפיע",
            "מתי זה אמור להשפיע",
            "מתי זה מתחיל להשפיע",
        ],
    ),
    (
        SubIntent::Interaction,
        &[
            "interaction",
            "interact",
            "together with",
            "combine with",
            "combined with",
            "mix with",
            "אינטראקציה",
            "יחד עם",
            "לשלב עם",
        ],
    ),
    (
        SubIntent::Schedule,
        &[
            "schedule",
            "remind me",
            "reminder",
            "what time should i take",
            "when should i take",
            "morning pill",
            "לוח זמנים",
            "תזכורת",
            "מתי לקחת",
        ],
    ),
    (
        SubIntent::SideEffects,
        &["side effect", "side effects", "adverse", "תופעות לוואי"],
    ),
    (
        SubIntent::Refill,
        &[
            "refill",
            "renew my prescription",
            "prescription renewal",
            "out of pills",
            "ran out of",
            "חידוש מרשם",
            "מרשם חדש",
            "נגמרו הכדורים",
        ],
    ),
];

/// Keyword-family sub-intent detection over the (possibly pivoted) text.
///
/// A family match counts only when the text also carries medication-context
/// evidence; this guards against collisions with unrelated phrases
/// ("schedule a meeting").
pub fn detect_sub_intent(text: &str, language: Option<&str>) -> Option<SubIntent> {
    if text.is_empty() {
        return None;
    }
    let lowered = text.to_lowercase();
    let family = SUB_INTENT_FAMILIES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(sub_intent, _)| *sub_intent)?;
    crate::meds::has_medication_context(&lowered, language).then_some(family)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::io::Write;

    /// Embedder returning canned orthogonal vectors keyed by marker words.
    struct KeywordEmbedder;

    fn axis(i: usize) -> Vec<f32> {
        let mut v = vec![0.0; 8];
        v[i] = 1.0;
        v
    }

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed(&self, text: &str) -> crate::error::Result<Vec<f32>> {
            let lowered = text.to_lowercase();
            let markers = [
                ("fever", 0),
                ("hurts", 0),
                ("dizzy", 0),
                ("prescription", 1),
                ("ibuprofen", 1),
                ("pill", 1),
                ("appointment", 2),
                ("visit", 2),
                ("reminder", 3),
                ("check-in", 3),
                ("to-do", 3),
            ];
            for (marker, dim) in markers {
                if lowered.contains(marker) {
                    return Ok(axis(dim));
                }
            }
            Ok(vec![0.0; 8])
        }

        async fn embed_batch(&self, texts: &[String]) -> crate::error::Result<Vec<Vec<f32>>> {
            let mut out = Vec::new();
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }

        fn dimensions(&self) -> usize {
            8
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _: &str) -> crate::error::Result<Vec<f32>> {
            Err(crate::error::CareGraphError::Backend("down".into()))
        }
        async fn embed_batch(&self, _: &[String]) -> crate::error::Result<Vec<Vec<f32>>> {
            Err(crate::error::CareGraphError::Backend("down".into()))
        }
        fn dimensions(&self) -> usize {
            8
        }
    }

    fn classifier(embedder: Arc<dyn Embedder>) -> IntentClassifier {
        IntentClassifier::new(embedder, IntentConfig::default())
    }

    #[tokio::test]
    async fn test_classify_symptom() {
        let c = classifier(Arc::new(KeywordEmbedder));
        assert_eq!(c.classify("I have a fever of 39°C").await, Intent::Symptom);
    }

    #[tokio::test]
    async fn test_classify_appointment() {
        let c = classifier(Arc::new(KeywordEmbedder));
        assert_eq!(
            c.classify("please book a lab appointment").await,
            Intent::Appointment
        );
    }

    #[tokio::test]
    async fn test_abstains_on_unknown_text() {
        let c = classifier(Arc::new(KeywordEmbedder));
        // Zero vector scores 0.0 against every bucket, below the threshold.
        assert_eq!(c.classify("what is the weather").await, Intent::Other);
    }

    #[tokio::test]
    async fn test_abstains_when_embedder_unavailable() {
        let c = classifier(Arc::new(FailingEmbedder));
        assert_eq!(c.classify("I have a fever").await, Intent::Other);
    }

    #[tokio::test]
    async fn test_abstains_when_margin_too_small() {
        let config = IntentConfig {
            margin: 2.0,
            ..Default::default()
        };
        let c = IntentClassifier::new(Arc::new(KeywordEmbedder), config);
        // A perfect match still loses to an impossible margin requirement.
        assert_eq!(c.classify("I have a fever").await, Intent::Other);
    }

    #[tokio::test]
    async fn test_exemplar_file_override() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(br#"{"routine": ["fever drill"]}"#).unwrap();
        file.flush().unwrap();
        let config = IntentConfig {
            exemplars_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let c = IntentClassifier::new(Arc::new(KeywordEmbedder), config);
        // Only the routine bucket exists now, and it claims "fever".
        assert_eq!(c.classify("I have a fever").await, Intent::Routine);
    }

    #[tokio::test]
    async fn test_malformed_exemplar_file_uses_defaults() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(b"{not json").unwrap();
        file.flush().unwrap();
        let config = IntentConfig {
            exemplars_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let c = IntentClassifier::new(Arc::new(KeywordEmbedder), config);
        assert_eq!(c.classify("I have a fever").await, Intent::Symptom);
    }

    #[test]
    fn test_sub_intent_requires_medication_context() {
        assert_eq!(detect_sub_intent("schedule a meeting with Dana", Some("en")), None);
        assert_eq!(
            detect_sub_intent("schedule my ibuprofen pills", Some("en")),
            Some(SubIntent::Schedule)
        );
    }

    #[test]
    fn test_sub_intent_families() {
        assert_eq!(
            detect_sub_intent("can I take nurofen together with aspirin", Some("en")),
            Some(SubIntent::Interaction)
        );
        assert_eq!(
            detect_sub_intent("when will my acamol start working", Some("en")),
            Some(SubIntent::Onset)
        );
        assert_eq!(
            detect_sub_intent("refill my prescription", Some("en")),
            Some(SubIntent::Refill)
        );
        assert_eq!(
            detect_sub_intent("does ibuprofen have side effects", Some("en")),
            Some(SubIntent::SideEffects)
        );
    }

    #[test]
    fn test_sub_intent_hebrew() {
        assert_eq!(
            detect_sub_intent("יש לתרופה תופעות לוואי?", Some("he")),
            Some(SubIntent::SideEffects)
        );
    }
}
