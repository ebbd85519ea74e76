//! Pipeline configuration
//!
//! Typed configuration constructed once at startup. Every knob has a built-in
//! default; malformed environment values fall back to the default with a
//! warning rather than failing the run.

use crate::state::GeoPoint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Default exemplar-classifier acceptance threshold.
pub const DEFAULT_INTENT_THRESHOLD: f32 = 0.30;
/// Default top-vs-second margin below which the classifier abstains.
pub const DEFAULT_INTENT_MARGIN: f32 = 0.05;
/// Default search radius when no travel limit is set.
pub const DEFAULT_RADIUS_KM: f64 = 10.0;
/// Demo origin (Tel Aviv center). Replace with user-permitted geolocation.
pub const DEFAULT_ORIGIN: GeoPoint = GeoPoint {
    lat: 32.0853,
    lon: 34.7818,
};

/// Top-level configuration for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub intent: IntentConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    /// Symptom-phrase registry file (YAML). Missing file disables expansion.
    #[serde(default)]
    pub symptom_registry_path: Option<PathBuf>,
    /// Directory for generated artifacts (calendar events).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl PipelineConfig {
    /// Build configuration from `CAREGRAPH_*` environment variables,
    /// falling back to defaults for anything unset or malformed.
    pub fn from_env() -> Self {
        Self {
            intent: IntentConfig::from_env(),
            retrieval: RetrievalConfig::default(),
            risk: RiskConfig::from_env(),
            ranking: RankingConfig::from_env(),
            symptom_registry_path: std::env::var("CAREGRAPH_SYMPTOM_REGISTRY")
                .ok()
                .map(PathBuf::from),
            data_dir: std::env::var("CAREGRAPH_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_data_dir()),
        }
    }
}

/// Intent classifier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentConfig {
    /// Minimum top-bucket similarity to accept a classification.
    pub threshold: f32,
    /// Minimum gap between top and second bucket.
    pub margin: f32,
    /// JSON file overriding the built-in exemplar phrases.
    #[serde(default)]
    pub exemplars_path: Option<PathBuf>,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_INTENT_THRESHOLD,
            margin: DEFAULT_INTENT_MARGIN,
            exemplars_path: None,
        }
    }
}

impl IntentConfig {
    pub fn from_env() -> Self {
        Self {
            threshold: parse_env_f32("CAREGRAPH_INTENT_THRESHOLD", DEFAULT_INTENT_THRESHOLD),
            margin: parse_env_f32("CAREGRAPH_INTENT_MARGIN", DEFAULT_INTENT_MARGIN),
            exemplars_path: std::env::var("CAREGRAPH_INTENT_EXEMPLARS")
                .ok()
                .map(PathBuf::from),
        }
    }
}

/// Retrieval & alert engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Results requested from the knowledge index.
    pub top_k: usize,
    /// How many merged documents are inspected for alerts.
    pub alert_window: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 8,
            alert_window: 5,
        }
    }
}

/// Risk classifier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Candidate labels passed to the multi-label classifier.
    pub labels: Vec<String>,
    /// Per-label trigger thresholds. Labels without an entry can never
    /// trigger (they resolve to a threshold above 1.0).
    pub thresholds: BTreeMap<String, f64>,
    /// Hypothesis template, `{}` replaced per label.
    pub hypothesis_template: String,
}

impl Default for RiskConfig {
    fn default() -> Self {
        let labels = ["urgent_care", "see_doctor", "self_care", "info_only"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut thresholds = BTreeMap::new();
        thresholds.insert("urgent_care".to_string(), 0.55);
        thresholds.insert("see_doctor".to_string(), 0.50);
        Self {
            labels,
            thresholds,
            hypothesis_template: "This situation requires {}.".to_string(),
        }
    }
}

impl RiskConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let labels = std::env::var("CAREGRAPH_RISK_LABELS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.labels);
        let thresholds = std::env::var("CAREGRAPH_RISK_THRESHOLDS")
            .ok()
            .map(|raw| parse_thresholds(&raw))
            .filter(|m| !m.is_empty())
            .unwrap_or(defaults.thresholds);
        let hypothesis_template = std::env::var("CAREGRAPH_RISK_HYPOTHESIS")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.hypothesis_template);
        Self {
            labels,
            thresholds,
            hypothesis_template,
        }
    }

    /// Threshold for a label; unset labels resolve above 1.0 so a
    /// confidence score can never reach them.
    pub fn threshold_for(&self, label: &str) -> f64 {
        self.thresholds.get(label).copied().unwrap_or(1.1)
    }
}

/// Parse a `label:0.55,label2:0.50` threshold spec; malformed parts are
/// skipped.
pub fn parse_thresholds(spec: &str) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    for part in spec.split(',') {
        let Some((label, value)) = part.split_once(':') else {
            continue;
        };
        if let Ok(value) = value.trim().parse::<f64>() {
            let label = label.trim();
            if !label.is_empty() {
                out.insert(label.to_string(), value);
            }
        }
    }
    out
}

/// Provider ranking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    pub weights: ScoringWeights,
    /// Radius used for distance decay when no travel limit is set, and for
    /// the geo filter on the places index.
    pub default_radius_km: f64,
    /// User location the distance term is computed against.
    pub origin: GeoPoint,
    /// Candidates requested from the places index.
    pub top_k: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            default_radius_km: DEFAULT_RADIUS_KM,
            origin: DEFAULT_ORIGIN,
            top_k: 10,
        }
    }
}

impl RankingConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(raw) = std::env::var("CAREGRAPH_SCORING_WEIGHTS") {
            cfg.weights = ScoringWeights::parse(&raw);
        }
        cfg
    }
}

/// Weights of the composite provider score. Always renormalized to sum to 1
/// before use; an invalid configuration reverts to the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub semantic: f64,
    pub distance: f64,
    pub hours: f64,
    pub insurance: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            semantic: 0.6,
            distance: 0.25,
            hours: 0.15,
            insurance: 0.0,
        }
    }
}

impl ScoringWeights {
    /// Parse a `semantic:0.5,distance:0.3` spec. Unknown keys and negative
    /// or unparsable values are ignored; if nothing valid remains, the
    /// defaults are returned.
    pub fn parse(raw: &str) -> Self {
        let mut weights = Self::default();
        let mut any = false;
        for chunk in raw.split(',') {
            let Some((key, value)) = chunk.split_once(':') else {
                continue;
            };
            let Ok(value) = value.trim().parse::<f64>() else {
                continue;
            };
            if value < 0.0 {
                continue;
            }
            match key.trim().to_lowercase().as_str() {
                "semantic" => weights.semantic = value,
                "distance" => weights.distance = value,
                "hours" => weights.hours = value,
                "insurance" => weights.insurance = value,
                _ => continue,
            }
            any = true;
        }
        if !any {
            return Self::default();
        }
        weights
    }

    /// Renormalize so the weights sum to 1.0. A non-positive total is
    /// invalid and reverts to the default distribution.
    pub fn normalized(self) -> Self {
        let total = self.semantic + self.distance + self.hours + self.insurance;
        if !total.is_finite() || total <= 0.0 {
            tracing::warn!("invalid scoring weights (total {total}); using defaults");
            return Self::default().normalized();
        }
        Self {
            semantic: self.semantic / total,
            distance: self.distance / total,
            hours: self.hours / total,
            insurance: self.insurance / total,
        }
    }
}

fn parse_env_f32(var: &str, default: f32) -> f32 {
    match std::env::var(var) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("ignoring malformed {var}={raw}; using default {default}");
            default
        }),
        Err(_) => default,
    }
}
