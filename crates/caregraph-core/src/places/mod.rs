//! Provider candidate ranking
//!
//! Scores each candidate from the places index on four normalized terms
//! (semantic relevance, distance decay, opening-hours fit, insurance fit)
//! combined with renormalized weights. Every scoring decision leaves a
//! human-readable reason and a machine-checkable reason code on the
//! candidate.

use crate::backends::{Embedder, PlacesIndex};
use crate::config::RankingConfig;
use crate::state::{
    ConversationState, GeoPoint, HoursWindow, Preferences, ProviderCandidate, ReasonCode,
};
use lazy_static::lazy_static;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

lazy_static! {
    static ref TIME: Regex = Regex::new(r"(\d{1,2}):(\d{2})").unwrap();
}

/// Great-circle distance in kilometers.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Ranks provider candidates for appointment queries.
pub struct ProviderRanker {
    embedder: Arc<dyn Embedder>,
    places: Arc<dyn PlacesIndex>,
    config: RankingConfig,
}

impl ProviderRanker {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        places: Arc<dyn PlacesIndex>,
        config: RankingConfig,
    ) -> Self {
        Self {
            embedder,
            places,
            config,
        }
    }

    /// Populate `state.candidates`, best first. Backend failures degrade to
    /// an empty candidate list.
    pub async fn run(&self, state: &mut ConversationState) {
        let vector = match self.embedder.embed(state.retrieval_text()).await {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!("places embedding failed: {e}");
                state.candidates = Vec::new();
                return;
            }
        };

        let limit = state.preferences.travel_limit_km();
        let radius = limit.unwrap_or(self.config.default_radius_km);
        let raw = match self
            .places
            .search(&vector, self.config.origin, radius, self.config.top_k)
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!("places search failed: {e}");
                Vec::new()
            }
        };

        state.candidates = self.rank(raw, &state.preferences);
    }

    fn rank(
        &self,
        raw: Vec<ProviderCandidate>,
        preferences: &Preferences,
    ) -> Vec<ProviderCandidate> {
        let limit = preferences.travel_limit_km();
        let radius = limit.unwrap_or(self.config.default_radius_km);

        // Dedup by (name, phone), keeping the better duplicate.
        let mut by_key: HashMap<(String, String), usize> = HashMap::new();
        let mut unique: Vec<ProviderCandidate> = Vec::new();
        for mut candidate in raw {
            if candidate.name.is_empty() || candidate.phone.is_empty() {
                continue;
            }
            candidate.distance_km = candidate
                .geo
                .map(|geo| haversine_km(self.config.origin, geo));
            let key = (candidate.name.clone(), candidate.phone.clone());
            match by_key.get(&key) {
                Some(&index) => {
                    if should_replace(&unique[index], &candidate, limit) {
                        unique[index] = candidate;
                    }
                }
                None => {
                    by_key.insert(key, unique.len());
                    unique.push(candidate);
                }
            }
        }

        // Hard travel limit; candidates with unknown location pass through.
        if let Some(limit) = limit {
            unique.retain(|c| c.distance_km.map_or(true, |d| d <= limit));
        }

        let max_relevance = unique
            .iter()
            .map(|c| c.relevance)
            .fold(0.0f64, f64::max);
        let weights = self.config.weights.normalized();

        for candidate in &mut unique {
            candidate.reasons.clear();
            candidate.reason_codes.clear();

            // All-zero upstream relevance carries no signal; treat every
            // candidate as equally relevant rather than all irrelevant.
            let mut semantic = if max_relevance > f64::EPSILON {
                candidate.relevance / max_relevance
            } else {
                1.0
            };
            if !preferences.preferred_kinds.is_empty()
                && preferences
                    .preferred_kinds
                    .iter()
                    .any(|kind| kind.eq_ignore_ascii_case(&candidate.kind))
            {
                semantic = (semantic + 0.1).min(1.0);
                candidate
                    .reasons
                    .push(format!("Matches your preferred kind ({})", candidate.kind));
                candidate.reason_codes.insert(ReasonCode::PreferredKind);
            }

            let distance_fit = match candidate.distance_km {
                Some(distance) => {
                    candidate.reasons.push(format!("~{distance:.1} km away"));
                    if limit.is_some() {
                        candidate
                            .reasons
                            .push(format!("Within your {radius:.0} km travel limit"));
                        candidate.reason_codes.insert(ReasonCode::TravelWithinLimit);
                    }
                    (1.0 - distance / radius).clamp(0.0, 1.0)
                }
                // Unknown location: neutral fit, and no within-limit claim.
                None => 0.5,
            };

            let hours_fit = match preferences.hours_window {
                Some(window) => {
                    if hours_match(&candidate.hours, window) {
                        candidate.reasons.push(format!(
                            "Open during your preferred {} hours",
                            window.as_str()
                        ));
                        candidate.reason_codes.insert(ReasonCode::HoursMatch);
                        1.0
                    } else {
                        0.0
                    }
                }
                None => 0.5,
            };

            let insurance_fit = insurance_fit(candidate, preferences);

            let score = weights.semantic * semantic
                + weights.distance * distance_fit
                + weights.hours * hours_fit
                + weights.insurance * insurance_fit;
            candidate.score = (score * 10_000.0).round() / 10_000.0;
        }

        unique.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| compare_distance(a.distance_km, b.distance_km))
        });
        unique
    }
}

/// Whether `candidate` should displace an already-kept duplicate: in-range
/// beats out-of-range, then higher upstream relevance, then shorter distance.
fn should_replace(
    existing: &ProviderCandidate,
    candidate: &ProviderCandidate,
    limit: Option<f64>,
) -> bool {
    let in_range = |c: &ProviderCandidate| {
        limit.map_or(true, |l| c.distance_km.map_or(true, |d| d <= l))
    };
    match (in_range(existing), in_range(candidate)) {
        (false, true) => return true,
        (true, false) => return false,
        _ => {}
    }
    if candidate.relevance > existing.relevance {
        return true;
    }
    if candidate.relevance < existing.relevance {
        return false;
    }
    compare_distance(candidate.distance_km, existing.distance_km) == Ordering::Less
}

fn compare_distance(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn window_span(window: HoursWindow) -> (f64, f64) {
    match window {
        HoursWindow::Morning => (5.0, 12.0),
        HoursWindow::Afternoon => (12.0, 17.0),
        HoursWindow::Evening => (17.0, 24.0),
    }
}

/// Match free-text opening hours against a preferred window. The first two
/// HH:MM tokens are read as open/close; a close before open wraps past
/// midnight. Without parseable times, the window name itself counts.
fn hours_match(hours: &str, window: HoursWindow) -> bool {
    let times: Vec<f64> = TIME
        .captures_iter(hours)
        .take(2)
        .filter_map(|cap| {
            let h: f64 = cap[1].parse().ok()?;
            let m: f64 = cap[2].parse().ok()?;
            Some(h + m / 60.0)
        })
        .collect();
    if times.len() == 2 {
        let open = times[0];
        let mut close = times[1];
        if close <= open {
            close += 24.0;
        }
        let (start, end) = window_span(window);
        return (open < end && close > start) || (open < end + 24.0 && close > start + 24.0);
    }
    hours.to_lowercase().contains(window.as_str())
}

/// Insurance term: 1.0 on a plan match, 0.0 on a mismatch, 0.25 when the
/// candidate's coverage is unknown, 0.5 when the user states no preference.
fn insurance_fit(candidate: &mut ProviderCandidate, preferences: &Preferences) -> f64 {
    if preferences.insurance_plans.is_empty() {
        return 0.5;
    }
    if candidate.insurance_plans.is_empty() {
        return 0.25;
    }
    let matched = candidate.insurance_plans.iter().find(|plan| {
        preferences
            .insurance_plans
            .iter()
            .any(|wanted| wanted.eq_ignore_ascii_case(plan))
    });
    match matched {
        Some(plan) => {
            candidate.reasons.push(format!("Accepts {plan}"));
            candidate.reason_codes.insert(ReasonCode::InsuranceMatch);
            candidate.matched_insurance_label = Some(plan.clone());
            1.0
        }
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_ORIGIN;
    use async_trait::async_trait;

    struct StaticEmbedder;

    #[async_trait]
    impl Embedder for StaticEmbedder {
        async fn embed(&self, _: &str) -> crate::error::Result<Vec<f32>> {
            Ok(vec![1.0])
        }
        async fn embed_batch(&self, texts: &[String]) -> crate::error::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }
        fn dimensions(&self) -> usize {
            1
        }
    }

    struct FixedPlaces(Vec<ProviderCandidate>);

    #[async_trait]
    impl PlacesIndex for FixedPlaces {
        async fn search(
            &self,
            _vector: &[f32],
            _origin: GeoPoint,
            _radius_km: f64,
            _k: usize,
        ) -> crate::error::Result<Vec<ProviderCandidate>> {
            Ok(self.0.clone())
        }
    }

    fn ranker(candidates: Vec<ProviderCandidate>) -> ProviderRanker {
        ProviderRanker::new(
            Arc::new(StaticEmbedder),
            Arc::new(FixedPlaces(candidates)),
            RankingConfig::default(),
        )
    }

    /// Offset ~1.11 km per 0.01 degrees of latitude from the origin.
    fn candidate(name: &str, lat_offset: f64, relevance: f64) -> ProviderCandidate {
        ProviderCandidate {
            name: name.to_string(),
            phone: "03-1234567".to_string(),
            kind: "clinic".to_string(),
            hours: "Sun-Thu 07:00-14:00".to_string(),
            geo: Some(GeoPoint {
                lat: DEFAULT_ORIGIN.lat + lat_offset,
                lon: DEFAULT_ORIGIN.lon,
            }),
            relevance,
            ..Default::default()
        }
    }

    fn state_with_prefs(preferences: Preferences) -> ConversationState {
        let mut state = ConversationState::new(Some("u1"), "book a clinic visit");
        state.preferences = preferences;
        state
    }

    #[tokio::test]
    async fn test_closer_candidate_wins_on_equal_relevance() {
        let r = ranker(vec![
            candidate("Far Clinic", 0.05, 0.9),
            candidate("Near Clinic", 0.01, 0.9),
        ]);
        let mut s = state_with_prefs(Preferences::default());
        r.run(&mut s).await;
        assert_eq!(s.candidates[0].name, "Near Clinic");
        assert!(s.candidates[0].score > s.candidates[1].score);
        assert!(s.candidates[0]
            .reasons
            .iter()
            .any(|reason| reason.contains("km away")));
    }

    #[tokio::test]
    async fn test_travel_limit_drops_distant_candidates() {
        let r = ranker(vec![
            candidate("Near", 0.01, 0.5),
            candidate("Far", 0.2, 0.9),
        ]);
        let mut s = state_with_prefs(Preferences {
            max_travel_km: Some(5.0),
            ..Default::default()
        });
        r.run(&mut s).await;
        assert_eq!(s.candidates.len(), 1);
        assert_eq!(s.candidates[0].name, "Near");
        assert!(s.candidates[0]
            .reason_codes
            .contains(&ReasonCode::TravelWithinLimit));
    }

    #[tokio::test]
    async fn test_dedup_keeps_better_duplicate() {
        let mut worse = candidate("Clinic", 0.05, 0.4);
        worse.hours = "closed".to_string();
        let better = candidate("Clinic", 0.01, 0.9);
        let r = ranker(vec![worse, better]);
        let mut s = state_with_prefs(Preferences::default());
        r.run(&mut s).await;
        assert_eq!(s.candidates.len(), 1);
        assert_eq!(s.candidates[0].relevance, 0.9);
    }

    #[tokio::test]
    async fn test_zero_relevance_treated_as_uniform() {
        let r = ranker(vec![
            candidate("A", 0.01, 0.0),
            candidate("B", 0.02, 0.0),
        ]);
        let mut s = state_with_prefs(Preferences::default());
        r.run(&mut s).await;
        // Both get full semantic credit; the closer one wins on distance.
        assert_eq!(s.candidates[0].name, "A");
        assert!(s.candidates.iter().all(|c| c.score > 0.5));
    }

    #[tokio::test]
    async fn test_preferred_kind_bonus_and_reason() {
        let mut pharmacy = candidate("Pharmacy", 0.01, 0.9);
        pharmacy.kind = "pharmacy".to_string();
        let clinic = candidate("Clinic", 0.01, 0.9);
        let r = ranker(vec![pharmacy, clinic]);
        let mut s = state_with_prefs(Preferences {
            preferred_kinds: vec!["Pharmacy".to_string()],
            ..Default::default()
        });
        r.run(&mut s).await;
        assert_eq!(s.candidates[0].name, "Pharmacy");
        assert!(s.candidates[0]
            .reason_codes
            .contains(&ReasonCode::PreferredKind));
    }

    #[tokio::test]
    async fn test_insurance_match_sets_label() {
        let mut covered = candidate("Covered", 0.01, 0.9);
        covered.insurance_plans = vec!["Clalit".to_string()];
        let mut uncovered = candidate("Uncovered", 0.01, 0.9);
        uncovered.insurance_plans = vec!["Maccabi".to_string()];
        let r = ProviderRanker::new(
            Arc::new(StaticEmbedder),
            Arc::new(FixedPlaces(vec![covered, uncovered])),
            RankingConfig {
                weights: crate::config::ScoringWeights {
                    semantic: 0.5,
                    distance: 0.2,
                    hours: 0.1,
                    insurance: 0.2,
                },
                ..Default::default()
            },
        );
        let mut s = state_with_prefs(Preferences {
            insurance_plans: vec!["clalit".to_string()],
            ..Default::default()
        });
        r.run(&mut s).await;
        assert_eq!(s.candidates[0].name, "Covered");
        assert_eq!(
            s.candidates[0].matched_insurance_label.as_deref(),
            Some("Clalit")
        );
        assert!(s.candidates[0]
            .reason_codes
            .contains(&ReasonCode::InsuranceMatch));
    }

    #[tokio::test]
    async fn test_missing_contact_details_skipped() {
        let mut anonymous = candidate("", 0.01, 0.9);
        anonymous.name = String::new();
        let r = ranker(vec![anonymous, candidate("Named", 0.01, 0.5)]);
        let mut s = state_with_prefs(Preferences::default());
        r.run(&mut s).await;
        assert_eq!(s.candidates.len(), 1);
        assert_eq!(s.candidates[0].name, "Named");
    }

    #[tokio::test]
    async fn test_unknown_geo_gets_no_travel_limit_claim() {
        let mut ungeocoded = candidate("Mystery Clinic", 0.0, 0.9);
        ungeocoded.geo = None;
        let r = ranker(vec![ungeocoded]);
        let mut s = state_with_prefs(Preferences {
            max_travel_km: Some(5.0),
            ..Default::default()
        });
        r.run(&mut s).await;
        assert_eq!(s.candidates.len(), 1);
        assert!(s.candidates[0].distance_km.is_none());
        assert!(!s.candidates[0]
            .reason_codes
            .contains(&ReasonCode::TravelWithinLimit));
        assert!(s.candidates[0]
            .reasons
            .iter()
            .all(|reason| !reason.contains("travel limit")));
    }

    #[test]
    fn test_hours_match_parses_ranges() {
        assert!(hours_match("Sun-Thu 07:00-14:00", HoursWindow::Morning));
        assert!(hours_match("Sun-Thu 07:00-14:00", HoursWindow::Afternoon));
        assert!(!hours_match("Sun-Thu 07:00-14:00", HoursWindow::Evening));
        // wraps past midnight
        assert!(hours_match("22:00-02:00", HoursWindow::Evening));
        assert!(!hours_match("22:00-02:00", HoursWindow::Afternoon));
        // no parseable times, window name counts
        assert!(hours_match("mornings only", HoursWindow::Morning));
        assert!(!hours_match("weekends", HoursWindow::Morning));
    }

    #[test]
    fn test_haversine_known_distance() {
        // Tel Aviv to Jerusalem is roughly 54 km.
        let tlv = GeoPoint {
            lat: 32.0853,
            lon: 34.7818,
        };
        let jlm = GeoPoint {
            lat: 31.7683,
            lon: 35.2137,
        };
        let d = haversine_km(tlv, jlm);
        assert!((50.0..60.0).contains(&d), "got {d}");
    }
}
