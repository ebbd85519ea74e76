//! Multi-label risk classification
//!
//! Runs the zero-shot classifier over the retrieval text plus known
//! medication context. Each label is scored independently; a label triggers
//! when its score crosses its configured threshold. Actionable labels add
//! alerts, everything lands in the diagnostics bag.

use crate::backends::RiskModel;
use crate::config::RiskConfig;
use crate::state::{ConversationState, LabelScore, Message, RiskDebug};
use std::cmp::Ordering;
use std::sync::Arc;

/// Labels whose triggering warrants an alert, not just a message.
const ACTIONABLE_LABELS: &[&str] = &["urgent_care", "see_doctor"];

fn advisory_for(label: &str) -> Option<&'static str> {
    match label {
        "urgent_care" => {
            Some("Your symptoms may need prompt attention. Consider urgent care or contacting a clinician soon.")
        }
        "see_doctor" => Some("It may be worth booking a doctor's appointment to follow up."),
        _ => None,
    }
}

fn gentle_message_for(label: &str) -> Option<&'static str> {
    match label {
        "self_care" => Some("This sounds manageable at home. Rest, hydrate, and monitor how you feel."),
        "info_only" => Some("Here is some background information that may help."),
        _ => None,
    }
}

/// Optional risk-classification stage. With no model configured it is a
/// no-op and the pipeline degrades to retrieval-only alerts.
pub struct RiskStage {
    model: Option<Arc<dyn RiskModel>>,
    config: RiskConfig,
}

impl RiskStage {
    pub fn new(model: Option<Arc<dyn RiskModel>>, config: RiskConfig) -> Self {
        Self { model, config }
    }

    pub async fn run(&self, state: &mut ConversationState) {
        let Some(model) = &self.model else {
            return;
        };
        if self.config.labels.is_empty() {
            return;
        }

        let mut text = state.retrieval_text().to_string();
        let known = state.known_medication_names();
        if !known.is_empty() {
            text.push_str("\nContext meds: ");
            text.push_str(&known.join(", "));
        }

        let scores = match model
            .classify(&text, &self.config.labels, &self.config.hypothesis_template)
            .await
        {
            Ok(scores) => scores,
            Err(e) => {
                tracing::debug!("risk classification unavailable: {e}");
                return;
            }
        };

        let triggered: Vec<LabelScore> = scores
            .iter()
            .filter(|s| s.score >= self.config.threshold_for(&s.label))
            .cloned()
            .collect();
        tracing::debug!(?triggered, "risk labels over threshold");

        let actionable: Vec<&LabelScore> = triggered
            .iter()
            .filter(|s| ACTIONABLE_LABELS.contains(&s.label.as_str()))
            .collect();
        for label in &actionable {
            state.push_alert(format!("ML risk: {} (p={:.2})", label.label, label.score));
        }
        if let Some(top) = actionable
            .iter()
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal))
        {
            if let Some(advisory) = advisory_for(&top.label) {
                state.messages.push(Message::assistant(advisory));
            }
        } else if state.messages.is_empty() {
            let top = scores
                .iter()
                .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal));
            if let Some(message) = top.and_then(|s| gentle_message_for(&s.label)) {
                state.messages.push(Message::assistant(message));
            }
        }

        state.debug.risk = Some(RiskDebug { scores, triggered });
    }
}
