//! Final safety review
//!
//! Last stop before the response is returned. Flags answers that drew on
//! public snippets without producing a citation, and raises a single
//! red-flag banner when the risk classifier triggered an actionable label.
//! There is no keyword list here; red-flag detection is entirely
//! classifier-gated.

use crate::state::ConversationState;

pub const NO_CITATIONS_ALERT: &str = "No citations found; verify guidance.";
pub const RED_FLAG_ALERT: &str =
    "Potential red-flag detected. Consider urgent care if symptoms worsen.";

const URGENT_LABELS: &[&str] = &["urgent_care", "see_doctor"];

pub fn review(state: &mut ConversationState) {
    if !state.public_snippets.is_empty() && state.citations.is_empty() {
        state.push_alert(NO_CITATIONS_ALERT);
    }

    let urgent = state.debug.risk.as_ref().is_some_and(|risk| {
        risk.triggered
            .iter()
            .any(|s| URGENT_LABELS.contains(&s.label.as_str()))
    });
    if urgent {
        state.push_alert(RED_FLAG_ALERT);
    }
}
