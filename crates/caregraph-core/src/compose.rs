//! Answer composition
//!
//! Builds the final assistant message. A generative backend is optional;
//! without one (or when it fails) the reply comes from retrieved highlights
//! or a small set of reviewed templates. The safety disclaimer is appended
//! unconditionally, the urgent line only when the risk stage flagged
//! urgent care.

use crate::backends::AnswerBackend;
use crate::state::{ConversationState, Message, Plan};
use std::sync::Arc;

const HIGHLIGHT_CHARS: usize = 160;
const MAX_HIGHLIGHTS: usize = 3;

const SYSTEM_PROMPT: &str = "You are a cautious health assistant. Answer briefly using only \
the provided context. Do not diagnose and do not prescribe.";

struct LangPack {
    found_intro: &'static str,
    disclaimer: &'static str,
    urgent_line: &'static str,
    schedule_line: &'static str,
    appointment_prefix: &'static str,
}

const EN: LangPack = LangPack {
    found_intro: "Here is what I found:",
    disclaimer: "This is general information, not a medical diagnosis.",
    urgent_line: "If symptoms are severe or worsening, seek urgent care now.",
    schedule_line: "I added reminder times for your medication.",
    appointment_prefix: "I prepared an appointment. ",
};

const HE: LangPack = LangPack {
    found_intro: "זה מה שמצאתי:",
    disclaimer: "זהו מידע כללי, לא אבחנה רפואית.",
    urgent_line: "אם התסמינים חמורים או מחמירים, פנה לטיפול דחוף כעת.",
    schedule_line: "הוספתי תזכורות לנטילת התרופה.",
    appointment_prefix: "הכנתי תור. ",
};

/// (bucket keywords, English template, Hebrew template)
const FALLBACK_TEMPLATES: &[(&[&str], &str, &str)] = &[
    (
        &["stomach", "nausea", "vomit", "diarrhea", "בטן", "בחילה", "שלשול"],
        "For stomach complaints, try small sips of fluid and bland food, and rest.",
        "לכאבי בטן, נסה לשתות לגימות קטנות, לאכול אוכל קל ולנוח.",
    ),
    (
        &["cough", "throat", "breath", "congestion", "שיעול", "גרון", "נשימה"],
        "For coughs and sore throats, warm drinks and rest usually help.",
        "לשיעול וכאב גרון, שתייה חמה ומנוחה בדרך כלל עוזרות.",
    ),
    (
        &["headache", "dizzy", "migraine", "ראש", "סחרחורת", "מיגרנה"],
        "For headaches, rest in a quiet dark room and keep hydrated.",
        "לכאבי ראש, מנוחה בחדר שקט וחשוך ושתייה מרובה.",
    ),
];

const GENERAL_TEMPLATE_EN: &str =
    "Monitor your symptoms and rest; reach out to a clinician if anything changes.";
const GENERAL_TEMPLATE_HE: &str = "עקוב אחר התסמינים ונוח; פנה לרופא אם משהו משתנה.";

pub struct Composer {
    answer: Option<Arc<dyn AnswerBackend>>,
}

impl Composer {
    pub fn new(answer: Option<Arc<dyn AnswerBackend>>) -> Self {
        Self { answer }
    }

    /// Append the final assistant message, carrying the run's citations.
    pub async fn run(&self, state: &mut ConversationState) {
        let hebrew = state.language == "he";
        let pack = if hebrew { &HE } else { &EN };

        let mut body = match self.generated_answer(state).await {
            Some(answer) => answer,
            None => fallback_body(state, pack, hebrew),
        };

        match &state.plan {
            Plan::MedSchedule { .. } => {
                body.push('\n');
                body.push_str(pack.schedule_line);
            }
            Plan::Appointment { rationale, .. } => {
                body.push('\n');
                body.push_str(pack.appointment_prefix);
                body.push_str(rationale);
            }
            Plan::None => {}
        }

        body.push('\n');
        body.push_str(pack.disclaimer);
        if urgent_triggered(state) {
            body.push('\n');
            body.push_str(pack.urgent_line);
        }

        let mut message = Message::assistant(body);
        message.citations = state.citations.clone();
        state.messages.push(message);
    }

    async fn generated_answer(&self, state: &ConversationState) -> Option<String> {
        let backend = self.answer.as_ref()?;
        let context: Vec<String> = state
            .public_snippets
            .iter()
            .take(MAX_HIGHLIGHTS)
            .map(|doc| format!("{} ({}): {}", doc.title, doc.section, highlight(&doc.text)))
            .collect();
        let prompt = format!(
            "Question: {}\nContext:\n{}",
            state.retrieval_text(),
            context.join("\n")
        );
        match backend.generate(SYSTEM_PROMPT, &prompt).await {
            Ok(answer) if !answer.trim().is_empty() => Some(answer.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!("answer backend failed: {e}; using template");
                None
            }
        }
    }
}

fn fallback_body(state: &ConversationState, pack: &LangPack, hebrew: bool) -> String {
    if !state.public_snippets.is_empty() {
        let mut body = pack.found_intro.to_string();
        for doc in state.public_snippets.iter().take(MAX_HIGHLIGHTS) {
            body.push_str("\n- ");
            body.push_str(&highlight(&doc.text));
        }
        return body;
    }

    let lowered = state.retrieval_text().to_lowercase();
    let raw = state.redacted_query.to_lowercase();
    for (keywords, en, he) in FALLBACK_TEMPLATES {
        if keywords
            .iter()
            .any(|k| lowered.contains(k) || raw.contains(k))
        {
            return if hebrew { he.to_string() } else { en.to_string() };
        }
    }
    if hebrew {
        GENERAL_TEMPLATE_HE.to_string()
    } else {
        GENERAL_TEMPLATE_EN.to_string()
    }
}

fn highlight(text: &str) -> String {
    let mut out: String = text.chars().take(HIGHLIGHT_CHARS).collect();
    if text.chars().count() > HIGHLIGHT_CHARS {
        out.push('…');
    }
    out
}

fn urgent_triggered(state: &ConversationState) -> bool {
    state
        .debug
        .risk
        .as_ref()
        .is_some_and(|risk| risk.triggered.iter().any(|s| s.label == "urgent_care"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CareGraphError;
    use crate::state::{KnowledgeSnippet, LabelScore, RiskDebug};
    use async_trait::async_trait;

    struct FixedAnswer(&'static str);

    #[async_trait]
    impl AnswerBackend for FixedAnswer {
        async fn generate(&self, _: &str, _: &str) -> crate::error::Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct BrokenAnswer;

    #[async_trait]
    impl AnswerBackend for BrokenAnswer {
        async fn generate(&self, _: &str, _: &str) -> crate::error::Result<String> {
            Err(CareGraphError::Backend("model offline".into()))
        }
    }

    fn snippet(text: &str) -> KnowledgeSnippet {
        KnowledgeSnippet {
            title: "Fever".to_string(),
            section: "general".to_string(),
            language: "en".to_string(),
            source_url: "https://kb.example/fever".to_string(),
            text: text.to_string(),
        }
    }

    fn state(query: &str) -> ConversationState {
        let mut state = ConversationState::new(Some("u1"), query);
        state.language = "en".to_string();
        state
    }

    #[tokio::test]
    async fn test_highlights_from_snippets() {
        let mut s = state("I have a fever");
        s.public_snippets = vec![snippet("Rest and fluids."), snippet("Check again in a day.")];
        s.citations = vec!["https://kb.example/fever".to_string()];
        Composer::new(None).run(&mut s).await;
        let message = s.messages.last().unwrap();
        assert!(message.content.contains("Here is what I found:"));
        assert!(message.content.contains("- Rest and fluids."));
        assert!(message.content.contains("not a medical diagnosis"));
        assert_eq!(message.citations, vec!["https://kb.example/fever"]);
    }

    #[tokio::test]
    async fn test_template_bucket_when_nothing_retrieved() {
        let mut s = state("my stomach hurts after eating");
        Composer::new(None).run(&mut s).await;
        assert!(s.messages[0].content.contains("stomach complaints"));

        let mut s = state("what about vitamins");
        Composer::new(None).run(&mut s).await;
        assert!(s.messages[0].content.contains("Monitor your symptoms"));
    }

    #[tokio::test]
    async fn test_generated_answer_preferred() {
        let mut s = state("I have a fever");
        s.public_snippets = vec![snippet("Rest and fluids.")];
        Composer::new(Some(Arc::new(FixedAnswer("Drink water and rest."))))
            .run(&mut s)
            .await;
        let content = &s.messages[0].content;
        assert!(content.starts_with("Drink water and rest."));
        assert!(!content.contains("Here is what I found"));
    }

    #[tokio::test]
    async fn test_backend_failure_falls_back_to_template() {
        let mut s = state("I have a fever");
        s.public_snippets = vec![snippet("Rest and fluids.")];
        Composer::new(Some(Arc::new(BrokenAnswer))).run(&mut s).await;
        assert!(s.messages[0].content.contains("Here is what I found:"));
    }

    #[tokio::test]
    async fn test_urgent_line_only_when_triggered() {
        let mut s = state("chest pain");
        Composer::new(None).run(&mut s).await;
        assert!(!s.messages[0].content.contains("seek urgent care now"));

        let mut s = state("chest pain");
        s.debug.risk = Some(RiskDebug {
            scores: vec![],
            triggered: vec![LabelScore {
                label: "urgent_care".to_string(),
                score: 0.8,
            }],
        });
        Composer::new(None).run(&mut s).await;
        assert!(s.messages[0].content.contains("seek urgent care now"));
    }

    #[tokio::test]
    async fn test_plan_lines_appended() {
        let mut s = state("remind me to take nurofen");
        s.plan = Plan::MedSchedule { items: vec![] };
        Composer::new(None).run(&mut s).await;
        assert!(s.messages[0].content.contains("reminder times"));

        let mut s = state("book a clinic");
        s.plan = Plan::Appointment {
            provider: Box::default(),
            event_path: String::new(),
            rationale: "Chose North Clinic: about 2.3 km away".to_string(),
            explanations: vec![],
        };
        Composer::new(None).run(&mut s).await;
        assert!(s.messages[0]
            .content
            .contains("I prepared an appointment. Chose North Clinic"));
    }

    #[tokio::test]
    async fn test_hebrew_pack() {
        let mut s = state("כואבת לי הבטן");
        s.language = "he".to_string();
        Composer::new(None).run(&mut s).await;
        let content = &s.messages[0].content;
        assert!(content.contains("לכאבי בטן"));
        assert!(content.contains("זהו מידע כללי"));
    }

    #[test]
    fn test_highlight_truncates_on_char_boundary() {
        let long = "א".repeat(200);
        let out = highlight(&long);
        assert_eq!(out.chars().count(), HIGHLIGHT_CHARS + 1);
        assert!(out.ends_with('…'));
    }
}
