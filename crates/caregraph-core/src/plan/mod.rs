//! Plan construction
//!
//! Turns the ranked state into a concrete plan: a medication cadence for
//! explicit scheduling requests, or an appointment with a calendar artifact
//! and a localized rationale for appointment queries. Anything else yields
//! no plan and the composer answers from retrieval alone.

use crate::backends::{CalendarEvent, CalendarService};
use crate::state::{
    ConversationState, Intent, Plan, ProviderCandidate, ReasonCode, ScheduleItem, SubIntent,
};
use chrono::{Duration, NaiveTime, Utc};
use std::sync::Arc;

pub struct Planner {
    calendar: Arc<dyn CalendarService>,
}

impl Planner {
    pub fn new(calendar: Arc<dyn CalendarService>) -> Self {
        Self { calendar }
    }

    pub fn run(&self, state: &mut ConversationState) {
        state.plan = match (state.intent, state.sub_intent) {
            (Intent::Meds, Some(SubIntent::Schedule)) => medication_schedule(state),
            (Intent::Appointment, _) => self.appointment_plan(state),
            _ => Plan::None,
        };
    }

    fn appointment_plan(&self, state: &ConversationState) -> Plan {
        let Some(top) = state.candidates.first() else {
            return Plan::None;
        };
        let top = top.clone();

        let start = (Utc::now() + Duration::days(1))
            .with_time(NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default())
            .single()
            .unwrap_or_else(Utc::now);
        let event = CalendarEvent {
            title: format!("Visit: {}", top.name),
            start,
            end: start + Duration::hours(1),
            location: Some(top.name.clone()),
            notes: None,
        };
        let event_path = match self.calendar.create_event(&event) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!("calendar event creation failed: {e}");
                String::new()
            }
        };

        let rationale = rationale_for(&top, &state.language);
        let explanations = top.reasons.clone();
        Plan::Appointment {
            provider: Box::new(top),
            event_path,
            rationale,
            explanations,
        }
    }
}

fn medication_schedule(state: &ConversationState) -> Plan {
    let mut meds = state.known_medication_names();
    if meds.is_empty() {
        meds = state.debug.normalized_query_meds.clone();
    }
    if meds.is_empty() {
        meds.push("medication".to_string());
    }

    let now = Utc::now();
    let mut items = Vec::with_capacity(meds.len() * 2);
    for med in &meds {
        items.push(ScheduleItem {
            title: format!("Take {med} (morning)"),
            time: now + Duration::hours(1),
        });
        items.push(ScheduleItem {
            title: format!("Take {med} (evening)"),
            time: now + Duration::hours(12),
        });
    }
    Plan::MedSchedule { items }
}

/// Human-readable reason the top candidate was chosen, in the user's
/// language, built from the reason codes set during ranking.
fn rationale_for(candidate: &ProviderCandidate, language: &str) -> String {
    let hebrew = language == "he";
    let mut fragments: Vec<String> = Vec::new();

    if let Some(distance) = candidate.distance_km {
        fragments.push(if hebrew {
            format!("במרחק של כ-{distance:.1} ק\"מ")
        } else {
            format!("about {distance:.1} km away")
        });
    }
    for code in &candidate.reason_codes {
        let fragment = match code {
            ReasonCode::HoursMatch => {
                if hebrew {
                    "פתוח בשעות המועדפות עליך".to_string()
                } else {
                    "fits your preferred hours".to_string()
                }
            }
            ReasonCode::TravelWithinLimit => {
                if hebrew {
                    "בטווח הנסיעה שהגדרת".to_string()
                } else {
                    "within your travel limit".to_string()
                }
            }
            ReasonCode::PreferredKind => {
                if hebrew {
                    "מהסוג המועדף עליך".to_string()
                } else {
                    "matches your preferred kind".to_string()
                }
            }
            ReasonCode::InsuranceMatch => {
                let label = candidate
                    .matched_insurance_label
                    .as_deref()
                    .unwrap_or("your insurance");
                if hebrew {
                    format!("מקבל את הביטוח {label}")
                } else {
                    format!("accepts {label}")
                }
            }
        };
        fragments.push(fragment);
    }

    if fragments.is_empty() {
        fragments.push(if hebrew {
            "ההתאמה הכוללת הטובה ביותר".to_string()
        } else {
            "best overall match".to_string()
        });
    }

    if hebrew {
        format!("נבחר {}: {}", candidate.name, fragments.join("; "))
    } else {
        format!("Chose {}: {}", candidate.name, fragments.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CareGraphError;
    use crate::state::MemoryFact;
    use std::sync::Mutex;

    struct RecordingCalendar {
        events: Mutex<Vec<CalendarEvent>>,
        fail: bool,
    }

    impl RecordingCalendar {
        fn new(fail: bool) -> Self {
            Self {
                events: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    impl CalendarService for RecordingCalendar {
        fn create_event(&self, event: &CalendarEvent) -> crate::error::Result<String> {
            if self.fail {
                return Err(CareGraphError::Backend("disk full".into()));
            }
            self.events.lock().unwrap().push(event.clone());
            Ok(format!("/data/{}.ics", event.title))
        }
    }

    fn candidate(name: &str) -> ProviderCandidate {
        ProviderCandidate {
            name: name.to_string(),
            phone: "03-1234567".to_string(),
            kind: "clinic".to_string(),
            distance_km: Some(2.3),
            reasons: vec!["~2.3 km away".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_schedule_plan_only_for_schedule_sub_intent() {
        let planner = Planner::new(Arc::new(RecordingCalendar::new(false)));
        let mut state = ConversationState::new(Some("u1"), "when should I take nurofen");
        state.intent = Intent::Meds;
        state.sub_intent = Some(SubIntent::Onset);
        planner.run(&mut state);
        assert!(state.plan.is_none());

        state.sub_intent = Some(SubIntent::Schedule);
        state.memory_facts = vec![MemoryFact::medication("Nurofen")];
        planner.run(&mut state);
        let Plan::MedSchedule { items } = &state.plan else {
            panic!("expected a medication schedule");
        };
        assert_eq!(items.len(), 2);
        assert!(items[0].title.contains("Nurofen"));
        assert!(items[1].time > items[0].time);
    }

    #[test]
    fn test_appointment_plan_books_top_candidate() {
        let calendar = Arc::new(RecordingCalendar::new(false));
        let planner = Planner::new(calendar.clone());
        let mut state = ConversationState::new(Some("u1"), "book a clinic");
        state.language = "en".to_string();
        state.intent = Intent::Appointment;
        state.candidates = vec![candidate("North Clinic"), candidate("South Clinic")];
        planner.run(&mut state);

        let Plan::Appointment {
            provider,
            event_path,
            rationale,
            explanations,
        } = &state.plan
        else {
            panic!("expected an appointment plan");
        };
        assert_eq!(provider.name, "North Clinic");
        assert!(event_path.contains("Visit: North Clinic"));
        assert!(rationale.contains("2.3 km"));
        assert_eq!(explanations, &provider.reasons);

        let events = calendar.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "Visit: North Clinic");
        assert_eq!(events[0].end - events[0].start, Duration::hours(1));
    }

    #[test]
    fn test_calendar_failure_keeps_plan() {
        let planner = Planner::new(Arc::new(RecordingCalendar::new(true)));
        let mut state = ConversationState::new(Some("u1"), "book a clinic");
        state.intent = Intent::Appointment;
        state.candidates = vec![candidate("North Clinic")];
        planner.run(&mut state);
        let Plan::Appointment { event_path, .. } = &state.plan else {
            panic!("expected an appointment plan");
        };
        assert!(event_path.is_empty());
    }

    #[test]
    fn test_no_candidates_yields_no_plan() {
        let planner = Planner::new(Arc::new(RecordingCalendar::new(false)));
        let mut state = ConversationState::new(Some("u1"), "book a clinic");
        state.intent = Intent::Appointment;
        planner.run(&mut state);
        assert!(state.plan.is_none());
    }

    #[test]
    fn test_rationale_localized_to_hebrew() {
        let mut c = candidate("מרפאה צפון");
        c.reason_codes.insert(ReasonCode::TravelWithinLimit);
        let rationale = rationale_for(&c, "he");
        assert!(rationale.starts_with("נבחר"));
        assert!(rationale.contains("בטווח הנסיעה"));
    }

    #[test]
    fn test_rationale_generic_fallback() {
        let mut c = candidate("Clinic");
        c.distance_km = None;
        c.reasons.clear();
        let rationale = rationale_for(&c, "en");
        assert_eq!(rationale, "Chose Clinic: best overall match");
    }
}
