//! Deterministic intent classification.
//!
//! Used as the tie-break when the orchestrator proposes zero or more than
//! one delegation in a turn. Priority is fixed: destructive intents win
//! over mutating ones, which win over additive and read-only ones.

use strum::Display;

/// User intent categories, declared in priority order (highest first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Intent {
    Delete,
    Update,
    Create,
    Retrieve,
    Register,
}

impl Intent {
    /// The handoff agent that serves this intent.
    pub fn handoff_agent_id(&self) -> &'static str {
        match self {
            Intent::Delete => "delete_event_handoff",
            Intent::Update => "update_event_handoff",
            Intent::Create => "create_event_handoff",
            Intent::Retrieve => "retrieve_event_handoff",
            Intent::Register => "register_user_handoff",
        }
    }

    /// The intent a handoff agent serves, if it maps to one.
    pub fn for_agent(agent_id: &str) -> Option<Intent> {
        match agent_id {
            "delete_event_handoff" => Some(Intent::Delete),
            "update_event_handoff" => Some(Intent::Update),
            "create_event_handoff" => Some(Intent::Create),
            "retrieve_event_handoff" => Some(Intent::Retrieve),
            "register_user_handoff" => Some(Intent::Register),
            _ => None,
        }
    }
}

const DELETE_MARKERS: &[&str] = &["delete", "cancel", "remove", "clear my"];
const UPDATE_MARKERS: &[&str] = &["update", "change", "move", "reschedule", "rename", "shift"];
const CREATE_MARKERS: &[&str] = &["create", "schedule", "add", "book", "set up", "plan"];
const RETRIEVE_MARKERS: &[&str] = &[
    "show", "list", "what", "when", "find", "do i have", "look up", "any events",
];
const REGISTER_MARKERS: &[&str] = &["register", "sign up", "signup", "onboard"];

fn matches_any(text: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| text.contains(m))
}

/// Classify a user message into an intent.
///
/// Categories are scanned in the same priority order the `Ord` impl
/// encodes, so "cancel the meeting I just scheduled" resolves to
/// Delete, not Create.
pub fn classify_intent(text: &str) -> Option<Intent> {
    let text = text.to_lowercase();
    [
        (Intent::Delete, DELETE_MARKERS),
        (Intent::Update, UPDATE_MARKERS),
        (Intent::Create, CREATE_MARKERS),
        (Intent::Retrieve, RETRIEVE_MARKERS),
        (Intent::Register, REGISTER_MARKERS),
    ]
    .into_iter()
    .find(|(_, markers)| matches_any(&text, markers))
    .map(|(intent, _)| intent)
}

/// Pick the highest-priority intent from a set of candidate agents.
pub fn highest_priority_agent<'a>(agent_ids: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    agent_ids
        .filter_map(|id| Intent::for_agent(id).map(|intent| (intent, id)))
        .min_by_key(|(intent, _)| *intent)
        .map(|(_, id)| id)
}
