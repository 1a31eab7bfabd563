//! The built-in three-tier agent catalog.
//!
//! Tier 0: the orchestrator routes each request to exactly one handoff.
//! Tier 1: handoff agents own one workflow (create, retrieve, update,
//! delete, register) and compose atomic agents with leaf tools.
//! Tier 2: atomic agents wrap a single operation with focused
//! instructions and never delegate further.

use crate::error::Result;
use crate::profile::ModelTier;

use super::graph::AgentGraph;
use super::{AgentDefinition, ToolRef};

pub const ORCHESTRATOR_ID: &str = "orchestrator";

fn orchestrator() -> AgentDefinition {
    AgentDefinition::new(
        ORCHESTRATOR_ID,
        "Ally",
        "You are Ally, a calendar assistant. Route the user's request to \
         exactly one of your workflow tools per turn: create_event_workflow, \
         retrieve_event_workflow, update_event_workflow, delete_event_workflow, \
         or register_user_workflow. If the user is not registered yet, route \
         to register_user_workflow first. If a workflow reports that \
         authorization is required, call generate_auth_url and give the user \
         the link. After a workflow returns, answer the user in plain language.",
        "Top-level router for calendar requests.",
        ModelTier::Balanced,
        vec![
            ToolRef::agent("create_event_handoff", "create_event_workflow"),
            ToolRef::agent("retrieve_event_handoff", "retrieve_event_workflow"),
            ToolRef::agent("update_event_handoff", "update_event_workflow"),
            ToolRef::agent("delete_event_handoff", "delete_event_workflow"),
            ToolRef::agent("register_user_handoff", "register_user_workflow"),
            ToolRef::leaf("generate_auth_url"),
        ],
    )
}

fn create_event_handoff() -> AgentDefinition {
    AgentDefinition::new(
        "create_event_handoff",
        "Event Creator",
        "You create calendar events. First call parse_event_text to extract \
         structured fields from the request, and pre_create_validation to \
         check the user, timezone, calendar, and conflicts; these may run in \
         parallel. Then call create_event with the parsed fields. Report \
         conflicts instead of double-booking unless the user insisted.",
        "Creates a calendar event from a natural-language request.",
        ModelTier::Fast,
        vec![
            ToolRef::agent("parse_event_text", "parse_event_text"),
            ToolRef::leaf("pre_create_validation"),
            ToolRef::agent("create_event", "create_event"),
        ],
    )
    .with_parallel_tool_calls()
}

fn retrieve_event_handoff() -> AgentDefinition {
    AgentDefinition::new(
        "retrieve_event_handoff",
        "Event Finder",
        "You answer questions about the user's schedule. Call retrieve_event \
         with the relevant window or query, then summarize what you found \
         concisely. Say so plainly when nothing matches.",
        "Looks up and summarizes calendar events.",
        ModelTier::Fast,
        vec![
            ToolRef::agent("retrieve_event", "retrieve_event"),
            ToolRef::leaf("get_timezone"),
        ],
    )
}

fn update_event_handoff() -> AgentDefinition {
    AgentDefinition::new(
        "update_event_handoff",
        "Event Updater",
        "You modify existing events. Call retrieve_event to find the event \
         the user means, then modify_event with its id and the changed \
         fields. Never guess an event id.",
        "Finds and updates an existing event.",
        ModelTier::Fast,
        vec![
            ToolRef::agent("retrieve_event", "retrieve_event"),
            ToolRef::agent("update_event", "modify_event"),
        ],
    )
    .with_required_tool_choice()
}

fn delete_event_handoff() -> AgentDefinition {
    AgentDefinition::new(
        "delete_event_handoff",
        "Event Remover",
        "You delete events. Call retrieve_event to identify the exact event, \
         then remove_event with its id. If more than one event matches, ask \
         which one instead of deleting.",
        "Finds and deletes an existing event.",
        ModelTier::Fast,
        vec![
            ToolRef::agent("retrieve_event", "retrieve_event"),
            ToolRef::agent("delete_event", "remove_event"),
        ],
    )
}

fn register_user_handoff() -> AgentDefinition {
    AgentDefinition::new(
        "register_user_handoff",
        "Onboarding",
        "You register new users. Call validate_user first; if the user is \
         already registered, say so. Otherwise call enroll_user with their \
         email. If enrollment reports needs_auth, give the user the \
         consent link.",
        "Validates and registers a new user.",
        ModelTier::Fast,
        vec![
            ToolRef::leaf("validate_user"),
            ToolRef::agent("register_user_agent", "enroll_user"),
        ],
    )
}

fn parse_event_text() -> AgentDefinition {
    AgentDefinition::new(
        "parse_event_text",
        "Event Parser",
        "Extract event fields from the text you are given. Respond with only \
         a JSON object: {\"summary\", \"start\", \"end\", \"location\", \
         \"description\"}. Dates must be RFC 3339. Omit fields you cannot \
         determine. No prose.",
        "Extracts structured event fields from natural language.",
        ModelTier::Fast,
        vec![],
    )
}

fn create_event_agent() -> AgentDefinition {
    AgentDefinition::new(
        "create_event",
        "Event Writer",
        "Create the event described by your input by calling insert_event. \
         Use the fields exactly as given; do not invent attendees or times.",
        "Writes a single event to the calendar.",
        ModelTier::Fast,
        vec![ToolRef::leaf("insert_event")],
    )
    .with_required_tool_choice()
}

fn retrieve_event_agent() -> AgentDefinition {
    AgentDefinition::new(
        "retrieve_event",
        "Event Reader",
        "Find the events described by your input by calling get_event. Use \
         summarize_events when the caller asked for prose. Return the tool \
         output without editorializing.",
        "Reads events matching a query or window.",
        ModelTier::Fast,
        vec![ToolRef::leaf("get_event"), ToolRef::leaf("summarize_events")],
    )
    .with_required_tool_choice()
}

fn update_event_agent() -> AgentDefinition {
    AgentDefinition::new(
        "update_event",
        "Event Editor",
        "Apply the described change by calling update_event with the event \
         id and only the fields that change.",
        "Applies a field-level update to one event.",
        ModelTier::Fast,
        vec![ToolRef::leaf("update_event")],
    )
    .with_required_tool_choice()
}

fn delete_event_agent() -> AgentDefinition {
    AgentDefinition::new(
        "delete_event",
        "Event Eraser",
        "Delete the event identified by your input by calling delete_event \
         with its id. Never delete without an id.",
        "Deletes one event by id.",
        ModelTier::Fast,
        vec![ToolRef::leaf("delete_event")],
    )
    .with_required_tool_choice()
}

fn register_user_agent() -> AgentDefinition {
    AgentDefinition::new(
        "register_user_agent",
        "Enrollment",
        "Register the user by calling register_user with their email. Relay \
         the status you get back, including any consent URL.",
        "Registers a user by email.",
        ModelTier::Fast,
        vec![ToolRef::leaf("register_user")],
    )
    .with_required_tool_choice()
}

/// Build the validated built-in graph.
pub fn builtin_graph() -> Result<AgentGraph> {
    AgentGraph::new(
        vec![
            orchestrator(),
            create_event_handoff(),
            retrieve_event_handoff(),
            update_event_handoff(),
            delete_event_handoff(),
            register_user_handoff(),
            parse_event_text(),
            create_event_agent(),
            retrieve_event_agent(),
            update_event_agent(),
            delete_event_agent(),
            register_user_agent(),
        ],
        ORCHESTRATOR_ID,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::intent::Intent;

    #[test]
    fn builtin_graph_is_valid() {
        let graph = builtin_graph().unwrap();
        assert_eq!(graph.root().id, ORCHESTRATOR_ID);
        assert_eq!(graph.depth_of("create_event_handoff"), Some(1));
        assert_eq!(graph.depth_of("insert_event"), None); // leaf tools are not agents
        assert_eq!(graph.depth_of("create_event"), Some(2));
    }

    #[test]
    fn every_intent_has_a_handoff() {
        let graph = builtin_graph().unwrap();
        for intent in [
            Intent::Delete,
            Intent::Update,
            Intent::Create,
            Intent::Retrieve,
            Intent::Register,
        ] {
            let id = intent.handoff_agent_id();
            assert!(graph.agent(id).is_some(), "missing handoff for {intent}");
            assert_eq!(graph.depth_of(id), Some(1));
        }
    }

    #[test]
    fn atomic_agents_never_delegate() {
        let graph = builtin_graph().unwrap();
        for id in [
            "parse_event_text",
            "create_event",
            "retrieve_event",
            "update_event",
            "delete_event",
            "register_user_agent",
        ] {
            let agent = graph.agent(id).unwrap();
            assert_eq!(agent.agent_refs().count(), 0, "{id} delegates");
        }
    }
}
