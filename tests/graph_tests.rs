//! Delegation graph validation and built-in catalog shape.

use valet::agents::{builtin_graph, AgentDefinition, AgentGraph, Intent, ToolRef};
use valet::profile::ModelTier;

fn agent(id: &str, tools: Vec<ToolRef>) -> AgentDefinition {
    AgentDefinition::new(
        id,
        id.to_string(),
        format!("You are {id}."),
        format!("Handles {id}."),
        ModelTier::Fast,
        tools,
    )
}

#[test]
fn builtin_graph_is_three_tiers() {
    let graph = builtin_graph().expect("builtin graph");

    assert_eq!(graph.root().id, "orchestrator");
    assert_eq!(graph.depth_of("orchestrator"), Some(0));

    for handoff in [
        "create_event_handoff",
        "retrieve_event_handoff",
        "update_event_handoff",
        "delete_event_handoff",
        "register_user_handoff",
    ] {
        assert_eq!(graph.depth_of(handoff), Some(1), "{handoff}");
    }

    for atomic in ["parse_event_text", "create_event", "retrieve_event"] {
        assert_eq!(graph.depth_of(atomic), Some(2), "{atomic}");
    }
}

#[test]
fn every_intent_maps_to_a_builtin_handoff() {
    let graph = builtin_graph().expect("builtin graph");
    for intent in [
        Intent::Delete,
        Intent::Update,
        Intent::Create,
        Intent::Retrieve,
        Intent::Register,
    ] {
        assert!(
            graph.agent(intent.handoff_agent_id()).is_some(),
            "no agent for {intent}"
        );
    }
}

#[test]
fn exposed_tool_names_are_unique_per_agent() {
    let graph = builtin_graph().expect("builtin graph");
    for id in [
        "orchestrator",
        "create_event_handoff",
        "retrieve_event_handoff",
        "update_event_handoff",
        "delete_event_handoff",
        "register_user_handoff",
    ] {
        let agent = graph.agent(id).expect(id);
        let mut names: Vec<_> = agent.tools.iter().map(|t| t.exposed_name()).collect();
        let before = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), before, "duplicate tool name on {id}");
    }
}

#[test]
fn graph_rejects_depth_beyond_two() {
    let err = AgentGraph::new(
        vec![
            agent("root", vec![ToolRef::agent("a", "a_tool")]),
            agent("a", vec![ToolRef::agent("b", "b_tool")]),
            agent("b", vec![ToolRef::agent("c", "c_tool")]),
            agent("c", vec![]),
        ],
        "root",
    )
    .expect_err("depth 3 must fail");
    assert!(err.to_string().contains("max depth"));
}

#[test]
fn graph_rejects_cycles_and_unknown_references() {
    let cycle = AgentGraph::new(
        vec![
            agent("root", vec![ToolRef::agent("a", "a_tool")]),
            agent("a", vec![ToolRef::agent("root", "root_tool")]),
        ],
        "root",
    )
    .expect_err("cycle must fail");
    assert!(cycle.to_string().contains("cycle"));

    let unknown = AgentGraph::new(
        vec![agent("root", vec![ToolRef::agent("ghost", "ghost_tool")])],
        "root",
    )
    .expect_err("unknown reference must fail");
    assert!(unknown.to_string().contains("ghost"));
}

#[test]
fn self_delegation_is_a_cycle() {
    let err = AgentGraph::new(
        vec![agent("root", vec![ToolRef::agent("root", "again")])],
        "root",
    )
    .expect_err("self reference must fail");
    assert!(err.to_string().contains("cycle"));
}
