//! The delegation graph and its startup validation.

use std::collections::{HashMap, HashSet};

use crate::error::{Result, ValetError};

use super::{AgentDefinition, ToolRef, MAX_DELEGATION_DEPTH};

/// A validated set of agents rooted at the orchestrator.
///
/// Construction runs the structural checks once; a graph that exists is
/// a graph that is acyclic, depth-bounded, and fully resolvable.
#[derive(Debug, Clone)]
pub struct AgentGraph {
    agents: HashMap<String, AgentDefinition>,
    root: String,
}

impl AgentGraph {
    /// Build and validate a graph. Fails fast on unknown references,
    /// cycles, or delegation deeper than [`MAX_DELEGATION_DEPTH`].
    pub fn new(agents: Vec<AgentDefinition>, root: impl Into<String>) -> Result<Self> {
        let root = root.into();
        let map: HashMap<String, AgentDefinition> = agents
            .into_iter()
            .map(|a| (a.id.clone(), a))
            .collect();

        let graph = Self { agents: map, root };
        graph.validate()?;
        Ok(graph)
    }

    pub fn root(&self) -> &AgentDefinition {
        // Validated at construction.
        &self.agents[&self.root]
    }

    pub fn agent(&self, id: &str) -> Option<&AgentDefinition> {
        self.agents.get(id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Depth of an agent below the root, if reachable.
    pub fn depth_of(&self, id: &str) -> Option<usize> {
        fn walk(
            graph: &AgentGraph,
            current: &str,
            target: &str,
            depth: usize,
        ) -> Option<usize> {
            if current == target {
                return Some(depth);
            }
            let agent = graph.agents.get(current)?;
            for tool in agent.agent_refs() {
                if let ToolRef::AgentTool { agent_id, .. } = tool {
                    if let Some(found) = walk(graph, agent_id, target, depth + 1) {
                        return Some(found);
                    }
                }
            }
            None
        }
        walk(self, &self.root, id, 0)
    }

    fn validate(&self) -> Result<()> {
        if !self.agents.contains_key(&self.root) {
            return Err(ValetError::Graph(format!(
                "root agent '{}' is not defined",
                self.root
            )));
        }

        for agent in self.agents.values() {
            for tool in agent.agent_refs() {
                if let ToolRef::AgentTool { agent_id, .. } = tool {
                    if !self.agents.contains_key(agent_id) {
                        return Err(ValetError::Graph(format!(
                            "agent '{}' references unknown agent '{agent_id}'",
                            agent.id
                        )));
                    }
                }
            }
        }

        self.check_depth_and_cycles(&self.root, 0, &mut HashSet::new())
    }

    fn check_depth_and_cycles(
        &self,
        id: &str,
        depth: usize,
        path: &mut HashSet<String>,
    ) -> Result<()> {
        if depth > MAX_DELEGATION_DEPTH {
            return Err(ValetError::Graph(format!(
                "delegation from '{id}' exceeds max depth {MAX_DELEGATION_DEPTH}"
            )));
        }
        if !path.insert(id.to_string()) {
            return Err(ValetError::Graph(format!(
                "delegation cycle through agent '{id}'"
            )));
        }

        let agent = self
            .agents
            .get(id)
            .ok_or_else(|| ValetError::Graph(format!("unknown agent '{id}'")))?;

        for tool in agent.agent_refs() {
            if let ToolRef::AgentTool { agent_id, .. } = tool {
                self.check_depth_and_cycles(agent_id, depth + 1, path)?;
            }
        }

        path.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ModelTier;

    fn agent(id: &str, tools: Vec<ToolRef>) -> AgentDefinition {
        AgentDefinition::new(
            id,
            id.replace('_', " "),
            format!("You are {id}."),
            format!("Handles {id}."),
            ModelTier::Fast,
            tools,
        )
    }

    #[test]
    fn three_tier_graph_validates() {
        let graph = AgentGraph::new(
            vec![
                agent("root", vec![ToolRef::agent("mid", "mid_tool")]),
                agent("mid", vec![ToolRef::agent("leaf_agent", "leaf_tool")]),
                agent("leaf_agent", vec![ToolRef::leaf("get_event")]),
            ],
            "root",
        )
        .unwrap();
        assert_eq!(graph.depth_of("root"), Some(0));
        assert_eq!(graph.depth_of("mid"), Some(1));
        assert_eq!(graph.depth_of("leaf_agent"), Some(2));
    }

    #[test]
    fn depth_beyond_two_is_rejected() {
        let err = AgentGraph::new(
            vec![
                agent("root", vec![ToolRef::agent("a", "a_tool")]),
                agent("a", vec![ToolRef::agent("b", "b_tool")]),
                agent("b", vec![ToolRef::agent("c", "c_tool")]),
                agent("c", vec![]),
            ],
            "root",
        )
        .unwrap_err();
        assert!(err.to_string().contains("max depth"));
    }

    #[test]
    fn cycles_are_rejected() {
        let err = AgentGraph::new(
            vec![
                agent("root", vec![ToolRef::agent("a", "a_tool")]),
                agent("a", vec![ToolRef::agent("root", "root_tool")]),
            ],
            "root",
        )
        .unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn unknown_reference_is_rejected() {
        let err = AgentGraph::new(
            vec![agent("root", vec![ToolRef::agent("ghost", "ghost_tool")])],
            "root",
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown agent 'ghost'"));
    }

    #[test]
    fn missing_root_is_rejected() {
        let err = AgentGraph::new(vec![agent("a", vec![])], "root").unwrap_err();
        assert!(err.to_string().contains("root agent"));
    }
}
