// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! Simulation data model (spec.md §3 "Simulation State"): the agent roster,
//! the directed flow graph, the message queue, conversation windows, and
//! budgets — distinct from, but co-resident with, the live Control Context.

use std::collections::{HashSet, VecDeque};

use ctrlplane_core::AgentId;
use serde::{Deserialize, Serialize};

/// A role tag for a simulated agent; selects the default system prompt and
/// is surfaced in `MESSAGE_SENT` metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimRole {
    Orchestrator,
    Worker,
    Reviewer,
    Fixer,
    Foreman,
}

impl SimRole {
    pub fn as_str(self) -> &'static str {
        match self {
            SimRole::Orchestrator => "orchestrator",
            SimRole::Worker => "worker",
            SimRole::Reviewer => "reviewer",
            SimRole::Fixer => "fixer",
            SimRole::Foreman => "foreman",
        }
    }
}

/// One entry of the roster (spec.md §3 `sim_agents`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimAgentConfig {
    pub agent_id: AgentId,
    pub role: SimRole,
    pub model_label: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

/// The roster, kept in registration order — this order is what "stable
/// roster order" means when the engine picks deterministic reply targets
/// (spec.md §4.7 step 7).
#[derive(Debug, Clone, Default)]
pub struct Roster {
    agents: Vec<SimAgentConfig>,
}

impl Roster {
    pub fn new(agents: Vec<SimAgentConfig>) -> Self {
        Self { agents }
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn contains(&self, agent_id: &AgentId) -> bool {
        self.agents.iter().any(|a| &a.agent_id == agent_id)
    }

    pub fn get(&self, agent_id: &AgentId) -> Option<&SimAgentConfig> {
        self.agents.iter().find(|a| &a.agent_id == agent_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SimAgentConfig> {
        self.agents.iter()
    }
}

/// A directed edge `(from, to)` in the flow graph (spec.md §3 `flow_graph`).
#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    edges: HashSet<(AgentId, AgentId)>,
}

/// One edge declaration as accepted by `POST /simulation/graph`; `bidirectional
/// = true` is sugar that expands to two directed edges (spec.md §4.6).
#[derive(Debug, Clone, Deserialize)]
pub struct EdgeSpec {
    pub from: AgentId,
    pub to: AgentId,
    #[serde(default)]
    pub bidirectional: bool,
}

impl FlowGraph {
    pub fn from_specs(specs: Vec<EdgeSpec>) -> Self {
        let mut edges = HashSet::new();
        for spec in specs {
            edges.insert((spec.from.clone(), spec.to.clone()));
            if spec.bidirectional {
                edges.insert((spec.to, spec.from));
            }
        }
        Self { edges }
    }

    pub fn has_edge(&self, from: &AgentId, to: &AgentId) -> bool {
        self.edges.contains(&(from.clone(), to.clone()))
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Outbound neighbors of `from`, ordered by the roster's registration
    /// order rather than edge-insertion order, so reply fan-out is
    /// reproducible regardless of how `/simulation/graph` was called
    /// (spec.md §4.7 step 7).
    pub fn outbound_in_roster_order(&self, from: &AgentId, roster: &Roster) -> Vec<AgentId> {
        roster
            .iter()
            .map(|a| a.agent_id.clone())
            .filter(|candidate| self.has_edge(from, candidate))
            .collect()
    }

    pub fn edge_list(&self) -> Vec<(AgentId, AgentId)> {
        let mut v: Vec<_> = self.edges.iter().cloned().collect();
        v.sort();
        v
    }
}

/// A pending delivery in the FIFO queue (spec.md §3 `message_queue`).
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub from: AgentId,
    pub to: AgentId,
    pub content: String,
    pub enqueued_tick: u64,
}

#[derive(Debug, Default)]
pub struct MessageQueue {
    inner: VecDeque<QueuedMessage>,
}

impl MessageQueue {
    pub fn push_back(&mut self, msg: QueuedMessage) {
        self.inner.push_back(msg);
    }

    pub fn pop_front(&mut self) -> Option<QueuedMessage> {
        self.inner.pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn back(&self) -> Option<&QueuedMessage> {
        self.inner.back()
    }
}

/// One turn in an agent's bounded conversation window (spec.md §3
/// `conversations`, cap 20 entries per agent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: ConversationRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationRole {
    User,
    Assistant,
}

pub const CONVERSATION_CAP: usize = 20;

#[derive(Debug, Default)]
pub struct Conversation {
    entries: VecDeque<ConversationEntry>,
}

impl Conversation {
    pub fn push(&mut self, entry: ConversationEntry) {
        if self.entries.len() >= CONVERSATION_CAP {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn entries(&self) -> impl Iterator<Item = &ConversationEntry> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<ConversationEntry> {
        self.entries.iter().cloned().collect()
    }
}

/// Budget configuration and running spend (spec.md §3 `budgets`).
#[derive(Debug, Clone, Copy)]
pub struct Budgets {
    pub max_cost_usd: f64,
    pub tick_rate_limit_ms: u64,
    pub tick_budget: u64,
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            max_cost_usd: 5.0,
            tick_rate_limit_ms: 0,
            tick_budget: 10_000,
        }
    }
}

/// Engine lifecycle state (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickStatus {
    Idle,
    Running,
    Paused,
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aid(s: &str) -> AgentId {
        AgentId::try_from(s).unwrap()
    }

    #[test]
    fn bidirectional_sugar_expands_to_two_edges() {
        let graph = FlowGraph::from_specs(vec![EdgeSpec {
            from: aid("a"),
            to: aid("b"),
            bidirectional: true,
        }]);
        assert!(graph.has_edge(&aid("a"), &aid("b")));
        assert!(graph.has_edge(&aid("b"), &aid("a")));
    }

    #[test]
    fn outbound_order_follows_roster_not_edge_insertion() {
        let roster = Roster::new(vec![
            SimAgentConfig {
                agent_id: aid("c"),
                role: SimRole::Worker,
                model_label: "m".into(),
                system_prompt: None,
            },
            SimAgentConfig {
                agent_id: aid("b"),
                role: SimRole::Worker,
                model_label: "m".into(),
                system_prompt: None,
            },
        ]);
        let graph = FlowGraph::from_specs(vec![
            EdgeSpec { from: aid("a"), to: aid("b"), bidirectional: false },
            EdgeSpec { from: aid("a"), to: aid("c"), bidirectional: false },
        ]);
        let neighbors = graph.outbound_in_roster_order(&aid("a"), &roster);
        assert_eq!(neighbors, vec![aid("c"), aid("b")]);
    }

    #[test]
    fn conversation_window_caps_at_20() {
        let mut convo = Conversation::default();
        for i in 0..25 {
            convo.push(ConversationEntry {
                role: ConversationRole::User,
                content: format!("msg{i}"),
            });
        }
        let entries = convo.to_vec();
        assert_eq!(entries.len(), CONVERSATION_CAP);
        assert_eq!(entries[0].content, "msg5");
    }
}
