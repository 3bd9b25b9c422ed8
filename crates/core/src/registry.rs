// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! The agent table: the single source of truth for registration and task
//! state, owned by the Control Context (spec.md §3 "Ownership").
//!
//! Readers take a shared lock; only the Connection Hub (registration) and
//! Dispatch Router (task-state transitions) take the exclusive lock, per
//! spec.md §5.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::ids::{AgentId, MessageId};
use crate::model::{AgentRegistration, ConnectionState, TaskState};

#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<AgentId, AgentRegistration>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or atomically replace the registration for `agent_id`.
    /// Returns the prior registration, if any (used by the hub to decide
    /// whether an existing live connection must be closed with
    /// `4004 agent_replaced`).
    pub fn upsert(&self, mut reg: AgentRegistration) -> Option<AgentRegistration> {
        reg.connection_state = ConnectionState::Connected;
        reg.connected_at = Some(Utc::now());
        reg.task_state = TaskState::Idle;
        reg.active_message_id = None;
        let mut guard = self.agents.write();
        guard.insert(reg.agent_id.clone(), reg)
    }

    /// Pre-register metadata only (no live socket yet); idempotent per
    /// spec.md §4.6 `POST /agents/register`.
    pub fn preregister(&self, agent_id: AgentId, display_name: String, capabilities: Vec<String>) {
        let mut guard = self.agents.write();
        guard
            .entry(agent_id.clone())
            .and_modify(|r| {
                r.display_name = display_name.clone();
                r.capabilities = capabilities.clone();
            })
            .or_insert_with(|| AgentRegistration::new(agent_id, display_name, capabilities));
    }

    pub fn get(&self, agent_id: &AgentId) -> Option<AgentRegistration> {
        self.agents.read().get(agent_id).cloned()
    }

    pub fn list(&self) -> Vec<AgentRegistration> {
        let mut v: Vec<_> = self.agents.read().values().cloned().collect();
        v.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        v
    }

    pub fn mark_heartbeat(&self, agent_id: &AgentId) {
        if let Some(r) = self.agents.write().get_mut(agent_id) {
            r.last_heartbeat_at = Some(Utc::now());
        }
    }

    pub fn mark_disconnected(&self, agent_id: &AgentId) {
        if let Some(r) = self.agents.write().get_mut(agent_id) {
            r.connection_state = ConnectionState::Disconnected;
        }
    }

    /// Apply a task-state mutation under the write lock, returning whatever
    /// the closure returns (used by the dispatch router to make the
    /// read-modify-write atomic).
    pub fn with_mut<R>(&self, agent_id: &AgentId, f: impl FnOnce(&mut AgentRegistration) -> R) -> Option<R> {
        let mut guard = self.agents.write();
        guard.get_mut(agent_id).map(f)
    }

    pub fn contains(&self, agent_id: &AgentId) -> bool {
        self.agents.read().contains_key(agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg(id: &str) -> AgentRegistration {
        AgentRegistration::new(AgentId::try_from(id).unwrap(), id.to_string(), vec![])
    }

    #[test]
    fn reregistering_replaces_prior_record_atomically() {
        let table = AgentRegistry::new();
        let first = table.upsert(reg("a1"));
        assert!(first.is_none());
        table.with_mut(&AgentId::try_from("a1").unwrap(), |r| {
            r.task_state = TaskState::Running;
        });
        let prior = table.upsert(reg("a1"));
        assert!(prior.is_some());
        // Replacement resets task state — no prior in-flight task survives.
        let current = table.get(&AgentId::try_from("a1").unwrap()).unwrap();
        assert_eq!(current.task_state, TaskState::Idle);
    }
}
