// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! Dispatch & Response Routing (spec.md §4.5, C5): the per-agent
//! request/response state machine. Exactly one in-flight task per agent;
//! dispatch delivery via C4, progress relay, final-response latching, and
//! follow-up messaging.
//!
//! Rate limiting and cost admission (C2) run in the HTTP layer ahead of
//! `dispatch`/`followup` — this router only charges *actual* usage once a
//! response lands, per spec.md §4.5's `on_response` contract. Timeouts are
//! enforced by a background sweep task ([`spawn_timeout_sweeper`]) rather
//! than a per-dispatch timer, mirroring the teacher's single-sweep timer
//! idiom rather than one `tokio::time::sleep` per in-flight task.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::collections::HashMap;
use std::time::Duration;

use ctrlplane_bus::EventBus;
use ctrlplane_core::event::EventDraft;
use ctrlplane_core::model::{validate_content_len, MessageKind};
use ctrlplane_core::{
    AgentId, AgentRegistry, AgentResponseFrame, ControlError, EventType, MessageId,
    OutboundEnvelope, OutboundTransport, ResponseKind, ResponseSink, TaskState,
};
use ctrlplane_governor::CostTracker;
use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    pub start_timeout: Duration,
    pub total_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(30),
            total_timeout: Duration::from_secs(900),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

/// Timing bookkeeping for one in-flight task, used only by the timeout
/// sweep and to match stale `message_id`s. Removed as soon as the task
/// leaves {DISPATCHED, RUNNING} so a finished task is never swept.
struct InFlight {
    message_id: MessageId,
    dispatched_at: Instant,
    progressed: bool,
}

pub struct DispatchRouter {
    config: DispatchConfig,
    registry: std::sync::Arc<AgentRegistry>,
    bus: std::sync::Arc<EventBus>,
    transport: std::sync::Arc<dyn OutboundTransport>,
    cost: std::sync::Arc<CostTracker>,
    in_flight: Mutex<HashMap<AgentId, InFlight>>,
    /// Latched final response content (spec.md §4.5 `last_response`), kept
    /// independently of `in_flight` since it survives task completion but
    /// is never itself subject to the timeout sweep.
    responses: Mutex<HashMap<AgentId, AgentResponseFrame>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DispatchOutcome {
    pub message_id: MessageId,
    pub status: TaskState,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskStatus {
    pub task_state: TaskState,
    pub active_message_id: Option<MessageId>,
    pub last_error: Option<String>,
}

impl DispatchRouter {
    pub fn new(
        config: DispatchConfig,
        registry: std::sync::Arc<AgentRegistry>,
        bus: std::sync::Arc<EventBus>,
        transport: std::sync::Arc<dyn OutboundTransport>,
        cost: std::sync::Arc<CostTracker>,
    ) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            config,
            registry,
            bus,
            transport,
            cost,
            in_flight: Mutex::new(HashMap::new()),
            responses: Mutex::new(HashMap::new()),
        })
    }

    /// `dispatch(agent_id, content, context) -> {message_id, status}`
    /// (spec.md §4.5). Content validation and C1/C2 admission are expected
    /// to have already run in the HTTP layer; this enforces the `task_state`
    /// precondition and hands the envelope to C4.
    pub fn dispatch(
        &self,
        agent_id: &AgentId,
        content: String,
        context: HashMap<String, serde_json::Value>,
    ) -> Result<DispatchOutcome, ControlError> {
        validate_content_len(&content)?;

        let reg = self
            .registry
            .get(agent_id)
            .ok_or_else(|| ControlError::UnknownAgent(agent_id.to_string()))?;
        if !matches!(
            reg.connection_state,
            ctrlplane_core::ConnectionState::Connected
        ) {
            return Err(ControlError::UnknownAgent(agent_id.to_string()));
        }

        let message_id = MessageId::new();
        let admitted = self
            .registry
            .with_mut(agent_id, |r| {
                if !r.task_state.accepts_dispatch() {
                    return false;
                }
                r.task_state = TaskState::Dispatched;
                r.active_message_id = Some(message_id);
                r.last_error = None;
                true
            })
            .unwrap_or(false);
        if !admitted {
            return Err(ControlError::Busy);
        }

        self.in_flight.lock().insert(
            agent_id.clone(),
            InFlight {
                message_id,
                dispatched_at: Instant::now(),
                progressed: false,
            },
        );

        let envelope = OutboundEnvelope {
            message_id,
            kind: MessageKind::Dispatch,
            content,
            context,
        };
        if let Err(e) = self.transport.send(agent_id, envelope) {
            self.fail_task(agent_id, "delivery_failed");
            return Err(e);
        }

        self.bus.publish(
            EventDraft::new(EventType::TaskDispatched, format!("dispatched to {agent_id}"))
                .agent(agent_id.clone())
                .task(message_id)
                .meta("message_id", message_id.to_string()),
        );

        Ok(DispatchOutcome {
            message_id,
            status: TaskState::Dispatched,
        })
    }

    /// `followup(agent_id, content) -> {status}` (spec.md §4.5). Reuses the
    /// active task's `message_id` — this spec freezes that open question
    /// (see DESIGN.md).
    pub fn followup(&self, agent_id: &AgentId, content: String) -> Result<TaskState, ControlError> {
        validate_content_len(&content)?;

        let reg = self
            .registry
            .get(agent_id)
            .ok_or_else(|| ControlError::UnknownAgent(agent_id.to_string()))?;
        if reg.task_state != TaskState::Running {
            return Err(ControlError::NoActiveTask);
        }
        let message_id = reg
            .active_message_id
            .ok_or(ControlError::NoActiveTask)?;

        let envelope = OutboundEnvelope {
            message_id,
            kind: MessageKind::Followup,
            content,
            context: HashMap::new(),
        };
        self.transport.send(agent_id, envelope)?;

        self.bus.publish(
            EventDraft::new(EventType::FollowupSent, format!("followup to {agent_id}"))
                .agent(agent_id.clone())
                .task(message_id),
        );

        Ok(TaskState::Running)
    }

    pub fn status(&self, agent_id: &AgentId) -> Result<TaskStatus, ControlError> {
        let reg = self
            .registry
            .get(agent_id)
            .ok_or_else(|| ControlError::UnknownAgent(agent_id.to_string()))?;
        Ok(TaskStatus {
            task_state: reg.task_state,
            active_message_id: reg.active_message_id,
            last_error: reg.last_error,
        })
    }

    /// The latched final response content, if any (spec.md §4.5
    /// `last_response`). Not surfaced by `status()`; kept for callers that
    /// want the full final content (e.g. a task-detail view).
    pub fn last_response(&self, agent_id: &AgentId) -> Option<AgentResponseFrame> {
        self.responses.lock().get(agent_id).cloned()
    }

    fn fail_task(&self, agent_id: &AgentId, reason: &str) {
        self.registry.with_mut(agent_id, |r| {
            r.task_state = TaskState::Error;
            r.last_error = Some(reason.to_string());
            r.active_message_id = None;
        });
        self.in_flight.lock().remove(agent_id);
    }

    /// Sweep every in-flight task for the start/total timeouts (spec.md
    /// §4.5). Intended to run on a fixed interval from
    /// [`spawn_timeout_sweeper`].
    pub fn sweep_timeouts(&self) {
        let now = Instant::now();
        let expired: Vec<AgentId> = {
            let tasks = self.in_flight.lock();
            tasks
                .iter()
                .filter(|(_, rec)| {
                    let elapsed = now.duration_since(rec.dispatched_at);
                    (!rec.progressed && elapsed >= self.config.start_timeout)
                        || elapsed >= self.config.total_timeout
                })
                .map(|(id, _)| id.clone())
                .collect()
        };
        for agent_id in expired {
            self.fail_task(&agent_id, "timeout");
            self.bus.publish(
                EventDraft::new(
                    EventType::AgentStatusChanged,
                    format!("{agent_id} task timed out"),
                )
                .agent(agent_id.clone())
                .meta("reason", "timeout"),
            );
        }
    }
}

impl ResponseSink for DispatchRouter {
    fn on_progress(&self, agent_id: &AgentId, message_id: MessageId, content: String) {
        let active = {
            let mut tasks = self.in_flight.lock();
            match tasks.get_mut(agent_id) {
                Some(rec) if rec.message_id == message_id => {
                    let first = !rec.progressed;
                    rec.progressed = true;
                    Some(first)
                }
                _ => None,
            }
        };
        let Some(first) = active else {
            tracing::warn!(%agent_id, %message_id, "dropping progress for stale or unknown message_id");
            return;
        };

        if first {
            self.registry.with_mut(agent_id, |r| {
                if r.task_state == TaskState::Dispatched {
                    r.task_state = TaskState::Running;
                }
            });
        }

        self.bus.publish(
            EventDraft::new(EventType::AgentProgress, content.clone())
                .agent(agent_id.clone())
                .task(message_id)
                .meta("content", content.clone())
                .meta("content_length", content.chars().count()),
        );
    }

    fn on_response(&self, agent_id: &AgentId, frame: AgentResponseFrame) {
        let matches = {
            let tasks = self.in_flight.lock();
            tasks
                .get(agent_id)
                .map(|rec| rec.message_id == frame.message_id)
                .unwrap_or(false)
        };
        if !matches {
            tracing::warn!(%agent_id, message_id = %frame.message_id, "dropping response for stale or unknown message_id");
            return;
        }

        let is_error = frame.kind == ResponseKind::Error;
        self.registry.with_mut(agent_id, |r| {
            r.task_state = if is_error { TaskState::Error } else { TaskState::Completed };
            if is_error {
                r.last_error = Some(frame.content.clone());
            }
        });

        if let Some(usage) = frame.usage {
            let cost = self.cost.estimate_tokens(usage.total_tokens);
            let outcome = self.cost.charge(cost);
            self.bus.publish(
                EventDraft::new(EventType::CostTracking, format!("charged ${:.4}", outcome.cost_usd))
                    .agent(agent_id.clone())
                    .meta("cost_usd", outcome.cost_usd)
                    .meta("crossed_warning", outcome.crossed_warning),
            );
        }

        self.bus.publish(
            EventDraft::new(EventType::AgentResponse, frame.content.clone())
                .agent(agent_id.clone())
                .task(frame.message_id)
                .meta("content", frame.content.clone()),
        );

        // The task has left {DISPATCHED, RUNNING}: drop its sweep entry so
        // a completed task is never later mistaken for a timed-out one.
        self.in_flight.lock().remove(agent_id);
        self.responses.lock().insert(agent_id.clone(), frame);
    }

    fn on_agent_disconnected(&self, agent_id: &AgentId) {
        let in_flight = self
            .registry
            .get(agent_id)
            .map(|r| matches!(r.task_state, TaskState::Dispatched | TaskState::Running))
            .unwrap_or(false);
        if in_flight {
            self.fail_task(agent_id, "agent_disconnected");
        }
    }
}

/// Spawn the background timeout sweep (spec.md §4.5 "Timeout policy").
/// `DISPATCH_TIMEOUT_SWEEP_MS` controls `config.sweep_interval`.
pub fn spawn_timeout_sweeper(router: std::sync::Arc<DispatchRouter>) -> tokio::task::JoinHandle<()> {
    let interval = router.config.sweep_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            router.sweep_timeouts();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctrlplane_bus::EventBusConfig;
    use ctrlplane_core::{AgentRegistration, ConnectionState, Usage};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct FakeTransport {
        fail: AtomicBool,
    }

    impl OutboundTransport for FakeTransport {
        fn send(&self, _agent_id: &AgentId, _envelope: OutboundEnvelope) -> Result<(), ControlError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(ControlError::UnknownAgent("gone".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn setup() -> (Arc<DispatchRouter>, Arc<AgentRegistry>, Arc<FakeTransport>) {
        let registry = Arc::new(AgentRegistry::new());
        let agent_id = AgentId::try_from("a1").unwrap();
        let mut reg = AgentRegistration::new(agent_id.clone(), "a1".to_string(), vec![]);
        reg.connection_state = ConnectionState::Connected;
        registry.upsert(reg);
        let bus = Arc::new(EventBus::new(EventBusConfig::default()));
        let transport = Arc::new(FakeTransport {
            fail: AtomicBool::new(false),
        });
        let cost = Arc::new(CostTracker::new(ctrlplane_governor::CostConfig::default()));
        let router = DispatchRouter::new(
            DispatchConfig::default(),
            registry.clone(),
            bus,
            transport.clone(),
            cost,
        );
        (router, registry, transport)
    }

    #[test]
    fn dispatch_then_busy_on_second_dispatch() {
        let (router, _registry, _transport) = setup();
        let agent_id = AgentId::try_from("a1").unwrap();
        let first = router.dispatch(&agent_id, "hi".to_string(), HashMap::new());
        assert!(first.is_ok());
        let second = router.dispatch(&agent_id, "again".to_string(), HashMap::new());
        assert!(matches!(second, Err(ControlError::Busy)));
    }

    #[test]
    fn progress_then_response_transitions_to_completed() {
        let (router, registry, _transport) = setup();
        let agent_id = AgentId::try_from("a1").unwrap();
        let outcome = router.dispatch(&agent_id, "hi".to_string(), HashMap::new()).unwrap();

        router.on_progress(&agent_id, outcome.message_id, "thinking".to_string());
        assert_eq!(registry.get(&agent_id).unwrap().task_state, TaskState::Running);

        router.on_response(
            &agent_id,
            AgentResponseFrame {
                message_id: outcome.message_id,
                kind: ResponseKind::Response,
                content: "hello".to_string(),
                usage: Some(Usage {
                    total_tokens: 20,
                    ..Default::default()
                }),
                timestamp: chrono::Utc::now(),
            },
        );
        assert_eq!(registry.get(&agent_id).unwrap().task_state, TaskState::Completed);
    }

    #[test]
    fn response_with_mismatched_message_id_is_dropped() {
        let (router, registry, _transport) = setup();
        let agent_id = AgentId::try_from("a1").unwrap();
        router.dispatch(&agent_id, "hi".to_string(), HashMap::new()).unwrap();

        router.on_response(
            &agent_id,
            AgentResponseFrame {
                message_id: MessageId::new(),
                kind: ResponseKind::Response,
                content: "stale".to_string(),
                usage: None,
                timestamp: chrono::Utc::now(),
            },
        );
        assert_eq!(registry.get(&agent_id).unwrap().task_state, TaskState::Dispatched);
    }

    #[test]
    fn followup_requires_running_state() {
        let (router, _registry, _transport) = setup();
        let agent_id = AgentId::try_from("a1").unwrap();
        let err = router.followup(&agent_id, "more".to_string()).unwrap_err();
        assert!(matches!(err, ControlError::NoActiveTask));
    }

    #[test]
    fn transport_failure_transitions_to_error_and_surfaces() {
        let (router, registry, transport) = setup();
        transport.fail.store(true, Ordering::SeqCst);
        let agent_id = AgentId::try_from("a1").unwrap();
        let err = router.dispatch(&agent_id, "hi".to_string(), HashMap::new()).unwrap_err();
        assert!(matches!(err, ControlError::UnknownAgent(_)));
        assert_eq!(registry.get(&agent_id).unwrap().task_state, TaskState::Error);
    }
}
