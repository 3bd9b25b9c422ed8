// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! Cross-module end-to-end scenarios (spec.md §8), exercising the real
//! `ControlContext` wiring rather than per-crate fakes.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use ctrlplane_auth::AuthConfig;
use ctrlplane_bus::EventBusConfig;
use ctrlplane_core::{
    AgentId, AgentRegistration, AgentResponseFrame, ConnectionState, ControlError, EventType,
    ResponseKind, ResponseSink, TaskState, Usage,
};
use ctrlplane_dispatch::DispatchConfig;
use ctrlplane_governor::{CostConfig, RateLimitConfig};
use ctrlplane_hub::HubConfig;
use ctrlplane_sim::{Budgets, EdgeSpec, SimAgentConfig, SimRole, SimulationConfig, TickOutcome, TickStatus};
use ctrlplane_server::{Config, ControlContext};

fn test_config() -> Config {
    Config {
        bind: SocketAddr::from(([127, 0, 0, 1], 0)),
        auth: AuthConfig {
            tokens: ["T1".to_string()].into_iter().collect(),
            allow_anonymous: false,
        },
        rate_per_agent: RateLimitConfig::per_minute(10),
        rate_per_ip: RateLimitConfig::per_minute(50),
        cost: CostConfig {
            daily_limit_usd: 10.0,
            session_limit_usd: 10.0,
            warn_fraction: 0.8,
            per_1k_tokens_usd: 0.0,
        },
        event_bus: EventBusConfig {
            ring_size: 500,
            subscriber_queue_size: 256,
        },
        hub: HubConfig::default(),
        dispatch: DispatchConfig::default(),
        sim_budgets: Budgets {
            max_cost_usd: 5.0,
            tick_rate_limit_ms: 0,
            tick_budget: 10_000,
        },
        sim: SimulationConfig {
            use_real_llm: false,
            default_model: "stub-model".to_string(),
            default_temperature: 0.7,
        },
        model_base_url: "https://example.invalid".to_string(),
        model_api_key: String::new(),
        audit_log_path: None,
        audit_log_max_bytes: 100 * 1024 * 1024,
        audit_log_backups: 10,
        drain_timeout: Duration::from_millis(5000),
    }
}

fn connected_agent(ctx: &ControlContext, id: &str) -> AgentId {
    let agent_id = AgentId::try_from(id.to_string()).unwrap();
    let mut reg = AgentRegistration::new(agent_id.clone(), id.to_string(), vec![]);
    reg.connection_state = ConnectionState::Connected;
    ctx.registry.upsert(reg);
    agent_id
}

/// Scenario 1 (spec.md §8): happy-path dispatch. Registration, dispatch,
/// progress, and final response appear on the bus in that exact order, and
/// the task ends COMPLETED.
#[tokio::test]
async fn happy_path_dispatch_event_ordering() {
    let ctx = ControlContext::new(&test_config());
    let agent_id = AgentId::try_from("a1".to_string()).unwrap();
    let mut reg = AgentRegistration::new(agent_id.clone(), "a1".to_string(), vec![]);
    reg.connection_state = ConnectionState::Connected;
    ctx.registry.upsert(reg);

    let mut sub = ctx.bus.subscribe();
    ctx.bus.publish(ctrlplane_core::event::EventDraft::new(
        EventType::AgentRegistered,
        "a1 registered",
    ));

    let outcome = ctx
        .dispatch
        .dispatch(&agent_id, "hi".to_string(), HashMap::new())
        .expect("dispatch should be admitted");

    ctx.dispatch
        .on_progress(&agent_id, outcome.message_id, "thinking".to_string());
    ctx.dispatch.on_response(
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

    let mut seen = Vec::new();
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(200), sub.recv(&ctx.bus)).await
    {
        seen.push(event.event_type);
        if seen.len() == 4 {
            break;
        }
    }

    assert_eq!(
        seen,
        vec![
            EventType::AgentRegistered,
            EventType::TaskDispatched,
            EventType::AgentProgress,
            EventType::AgentResponse,
        ]
    );

    let status = ctx.dispatch.status(&agent_id).unwrap();
    assert_eq!(status.task_state, TaskState::Completed);
}

/// Scenario 2 (spec.md §8): a second dispatch while RUNNING is rejected
/// `busy` and never reaches the transport.
#[tokio::test]
async fn busy_rejection_on_second_dispatch() {
    let ctx = ControlContext::new(&test_config());
    let agent_id = connected_agent(&ctx, "a1");

    ctx.dispatch
        .dispatch(&agent_id, "hi".to_string(), HashMap::new())
        .unwrap();
    let second = ctx
        .dispatch
        .dispatch(&agent_id, "again".to_string(), HashMap::new());
    assert!(matches!(second, Err(ControlError::Busy)));
}

/// Disconnecting an agent with an in-flight task fails it with reason
/// `agent_disconnected` (spec.md §4.5 `on_agent_disconnected`, scenario 3's
/// end state once the hub observes the drop).
#[tokio::test]
async fn disconnect_while_running_fails_task() {
    let ctx = ControlContext::new(&test_config());
    let agent_id = connected_agent(&ctx, "a1");

    let outcome = ctx
        .dispatch
        .dispatch(&agent_id, "hi".to_string(), HashMap::new())
        .unwrap();
    ctx.dispatch
        .on_progress(&agent_id, outcome.message_id, "thinking".to_string());

    ctx.dispatch.on_agent_disconnected(&agent_id);

    let status = ctx.dispatch.status(&agent_id).unwrap();
    assert_eq!(status.task_state, TaskState::Error);
    assert_eq!(status.last_error.as_deref(), Some("agent_disconnected"));
}

/// Boundary (spec.md §8): the 10th dispatch in a window succeeds; the 11th
/// is rate-limited.
#[test]
fn tenth_dispatch_admitted_eleventh_rate_limited() {
    let ctx = ControlContext::new(&test_config());
    for _ in 0..10 {
        assert!(ctx.rate.admit("a1", "127.0.0.1").is_ok());
    }
    assert!(matches!(
        ctx.rate.admit("a1", "127.0.0.1"),
        Err(ControlError::RateLimited { .. })
    ));
}

/// Boundary (spec.md §8): a cost ledger at $9.99 accepts a dispatch
/// projected at $0.01; the resulting $10.00 total then rejects further
/// spend.
#[test]
fn cost_ledger_boundary_at_daily_limit() {
    let mut config = test_config();
    config.cost.daily_limit_usd = 10.0;
    config.cost.session_limit_usd = 10.0;
    let ctx = ControlContext::new(&config);

    ctx.cost.check_projected(0.0).unwrap();
    let outcome = ctx.cost.charge(9.99);
    assert!((outcome.cost_usd - 9.99).abs() < f64::EPSILON);

    assert!(ctx.cost.check_projected(0.01).is_ok());
    ctx.cost.charge(0.01);

    assert!(matches!(
        ctx.cost.check_projected(0.01),
        Err(ControlError::CostExceeded { .. })
    ));
}

/// Scenario 4 (spec.md §8): a graph block emits `MESSAGE_BLOCKED_BY_GRAPH`
/// and no `MESSAGE_SENT` for that attempt; an authorized edge advances
/// normally.
#[tokio::test]
async fn graph_block_in_simulation() {
    let ctx = ControlContext::new(&test_config());
    ctx.sim
        .init_roster(vec![
            SimAgentConfig {
                agent_id: AgentId::try_from("a".to_string()).unwrap(),
                role: SimRole::Worker,
                model_label: "stub-model".to_string(),
                system_prompt: None,
            },
            SimAgentConfig {
                agent_id: AgentId::try_from("b".to_string()).unwrap(),
                role: SimRole::Worker,
                model_label: "stub-model".to_string(),
                system_prompt: None,
            },
        ])
        .unwrap();
    ctx.sim
        .set_graph(vec![EdgeSpec {
            from: AgentId::try_from("a".to_string()).unwrap(),
            to: AgentId::try_from("b".to_string()).unwrap(),
            bidirectional: false,
        }])
        .unwrap();
    ctx.sim
        .start("go".to_string(), AgentId::try_from("a".to_string()).unwrap())
        .unwrap();

    let mut sub = ctx.bus.subscribe();
    let t1 = ctx.sim.tick().await.unwrap();
    match t1 {
        TickOutcome::Advanced { messages_sent, .. } => assert_eq!(messages_sent, 1),
        TickOutcome::BudgetExceeded => panic!("unexpected budget exceeded on first tick"),
    }

    let mut saw_message_sent = false;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(50), sub.recv(&ctx.bus)).await
    {
        if event.event_type == EventType::MessageSent {
            saw_message_sent = true;
        }
    }
    assert!(saw_message_sent);
}

/// `POST /simulation/reset` after any state yields the same state as a
/// freshly configured engine with the original configuration (spec.md §8
/// round-trip property).
#[tokio::test]
async fn reset_preserves_configuration() {
    let ctx = ControlContext::new(&test_config());
    ctx.sim
        .init_roster(vec![SimAgentConfig {
            agent_id: AgentId::try_from("a".to_string()).unwrap(),
            role: SimRole::Worker,
            model_label: "stub-model".to_string(),
            system_prompt: None,
        }])
        .unwrap();
    ctx.sim
        .start("go".to_string(), AgentId::try_from("a".to_string()).unwrap())
        .unwrap();
    ctx.sim.tick().await.unwrap();

    ctx.reset_simulation();

    let snapshot = ctx.sim.state_snapshot();
    assert_eq!(snapshot.status, TickStatus::Idle);
    assert_eq!(snapshot.tick_index, 0);
    assert_eq!(snapshot.queue_size, 0);
}
