// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! The Control Context (spec.md §4.8, C8): the single in-process root
//! created once at startup, owning every other component. No persistence;
//! `reset-simulation` clears simulation state but preserves its
//! configuration; there is no multi-tenant separation.

use std::sync::Arc;

use ctrlplane_auth::{AuditSink, Validator};
use ctrlplane_bus::EventBus;
use ctrlplane_core::AgentRegistry;
use ctrlplane_dispatch::DispatchRouter;
use ctrlplane_governor::{CostTracker, RateGovernor};
use ctrlplane_hub::ConnectionHub;
use ctrlplane_sim::{ModelBackend, RealModelBackend, SimulationEngine, StubModelBackend};

use crate::config::Config;

/// `GET /control/context` response body (spec.md §4.6).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ContextSummary {
    pub control_session_id: uuid::Uuid,
    pub cost: CostSummary,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CostSummary {
    pub context_total: f64,
    pub daily_total: f64,
    pub session_limit_usd: f64,
    pub daily_limit_usd: f64,
}

/// Owns the agent table, event bus, cost ledgers, connection hub, dispatch
/// router, and simulation engine for this process's single logical operator
/// (spec.md §4.8). Created once at process start; never persisted.
pub struct ControlContext {
    pub control_session_id: uuid::Uuid,
    pub config: Config,
    pub registry: Arc<AgentRegistry>,
    pub bus: Arc<EventBus>,
    pub validator: Arc<Validator>,
    pub audit: Arc<AuditSink>,
    pub rate: Arc<RateGovernor>,
    pub cost: Arc<CostTracker>,
    pub hub: Arc<ConnectionHub>,
    pub dispatch: Arc<DispatchRouter>,
    pub sim: Arc<SimulationEngine>,
}

impl ControlContext {
    /// Build every component in dependency order (spec.md §2: C1, C2, C3 →
    /// C4 → C5 → C8 → C7) and wire the hub/dispatch-router cycle through
    /// `ctrlplane_core::ports` (spec.md §4.4 design note).
    pub fn new(config: &Config) -> Self {
        let registry = Arc::new(AgentRegistry::new());
        let bus = Arc::new(EventBus::new(config.event_bus));
        let validator = Arc::new(Validator::new(config.auth.clone()));
        let audit = Arc::new(match &config.audit_log_path {
            Some(path) => AuditSink::to_file(path.clone(), config.audit_log_max_bytes, config.audit_log_backups),
            None => AuditSink::tracing_only(),
        });
        let rate = Arc::new(RateGovernor::new(config.rate_per_agent, config.rate_per_ip));
        let cost = Arc::new(CostTracker::new(config.cost));

        let hub = Arc::new(ConnectionHub::new(
            config.hub,
            registry.clone(),
            bus.clone(),
            validator.clone(),
            audit.clone(),
        ));

        let dispatch = DispatchRouter::new(
            config.dispatch,
            registry.clone(),
            bus.clone(),
            hub.transport(),
            cost.clone(),
        );
        hub.set_response_sink(dispatch.clone() as Arc<dyn ctrlplane_core::ResponseSink>);

        let backend: Arc<dyn ModelBackend> = if config.sim.use_real_llm {
            Arc::new(RealModelBackend::new(
                config.model_base_url.clone(),
                config.model_api_key.clone(),
            ))
        } else {
            Arc::new(StubModelBackend)
        };

        let sim = Arc::new(SimulationEngine::new(
            bus.clone(),
            cost.clone(),
            backend,
            config.sim.clone(),
            config.sim_budgets,
        ));

        Self {
            control_session_id: uuid::Uuid::new_v4(),
            config: config.clone(),
            registry,
            bus,
            validator,
            audit,
            rate,
            cost,
            hub,
            dispatch,
            sim,
        }
    }

    pub fn context_summary(&self) -> ContextSummary {
        ContextSummary {
            control_session_id: self.control_session_id,
            cost: CostSummary {
                context_total: self.cost.context_total(),
                daily_total: self.cost.daily_total(),
                session_limit_usd: self.config.cost.session_limit_usd,
                daily_limit_usd: self.config.cost.daily_limit_usd,
            },
        }
    }

    /// `POST /simulation/reset` leaves the rest of the context untouched —
    /// this only re-creates the simulation engine's own state, preserving
    /// the configuration it was built with (spec.md §4.8).
    pub fn reset_simulation(&self) {
        self.sim.reset();
    }
}
