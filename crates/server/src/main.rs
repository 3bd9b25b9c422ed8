// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! `ctrlplaned`: the control plane process. Loads configuration from the
//! environment (spec.md §6), builds the [`ctrlplane_server::ControlContext`],
//! and serves the HTTP + WebSocket API until asked to stop.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use ctrlplane_server::{build_router, Config, ControlContext};

/// Local-first control plane for remote coding agents.
#[derive(Debug, Parser)]
#[command(name = "ctrlplaned", version, about)]
struct Cli {
    /// Override the bind address (defaults to CTRLPLANE_BIND, then 0.0.0.0:8080).
    #[arg(long, env = "CTRLPLANE_BIND")]
    bind: Option<SocketAddr>,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG still wins if set.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init();
}

/// Waits for SIGTERM or SIGINT (Ctrl-C on non-Unix) so `axum::serve`'s
/// graceful shutdown can drain in-flight requests before the process exits
/// (spec.md §9 "Graceful shutdown", `CTRLPLANE_DRAIN_TIMEOUT_MS`).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => return,
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(_) => return,
        };
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::from_env();
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }

    let ctx = Arc::new(ControlContext::new(&config));
    ctrlplane_dispatch::spawn_timeout_sweeper(ctx.dispatch.clone());

    let drain_timeout = config.drain_timeout;
    let bind = config.bind;
    let router = build_router(ctx);

    tracing::info!(%bind, "ctrlplaned listening");
    let listener = tokio::net::TcpListener::bind(bind).await?;

    let (drain_tx, drain_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!(?drain_timeout, "shutdown signal received, draining in-flight requests");
        let _ = drain_tx.send(());
        // Backstop: `with_graceful_shutdown` has no built-in deadline, so force
        // the process down if draining runs past the configured budget.
        tokio::time::sleep(drain_timeout).await;
        tracing::warn!("drain timeout elapsed, forcing shutdown");
        std::process::exit(0);
    });

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = drain_rx.await;
    })
    .await
}
