// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Stage server
//!
//! Wires the reference adapters (projection oracle, in-memory trajectory
//! store, in-process release log, HTTP dispatcher) behind the stage router
//! and serves it until Ctrl+C or SIGTERM.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, error, info};

use deconflict_core::{
    application::{NegotiationServices, NegotiationWorkflow, StageHandlers},
    domain::config::NegotiatorConfigManifest,
    infrastructure::{
        event_bus::{EventBus, EventBusError},
        HttpDispatcher, InMemoryTrajectoryRepository, InProcessReleaseLog, ProjectionOracle,
    },
    presentation::api::{app, AppState},
};

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Bind address (default: server.bind_address from the configuration)
    #[arg(long, env = "DECONFLICT_HOST")]
    pub host: Option<String>,

    /// Port (default: server.port from the configuration)
    #[arg(long, env = "DECONFLICT_PORT")]
    pub port: Option<u16>,
}

/// Build the full application state from configuration.
pub fn build_state(config: &NegotiatorConfigManifest) -> Result<Arc<AppState>> {
    let spec = &config.spec;
    let event_bus = Arc::new(EventBus::with_default_capacity());

    let services = Arc::new(
        NegotiationServices::from_config(config, Arc::new(ProjectionOracle::new()), event_bus)
            .context("Failed to configure negotiation services")?,
    );

    let dispatcher =
        HttpDispatcher::from_config(&spec.dispatch).context("Failed to create HTTP dispatcher")?;
    let release_log = InProcessReleaseLog::new(spec.release.flush_timeout);

    let handlers = Arc::new(StageHandlers::new(
        services.clone(),
        Arc::new(dispatcher),
        Arc::new(InMemoryTrajectoryRepository::new()),
        Arc::new(release_log.clone()),
        spec.release.topic.clone(),
        spec.storage.recent_ttl,
    ));

    Ok(Arc::new(AppState {
        handlers,
        workflow: Arc::new(NegotiationWorkflow::new(services)),
        release_log,
    }))
}

pub async fn execute(args: ServeArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = NegotiatorConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;

    info!(
        name = %config.metadata.name,
        dispatch = %config.spec.dispatch.base_url,
        topic = %config.spec.release.topic,
        "Configuration loaded"
    );

    let state = build_state(&config)?;
    spawn_event_logger(state.handlers.services().event_bus().as_ref().clone());

    let host = args.host.unwrap_or(config.spec.server.bind_address);
    let port = args.port.unwrap_or(config.spec.server.port);
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Stage server listening on {}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Stage server shutting down");

    Ok(())
}

/// Mirror negotiation events into the debug log.
fn spawn_event_logger(event_bus: EventBus) {
    let mut receiver = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => debug!(event = ?event, "Negotiation event"),
                Err(EventBusError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
