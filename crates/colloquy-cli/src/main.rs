#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod config;
mod relay;
mod server;
mod telemetry;

use std::process;
use std::sync::Arc;

use anyhow::Context;
use axum::{Extension, Router};
use clap::Parser;
use colloquy_chat::{AllowAll, InMemoryHistoryStore, ProducerConfig, StaticCatalog};
use colloquy_server::{AccountContext, ServiceState, handler};
use tower_http::trace::TraceLayer;

use crate::config::Cli;
use crate::relay::RelayBackend;

/// Tracing target for server startup.
pub const TRACING_TARGET_STARTUP: &str = "colloquy_cli::startup";

/// Tracing target for server shutdown.
pub const TRACING_TARGET_SHUTDOWN: &str = "colloquy_cli::shutdown";

#[tokio::main]
async fn main() {
    let Err(error) = run().await else {
        tracing::info!(
            target: TRACING_TARGET_SHUTDOWN,
            "application terminated successfully"
        );
        process::exit(0);
    };

    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!(
            target: TRACING_TARGET_SHUTDOWN,
            error = %error,
            "application terminated with error"
        );
    } else {
        eprintln!("Error: {error:#}");
    }

    process::exit(1);
}

/// Main application entry point.
async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    telemetry::init_tracing();

    tracing::info!(
        target: TRACING_TARGET_STARTUP,
        version = env!("CARGO_PKG_VERSION"),
        bind_addr = %cli.server.bind_addr,
        upstream_url = %cli.service.upstream_url,
        fallback_model = %cli.service.fallback_model,
        "Starting colloquy server"
    );

    let state = create_service_state(&cli).context("failed to create service state")?;
    let router = create_router(state, &cli);

    server::serve(router, cli.server.bind_addr).await
}

/// Wires the producer's collaborators into handler state.
fn create_service_state(cli: &Cli) -> anyhow::Result<ServiceState> {
    let backend = RelayBackend::new(&cli.service.upstream_url)
        .context("failed to create relay backend")?;

    Ok(ServiceState::from_parts(
        Arc::new(InMemoryHistoryStore::new()),
        Arc::new(backend),
        Arc::new(StaticCatalog::default()),
        Arc::new(AllowAll),
        ProducerConfig {
            fallback_model_name: cli.service.fallback_model.clone(),
            ..ProducerConfig::default()
        },
    ))
}

/// Assembles the HTTP router with its middleware stack.
fn create_router(state: ServiceState, cli: &Cli) -> Router {
    handler::routes()
        // Single-tenant deployment: every request runs as the configured
        // account. A real deployment replaces this with auth middleware.
        .layer(Extension(AccountContext::new(&cli.service.account_id)))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
