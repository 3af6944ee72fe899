//! Command-line and environment configuration.

use std::net::SocketAddr;

use clap::{Args, Parser};

/// Streaming chat relay server.
#[derive(Debug, Parser)]
#[command(name = "colloquy", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub server: ServerConfig,

    #[command(flatten)]
    pub service: ServiceConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Args)]
pub struct ServerConfig {
    /// Socket address to bind.
    #[arg(
        long = "bind-addr",
        env = "COLLOQUY_BIND_ADDR",
        default_value = "127.0.0.1:8080"
    )]
    pub bind_addr: SocketAddr,
}

/// Chat service configuration.
#[derive(Debug, Clone, Args)]
pub struct ServiceConfig {
    /// Upstream endpoint speaking the Colloquy event-stream protocol.
    #[arg(long = "upstream-url", env = "COLLOQUY_UPSTREAM_URL")]
    pub upstream_url: String,

    /// Model name used when resolution finds nothing better.
    #[arg(
        long = "fallback-model",
        env = "COLLOQUY_FALLBACK_MODEL",
        default_value = "colloquy"
    )]
    pub fallback_model: String,

    /// Account id stamped on requests in this single-tenant deployment.
    #[arg(
        long = "account-id",
        env = "COLLOQUY_ACCOUNT_ID",
        default_value = "local"
    )]
    pub account_id: String,
}
