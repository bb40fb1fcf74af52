//! # Commander MCP Server
//!
//! Model Context Protocol server that keeps one Keeper Commander interactive
//! session alive and runs commands in it on behalf of AI agents.
//!
//! ## Overview
//!
//! This server provides MCP tools for:
//! - Session lifecycle (start, status, stop)
//! - Command execution with validation presets and retries
//! - JSON extraction from noisy CLI output
//!
//! ## Architecture
//!
//! This is Layer 3 - the main MCP server binary that ties together:
//! - commander-core: Core types and configuration
//! - commander-session: The persistent session engine
//! - commander-detector: JSON extraction
//!
//! ## Usage
//!
//! ```text
//! commander-mcp [--config <path>] [--allow-test-overrides]
//! ```

use anyhow::Context;
use rmcp::{transport::stdio, ServiceExt};

use commander_core::CommanderConfig;
use commander_mcp::CommanderMcpServer;
use commander_session::TestOverrides;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let allow_test_overrides = args.iter().any(|arg| arg == "--allow-test-overrides");
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .map(|i| {
            args.get(i + 1)
                .cloned()
                .context("--config requires a file path")
        })
        .transpose()?;

    let config = match &config_path {
        Some(path) => CommanderConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {path}"))?,
        None => CommanderConfig::default(),
    };

    // Initialize logging; stdout carries the MCP transport.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.server.log_level)),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!(
        "Commander MCP Server v{} starting (config: {})",
        env!("CARGO_PKG_VERSION"),
        config_path.as_deref().unwrap_or("defaults")
    );

    let overrides = if allow_test_overrides {
        let overrides = TestOverrides::from_env();
        if overrides.is_active() {
            tracing::warn!("Test mode enabled: commands are answered from canned responses");
        }
        overrides
    } else {
        TestOverrides::default()
    };

    let server = CommanderMcpServer::from_config(&config, &overrides)
        .context("Failed to initialize the session engine")?;

    tracing::info!("Server initialized, starting stdio transport...");

    // Serve the MCP server over stdio
    let service = server.clone().serve(stdio()).await.map_err(|e| {
        tracing::error!("Error starting server: {}", e);
        e
    })?;

    tracing::info!("Commander MCP Server running on stdio");

    // Wait for the service to complete
    service.waiting().await?;

    tracing::info!("Commander MCP Server shutting down");
    tokio::task::spawn_blocking(move || server.engine().stop_session()).await?;

    Ok(())
}
