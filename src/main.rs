//! mail-jmap-mcp-rs: JMAP MCP server over stdio
//!
//! This server exposes a JMAP mail, calendar, and contacts account as Model
//! Context Protocol (MCP) tools over stdio. Method calls are batched per the
//! JMAP core protocol, with back-references chaining query and get steps in a
//! single round trip.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading and stdio serving
//! - [`config`]: Environment-driven credentials and server settings
//! - [`errors`]: Application error model with MCP error mapping
//! - [`jmap`]: Session discovery, batched method calls, and response parsing
//! - [`mailboxes`]: Mailbox cache with label-to-identifier resolution
//! - [`mail`]: Email listing, search, detail fetch, and keyword updates
//! - [`send`]: Two-phase draft-then-submit send workflow
//! - [`calendar`]: Calendar event operations
//! - [`contacts`]: Contact (address book) operations
//! - [`server`]: MCP tool handlers with validation and business orchestration
//! - [`models`]: Input/output DTOs and schema-bearing types

mod calendar;
mod config;
mod contacts;
mod errors;
mod jmap;
mod mail;
mod mailboxes;
mod models;
mod send;
mod server;

use config::ServerConfig;
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use tracing_subscriber::EnvFilter;

/// Application entry point
///
/// Initializes tracing from environment, loads config, and serves the MCP
/// server over stdio. This process expects to be spawned by an MCP client
/// via `stdio` transport.
///
/// # Environment Variables
///
/// See [`ServerConfig::load_from_env`] for full configuration options.
///
/// # Example
///
/// ```no_run
/// MAIL_JMAP_BASE_URL=https://mail.example.com \
/// MAIL_JMAP_USER=user@example.com \
/// MAIL_JMAP_SECRET=secret \
/// cargo run
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = ServerConfig::load_from_env()?;
    let service = server::JmapMcpServer::new(config).serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}
