//! MXCP gateway — an MCP-facing OAuth issuer, policy engine, and SQL
//! execution pipeline in front of an embedded analytical database.
//!
//! The gateway can be run as:
//! - A standalone process exposing MCP over stdio and/or streamable HTTP
//! - An OAuth 2.0 authorization server for the tools/resources/prompts it
//!   serves, or a pure bearer-token verifier in front of an external one
//! - A library embedding [`engine::ExecutionEngine`] directly
//!
//! # Architecture
//!
//! Every request is pinned to one immutable [`reload::ReloadGeneration`] for
//! its full lifetime; [`reload::ReloadCoordinator`] owns the drain-and-swap
//! transition between generations. [`engine::ExecutionEngine`] is the
//! fixed-order pipeline — admission, binding, policy, dispatch, output
//! policy, audit — that every transport (HTTP, stdio, admin) funnels into.

pub mod admin;
pub mod audit;
pub mod auth;
pub mod cli;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod http;
pub mod mcp;
pub mod model;
pub mod policy;
pub mod registry;
pub mod reload;
pub mod secrets;
pub mod signals;
pub mod storage;
pub mod telemetry;
pub mod utils;

pub use error::{GatewayError, Result};

/// Initialize tracing for the application.
pub fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "mxcp_gateway=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
