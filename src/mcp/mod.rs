//! MCP transport surface. A thin translation layer between the `rmcp`
//! SDK's wire types and [`crate::engine::ExecutionEngine`]; all admission,
//! policy, and audit logic lives in the engine, not here.

mod server;

pub use server::McpServer;
