//! MCP (Model Context Protocol) server exposing DocIntel over stdio
//!
//! Tools: `ask`, `history`, `clear_conversation` and `ingest_pdf`.

#[cfg(test)]
mod tests;

pub mod protocol;
pub mod server;
pub mod tools;

use std::sync::Arc;

use crate::service::DocIntelService;

pub use server::{ConnectionState, McpServer, ToolHandler};
pub use tools::docintel_tools;

/// A server with every DocIntel tool registered
#[inline]
pub fn docintel_server(service: &Arc<DocIntelService>) -> McpServer {
    McpServer::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        .with_tools(docintel_tools(service))
}
