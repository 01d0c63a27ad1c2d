//! # xcat-agent
//!
//! Transport layer for the Xcatcher client.
//!
//! - [`Toolset`]: the fixed `{list_tools, call_tool, close}` capability set
//! - [`McpClient`]: its MCP streamable HTTP binding
//! - [`normalize_output`]: reduces wrapped tool results to one canonical shape
//! - [`RestClient`]: balance check and authenticated result download

mod auth;
mod client;
mod normalize;
mod rest;
mod toolset;
mod types;

#[cfg(test)]
mod test_support;

pub use auth::bearer_headers;
pub use client::McpClient;
pub use normalize::normalize_output;
pub use rest::{ArtifactFetcher, RestClient};
pub use toolset::{ToolCatalog, Toolset};
pub use types::{ClientInfo, ServerInfo, PROTOCOL_VERSION};
