//! # mcpilot-mcp
//!
//! MCP (Model Context Protocol) client for Mcpilot.
//!
//! This crate provides:
//! - JSON-RPC 2.0 and MCP message types
//! - Line-delimited stdio transport with id-based response correlation
//! - Session lifecycle (handshake, tool discovery, tool calls)
//! - Decoding of tool results into success and failure outcomes

pub mod decoder;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

pub use decoder::{decode, FetchPayload, Outcome};
pub use error::{McpError, Phase, TransportError};
pub use protocol::{CallToolResult, ClientInfo, InitializeResult, ToolContent};
pub use session::{McpSession, SessionState};
pub use transport::{StdioTransport, Transport};
