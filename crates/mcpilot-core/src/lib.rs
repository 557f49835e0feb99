//! # mcpilot-core
//!
//! Core types and abstractions for Mcpilot, an MCP tool-calling agent.
//!
//! This crate provides:
//! - Conversation primitives owned by the agent loop
//! - Tool descriptors and tool invocation types
//! - Configuration system
//! - Common error types

pub mod config;
pub mod conversation;
pub mod error;
pub mod tool;

pub use config::Config;
pub use conversation::{Conversation, Role, Turn, TurnContent};
pub use error::{Error, Result};
pub use tool::{ToolDescriptor, ToolInvocation};
