//! MCP-specific error types.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::{JsonRpcError, RequestId};

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to spawn the child process.
    #[error("failed to spawn process: {0}")]
    Spawn(std::io::Error),

    /// Failed to write to the transport.
    #[error("write error: {0}")]
    Write(std::io::Error),

    /// Failed to read from the transport.
    #[error("read error: {0}")]
    Read(String),

    /// The server closed its output before a full line arrived.
    #[error("end of stream: server exited")]
    EndOfStream,

    /// The server wrote a line that is not valid JSON.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The transport was closed locally.
    #[error("transport closed")]
    Closed,

    /// A request with this id is already outstanding.
    #[error("request id {0} is already in flight")]
    DuplicateId(RequestId),

    /// No response arrived within the request timeout.
    #[error("request {id} timed out after {after:?}")]
    Timeout { id: RequestId, after: Duration },

    /// Failed to encode an outgoing message.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Failed to terminate the process.
    #[error("failed to terminate process: {0}")]
    TerminateFailed(std::io::Error),
}

impl TransportError {
    /// Whether the transport is unusable after this error.
    ///
    /// A timeout or duplicate id only affects the one request; everything
    /// else means the stream or the process is gone.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Timeout { .. } | Self::DuplicateId(_) | Self::Encode(_)
        )
    }
}

/// Lifecycle phase an error surfaced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Spawn,
    Handshake,
    Discovery,
    Call,
    Shutdown,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawn => write!(f, "spawn"),
            Self::Handshake => write!(f, "handshake"),
            Self::Discovery => write!(f, "discovery"),
            Self::Call => write!(f, "call"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Errors that can occur during MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Transport-level error, tagged with the phase it interrupted.
    #[error("transport error during {phase}: {source}")]
    Transport {
        phase: Phase,
        #[source]
        source: TransportError,
    },

    /// Initialization failed (error response or incompatible version).
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Operation requires a ready session.
    #[error("session not ready (state: {state})")]
    NotReady { state: String },

    /// Operation is not valid in the current state.
    #[error("invalid session state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// The server answered a tool call with an error response.
    #[error("tool call '{name}' failed: {cause}")]
    ToolCall { name: String, cause: JsonRpcError },

    /// The server answered another request with an error response.
    #[error("{method} failed: {error}")]
    Rpc { method: String, error: JsonRpcError },

    /// A response had an unexpected shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Wrap a transport error with its phase.
    pub fn transport(phase: Phase, source: TransportError) -> Self {
        Self::Transport { phase, source }
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create an invalid state error.
    pub fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Whether the session can no longer be used after this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Transport { source, .. } => source.is_fatal(),
            Self::Handshake(_) | Self::NotReady { .. } | Self::InvalidState { .. } => true,
            Self::ToolCall { .. } | Self::Rpc { .. } | Self::Protocol(_) | Self::Json(_) => false,
        }
    }

    /// The lifecycle phase, when known.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Transport { phase, .. } => Some(*phase),
            Self::Handshake(_) => Some(Phase::Handshake),
            Self::ToolCall { .. } => Some(Phase::Call),
            _ => None,
        }
    }
}

impl From<McpError> for mcpilot_core::Error {
    fn from(e: McpError) -> Self {
        match e {
            McpError::Transport {
                phase: Phase::Spawn,
                ..
            } => mcpilot_core::Error::Spawn(e.to_string()),
            McpError::Handshake(_)
            | McpError::Transport {
                phase: Phase::Handshake,
                ..
            } => mcpilot_core::Error::Handshake(e.to_string()),
            _ => mcpilot_core::Error::Mcp(e.to_string()),
        }
    }
}
