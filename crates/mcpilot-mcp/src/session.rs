//! MCP session lifecycle.
//!
//! A session drives one server through the handshake
//! (`Unstarted -> Initializing -> Ready`) and exposes typed tool operations
//! once it is ready. Any fatal transport failure moves it to `Closed`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mcpilot_core::config::ServerConfig;
use mcpilot_core::ToolDescriptor;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{McpError, Phase};
use crate::protocol::{
    methods, CallToolParams, CallToolResult, ClientInfo, InitializeParams, InitializeResult,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsParams, ListToolsResult,
    SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::transport::{StdioTransport, Transport};

/// Upper bound on `tools/list` pages followed in one discovery.
const MAX_TOOL_PAGES: usize = 100;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, handshake not yet attempted.
    Unstarted,
    /// `initialize` sent, waiting for the server.
    Initializing,
    /// Handshake complete; tool operations allowed.
    Ready,
    /// Shut down, either explicitly or after a transport failure.
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unstarted => write!(f, "unstarted"),
            Self::Initializing => write!(f, "initializing"),
            Self::Ready => write!(f, "ready"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// A session with a single MCP server.
pub struct McpSession {
    /// Server name, for logging.
    name: String,
    /// Transport for communication.
    transport: Arc<dyn Transport>,
    /// Current session state. Never held across an await.
    state: parking_lot::RwLock<SessionState>,
    /// Initialize result from the server.
    server: RwLock<Option<InitializeResult>>,
    /// Tools discovered by `list_tools`.
    tools: RwLock<Option<Vec<ToolDescriptor>>>,
    /// Request ID counter.
    request_counter: AtomicU64,
}

impl McpSession {
    /// Create a session over an existing transport.
    pub fn new(name: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            name: name.into(),
            transport,
            state: parking_lot::RwLock::new(SessionState::Unstarted),
            server: RwLock::new(None),
            tools: RwLock::new(None),
            request_counter: AtomicU64::new(1),
        }
    }

    /// Spawn the configured server without starting the handshake.
    pub async fn spawn(config: &ServerConfig) -> Result<Self, McpError> {
        let transport = StdioTransport::spawn(config)
            .await
            .map_err(|e| McpError::transport(Phase::Spawn, e))?;
        Ok(Self::new(config.name.clone(), Arc::new(transport)))
    }

    /// Spawn the configured server and complete the handshake.
    pub async fn connect(config: &ServerConfig, client_info: ClientInfo) -> Result<Self, McpError> {
        info!(
            server = %config.name,
            command = %config.command,
            "Connecting to MCP server"
        );

        let session = Self::spawn(config).await?;
        session.initialize(client_info).await?;
        Ok(session)
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current session state.
    pub async fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Check if the session is ready for tool operations.
    pub async fn is_ready(&self) -> bool {
        *self.state.read() == SessionState::Ready
    }

    /// The server's initialize result, once the handshake completed.
    pub async fn server_info(&self) -> Option<InitializeResult> {
        self.server.read().await.clone()
    }

    /// Tools discovered so far (empty before `list_tools`).
    pub async fn tools(&self) -> Vec<ToolDescriptor> {
        self.tools.read().await.clone().unwrap_or_default()
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    fn next_request_id(&self) -> u64 {
        self.request_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Perform the MCP handshake.
    ///
    /// Only valid in [`SessionState::Unstarted`]. On any failure the session
    /// is closed and the server process terminated.
    pub async fn initialize(&self, client_info: ClientInfo) -> Result<InitializeResult, McpError> {
        {
            let mut state = self.state.write();
            if *state != SessionState::Unstarted {
                return Err(McpError::invalid_state(
                    SessionState::Unstarted.to_string(),
                    state.to_string(),
                ));
            }
            *state = SessionState::Initializing;
        }

        debug!(server = %self.name, client = %client_info.name, "Initializing MCP session");

        let mut guard = HandshakeGuard {
            session: self,
            settled: false,
        };

        match self.handshake(client_info).await {
            Ok(result) => {
                *self.server.write().await = Some(result.clone());
                *self.state.write() = SessionState::Ready;
                guard.settled = true;

                info!(
                    server = %self.name,
                    server_name = %result.server_info.name,
                    protocol_version = %result.protocol_version,
                    "MCP session initialized"
                );
                Ok(result)
            }
            Err(e) => {
                warn!(server = %self.name, error = %e, "MCP handshake failed");
                self.shutdown().await;
                guard.settled = true;
                Err(e)
            }
        }
    }

    async fn handshake(&self, client_info: ClientInfo) -> Result<InitializeResult, McpError> {
        let params = serde_json::to_value(InitializeParams::new(client_info))?;
        let response = self
            .request(Phase::Handshake, methods::INITIALIZE, params)
            .await?;

        let result = response
            .into_result()
            .map_err(|e| McpError::Handshake(format!("server rejected initialize: {}", e)))?;
        let result: InitializeResult = serde_json::from_value(result)
            .map_err(|e| McpError::Handshake(format!("malformed initialize result: {}", e)))?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&result.protocol_version.as_str()) {
            return Err(McpError::Handshake(format!(
                "unsupported protocol version '{}'",
                result.protocol_version
            )));
        }

        let initialized = JsonRpcNotification::new(methods::INITIALIZED, None);
        self.transport
            .send(&initialized.into())
            .await
            .map_err(|e| McpError::transport(Phase::Handshake, e))?;

        Ok(result)
    }

    /// List the server's tools, following pagination cursors.
    ///
    /// The first successful discovery is cached; later calls return it
    /// without contacting the server.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        self.require_ready().await?;

        if let Some(tools) = self.tools.read().await.as_ref() {
            return Ok(tools.clone());
        }

        debug!(server = %self.name, "Listing tools");

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_TOOL_PAGES {
            let params = serde_json::to_value(ListToolsParams {
                cursor: cursor.take(),
            })?;
            let response = self
                .request(Phase::Discovery, methods::TOOLS_LIST, params)
                .await?;
            let result = response.into_result().map_err(|error| McpError::Rpc {
                method: methods::TOOLS_LIST.to_string(),
                error,
            })?;
            let page: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| McpError::protocol(format!("malformed tools/list result: {}", e)))?;

            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        if cursor.is_some() {
            return Err(McpError::protocol(format!(
                "tools/list did not finish within {} pages",
                MAX_TOOL_PAGES
            )));
        }

        debug!(
            server = %self.name,
            tool_count = tools.len(),
            "Listed tools"
        );

        *self.tools.write().await = Some(tools.clone());
        Ok(tools)
    }

    /// Call a tool on the server.
    ///
    /// A tool that ran and failed is reported through
    /// [`CallToolResult::is_error`], not as an `Err`.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        self.require_ready().await?;

        debug!(server = %self.name, tool = name, "Calling tool");

        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;
        let response = self.request(Phase::Call, methods::TOOLS_CALL, params).await?;

        let result = response.into_result().map_err(|cause| McpError::ToolCall {
            name: name.to_string(),
            cause,
        })?;
        let result: CallToolResult = serde_json::from_value(result)
            .map_err(|e| McpError::protocol(format!("malformed tools/call result: {}", e)))?;

        if result.is_error {
            warn!(server = %self.name, tool = name, "Tool returned error");
        }

        Ok(result)
    }

    /// Close the session and terminate the server. Idempotent.
    pub async fn close(&self) -> Result<(), McpError> {
        {
            let mut state = self.state.write();
            if *state == SessionState::Closed {
                return Ok(());
            }
            *state = SessionState::Closed;
        }

        debug!(server = %self.name, "Closing MCP session");
        self.transport
            .close()
            .await
            .map_err(|e| McpError::transport(Phase::Shutdown, e))?;

        info!(server = %self.name, "MCP session closed");
        Ok(())
    }

    async fn require_ready(&self) -> Result<(), McpError> {
        let state = *self.state.read();
        if state != SessionState::Ready {
            return Err(McpError::NotReady {
                state: state.to_string(),
            });
        }
        Ok(())
    }

    async fn request(
        &self,
        phase: Phase,
        method: &str,
        params: Value,
    ) -> Result<JsonRpcResponse, McpError> {
        let request = JsonRpcRequest::new(self.next_request_id(), method, Some(params));
        match self.transport.call(request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                if e.is_fatal() {
                    warn!(
                        server = %self.name,
                        %phase,
                        error = %e,
                        "Transport failed, closing session"
                    );
                    self.shutdown().await;
                }
                Err(McpError::transport(phase, e))
            }
        }
    }

    /// Close without surfacing errors; the caller already has one.
    async fn shutdown(&self) {
        if let Err(e) = self.close().await {
            warn!(server = %self.name, error = %e, "Failed to close MCP session");
        }
    }
}

/// Closes the session when `initialize` is dropped before it settles.
struct HandshakeGuard<'a> {
    session: &'a McpSession,
    settled: bool,
}

impl Drop for HandshakeGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        *self.session.state.write() = SessionState::Closed;
        warn!(server = %self.session.name, "MCP handshake abandoned, closing session");

        let transport = Arc::clone(&self.session.transport);
        let server = self.session.name.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = transport.close().await {
                        warn!(server = %server, error = %e, "Failed to close MCP server");
                    }
                });
            }
            // No runtime left; kill_on_drop reaps the server with the transport.
            Err(_) => debug!(server = %server, "No runtime to close MCP server on"),
        }
    }
}
