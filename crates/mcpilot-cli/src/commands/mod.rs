//! CLI command implementations.

pub mod call;
pub mod config;
pub mod run;
pub mod tools;

use mcpilot_mcp::McpSession;

use crate::AppContext;

/// Spawn the configured server and complete the handshake.
pub(crate) async fn connect(ctx: &AppContext) -> anyhow::Result<McpSession> {
    let session = McpSession::connect(&ctx.config.server, ctx.client_info())
        .await
        .map_err(mcpilot_core::Error::from)?;
    Ok(session)
}

/// Close the session, logging rather than failing on shutdown errors.
pub(crate) async fn disconnect(session: &McpSession) {
    if let Err(e) = session.close().await {
        tracing::warn!(server = %session.name(), error = %e, "Failed to close MCP server");
    }
}
