//! Run the agent loop against the configured server and model.

use std::sync::Arc;

use mcpilot_agent::{AgentBuilder, AgentConfig, AgentError, AgentEventHandler, AgentResponse};
use mcpilot_core::ToolInvocation;

use crate::AppContext;

/// Characters of tool output echoed while the agent runs.
const OUTPUT_PREVIEW_CHARS: usize = 200;

/// Reports agent progress on stderr.
struct ProgressPrinter;

impl AgentEventHandler for ProgressPrinter {
    fn on_thinking(&self, iteration: usize) {
        eprintln!("[{}] thinking...", iteration);
    }

    fn on_tool_start(&self, invocation: &ToolInvocation) {
        eprintln!("  -> {} {}", invocation.name, invocation.arguments);
    }

    fn on_tool_complete(&self, _invocation: &ToolInvocation, output: &str, is_error: bool) {
        let preview: String = output
            .chars()
            .take(OUTPUT_PREVIEW_CHARS)
            .map(|c| if c == '\n' { ' ' } else { c })
            .collect();
        let marker = if is_error { "error" } else { "ok" };
        eprintln!("  <- {}: {}", marker, preview);
    }

    fn on_complete(&self, response: &AgentResponse) {
        eprintln!("done after {} iteration(s)", response.iterations);
    }

    fn on_error(&self, error: &AgentError) {
        eprintln!("agent stopped: {}", error);
    }
}

pub async fn run(ctx: &AppContext, task: &str, max_iterations: Option<usize>) -> anyhow::Result<()> {
    let model = mcpilot_providers::from_config(
        &ctx.config.model,
        ctx.config.agent.system_prompt.as_deref(),
    )
    .map_err(mcpilot_core::Error::from)?;

    let mut config = AgentConfig::from(&ctx.config.agent);
    if let Some(max) = max_iterations {
        config.max_iterations = max;
    }

    let session = Arc::new(super::connect(ctx).await?);

    let result = async {
        let tools = session.list_tools().await.map_err(mcpilot_core::Error::from)?;

        let agent = AgentBuilder::new()
            .session(session.clone())
            .model(model)
            .tools(tools)
            .config(config)
            .event_handler(Arc::new(ProgressPrinter))
            .build()
            .map_err(mcpilot_core::Error::from)?;

        let token = agent.cancel_token();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });

        let response = agent.run(task).await;
        interrupt.abort();
        anyhow::Ok(response.map_err(mcpilot_core::Error::from)?)
    }
    .await;

    super::disconnect(&session).await;

    let response = result?;
    println!("{}", response.answer);
    Ok(())
}
