//! List the tools a server offers.

use crate::AppContext;

pub async fn run(ctx: &AppContext) -> anyhow::Result<()> {
    let session = super::connect(ctx).await?;
    let listed = session.list_tools().await;
    let server = session.server_info().await;
    super::disconnect(&session).await;

    let tools = listed.map_err(mcpilot_core::Error::from)?;

    if let Some(server) = server {
        println!(
            "{} {} (protocol {})",
            server.server_info.name,
            server.server_info.version.as_deref().unwrap_or("unknown"),
            server.protocol_version
        );
        if let Some(instructions) = server.instructions {
            println!("{}", instructions);
        }
        println!();
    }

    if tools.is_empty() {
        println!("No tools available.");
        return Ok(());
    }

    println!("Available tools:");
    for tool in &tools {
        println!("  - {}: {}", tool.name, tool.description);
        let required = tool.required_arguments();
        if !required.is_empty() {
            println!("      required: {}", required.join(", "));
        }
    }

    Ok(())
}
