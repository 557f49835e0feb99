//! Call a single tool and print what came back.

use anyhow::Context;
use serde_json::Value;

use mcpilot_mcp::{decode, FetchPayload, Outcome};

use crate::AppContext;

/// Characters of fetched content shown in the preview.
const PREVIEW_CHARS: usize = 500;

pub async fn run(ctx: &AppContext, tool: &str, args: &str, json: bool) -> anyhow::Result<()> {
    let arguments = parse_arguments(args)?;

    let session = super::connect(ctx).await?;
    let result = session.call_tool(tool, arguments).await;
    super::disconnect(&session).await;

    let outcome = decode(&result.map_err(mcpilot_core::Error::from)?);

    if json {
        let rendered = match &outcome {
            Outcome::Success(value) => value.clone(),
            Outcome::Failure(message) | Outcome::DomainFailure(message) => {
                serde_json::json!({ "error": message })
            }
        };
        println!("{}", serde_json::to_string_pretty(&rendered)?);
    } else {
        print!("{}", render(&outcome));
    }

    match outcome {
        Outcome::Failure(message) => anyhow::bail!("tool '{}' failed: {}", tool, message),
        Outcome::DomainFailure(message) => {
            anyhow::bail!("tool '{}' reported an error: {}", tool, message)
        }
        Outcome::Success(_) => Ok(()),
    }
}

/// Parse `--args`, which must be a JSON object.
fn parse_arguments(args: &str) -> anyhow::Result<Value> {
    let value: Value = serde_json::from_str(args).context("--args is not valid JSON")?;
    if !value.is_object() {
        anyhow::bail!("--args must be a JSON object, got {}", value);
    }
    Ok(value)
}

/// Human-readable rendering of an outcome.
fn render(outcome: &Outcome) -> String {
    match (outcome, outcome.fetch_payload()) {
        (Outcome::Success(_), Some(payload)) if is_fetch_response(&payload) => {
            render_fetch(&payload)
        }
        (Outcome::Success(_), _) => format!("{}\n", outcome.text()),
        _ => String::new(),
    }
}

fn is_fetch_response(payload: &FetchPayload) -> bool {
    payload.status_code.is_some() || payload.content.is_some()
}

fn render_fetch(payload: &FetchPayload) -> String {
    let mut out = String::new();

    if let Some(ref url) = payload.url {
        out.push_str(&format!("URL: {}\n", url));
    }
    if let Some(status) = payload.status_code {
        out.push_str(&format!("Status: {}\n", status));
    }
    if let Some(ref format) = payload.format {
        out.push_str(&format!("Format: {}\n", format));
    }
    if let Some(ref content_type) = payload.content_type {
        out.push_str(&format!("Content-Type: {}\n", content_type));
    }
    if let Some(size) = payload.size {
        out.push_str(&format!("Size: {} bytes\n", size));
    }

    if let Some(ref content) = payload.content {
        let preview: String = content.chars().take(PREVIEW_CHARS).collect();
        let cut = preview.len() < content.len() || payload.truncated == Some(true);
        out.push_str(&format!(
            "Content preview:\n{}{}\n",
            preview,
            if cut { "..." } else { "" }
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_arguments() {
        assert_eq!(
            parse_arguments(r#"{"url":"https://example.com"}"#).unwrap(),
            json!({"url": "https://example.com"})
        );
        assert!(parse_arguments("[1, 2]").is_err());
        assert!(parse_arguments("{url:").is_err());
    }

    #[test]
    fn test_render_fetch_response() {
        let content = "x".repeat(PREVIEW_CHARS + 10);
        let outcome = Outcome::Success(json!({
            "url": "https://example.com",
            "status_code": 200,
            "format": "markdown",
            "content": content,
        }));

        let rendered = render(&outcome);
        assert!(rendered.contains("Status: 200\n"));
        assert!(rendered.contains("Format: markdown\n"));
        assert!(rendered.ends_with("...\n"));
        assert!(!rendered.contains(&"x".repeat(PREVIEW_CHARS + 1)));
    }

    #[test]
    fn test_render_plain_success() {
        let outcome = Outcome::Success(json!("hello"));
        assert_eq!(render(&outcome), "hello\n");

        let outcome = Outcome::Success(json!({"answer": 42}));
        assert!(render(&outcome).contains("\"answer\": 42"));
    }
}
