//! Interpretation of tool results.
//!
//! Tools report three kinds of result: a failure flagged with `isError`, a
//! JSON record whose `error` field describes a failed operation, and plain
//! success. Text that is not JSON is passed through as a string, which means
//! a tool that reports an error as bare text without setting `isError` is
//! seen as a success.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::protocol::CallToolResult;

/// Decoded outcome of a tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The tool succeeded. Holds parsed JSON, or a string for plain text.
    Success(Value),
    /// The tool flagged the result with `isError`.
    Failure(String),
    /// The tool returned a record whose `error` field is set.
    DomainFailure(String),
}

impl Outcome {
    /// Whether this outcome describes a failure of either kind.
    pub fn is_error(&self) -> bool {
        !matches!(self, Self::Success(_))
    }

    /// Text suitable for showing to a model or a user.
    ///
    /// String payloads are returned verbatim; other values are pretty-printed.
    pub fn text(&self) -> String {
        match self {
            Self::Success(Value::String(s)) => s.clone(),
            Self::Success(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
            Self::Failure(message) | Self::DomainFailure(message) => message.clone(),
        }
    }

    /// The success payload, if any.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }

    /// View a success payload as a fetch response record.
    pub fn fetch_payload(&self) -> Option<FetchPayload> {
        match self.value()? {
            value @ Value::Object(_) => serde_json::from_value(value.clone()).ok(),
            _ => None,
        }
    }
}

/// Response record returned by fetch-style tools.
///
/// Every field is optional; servers omit what does not apply.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FetchPayload {
    pub url: Option<String>,
    pub status_code: Option<u16>,
    pub content_type: Option<String>,
    pub size: Option<u64>,
    pub last_modified: Option<String>,
    pub filename: Option<String>,
    pub format: Option<String>,
    pub content: Option<String>,
    pub truncated: Option<bool>,
    pub method: Option<String>,
    pub error: Option<String>,
}

/// Decode a tool result into an [`Outcome`].
pub fn decode(result: &CallToolResult) -> Outcome {
    if result.is_error {
        return Outcome::Failure(result.joined_text());
    }

    let Some(text) = result.first_text() else {
        return Outcome::Success(Value::Null);
    };

    match serde_json::from_str::<Value>(text) {
        Ok(value) => match value.get("error") {
            Some(Value::Null) | None => Outcome::Success(value),
            Some(Value::String(message)) => Outcome::DomainFailure(message.clone()),
            Some(other) => Outcome::DomainFailure(other.to_string()),
        },
        Err(_) => {
            debug!(len = text.len(), "Tool returned non-JSON text, treating as success");
            Outcome::Success(Value::String(text.to_string()))
        }
    }
}
