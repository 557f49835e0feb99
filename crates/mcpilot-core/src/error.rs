//! Error types for Mcpilot.
//!
//! Library crates keep their own error enums; everything converts into
//! [`Error`] at the application boundary, where recovery suggestions are
//! attached for display.

use thiserror::Error;

/// Result type alias using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Mcpilot.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tool server could not be started
    #[error("Spawn error: {0}")]
    Spawn(String),

    /// MCP handshake failed
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// Other MCP error
    #[error("MCP error: {0}")]
    Mcp(String),

    /// Model provider error with structured details
    #[error("{0}")]
    Provider(#[from] ProviderError),

    /// Agent loop error
    #[error("Agent error: {0}")]
    Agent(String),

    /// Agent loop ran out of iterations
    #[error("Iteration limit of {0} reached without a final answer")]
    IterationLimit(usize),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Config(_) => Some("Check your config file at ~/.config/mcpilot/config.toml"),
            Error::Spawn(_) => Some("Check that [server].command is installed and on your PATH"),
            Error::Handshake(_) => {
                Some("The server may speak an unsupported MCP protocol version; run with --verbose")
            }
            Error::Provider(e) => e.recovery_suggestion(),
            Error::IterationLimit(_) => Some("Raise [agent].max_iterations or simplify the task"),
            _ => None,
        }
    }

    /// Create a provider-not-configured error.
    pub fn provider_not_configured(provider: &str) -> Self {
        Error::Provider(ProviderError::NotConfigured {
            provider: provider.to_string(),
            env_var: match provider {
                "openai" => Some("OPENAI_API_KEY".to_string()),
                _ => None,
            },
        })
    }
}

/// Model provider errors with detailed context.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Provider not configured
    #[error("Provider '{provider}' is not configured")]
    NotConfigured {
        provider: String,
        env_var: Option<String>,
    },

    /// Provider name not recognised
    #[error("Unknown provider '{0}'")]
    Unknown(String),

    /// API request failed
    #[error("API request to {provider} failed: {status} - {message}")]
    ApiError {
        provider: String,
        status: u16,
        message: String,
    },

    /// Response could not be interpreted
    #[error("Malformed response from {provider}: {message}")]
    MalformedResponse { provider: String, message: String },
}

impl ProviderError {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            ProviderError::NotConfigured {
                env_var: Some(_), ..
            } => Some("Set the API key environment variable"),
            ProviderError::NotConfigured { .. } => {
                Some("Configure [model] in ~/.config/mcpilot/config.toml")
            }
            ProviderError::Unknown(_) => Some("Supported providers: openai"),
            ProviderError::ApiError { status: 401, .. } => {
                Some("Check that your API key is valid and not expired")
            }
            ProviderError::ApiError { status: 429, .. } => {
                Some("You've hit rate limits. Wait a moment and try again")
            }
            ProviderError::ApiError {
                status: 500..=599, ..
            } => Some("The API service is having issues. Try again later"),
            _ => None,
        }
    }

    /// Create an API error from status code and message.
    pub fn api_error(provider: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        ProviderError::ApiError {
            provider: provider.into(),
            status,
            message: message.into(),
        }
    }
}

/// Format an error with its recovery suggestion.
pub fn format_error_with_suggestion(error: &Error) -> String {
    let mut output = error.to_string();
    if let Some(suggestion) = error.recovery_suggestion() {
        output.push_str(&format!("\n  Suggestion: {}", suggestion));
    }
    output
}
