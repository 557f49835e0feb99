//! Configuration system for Mcpilot.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;

/// Main configuration struct for Mcpilot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tool server to launch
    pub server: ServerConfig,
    /// Identity sent during the MCP handshake
    pub client: ClientConfig,
    /// Agent loop settings
    pub agent: AgentSettings,
    /// Model backend settings
    pub model: ModelConfig,
}

/// How to launch the MCP tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server name, used in logs
    pub name: String,
    /// Executable to run
    pub command: String,
    /// Command arguments
    pub args: Vec<String>,
    /// Extra environment variables for the server process
    pub env: HashMap<String, String>,
    /// Working directory for the server process
    pub working_dir: Option<PathBuf>,
    /// Per-request timeout in seconds (0 disables it)
    pub request_timeout_secs: u64,
    /// How long to wait after SIGTERM before killing the server
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "fetchkit".to_string(),
            command: "fetchkit".to_string(),
            args: vec!["mcp".to_string()],
            env: HashMap::new(),
            working_dir: None,
            request_timeout_secs: 60,
            shutdown_grace_ms: 2000,
        }
    }
}

impl ServerConfig {
    /// Create a server configuration for a command.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            ..Self::default()
        }
    }

    /// Set the arguments.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// The request timeout, if enabled.
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    /// Grace period between SIGTERM and kill.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Client name reported to the server
    pub name: String,
    /// Client version reported to the server
    pub version: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "mcpilot".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Maximum model decisions per run
    pub max_iterations: usize,
    /// Optional system prompt passed to the model
    pub system_prompt: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Provider name
    pub provider: String,
    /// Model identifier
    pub model: String,
    /// API key (can be set directly or via environment)
    pub api_key: Option<String>,
    /// Environment variable name for API key
    pub api_key_env: Option<String>,
    /// Base URL (optional, for compatible endpoints)
    pub base_url: Option<String>,
    /// Sampling temperature
    pub temperature: f32,
    /// Maximum tokens per model response
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            base_url: None,
            temperature: 0.0,
            max_tokens: 4096,
        }
    }
}

impl ModelConfig {
    /// Resolve the API key from either direct value or environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(ref key) = self.api_key {
            return Some(key.clone());
        }
        if let Some(ref env_var) = self.api_key_env {
            if let Ok(key) = std::env::var(env_var) {
                return Some(key);
            }
        }
        None
    }
}

/// Validation result with multiple issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Create a new empty validation result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }

    /// Get only error-level issues.
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Error).collect()
    }

    /// Get only warning-level issues.
    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Warning).collect()
    }

    /// Add an error.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning.
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity of the issue
    pub severity: IssueSeverity,
    /// Field path (e.g., "agent.max_iterations")
    pub field: String,
    /// Human-readable message
    pub message: String,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

impl Config {
    /// Build the layered figment.
    ///
    /// Later layers win: defaults, user config, project config, the explicit
    /// file (if any), then `MCPILOT_` environment variables.
    pub fn figment(explicit: Option<&Path>) -> Figment {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(Self::config_dir().join("config.toml")))
            .merge(Toml::file(".mcpilot/config.toml"));

        if let Some(path) = explicit {
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(Env::prefixed("MCPILOT_").split("__"))
    }

    /// Load configuration from all sources.
    pub fn load(explicit: Option<&Path>) -> Result<Self, figment::Error> {
        Self::figment(explicit).extract()
    }

    /// Load defaults overlaid with a single TOML file.
    pub fn from_file(path: &Path) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .extract()
    }

    /// Load and validate configuration.
    pub fn load_validated(explicit: Option<&Path>) -> Result<Self, Error> {
        let config = Self::load(explicit).map_err(|e| Error::Config(e.to_string()))?;
        config.check()
    }

    /// Fail on validation errors, log warnings.
    pub fn check(self) -> Result<Self, Error> {
        let result = self.validate();

        if !result.is_ok() {
            let errors: Vec<String> = result
                .errors()
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(Error::Config(format!(
                "Configuration validation failed:\n  {}",
                errors.join("\n  ")
            )));
        }

        for warning in result.warnings() {
            tracing::warn!("Config warning - {}: {}", warning.field, warning.message);
        }

        Ok(self)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if self.server.command.trim().is_empty() {
            result.add_error("server.command", "Server command cannot be empty");
        }

        if self.server.request_timeout_secs == 0 {
            result.add_warning(
                "server.request_timeout_secs",
                "Request timeout is disabled; a hung server will block forever",
            );
        }

        if self.client.name.is_empty() {
            result.add_error("client.name", "Client name cannot be empty");
        }

        if self.agent.max_iterations == 0 {
            result.add_error("agent.max_iterations", "max_iterations must be greater than 0");
        }

        if self.agent.max_iterations > 100 {
            result.add_warning(
                "agent.max_iterations",
                "max_iterations is very high (> 100), runs may be expensive",
            );
        }

        if self.model.model.is_empty() {
            result.add_error("model.model", "Model name cannot be empty");
        }

        if !(0.0..=2.0).contains(&self.model.temperature) {
            result.add_error("model.temperature", "temperature must be between 0.0 and 2.0");
        }

        if self.model.max_tokens == 0 {
            result.add_error("model.max_tokens", "max_tokens must be greater than 0");
        }

        if self.model.api_key.as_ref().map(|k| k.is_empty()).unwrap_or(false) {
            result.add_warning("model.api_key", "API key is empty string");
        }

        if let Some(ref base_url) = self.model.base_url {
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                result.add_error(
                    "model.base_url",
                    "base_url must start with http:// or https://",
                );
            }
        }

        result
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, Error> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("mcpilot"))
            .unwrap_or_else(|| PathBuf::from("~/.config/mcpilot"))
    }
}
