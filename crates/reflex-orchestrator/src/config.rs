//! Configuration types for the Reflex orchestrator.
//!
//! This module provides all configuration structures used to control
//! the behavior of the Reflex loop: the retry budget, the generator and
//! search providers, and the code-execution sandbox.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ReflexError, Result};

/// The default config file name.
pub const CONFIG_FILE_NAME: &str = "reflex.json";

/// Default number of generation attempts before any search has happened.
const fn default_max_initial_iterations() -> u32 {
    1
}

/// Default number of search invocations allowed per run.
const fn default_max_search_attempts() -> u32 {
    5
}

/// Default model used for code generation.
fn default_model() -> String {
    "gpt-4o".to_string()
}

/// Default OpenAI-compatible API base URL.
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

/// Default environment variable holding the generator API key.
fn default_llm_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

/// Default generator request timeout in seconds.
const fn default_llm_timeout() -> u32 {
    120
}

/// Default number of search results requested per query.
const fn default_max_results() -> u32 {
    3
}

/// Default Tavily API base URL.
fn default_search_base_url() -> String {
    "https://api.tavily.com".to_string()
}

/// Default environment variable holding the search API key.
fn default_search_api_key_env() -> String {
    "TAVILY_API_KEY".to_string()
}

/// Default search request timeout in seconds.
const fn default_search_timeout() -> u32 {
    30
}

/// Default container image for the Docker sandbox.
fn default_sandbox_image() -> String {
    "python:3.12-slim".to_string()
}

/// Default interpreter used to execute candidate code.
fn default_interpreter() -> String {
    "python3".to_string()
}

/// Default per-execution timeout in seconds.
const fn default_sandbox_timeout() -> u32 {
    30
}

/// Default output directory for reports.
fn default_output_dir() -> String {
    ".".to_string()
}

/// Default value for boolean options that default to true.
const fn default_true() -> bool {
    true
}

/// Main configuration for the Reflex loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Generation attempts allowed before any search has happened.
    #[serde(default = "default_max_initial_iterations")]
    pub max_initial_iterations: u32,

    /// Maximum number of search invocations for one run.
    ///
    /// Once at least one search has happened this also becomes the
    /// per-cycle generation cap. Zero disables the search branch.
    #[serde(default = "default_max_search_attempts")]
    pub max_search_attempts: u32,

    /// Append search results to the conversation as a diagnostic notice.
    #[serde(default)]
    pub feed_search_results: bool,

    /// Code generator settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Web search settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// Code-execution sandbox settings.
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Output directory for generated reports.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_initial_iterations: default_max_initial_iterations(),
            max_search_attempts: default_max_search_attempts(),
            feed_search_results: false,
            llm: LlmConfig::default(),
            search: SearchConfig::default(),
            sandbox: SandboxConfig::default(),
            output_dir: default_output_dir(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `reflex.json` in the current directory. If found, loads and
    /// validates the configuration. If not found, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            ReflexError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        Self::load_from_file(&config_path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns `ReflexError::ConfigParseError` if the file exists but contains
    /// invalid JSON, negative budgets, or invalid enum values.
    ///
    /// Returns `ReflexError::ConfigValidationError` if the configuration values
    /// are invalid (e.g., zero timeouts, empty model name).
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(ReflexError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| ReflexError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// Budget fields are unsigned, so any parsed value is acceptable there.
    /// The remaining checks:
    /// - `llm.model` must not be empty
    /// - all timeouts must be greater than 0
    /// - `search.maxResults` must be greater than 0
    /// - `sandbox.interpreter` must not be empty
    /// - `sandbox.image` must not be empty for the Docker backend
    /// - `outputDir` must not be empty
    ///
    /// # Errors
    ///
    /// Returns `ReflexError::ConfigValidationError` if any validation check fails.
    pub fn validate(&self) -> Result<()> {
        if self.llm.model.trim().is_empty() {
            return Err(ReflexError::config_validation(
                "llm.model must not be empty",
                "Set llm.model to a chat model name (e.g. \"gpt-4o\") in your reflex.json",
            ));
        }

        if self.llm.timeout_seconds == 0 {
            return Err(ReflexError::config_validation(
                "llm.timeoutSeconds must be greater than 0",
                "Set llm.timeoutSeconds to at least 1 second in your reflex.json",
            ));
        }

        if self.search.max_results == 0 {
            return Err(ReflexError::config_validation(
                "search.maxResults must be greater than 0",
                "Set search.maxResults to at least 1, or set maxSearchAttempts to 0 to disable search",
            ));
        }

        if self.search.timeout_seconds == 0 {
            return Err(ReflexError::config_validation(
                "search.timeoutSeconds must be greater than 0",
                "Set search.timeoutSeconds to at least 1 second in your reflex.json",
            ));
        }

        if self.sandbox.timeout_seconds == 0 {
            return Err(ReflexError::config_validation(
                "sandbox.timeoutSeconds must be greater than 0",
                "Set sandbox.timeoutSeconds to at least 1 second in your reflex.json",
            ));
        }

        if self.sandbox.interpreter.trim().is_empty() {
            return Err(ReflexError::config_validation(
                "sandbox.interpreter must not be empty",
                "Set sandbox.interpreter to the Python executable (e.g. \"python3\")",
            ));
        }

        if self.sandbox.backend == SandboxBackend::Docker && self.sandbox.image.trim().is_empty() {
            return Err(ReflexError::config_validation(
                "sandbox.image must not be empty when using the docker backend",
                "Set sandbox.image (e.g. \"python:3.12-slim\") or switch sandbox.backend to \"process\"",
            ));
        }

        if self.output_dir.trim().is_empty() {
            return Err(ReflexError::config_validation(
                "outputDir must not be empty",
                "Provide a valid output directory path in your reflex.json (use '.' for current directory)",
            ));
        }

        Ok(())
    }
}

/// Settings for the OpenAI-compatible code generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    /// Chat model name.
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature.
    #[serde(default)]
    pub temperature: f32,

    /// Base URL of the chat completions API (without the trailing path).
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,

    /// Request timeout in seconds.
    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: 0.0,
            base_url: default_llm_base_url(),
            api_key_env: default_llm_api_key_env(),
            timeout_seconds: default_llm_timeout(),
        }
    }
}

/// Settings for the Tavily web search provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchConfig {
    /// Number of results requested per query.
    #[serde(default = "default_max_results")]
    pub max_results: u32,

    /// Base URL of the search API.
    #[serde(default = "default_search_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_search_api_key_env")]
    pub api_key_env: String,

    /// Request timeout in seconds.
    #[serde(default = "default_search_timeout")]
    pub timeout_seconds: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            base_url: default_search_base_url(),
            api_key_env: default_search_api_key_env(),
            timeout_seconds: default_search_timeout(),
        }
    }
}

/// Where candidate code is executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SandboxBackend {
    /// A throwaway Docker container (default).
    #[default]
    Docker,
    /// A local child process. No isolation.
    Process,
}

impl SandboxBackend {
    /// Parses a string into a `SandboxBackend`, case-insensitively.
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "docker" => Some(Self::Docker),
            "process" => Some(Self::Process),
            _ => None,
        }
    }
}

impl std::fmt::Display for SandboxBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Docker => write!(f, "docker"),
            Self::Process => write!(f, "process"),
        }
    }
}

impl<'de> Deserialize<'de> for SandboxBackend {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid sandbox backend '{s}': expected one of 'docker', 'process'"
            ))
        })
    }
}

impl Serialize for SandboxBackend {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Code-execution sandbox configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxConfig {
    /// Execution backend.
    #[serde(default)]
    pub backend: SandboxBackend,

    /// Docker image used by the docker backend.
    #[serde(default = "default_sandbox_image")]
    pub image: String,

    /// Python interpreter executable.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Wall-clock limit for a single execution, in seconds.
    #[serde(default = "default_sandbox_timeout")]
    pub timeout_seconds: u32,

    /// Disable networking inside the container.
    #[serde(default = "default_true")]
    pub network_disabled: bool,

    /// Keep the container after the run (for debugging).
    #[serde(default)]
    pub keep_container: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: SandboxBackend::default(),
            image: default_sandbox_image(),
            interpreter: default_interpreter(),
            timeout_seconds: default_sandbox_timeout(),
            network_disabled: default_true(),
            keep_container: false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.max_initial_iterations, 1);
        assert_eq!(config.max_search_attempts, 5);
        assert!(!config.feed_search_results);
        assert_eq!(config.llm.model, "gpt-4o");
        assert!(config.llm.temperature.abs() < f32::EPSILON);
        assert_eq!(config.llm.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.search.max_results, 3);
        assert_eq!(config.search.api_key_env, "TAVILY_API_KEY");
        assert_eq!(config.sandbox.backend, SandboxBackend::Docker);
        assert_eq!(config.sandbox.image, "python:3.12-slim");
        assert!(config.sandbox.network_disabled);
        assert_eq!(config.output_dir, ".");
    }

    #[test]
    fn test_sandbox_backend_serialization() {
        assert_eq!(
            serde_json::to_string(&SandboxBackend::Docker).unwrap(),
            "\"docker\""
        );
        assert_eq!(
            serde_json::to_string(&SandboxBackend::Process).unwrap(),
            "\"process\""
        );
    }

    #[test]
    fn test_config_deserialization_with_defaults() {
        let config: Config = serde_json::from_str(r"{}").unwrap();

        assert_eq!(config.max_initial_iterations, 1);
        assert_eq!(config.max_search_attempts, 5);
        assert_eq!(config.sandbox.timeout_seconds, 30);
    }

    #[test]
    fn test_config_deserialization_with_overrides() {
        let json = r#"{
            "maxInitialIterations": 2,
            "maxSearchAttempts": 0,
            "feedSearchResults": true,
            "llm": { "model": "gpt-4o-mini", "temperature": 0.2 },
            "sandbox": { "backend": "Process", "timeoutSeconds": 5 }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.max_initial_iterations, 2);
        assert_eq!(config.max_search_attempts, 0);
        assert!(config.feed_search_results);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.sandbox.backend, SandboxBackend::Process);
        assert_eq!(config.sandbox.timeout_seconds, 5);
        // Untouched nested fields keep their defaults
        assert_eq!(config.llm.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.sandbox.interpreter, "python3");
    }

    #[test]
    fn test_negative_budget_rejected() {
        let result: std::result::Result<Config, _> =
            serde_json::from_str(r#"{"maxSearchAttempts": -1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_sandbox_backend_error() {
        let json = r#"{"sandbox": {"backend": "firecracker"}}"#;
        let result: std::result::Result<Config, _> = serde_json::from_str(json);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("invalid sandbox backend"));
        assert!(err.contains("firecracker"));
    }

    #[test]
    fn test_load_from_file_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("reflex.json");

        let json = r#"{
            "maxSearchAttempts": 2,
            "sandbox": { "backend": "docker", "image": "python:3.11" }
        }"#;
        let mut file = std::fs::File::create(&config_path).unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.max_search_attempts, 2);
        assert_eq!(config.sandbox.image, "python:3.11");
        assert_eq!(config.max_initial_iterations, 1);
    }

    #[test]
    fn test_load_from_file_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("reflex.json");
        std::fs::write(&config_path, b"{ not valid json }").unwrap();

        let err = Config::load_from_file(&config_path).unwrap_err();
        assert!(
            matches!(
                &err,
                ReflexError::ConfigParseError { path, message }
                    if *path == config_path && !message.is_empty()
            ),
            "Expected ConfigParseError with correct path, got: {err:?}"
        );
    }

    #[test]
    fn test_load_from_file_nonexistent_returns_default() {
        let nonexistent_path = PathBuf::from("/nonexistent/path/reflex.json");
        let config = Config::load_from_file(&nonexistent_path).unwrap();

        assert_eq!(config.max_initial_iterations, 1);
        assert_eq!(config.max_search_attempts, 5);
    }

    #[test]
    fn test_load_from_dir_finds_reflex_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("reflex.json"),
            r#"{"outputDir": "reports"}"#,
        )
        .unwrap();

        let config = Config::load_from_dir(dir.path()).unwrap();
        assert_eq!(config.output_dir, "reports");
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let json = r#"{
            "maxSearchAttempts": 3,
            "unknownField": "should be ignored"
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_search_attempts, 3);
    }

    #[test]
    fn test_config_validation_zero_budgets_allowed() {
        let config = Config {
            max_initial_iterations: 0,
            max_search_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_model() {
        let config = Config {
            llm: LlmConfig {
                model: "  ".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let err = config.validate().unwrap_err();
        assert!(
            matches!(
                &err,
                ReflexError::ConfigValidationError { message, .. } if message.contains("llm.model")
            ),
            "Expected ConfigValidationError about llm.model, got: {err:?}"
        );
    }

    #[test]
    fn test_config_validation_zero_sandbox_timeout() {
        let config = Config {
            sandbox: SandboxConfig {
                timeout_seconds: 0,
                ..Default::default()
            },
            ..Default::default()
        };

        let err = config.validate().unwrap_err();
        assert!(
            matches!(
                &err,
                ReflexError::ConfigValidationError { message, suggestion }
                    if message.contains("sandbox.timeoutSeconds")
                        && suggestion.contains("sandbox.timeoutSeconds")
            ),
            "Expected ConfigValidationError about sandbox.timeoutSeconds, got: {err:?}"
        );
    }

    #[test]
    fn test_config_validation_zero_max_results() {
        let config = Config {
            search: SearchConfig {
                max_results: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_empty_image_only_matters_for_docker() {
        let docker = Config {
            sandbox: SandboxConfig {
                image: String::new(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(docker.validate().is_err());

        let process = Config {
            sandbox: SandboxConfig {
                backend: SandboxBackend::Process,
                image: String::new(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(process.validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_output_dir() {
        let config = Config {
            output_dir: "   ".to_string(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ReflexError::ConfigValidationError { .. }));
    }

    #[test]
    fn test_load_from_file_validates_after_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("reflex.json");
        std::fs::write(&config_path, r#"{"llm": {"timeoutSeconds": 0}}"#).unwrap();

        let err = Config::load_from_file(&config_path).unwrap_err();
        assert!(
            matches!(&err, ReflexError::ConfigValidationError { .. }),
            "Expected ConfigValidationError, got: {err:?}"
        );
    }
}
