//! Error types for the Reflex orchestrator.
//!
//! Validation failures of generated code are *not* errors: they are ordinary
//! outcomes that drive the retry loop (see [`crate::validator::Verdict`]).
//! The variants here cover configuration problems and faults of the external
//! collaborators themselves, which end a run immediately.

use std::path::PathBuf;

/// A specialized `Result` type for Reflex orchestrator operations.
pub type Result<T> = std::result::Result<T, ReflexError>;

/// Errors that can occur while configuring or running the Reflex loop.
///
/// Error variants are organized by subsystem and include actionable suggestions
/// where possible to help users resolve issues.
#[derive(Debug, thiserror::Error)]
pub enum ReflexError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your reflex.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    /// A required API key was not present in the environment.
    #[error("Missing API key: environment variable '{variable}' is not set\n\nSuggestion: Export {variable} or add it to a .env file in the working directory")]
    MissingApiKey {
        /// Name of the environment variable that was expected.
        variable: String,
    },

    // ========================================================================
    // Collaborator Faults
    // ========================================================================
    /// The code generator could not produce a response at all.
    #[error("Generator unavailable ({kind}): {message}\n\nSuggestion: {suggestion}")]
    GeneratorUnavailable {
        /// The kind of provider failure.
        kind: ProviderErrorKind,
        /// Detailed error message from the provider.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    /// The search provider could not complete a query.
    #[error("Search unavailable ({kind}): {message}\n\nSuggestion: {suggestion}")]
    SearchUnavailable {
        /// The kind of provider failure.
        kind: ProviderErrorKind,
        /// Detailed error message from the provider.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // State Machine Errors
    // ========================================================================
    /// Invalid state transition attempted.
    #[error("Invalid state transition: cannot go from {from} to {to}")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
    },
}

/// Categories of provider failures for structured error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Authentication failure (invalid API key, expired credentials).
    Authentication,
    /// Rate limit exceeded.
    RateLimit,
    /// Server error (5xx responses).
    Server,
    /// Network connectivity issues.
    Network,
    /// The provider answered, but not in the expected shape.
    MalformedResponse,
    /// Other unclassified errors.
    Other,
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Server => write!(f, "server"),
            Self::Network => write!(f, "network"),
            Self::MalformedResponse => write!(f, "malformed_response"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl ProviderErrorKind {
    /// Returns a suggestion message for this error kind.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::Authentication => "Check your API key or credentials",
            Self::RateLimit => "Wait and retry, or reduce request frequency",
            Self::Server => "Retry later; the provider may be experiencing issues",
            Self::Network => "Check your network connection and the configured baseUrl",
            Self::MalformedResponse => {
                "Check that the configured model supports structured JSON output"
            }
            Self::Other => "Check the provider's status page",
        }
    }

    /// Classifies an HTTP status code returned by a provider.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Authentication,
            429 => Self::RateLimit,
            500..=599 => Self::Server,
            _ => Self::Other,
        }
    }
}

impl ReflexError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `MissingApiKey` error.
    #[must_use]
    pub fn missing_api_key(variable: impl Into<String>) -> Self {
        Self::MissingApiKey {
            variable: variable.into(),
        }
    }

    /// Creates a new `GeneratorUnavailable` with automatic suggestion based on error kind.
    #[must_use]
    pub fn generator_unavailable(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self::GeneratorUnavailable {
            kind,
            message: message.into(),
            suggestion: kind.suggestion().to_string(),
        }
    }

    /// Creates a new `SearchUnavailable` with automatic suggestion based on error kind.
    #[must_use]
    pub fn search_unavailable(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self::SearchUnavailable {
            kind,
            message: message.into(),
            suggestion: kind.suggestion().to_string(),
        }
    }

    /// Creates a new `InvalidStateTransition` error.
    #[must_use]
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns `true` if this error is transient and a later run may succeed.
    ///
    /// The loop itself never retries these; a broken collaborator ends the run.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::GeneratorUnavailable {
                kind: ProviderErrorKind::RateLimit
                    | ProviderErrorKind::Server
                    | ProviderErrorKind::Network,
                ..
            } | Self::SearchUnavailable {
                kind: ProviderErrorKind::RateLimit
                    | ProviderErrorKind::Server
                    | ProviderErrorKind::Network,
                ..
            }
        )
    }
}
