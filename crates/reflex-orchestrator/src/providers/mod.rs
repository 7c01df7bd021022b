//! HTTP-backed collaborators: an OpenAI-compatible code generator and the
//! Tavily search API.

pub mod openai;
pub mod tavily;

pub use openai::OpenAiGenerator;
pub use tavily::TavilySearch;

use std::time::Duration;

use crate::error::{ProviderErrorKind, ReflexError, Result};

/// Reads a non-empty API key from the environment.
pub(crate) fn api_key_from_env(variable: &str) -> Result<String> {
    std::env::var(variable)
        .ok()
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .ok_or_else(|| ReflexError::missing_api_key(variable))
}

/// Builds an HTTP client with a request timeout.
pub(crate) fn http_client(timeout_seconds: u32) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(u64::from(timeout_seconds)))
        .build()
}

/// Classifies a transport-level failure.
pub(crate) fn transport_error_kind(error: &reqwest::Error) -> ProviderErrorKind {
    if error.is_decode() {
        ProviderErrorKind::MalformedResponse
    } else if let Some(status) = error.status() {
        ProviderErrorKind::from_status(status.as_u16())
    } else {
        ProviderErrorKind::Network
    }
}

/// Strips trailing slashes so paths can be appended.
pub(crate) fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Shortens a response body for inclusion in an error message.
pub(crate) fn snippet(body: &str) -> String {
    const MAX: usize = 200;
    let body = body.trim();
    if body.chars().count() <= MAX {
        body.to_string()
    } else {
        let cut: String = body.chars().take(MAX).collect();
        format!("{cut}...")
    }
}
