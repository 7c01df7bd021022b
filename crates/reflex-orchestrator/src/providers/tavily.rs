//! Web search through the Tavily API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{api_key_from_env, http_client, normalize_base_url, snippet, transport_error_kind};
use crate::collaborator::{SearchProvider, SearchResult};
use crate::config::SearchConfig;
use crate::error::{ProviderErrorKind, ReflexError, Result};

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: u32,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    content: String,
}

impl From<TavilyResult> for SearchResult {
    fn from(result: TavilyResult) -> Self {
        Self {
            title: result.title.filter(|t| !t.is_empty()),
            url: result.url.filter(|u| !u.is_empty()),
            content: result.content,
        }
    }
}

/// Searches the web for context on an error message.
#[derive(Debug, Clone)]
pub struct TavilySearch {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    max_results: u32,
}

impl TavilySearch {
    /// Creates a provider with an explicit API key.
    ///
    /// # Errors
    ///
    /// Returns `ReflexError::SearchUnavailable` if the HTTP client cannot be built.
    pub fn new(config: &SearchConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = http_client(config.timeout_seconds)
            .map_err(|e| ReflexError::search_unavailable(ProviderErrorKind::Other, e.to_string()))?;

        Ok(Self {
            client,
            base_url: normalize_base_url(&config.base_url),
            api_key: api_key.into(),
            max_results: config.max_results,
        })
    }

    /// Creates a provider reading the API key from `config.api_key_env`.
    ///
    /// # Errors
    ///
    /// Returns `ReflexError::MissingApiKey` if the variable is unset or empty.
    pub fn from_env(config: &SearchConfig) -> Result<Self> {
        let api_key = api_key_from_env(&config.api_key_env)?;
        Self::new(config, api_key)
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    fn name(&self) -> &str {
        "tavily"
    }

    #[instrument(skip_all, fields(max_results = self.max_results))]
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let request = SearchRequest {
            api_key: &self.api_key,
            query,
            max_results: self.max_results,
        };

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| ReflexError::search_unavailable(transport_error_kind(&e), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReflexError::search_unavailable(
                ProviderErrorKind::from_status(status.as_u16()),
                format!("HTTP {}: {}", status.as_u16(), snippet(&body)),
            ));
        }

        let body: SearchResponse = response.json().await.map_err(|e| {
            ReflexError::search_unavailable(ProviderErrorKind::MalformedResponse, e.to_string())
        })?;

        let results: Vec<SearchResult> = body.results.into_iter().map(SearchResult::from).collect();
        debug!(count = results.len(), "Search returned results");
        Ok(results)
    }
}
