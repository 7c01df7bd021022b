//! Interfaces of the external collaborators the retry controller drives.
//!
//! The controller owns none of these capabilities: it asks a
//! [`CodeGenerator`] for candidates, a [`CodeSandbox`] to execute them, and a
//! [`SearchProvider`] for context after a failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::conversation::ConversationTurn;
use crate::error::Result;
use crate::solution::Solution;

/// Produces candidate solutions from the conversation so far.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &str;

    /// Generates a solution for the full conversation.
    ///
    /// # Errors
    ///
    /// Returns `ReflexError::GeneratorUnavailable` when the model call itself
    /// cannot be completed.
    async fn generate(&self, conversation: &[ConversationTurn]) -> Result<Solution>;
}

/// One search hit. Treated as an opaque blob by the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Page title, when the provider reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Source URL, when the provider reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Extracted text content.
    pub content: String,
}

impl SearchResult {
    /// Creates a result with content only.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            title: None,
            url: None,
            content: content.into(),
        }
    }

    /// Creates a result with a source URL.
    #[must_use]
    pub fn with_url(url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: None,
            url: Some(url.into()),
            content: content.into(),
        }
    }
}

/// Looks up external context for an error message.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &str;

    /// Runs a query. No results is `Ok(vec![])`, not an error.
    ///
    /// # Errors
    ///
    /// Returns `ReflexError::SearchUnavailable` when the call cannot be completed.
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>>;
}

/// Result of executing source text in the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// The source ran to completion.
    Ok,
    /// The source raised or exited abnormally.
    ExecutionError(String),
}

impl ExecutionOutcome {
    /// Returns `true` if execution succeeded.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Opaque code-execution oracle.
///
/// Implementations choose their own isolation. Failures of the sandbox
/// itself are reported as [`ExecutionOutcome::ExecutionError`] so they feed
/// the normal diagnostic path.
#[async_trait]
pub trait CodeSandbox: Send + Sync {
    /// Executes only the import block.
    async fn execute_imports_only(&self, imports: &str) -> ExecutionOutcome;

    /// Executes imports followed by code as one program in a fresh scope.
    async fn execute_full(&self, imports: &str, code: &str) -> ExecutionOutcome;
}

#[async_trait]
impl<T: CodeGenerator + ?Sized> CodeGenerator for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn generate(&self, conversation: &[ConversationTurn]) -> Result<Solution> {
        (**self).generate(conversation).await
    }
}

#[async_trait]
impl<T: SearchProvider + ?Sized> SearchProvider for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        (**self).search(query).await
    }
}

#[async_trait]
impl<T: CodeSandbox + ?Sized> CodeSandbox for std::sync::Arc<T> {
    async fn execute_imports_only(&self, imports: &str) -> ExecutionOutcome {
        (**self).execute_imports_only(imports).await
    }

    async fn execute_full(&self, imports: &str, code: &str) -> ExecutionOutcome {
        (**self).execute_full(imports, code).await
    }
}
