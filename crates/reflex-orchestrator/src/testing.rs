//! Scripted collaborators for exercising the retry loop without a model,
//! a search API, or a Python interpreter.
//!
//! Every fake is cheap to clone and clones share their call history, so a
//! test can hand one clone to the controller and inspect the other.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::collaborator::{
    CodeGenerator, CodeSandbox, ExecutionOutcome, SearchProvider, SearchResult,
};
use crate::conversation::ConversationTurn;
use crate::error::{ProviderErrorKind, ReflexError, Result};
use crate::solution::Solution;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Generator
// ============================================================================

#[derive(Debug, Default)]
struct GeneratorScript {
    responses: VecDeque<Result<Solution>>,
    last_solution: Option<Solution>,
    seen_lengths: Vec<usize>,
}

/// A [`CodeGenerator`] that replays a fixed list of responses.
///
/// Once the list is exhausted the last successful solution is returned again.
/// If there never was one, the generator reports itself unavailable.
#[derive(Debug, Clone, Default)]
pub struct ScriptedGenerator {
    script: Arc<Mutex<GeneratorScript>>,
}

impl ScriptedGenerator {
    /// Creates a generator that answers with `responses` in order.
    #[must_use]
    pub fn new(responses: Vec<Result<Solution>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(GeneratorScript {
                responses: responses.into(),
                ..GeneratorScript::default()
            })),
        }
    }

    /// Creates a generator that always returns `solution`.
    #[must_use]
    pub fn repeating(solution: Solution) -> Self {
        Self::new(vec![Ok(solution)])
    }

    /// Number of `generate` calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        lock(&self.script).seen_lengths.len()
    }

    /// Conversation length observed by each call, in call order.
    #[must_use]
    pub fn seen_conversation_lengths(&self) -> Vec<usize> {
        lock(&self.script).seen_lengths.clone()
    }
}

#[async_trait]
impl CodeGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, conversation: &[ConversationTurn]) -> Result<Solution> {
        let mut script = lock(&self.script);
        script.seen_lengths.push(conversation.len());

        match script.responses.pop_front() {
            Some(Ok(solution)) => {
                script.last_solution = Some(solution.clone());
                Ok(solution)
            }
            Some(Err(e)) => Err(e),
            None => script.last_solution.clone().ok_or_else(|| {
                ReflexError::generator_unavailable(ProviderErrorKind::Other, "script exhausted")
            }),
        }
    }
}

// ============================================================================
// Search
// ============================================================================

/// A [`SearchProvider`] that returns canned results or a canned failure.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSearch {
    results: Vec<SearchResult>,
    failure: Option<String>,
    queries: Arc<Mutex<Vec<String>>>,
}

impl ScriptedSearch {
    /// Creates a provider that answers every query with `results`.
    #[must_use]
    pub fn with_results(results: Vec<SearchResult>) -> Self {
        Self {
            results,
            ..Self::default()
        }
    }

    /// Creates a provider whose every query fails with `message`.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    /// Queries received so far, in order.
    #[must_use]
    pub fn queries(&self) -> Vec<String> {
        lock(&self.queries).clone()
    }

    /// Number of `search` calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        lock(&self.queries).len()
    }
}

#[async_trait]
impl SearchProvider for ScriptedSearch {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        lock(&self.queries).push(query.to_string());
        match &self.failure {
            Some(message) => Err(ReflexError::search_unavailable(
                ProviderErrorKind::Network,
                message.clone(),
            )),
            None => Ok(self.results.clone()),
        }
    }
}

// ============================================================================
// Sandbox
// ============================================================================

/// A [`CodeSandbox`] driven by substring rules instead of an interpreter.
///
/// Source text passes unless it contains a registered pattern, in which case
/// the matching rule's message is reported as the execution error. Import
/// rules apply to the import block in both phases; code rules apply only to
/// the code block during the full run.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSandbox {
    import_rules: Vec<(String, String)>,
    code_rules: Vec<(String, String)>,
    import_calls: Arc<AtomicUsize>,
    full_calls: Arc<AtomicUsize>,
}

impl ScriptedSandbox {
    /// Fails imports that contain `pattern` with `message`.
    #[must_use]
    pub fn fail_imports_containing(
        mut self,
        pattern: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        self.import_rules.push((pattern.into(), message.into()));
        self
    }

    /// Fails code that contains `pattern` with `message`.
    #[must_use]
    pub fn fail_code_containing(
        mut self,
        pattern: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        self.code_rules.push((pattern.into(), message.into()));
        self
    }

    /// Fails every full execution with `message`.
    #[must_use]
    pub fn failing_execution(self, message: impl Into<String>) -> Self {
        self.fail_code_containing("", message)
    }

    /// Number of import-only executions so far.
    #[must_use]
    pub fn import_calls(&self) -> usize {
        self.import_calls.load(Ordering::SeqCst)
    }

    /// Number of full executions so far.
    #[must_use]
    pub fn full_calls(&self) -> usize {
        self.full_calls.load(Ordering::SeqCst)
    }

    fn first_match(rules: &[(String, String)], source: &str) -> Option<String> {
        rules
            .iter()
            .find(|(pattern, _)| source.contains(pattern.as_str()))
            .map(|(_, message)| message.clone())
    }
}

#[async_trait]
impl CodeSandbox for ScriptedSandbox {
    async fn execute_imports_only(&self, imports: &str) -> ExecutionOutcome {
        self.import_calls.fetch_add(1, Ordering::SeqCst);
        Self::first_match(&self.import_rules, imports)
            .map_or(ExecutionOutcome::Ok, ExecutionOutcome::ExecutionError)
    }

    async fn execute_full(&self, imports: &str, code: &str) -> ExecutionOutcome {
        self.full_calls.fetch_add(1, Ordering::SeqCst);
        Self::first_match(&self.import_rules, imports)
            .or_else(|| Self::first_match(&self.code_rules, code))
            .map_or(ExecutionOutcome::Ok, ExecutionOutcome::ExecutionError)
    }
}
