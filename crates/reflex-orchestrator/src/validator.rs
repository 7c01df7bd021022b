//! Two-phase validation of candidate solutions.
//!
//! Phase one executes only the import block; phase two executes imports and
//! code together. A failing import block short-circuits phase two, which
//! gives the generator a narrower error to act on.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::collaborator::{CodeSandbox, ExecutionOutcome};
use crate::solution::Solution;

/// Which validation phase rejected a solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePhase {
    /// Executing the import block alone failed.
    Import,
    /// Executing imports and code together failed.
    Execution,
}

impl std::fmt::Display for FailurePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Import => write!(f, "import"),
            Self::Execution => write!(f, "execution"),
        }
    }
}

/// Why a solution was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailure {
    /// The phase that failed.
    pub phase: FailurePhase,
    /// Error text reported by the sandbox.
    pub message: String,
}

impl ValidationFailure {
    /// Creates an import-phase failure.
    #[must_use]
    pub fn import(message: impl Into<String>) -> Self {
        Self {
            phase: FailurePhase::Import,
            message: message.into(),
        }
    }

    /// Creates an execution-phase failure.
    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self {
            phase: FailurePhase::Execution,
            message: message.into(),
        }
    }

    /// Text of the diagnostic notice appended to the conversation.
    ///
    /// Phrased as an instruction to the generator to reflect and retry.
    #[must_use]
    pub fn diagnostic_notice(&self) -> String {
        match self.phase {
            FailurePhase::Import => format!(
                "Your solution failed the import test. Here is the error: {}. \
                 Reflect on this error and your prior attempt to solve the problem. \
                 (1) State what you think went wrong with the prior solution and \
                 (2) try to solve this problem again. Return the FULL SOLUTION. \
                 Use the code tool to structure the output with a prefix, imports, and code block:",
                self.message
            ),
            FailurePhase::Execution => format!(
                "Your solution failed the code execution test: {}. \
                 Reflect on this error and your prior attempt, then return the FULL SOLUTION \
                 structured with a prefix, imports, and code block:",
                self.message
            ),
        }
    }

    /// Query sent to the search provider for this failure.
    #[must_use]
    pub fn search_query(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} phase: {}", self.phase, self.message)
    }
}

/// Classification of a solution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Verdict {
    /// Both phases succeeded.
    Passed,
    /// One of the phases failed.
    Failed(ValidationFailure),
}

impl Verdict {
    /// Returns `true` for [`Verdict::Passed`].
    #[must_use]
    pub const fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    /// Returns the failure, if any.
    #[must_use]
    pub const fn failure(&self) -> Option<&ValidationFailure> {
        match self {
            Self::Passed => None,
            Self::Failed(failure) => Some(failure),
        }
    }
}

/// Runs the import check and the execution check against a sandbox.
///
/// The validator never mutates run state; the controller acts on the
/// returned [`Verdict`].
#[derive(Debug, Clone)]
pub struct Validator<S> {
    sandbox: S,
}

impl<S: CodeSandbox> Validator<S> {
    /// Creates a validator over the given sandbox.
    #[must_use]
    pub const fn new(sandbox: S) -> Self {
        Self { sandbox }
    }

    /// Returns a reference to the underlying sandbox.
    #[must_use]
    pub const fn sandbox(&self) -> &S {
        &self.sandbox
    }

    /// Validates a solution.
    #[instrument(
        skip_all,
        fields(imports_len = solution.imports.len(), code_len = solution.code.len())
    )]
    pub async fn validate(&self, solution: &Solution) -> Verdict {
        if let ExecutionOutcome::ExecutionError(message) =
            self.sandbox.execute_imports_only(&solution.imports).await
        {
            debug!(%message, "Import check failed");
            return Verdict::Failed(ValidationFailure::import(message));
        }

        if let ExecutionOutcome::ExecutionError(message) = self
            .sandbox
            .execute_full(&solution.imports, &solution.code)
            .await
        {
            debug!(%message, "Execution check failed");
            return Verdict::Failed(ValidationFailure::execution(message));
        }

        debug!("Solution passed both checks");
        Verdict::Passed
    }
}
