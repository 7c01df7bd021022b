//! Run state types for the Reflex retry controller.
//!
//! This module defines the state machine types threaded through one run:
//! the current phase, validation status, attempt counters, and the
//! conversation log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collaborator::SearchResult;
use crate::conversation::{ConversationLog, ConversationTurn};
use crate::solution::Solution;
use crate::validator::{ValidationFailure, Verdict};

// ============================================================================
// Phase
// ============================================================================

/// The state the controller will act on next.
///
/// The phase transitions through these states:
/// - `Generating` -> `Validating`
/// - From `Validating`:
///   - `Done` (passed, or budget exhausted)
///   - `Searching` -> `Generating` (search budget remains)
///   - `Generating` (search budget spent, generation budget remains)
/// - Any phase -> `Done` when a collaborator faults
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Ask the generator for a candidate.
    #[default]
    Generating,
    /// Validate the current candidate.
    Validating,
    /// Query the search provider with the latest failure.
    Searching,
    /// The run is over.
    Done,
}

impl Phase {
    /// Returns `true` if this phase ends the run.
    ///
    /// # Examples
    ///
    /// ```
    /// use reflex_orchestrator::Phase;
    ///
    /// assert!(Phase::Done.is_terminal());
    /// assert!(!Phase::Searching.is_terminal());
    /// ```
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generating => write!(f, "generating"),
            Self::Validating => write!(f, "validating"),
            Self::Searching => write!(f, "searching"),
            Self::Done => write!(f, "done"),
        }
    }
}

// ============================================================================
// ValidationStatus
// ============================================================================

/// Result of validating the current solution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// The current solution has not been validated yet.
    #[default]
    Unknown,
    /// The current solution passed. Terminal.
    Passed,
    /// The current solution failed.
    Failed,
}

// ============================================================================
// RunOutcome
// ============================================================================

/// An external collaborator of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collaborator {
    /// The code generator.
    Generator,
    /// The search provider.
    Search,
}

impl std::fmt::Display for Collaborator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generator => write!(f, "generator"),
            Self::Search => write!(f, "search"),
        }
    }
}

/// How a finished run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// A solution passed validation.
    Succeeded,
    /// Retry budgets ran out before any solution passed.
    BudgetExhausted,
    /// An external call failed; the run could not continue.
    CollaboratorFailed {
        /// Which collaborator failed.
        collaborator: Collaborator,
        /// The error it reported.
        cause: String,
    },
}

impl RunOutcome {
    /// Returns `true` for [`RunOutcome::Succeeded`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns a human-readable description of the outcome.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Succeeded => "Solution passed validation",
            Self::BudgetExhausted => "Retry budget exhausted without a passing solution",
            Self::CollaboratorFailed { .. } => "External collaborator failed",
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CollaboratorFailed {
                collaborator,
                cause,
            } => write!(f, "{} ({collaborator}: {cause})", self.description()),
            Self::Succeeded | Self::BudgetExhausted => write!(f, "{}", self.description()),
        }
    }
}

// ============================================================================
// RunState
// ============================================================================

/// Complete mutable state of one run.
///
/// Private to its run. Snapshots of it are cloned out by the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique identifier of this run.
    pub run_id: Uuid,

    /// The phase the controller acts on next.
    pub phase: Phase,

    /// The conversation re-sent to the generator. Append-only.
    conversation: ConversationLog,

    /// The latest generated solution.
    pub current_solution: Option<Solution>,

    /// Validation result for `current_solution`.
    pub validation_status: ValidationStatus,

    /// Why `current_solution` failed, when it did.
    pub last_failure: Option<ValidationFailure>,

    /// Generator calls since the last completed search.
    pub(crate) generation_attempts: u32,

    /// Completed search invocations. Never decreases.
    pub(crate) search_attempts: u32,

    /// Generator calls over the whole run. Never reset.
    pub(crate) total_generations: u32,

    /// Results of the most recent search.
    pub last_search_results: Vec<SearchResult>,

    /// Set once the run reaches `Done`.
    pub outcome: Option<RunOutcome>,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the state was last updated.
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    /// Creates the initial state for a question.
    ///
    /// # Examples
    ///
    /// ```
    /// use reflex_orchestrator::{Phase, RunState, ValidationStatus};
    ///
    /// let state = RunState::new("Print the first 10 primes");
    /// assert_eq!(state.phase, Phase::Generating);
    /// assert_eq!(state.generation_attempts(), 0);
    /// assert_eq!(state.search_attempts(), 0);
    /// assert_eq!(state.validation_status, ValidationStatus::Unknown);
    /// assert_eq!(state.conversation().len(), 1);
    /// ```
    #[must_use]
    pub fn new(question: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            phase: Phase::Generating,
            conversation: ConversationLog::with_question(question),
            current_solution: None,
            validation_status: ValidationStatus::Unknown,
            last_failure: None,
            generation_attempts: 0,
            search_attempts: 0,
            total_generations: 0,
            last_search_results: Vec::new(),
            outcome: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Returns the conversation log.
    #[must_use]
    pub const fn conversation(&self) -> &ConversationLog {
        &self.conversation
    }

    /// Returns the question that started the run.
    #[must_use]
    pub fn question(&self) -> &str {
        self.conversation.question().unwrap_or_default()
    }

    /// Generator calls since the last completed search.
    #[must_use]
    pub const fn generation_attempts(&self) -> u32 {
        self.generation_attempts
    }

    /// Completed search invocations.
    #[must_use]
    pub const fn search_attempts(&self) -> u32 {
        self.search_attempts
    }

    /// Generator calls over the whole run.
    #[must_use]
    pub const fn total_generations(&self) -> u32 {
        self.total_generations
    }

    /// Returns `true` once the run has reached `Done`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Updates the `updated_at` timestamp to the current time.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Appends a turn to the conversation and updates the timestamp.
    pub fn append_turn(&mut self, turn: ConversationTurn) {
        self.conversation.append(turn);
        self.touch();
    }

    /// Records a freshly generated solution.
    ///
    /// Appends it as an assistant turn, makes it current, resets the
    /// validation status, and counts the attempt.
    pub fn record_generation(&mut self, solution: Solution) {
        self.conversation
            .append(ConversationTurn::solution(solution.clone()));
        self.current_solution = Some(solution);
        self.validation_status = ValidationStatus::Unknown;
        self.last_failure = None;
        self.generation_attempts += 1;
        self.total_generations += 1;
        self.touch();
    }

    /// Records the verdict on the current solution.
    ///
    /// A failure also appends its diagnostic notice to the conversation.
    pub fn record_verdict(&mut self, verdict: &Verdict) {
        match verdict {
            Verdict::Passed => {
                self.validation_status = ValidationStatus::Passed;
                self.last_failure = None;
            }
            Verdict::Failed(failure) => {
                self.validation_status = ValidationStatus::Failed;
                self.conversation
                    .append(ConversationTurn::notice(failure.diagnostic_notice()));
                self.last_failure = Some(failure.clone());
            }
        }
        self.touch();
    }

    /// Records a completed search.
    ///
    /// Counts the search and resets the generation counter.
    pub fn record_search(&mut self, results: Vec<SearchResult>) {
        self.search_attempts += 1;
        self.generation_attempts = 0;
        self.last_search_results = results;
        self.touch();
    }

    /// Moves the run to `Done` with the given outcome.
    pub fn finish(&mut self, outcome: RunOutcome) {
        self.phase = Phase::Done;
        self.outcome = Some(outcome);
        self.touch();
    }

    /// Returns the duration since the run started.
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        self.updated_at - self.started_at
    }
}

// ============================================================================
// Tests
// ============================================================================
