//! The retry controller: Generate → Validate → (Search) → Generate.
//!
//! [`RetryController::step`] executes exactly one transition of the state
//! machine. The generator, sandbox, and search provider are awaited one at a
//! time; nothing runs concurrently within a run.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::collaborator::{CodeGenerator, CodeSandbox, SearchProvider, SearchResult};
use crate::config::Config;
use crate::conversation::{ConversationTurn, SEARCH_RESULTS_PREFIX};
use crate::error::{ReflexError, Result};
use crate::run_state::{Collaborator, Phase, RunOutcome, RunState, ValidationStatus};
use crate::validator::{Validator, Verdict};

/// Caps on generation and search attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    /// Generations allowed before any search has happened.
    pub max_initial_iterations: u32,
    /// Searches allowed per run; also the per-cycle generation cap once a
    /// search has happened.
    pub max_search_attempts: u32,
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            max_initial_iterations: 1,
            max_search_attempts: 5,
        }
    }
}

impl Budget {
    /// Creates a budget.
    #[must_use]
    pub const fn new(max_initial_iterations: u32, max_search_attempts: u32) -> Self {
        Self {
            max_initial_iterations,
            max_search_attempts,
        }
    }

    /// Upper bound on the number of generator calls in one run.
    ///
    /// Each search cycle allows at most `max(max_initial_iterations,
    /// max_search_attempts)` generations, and there are at most
    /// `max_search_attempts + 1` cycles. At least one generation always happens.
    #[must_use]
    pub fn max_generations(&self) -> u64 {
        let per_cycle = u64::from(self.max_initial_iterations.max(self.max_search_attempts)).max(1);
        per_cycle * (u64::from(self.max_search_attempts) + 1)
    }
}

impl From<&Config> for Budget {
    fn from(config: &Config) -> Self {
        Self::new(config.max_initial_iterations, config.max_search_attempts)
    }
}

/// What the controller does after a validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep {
    /// Ask the generator again.
    Generate,
    /// Query the search provider first.
    Search,
    /// Stop with the given outcome.
    Finish(RunOutcome),
}

/// Decides the transition out of `Validating`.
///
/// Precedence:
/// 1. passed → finish successfully;
/// 2. failed with search budget left → search;
/// 3. failed with generation budget left → generate (the cap widens to
///    `max_search_attempts` once any search has happened);
/// 4. otherwise → finish with the budget exhausted.
///
/// A status other than `Passed` counts as a failure.
///
/// # Examples
///
/// ```
/// use reflex_orchestrator::{
///     decide_next, Budget, NextStep, RunState, Solution, ValidationFailure, Verdict,
/// };
///
/// let mut state = RunState::new("q");
/// state.record_generation(Solution::new("Divides", "", "print(1 / 0)"));
/// state.record_verdict(&Verdict::Failed(ValidationFailure::execution(
///     "ZeroDivisionError: division by zero",
/// )));
///
/// assert_eq!(decide_next(&state, &Budget::new(1, 2)), NextStep::Search);
/// ```
#[must_use]
pub fn decide_next(state: &RunState, budget: &Budget) -> NextStep {
    if state.validation_status == ValidationStatus::Passed {
        return NextStep::Finish(RunOutcome::Succeeded);
    }

    if state.search_attempts < budget.max_search_attempts {
        return NextStep::Search;
    }

    let within_initial_cap = state.generation_attempts < budget.max_initial_iterations;
    let within_widened_cap =
        state.search_attempts > 0 && state.generation_attempts < budget.max_search_attempts;
    if within_initial_cap || within_widened_cap {
        return NextStep::Generate;
    }

    NextStep::Finish(RunOutcome::BudgetExhausted)
}

/// What happened during one transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StepEvent {
    /// The generator returned a candidate.
    Generated {
        /// Generations since the last search, including this one.
        generation_attempts: u32,
    },
    /// The current candidate was validated.
    Validated {
        /// The validation result.
        verdict: Verdict,
    },
    /// The search provider answered.
    Searched {
        /// The query that was sent.
        query: String,
        /// Number of results returned.
        result_count: usize,
    },
    /// A collaborator call failed and the run ended.
    CollaboratorFailed {
        /// Which collaborator failed.
        collaborator: Collaborator,
        /// The error it reported.
        cause: String,
    },
}

/// Drives one run's [`RunState`] through the state machine.
#[derive(Debug)]
pub struct RetryController<G, S, X> {
    generator: G,
    search: S,
    validator: Validator<X>,
    budget: Budget,
    feed_search_results: bool,
}

impl<G, S, X> RetryController<G, S, X>
where
    G: CodeGenerator,
    S: SearchProvider,
    X: CodeSandbox,
{
    /// Creates a controller over the given collaborators.
    pub const fn new(generator: G, search: S, sandbox: X, budget: Budget) -> Self {
        Self {
            generator,
            search,
            validator: Validator::new(sandbox),
            budget,
            feed_search_results: false,
        }
    }

    /// Creates a controller with the budget and feedback setting from `config`.
    pub fn from_config(generator: G, search: S, sandbox: X, config: &Config) -> Self {
        Self::new(generator, search, sandbox, Budget::from(config))
            .with_search_feedback(config.feed_search_results)
    }

    /// Enables or disables appending search results to the conversation.
    #[must_use]
    pub const fn with_search_feedback(mut self, enabled: bool) -> Self {
        self.feed_search_results = enabled;
        self
    }

    /// Returns the configured budget.
    pub const fn budget(&self) -> &Budget {
        &self.budget
    }

    /// Creates the initial state for a question.
    pub fn start(&self, question: impl Into<String>) -> RunState {
        let state = RunState::new(question);
        info!(
            run_id = %state.run_id,
            max_initial_iterations = self.budget.max_initial_iterations,
            max_search_attempts = self.budget.max_search_attempts,
            "Run started"
        );
        state
    }

    /// Executes the transition out of `state.phase`.
    ///
    /// # Errors
    ///
    /// Returns `ReflexError::InvalidStateTransition` if the run is already
    /// `Done`, or if `Validating` is reached without a solution. Collaborator
    /// faults are not errors here: they finish the run and are reported as
    /// [`StepEvent::CollaboratorFailed`].
    pub async fn step(&self, state: &mut RunState) -> Result<StepEvent> {
        match state.phase {
            Phase::Generating => Ok(self.generate(state).await),
            Phase::Validating => self.validate(state).await,
            Phase::Searching => Ok(self.search(state).await),
            Phase::Done => Err(ReflexError::invalid_transition(Phase::Done, "any phase")),
        }
    }

    #[instrument(skip_all, fields(run_id = %state.run_id, generator = self.generator.name()))]
    async fn generate(&self, state: &mut RunState) -> StepEvent {
        match self.generator.generate(state.conversation().turns()).await {
            Ok(solution) => {
                state.record_generation(solution);
                state.phase = Phase::Validating;
                info!(
                    generation_attempts = state.generation_attempts,
                    total_generations = state.total_generations,
                    "Generated candidate solution"
                );
                StepEvent::Generated {
                    generation_attempts: state.generation_attempts,
                }
            }
            Err(e) => Self::fail(state, Collaborator::Generator, &e),
        }
    }

    #[instrument(skip_all, fields(run_id = %state.run_id))]
    async fn validate(&self, state: &mut RunState) -> Result<StepEvent> {
        let solution = state.current_solution.clone().ok_or_else(|| {
            ReflexError::invalid_transition("validating", "validating without a solution")
        })?;

        let verdict = self.validator.validate(&solution).await;
        state.record_verdict(&verdict);

        match &verdict {
            Verdict::Passed => info!("Code check passed"),
            Verdict::Failed(failure) => warn!(
                phase = %failure.phase,
                message = %failure.message,
                "Code check failed"
            ),
        }

        match decide_next(state, &self.budget) {
            NextStep::Generate => state.phase = Phase::Generating,
            NextStep::Search => state.phase = Phase::Searching,
            NextStep::Finish(outcome) => {
                info!(
                    outcome = %outcome,
                    generation_attempts = state.generation_attempts,
                    search_attempts = state.search_attempts,
                    "Run finished"
                );
                state.finish(outcome);
            }
        }

        Ok(StepEvent::Validated { verdict })
    }

    #[instrument(skip_all, fields(run_id = %state.run_id, search = self.search.name()))]
    async fn search(&self, state: &mut RunState) -> StepEvent {
        let query = state.last_failure.as_ref().map_or_else(
            || state.question().to_string(),
            |failure| failure.search_query().to_string(),
        );

        match self.search.search(&query).await {
            Ok(results) => {
                let result_count = results.len();
                if self.feed_search_results && !results.is_empty() {
                    state.append_turn(ConversationTurn::notice(search_results_notice(&results)));
                }
                state.record_search(results);
                state.phase = Phase::Generating;
                info!(
                    search_attempts = state.search_attempts,
                    result_count, "Web search completed"
                );
                StepEvent::Searched {
                    query,
                    result_count,
                }
            }
            Err(e) => Self::fail(state, Collaborator::Search, &e),
        }
    }

    fn fail(state: &mut RunState, collaborator: Collaborator, error: &ReflexError) -> StepEvent {
        let cause = error.to_string();
        warn!(
            %collaborator,
            error = %cause,
            transient = error.is_transient(),
            "Collaborator failed, ending run"
        );
        state.finish(RunOutcome::CollaboratorFailed {
            collaborator,
            cause: cause.clone(),
        });
        StepEvent::CollaboratorFailed {
            collaborator,
            cause,
        }
    }
}

/// Renders search results as a diagnostic notice.
fn search_results_notice(results: &[SearchResult]) -> String {
    let mut notice = String::from(SEARCH_RESULTS_PREFIX);
    for (index, result) in results.iter().enumerate() {
        notice.push_str(&format!("\n[{}]", index + 1));
        if let Some(title) = &result.title {
            notice.push_str(&format!(" {title}"));
        }
        if let Some(url) = &result.url {
            notice.push_str(&format!(" ({url})"));
        }
        notice.push('\n');
        notice.push_str(&result.content);
    }
    notice
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorKind;
    use crate::solution::Solution;
    use crate::testing::{ScriptedGenerator, ScriptedSandbox, ScriptedSearch};

    fn failed_state(generation_attempts: u32, search_attempts: u32) -> RunState {
        let mut state = RunState::new("q");
        state.validation_status = ValidationStatus::Failed;
        state.generation_attempts = generation_attempts;
        state.search_attempts = search_attempts;
        state
    }

    // ------------------------------------------------------------------------
    // decide_next
    // ------------------------------------------------------------------------

    #[test]
    fn test_passed_always_finishes() {
        let mut state = RunState::new("q");
        state.validation_status = ValidationStatus::Passed;
        state.search_attempts = 0;

        assert_eq!(
            decide_next(&state, &Budget::new(1, 5)),
            NextStep::Finish(RunOutcome::Succeeded)
        );
    }

    #[test]
    fn test_failed_with_search_budget_searches() {
        assert_eq!(
            decide_next(&failed_state(1, 0), &Budget::new(1, 5)),
            NextStep::Search
        );
        assert_eq!(
            decide_next(&failed_state(9, 4), &Budget::new(1, 5)),
            NextStep::Search
        );
    }

    #[test]
    fn test_initial_cap_without_search() {
        let budget = Budget::new(3, 0);
        assert_eq!(decide_next(&failed_state(1, 0), &budget), NextStep::Generate);
        assert_eq!(decide_next(&failed_state(2, 0), &budget), NextStep::Generate);
        assert_eq!(
            decide_next(&failed_state(3, 0), &budget),
            NextStep::Finish(RunOutcome::BudgetExhausted)
        );
    }

    #[test]
    fn test_cap_widens_after_search() {
        let budget = Budget::new(1, 2);
        // Searches spent, one generation since: widened cap of 2 still allows one more
        assert_eq!(decide_next(&failed_state(1, 2), &budget), NextStep::Generate);
        assert_eq!(
            decide_next(&failed_state(2, 2), &budget),
            NextStep::Finish(RunOutcome::BudgetExhausted)
        );
    }

    #[test]
    fn test_zero_search_budget_disables_search() {
        assert_eq!(
            decide_next(&failed_state(1, 0), &Budget::new(1, 0)),
            NextStep::Finish(RunOutcome::BudgetExhausted)
        );
    }

    #[test]
    fn test_unknown_status_counts_as_failure() {
        let mut state = RunState::new("q");
        state.generation_attempts = 1;
        assert_eq!(decide_next(&state, &Budget::new(1, 1)), NextStep::Search);
    }

    #[test]
    fn test_budget_from_config() {
        let config = Config {
            max_initial_iterations: 4,
            max_search_attempts: 2,
            ..Default::default()
        };
        assert_eq!(Budget::from(&config), Budget::new(4, 2));
        assert_eq!(Budget::default(), Budget::new(1, 5));
    }

    #[test]
    fn test_max_generations() {
        assert_eq!(Budget::new(1, 0).max_generations(), 1);
        assert_eq!(Budget::new(0, 0).max_generations(), 1);
        assert_eq!(Budget::new(1, 2).max_generations(), 6);
        assert_eq!(Budget::new(3, 1).max_generations(), 6);
    }

    // ------------------------------------------------------------------------
    // step
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_step_generating_moves_to_validating() {
        let generator = ScriptedGenerator::new(vec![Ok(Solution::new("p", "", "print(1)"))]);
        let controller = RetryController::new(
            generator.clone(),
            ScriptedSearch::default(),
            ScriptedSandbox::default(),
            Budget::default(),
        );
        let mut state = controller.start("q");

        let event = controller.step(&mut state).await.unwrap();

        assert_eq!(event, StepEvent::Generated { generation_attempts: 1 });
        assert_eq!(state.phase, Phase::Validating);
        assert_eq!(generator.calls(), 1);
        assert_eq!(generator.seen_conversation_lengths(), vec![1]);
    }

    #[tokio::test]
    async fn test_step_validating_failure_moves_to_searching() {
        let controller = RetryController::new(
            ScriptedGenerator::new(vec![Ok(Solution::new("", "import nope", ""))]),
            ScriptedSearch::default(),
            ScriptedSandbox::default().fail_imports_containing("nope", "No module named 'nope'"),
            Budget::new(1, 1),
        );
        let mut state = controller.start("q");
        controller.step(&mut state).await.unwrap();

        let event = controller.step(&mut state).await.unwrap();

        assert!(matches!(event, StepEvent::Validated { verdict: Verdict::Failed(_) }));
        assert_eq!(state.phase, Phase::Searching);
        assert_eq!(state.conversation().len(), 3);
    }

    #[tokio::test]
    async fn test_step_searching_uses_failure_as_query_and_resets() {
        let search = ScriptedSearch::default();
        let controller = RetryController::new(
            ScriptedGenerator::new(vec![Ok(Solution::new("", "", "boom()"))]),
            search.clone(),
            ScriptedSandbox::default()
                .fail_code_containing("boom", "NameError: name 'boom' is not defined"),
            Budget::new(1, 1),
        );
        let mut state = controller.start("q");
        controller.step(&mut state).await.unwrap();
        controller.step(&mut state).await.unwrap();

        let event = controller.step(&mut state).await.unwrap();

        assert_eq!(
            event,
            StepEvent::Searched {
                query: "NameError: name 'boom' is not defined".to_string(),
                result_count: 0,
            }
        );
        assert_eq!(search.queries(), vec!["NameError: name 'boom' is not defined"]);
        assert_eq!(state.phase, Phase::Generating);
        assert_eq!(state.generation_attempts, 0);
        assert_eq!(state.search_attempts, 1);
    }

    #[tokio::test]
    async fn test_search_results_not_fed_by_default() {
        let controller = RetryController::new(
            ScriptedGenerator::new(vec![Ok(Solution::new("", "", "boom()"))]),
            ScriptedSearch::with_results(vec![SearchResult::text("define boom first")]),
            ScriptedSandbox::default().fail_code_containing("boom", "NameError"),
            Budget::new(1, 1),
        );
        let mut state = controller.start("q");
        for _ in 0..3 {
            controller.step(&mut state).await.unwrap();
        }

        assert_eq!(state.conversation().len(), 3);
        assert_eq!(state.last_search_results.len(), 1);
    }

    #[tokio::test]
    async fn test_search_results_fed_when_enabled() {
        let controller = RetryController::new(
            ScriptedGenerator::new(vec![Ok(Solution::new("", "", "boom()"))]),
            ScriptedSearch::with_results(vec![SearchResult {
                title: Some("NameError docs".to_string()),
                url: Some("https://docs.python.org".to_string()),
                content: "define boom first".to_string(),
            }]),
            ScriptedSandbox::default().fail_code_containing("boom", "NameError"),
            Budget::new(1, 1),
        )
        .with_search_feedback(true);
        let mut state = controller.start("q");
        for _ in 0..3 {
            controller.step(&mut state).await.unwrap();
        }

        let last = state.conversation().last().unwrap();
        assert!(last.is_search_context());
        assert!(last.content().contains("[1] NameError docs (https://docs.python.org)"));
        assert!(last.content().contains("define boom first"));
    }

    #[tokio::test]
    async fn test_generator_fault_finishes_run() {
        let controller = RetryController::new(
            ScriptedGenerator::new(vec![Err(ReflexError::generator_unavailable(
                ProviderErrorKind::Server,
                "HTTP 503",
            ))]),
            ScriptedSearch::default(),
            ScriptedSandbox::default(),
            Budget::default(),
        );
        let mut state = controller.start("q");

        let event = controller.step(&mut state).await.unwrap();

        assert!(matches!(
            event,
            StepEvent::CollaboratorFailed {
                collaborator: Collaborator::Generator,
                ref cause,
            } if cause.contains("HTTP 503")
        ));
        assert!(state.is_terminal());
        assert!(matches!(state.outcome, Some(RunOutcome::CollaboratorFailed { .. })));
    }

    #[tokio::test]
    async fn test_step_after_done_is_invalid() {
        let controller = RetryController::new(
            ScriptedGenerator::default(),
            ScriptedSearch::default(),
            ScriptedSandbox::default(),
            Budget::default(),
        );
        let mut state = controller.start("q");
        state.finish(RunOutcome::Succeeded);

        let err = controller.step(&mut state).await.unwrap_err();
        assert!(matches!(err, ReflexError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn test_validating_without_solution_is_invalid() {
        let controller = RetryController::new(
            ScriptedGenerator::default(),
            ScriptedSearch::default(),
            ScriptedSandbox::default(),
            Budget::default(),
        );
        let mut state = controller.start("q");
        state.phase = Phase::Validating;

        assert!(controller.step(&mut state).await.is_err());
    }

    #[test]
    fn test_search_results_notice_format() {
        let notice = search_results_notice(&[
            SearchResult::with_url("https://a.dev", "first"),
            SearchResult::text("second"),
        ]);
        assert_eq!(
            notice,
            "Web search results:\n[1] (https://a.dev)\nfirst\n[2]\nsecond"
        );
    }
}
