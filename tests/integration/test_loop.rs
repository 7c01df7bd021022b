//! End-to-end tests for the generate/validate/search loop.
//!
//! These drive complete runs through the public [`Driver`] API with scripted
//! collaborators, then check the emitted traces: the four reference
//! scenarios first, followed by properties that must hold for every run.

use futures::StreamExt;
use reflex_orchestrator::testing::{ScriptedGenerator, ScriptedSandbox, ScriptedSearch};
use reflex_orchestrator::{
    Budget, Collaborator, Config, Driver, FailurePhase, Phase, ProviderErrorKind, ReflexError,
    RetryController, RunOutcome, RunTrace, SearchResult, Solution, StepEvent, TurnRole,
    ValidationStatus, Verdict,
};

fn working_solution() -> Solution {
    Solution::new(
        "Sums the list with the built-in.",
        "import math",
        "print(math.fsum([1, 2, 3]))",
    )
}

fn driver(
    generator: ScriptedGenerator,
    search: ScriptedSearch,
    sandbox: ScriptedSandbox,
    budget: Budget,
) -> Driver<ScriptedGenerator, ScriptedSearch, ScriptedSandbox> {
    Driver::new(RetryController::new(generator, search, sandbox, budget))
}

/// Compact labels for a trace, e.g. `["generate", "validate:fail", "search"]`.
fn labels(trace: &RunTrace) -> Vec<&'static str> {
    trace
        .events()
        .map(|event| match event {
            StepEvent::Generated { .. } => "generate",
            StepEvent::Validated {
                verdict: Verdict::Passed,
            } => "validate:pass",
            StepEvent::Validated {
                verdict: Verdict::Failed(_),
            } => "validate:fail",
            StepEvent::Searched { .. } => "search",
            StepEvent::CollaboratorFailed { .. } => "collaborator_failed",
        })
        .collect()
}

// ============================================================================
// Reference scenarios
// ============================================================================

/// A valid first answer with search disabled finishes after one generation.
#[tokio::test]
async fn test_first_attempt_passes() {
    let generator = ScriptedGenerator::repeating(working_solution());
    let search = ScriptedSearch::default();
    let driver = driver(
        generator.clone(),
        search.clone(),
        ScriptedSandbox::default(),
        Budget::new(1, 0),
    );

    let trace = driver
        .run_to_completion("Sum the numbers 1, 2 and 3")
        .await;

    assert_eq!(labels(&trace), vec!["generate", "validate:pass"]);
    assert_eq!(trace.outcome(), Some(&RunOutcome::Succeeded));

    let state = trace.final_state().expect("final state");
    assert_eq!(state.phase, Phase::Done);
    assert_eq!(state.validation_status, ValidationStatus::Passed);
    assert_eq!(state.current_solution, Some(working_solution()));
    assert_eq!(state.search_attempts(), 0);
    assert_eq!(generator.calls(), 1);
    assert_eq!(search.calls(), 0);
}

/// A broken import block with search disabled exhausts the budget after one
/// generation, without ever running the code.
#[tokio::test]
async fn test_import_failure_without_search_exhausts_budget() {
    let generator = ScriptedGenerator::repeating(Solution::new(
        "Uses numpy",
        "import numpyy",
        "print(numpyy.sum([1, 2, 3]))",
    ));
    let sandbox = ScriptedSandbox::default()
        .fail_imports_containing("numpyy", "ModuleNotFoundError: No module named 'numpyy'");
    let search = ScriptedSearch::default();
    let driver = driver(
        generator.clone(),
        search.clone(),
        sandbox.clone(),
        Budget::new(1, 0),
    );

    let trace = driver.run_to_completion("Sum a list with numpy").await;

    assert_eq!(labels(&trace), vec!["generate", "validate:fail"]);
    assert_eq!(trace.outcome(), Some(&RunOutcome::BudgetExhausted));

    let state = trace.final_state().expect("final state");
    let failure = state.last_failure.as_ref().expect("failure recorded");
    assert_eq!(failure.phase, FailurePhase::Import);
    assert_eq!(state.generation_attempts(), 1);
    assert_eq!(state.total_generations(), 1);
    assert_eq!(generator.calls(), 1);
    assert_eq!(search.calls(), 0);
    assert_eq!(sandbox.import_calls(), 1);
    assert_eq!(sandbox.full_calls(), 0);
}

/// Two execution failures each trigger a search; the third generation passes.
#[tokio::test]
async fn test_recovers_after_two_searches() {
    let generator = ScriptedGenerator::new(vec![
        Ok(Solution::new("First try", "", "print(undefined_total)")),
        Ok(Solution::new("Second try", "", "print(undefined_sum)")),
        Ok(working_solution()),
    ]);
    let sandbox = ScriptedSandbox::default()
        .fail_code_containing("undefined_total", "NameError: name 'undefined_total' is not defined")
        .fail_code_containing("undefined_sum", "NameError: name 'undefined_sum' is not defined");
    let search = ScriptedSearch::with_results(vec![SearchResult::with_url(
        "https://docs.python.org/3/library/math.html",
        "math.fsum returns an accurate floating point sum",
    )]);
    let driver = driver(
        generator.clone(),
        search.clone(),
        sandbox,
        Budget::new(1, 2),
    );

    let trace = driver.run_to_completion("Sum the numbers 1, 2 and 3").await;

    assert_eq!(
        labels(&trace),
        vec![
            "generate",
            "validate:fail",
            "search",
            "generate",
            "validate:fail",
            "search",
            "generate",
            "validate:pass",
        ]
    );
    assert_eq!(trace.outcome(), Some(&RunOutcome::Succeeded));

    let state = trace.final_state().expect("final state");
    assert_eq!(state.search_attempts(), 2);
    assert_eq!(state.total_generations(), 3);
    assert_eq!(
        search.queries(),
        vec![
            "NameError: name 'undefined_total' is not defined",
            "NameError: name 'undefined_sum' is not defined",
        ]
    );

    // Question, then (solution, notice) pairs; the generator sees the whole
    // history every time.
    assert_eq!(generator.seen_conversation_lengths(), vec![1, 3, 5]);
    let roles: Vec<_> = state.conversation().turns().iter().map(|t| t.role()).collect();
    assert_eq!(
        roles,
        vec![
            TurnRole::User,
            TurnRole::Assistant,
            TurnRole::User,
            TurnRole::Assistant,
            TurnRole::User,
            TurnRole::Assistant,
        ]
    );
}

/// A search outage ends the run at once.
#[tokio::test]
async fn test_search_outage_stops_the_run() {
    let generator =
        ScriptedGenerator::repeating(Solution::new("Broken", "", "raise ValueError('x')"));
    let search = ScriptedSearch::failing("connection refused");
    let driver = driver(
        generator.clone(),
        search.clone(),
        ScriptedSandbox::default().failing_execution("ValueError: x"),
        Budget::default(),
    );

    let trace = driver.run_to_completion("Raise nothing").await;

    assert_eq!(
        labels(&trace),
        vec!["generate", "validate:fail", "collaborator_failed"]
    );
    match trace.outcome() {
        Some(RunOutcome::CollaboratorFailed {
            collaborator,
            cause,
        }) => {
            assert_eq!(*collaborator, Collaborator::Search);
            assert!(cause.contains("connection refused"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(generator.calls(), 1);
    assert_eq!(search.calls(), 1);
    assert_eq!(trace.final_state().expect("final state").search_attempts(), 0);
}

/// A generator outage ends the run with the generator named as the cause.
#[tokio::test]
async fn test_generator_outage_stops_the_run() {
    let generator = ScriptedGenerator::new(vec![Err(ReflexError::generator_unavailable(
        ProviderErrorKind::RateLimit,
        "HTTP 429: slow down",
    ))]);
    let driver = driver(
        generator,
        ScriptedSearch::default(),
        ScriptedSandbox::default(),
        Budget::default(),
    );

    let trace = driver.run_to_completion("Anything").await;

    assert_eq!(labels(&trace), vec!["collaborator_failed"]);
    assert!(matches!(
        trace.outcome(),
        Some(RunOutcome::CollaboratorFailed {
            collaborator: Collaborator::Generator,
            ..
        })
    ));
    assert!(trace.final_state().expect("final state").current_solution.is_none());
}

/// The budget in a config file reaches the controller unchanged.
#[tokio::test]
async fn test_budget_from_config() {
    let config = Config {
        max_initial_iterations: 2,
        max_search_attempts: 0,
        ..Config::default()
    };
    let generator = ScriptedGenerator::repeating(Solution::new("Broken", "", "boom"));
    let driver = Driver::new(RetryController::from_config(
        generator.clone(),
        ScriptedSearch::default(),
        ScriptedSandbox::default().failing_execution("NameError: name 'boom' is not defined"),
        &config,
    ));

    let trace = driver.run_to_completion("q").await;

    assert_eq!(trace.outcome(), Some(&RunOutcome::BudgetExhausted));
    assert_eq!(generator.calls(), 2);
}

// ============================================================================
// Properties over every run
// ============================================================================

/// Budgets covering the interesting corners: no search, search-only caps,
/// and initial caps larger or smaller than the search cap.
const BUDGETS: [(u32, u32); 8] = [
    (1, 0),
    (3, 0),
    (1, 1),
    (1, 5),
    (2, 3),
    (4, 2),
    (0, 0),
    (0, 2),
];

async fn always_failing_trace(budget: Budget) -> RunTrace {
    let generator = ScriptedGenerator::repeating(Solution::new("Broken", "", "boom"));
    let driver = driver(
        generator,
        ScriptedSearch::with_results(vec![SearchResult::text("boom is not a builtin")]),
        ScriptedSandbox::default().failing_execution("NameError: name 'boom' is not defined"),
        budget,
    );
    driver.run_to_completion("Never works").await
}

#[tokio::test]
async fn test_every_budget_terminates_within_bound() {
    for (initial, searches) in BUDGETS {
        let budget = Budget::new(initial, searches);
        let trace = always_failing_trace(budget).await;
        let state = trace.final_state().expect("final state");

        assert_eq!(state.phase, Phase::Done, "budget {budget:?}");
        assert_eq!(trace.outcome(), Some(&RunOutcome::BudgetExhausted), "budget {budget:?}");
        assert!(
            u64::from(state.total_generations()) <= budget.max_generations(),
            "budget {budget:?}: {} generations",
            state.total_generations()
        );
        assert_eq!(state.search_attempts(), searches, "budget {budget:?}");
    }
}

#[tokio::test]
async fn test_search_count_never_decreases() {
    for (initial, searches) in BUDGETS {
        let trace = always_failing_trace(Budget::new(initial, searches)).await;

        let counts: Vec<u32> = trace
            .snapshots
            .iter()
            .map(|s| s.state.search_attempts())
            .collect();
        assert!(counts.windows(2).all(|w| w[0] <= w[1]), "{counts:?}");
        assert!(counts.iter().all(|&c| c <= searches), "{counts:?}");
    }
}

#[tokio::test]
async fn test_generation_counter_resets_after_search() {
    let trace = always_failing_trace(Budget::new(2, 3)).await;

    for snapshot in &trace.snapshots {
        if let StepEvent::Searched { .. } = snapshot.event {
            assert_eq!(snapshot.state.generation_attempts(), 0);
        }
        if let StepEvent::Generated { generation_attempts } = snapshot.event {
            assert_eq!(generation_attempts, snapshot.state.generation_attempts());
            assert!(generation_attempts >= 1);
        }
    }
}

#[tokio::test]
async fn test_pass_is_terminal() {
    // Fails once, then passes; the remaining budget must go unused.
    let generator = ScriptedGenerator::new(vec![
        Ok(Solution::new("Broken", "", "boom")),
        Ok(working_solution()),
    ]);
    let search = ScriptedSearch::default();
    let driver = driver(
        generator.clone(),
        search.clone(),
        ScriptedSandbox::default().fail_code_containing("boom", "NameError"),
        Budget::new(3, 5),
    );

    let trace = driver.run_to_completion("Sum").await;

    let pass_index = trace
        .snapshots
        .iter()
        .position(|s| s.state.validation_status == ValidationStatus::Passed)
        .expect("a passing snapshot");
    assert_eq!(pass_index, trace.len() - 1);
    assert!(trace.snapshots[pass_index].is_final());
    assert_eq!(generator.calls(), 2);
    assert_eq!(search.calls(), 1);
}

#[tokio::test]
async fn test_conversation_is_append_only() {
    let trace = always_failing_trace(Budget::new(2, 2)).await;

    let mut previous = None;
    for snapshot in &trace.snapshots {
        let log = snapshot.state.conversation();
        if let Some(earlier) = previous {
            assert!(log.extends(earlier), "step {} rewrote history", snapshot.step);
        }
        previous = Some(log);
    }
}

#[tokio::test]
async fn test_steps_are_numbered_and_stream_ends_after_done() {
    let driver = driver(
        ScriptedGenerator::repeating(Solution::new("Broken", "", "boom")),
        ScriptedSearch::default(),
        ScriptedSandbox::default().failing_execution("NameError"),
        Budget::new(1, 1),
    );

    let mut stream = driver.run("q");
    let mut steps = Vec::new();
    while let Some(snapshot) = stream.next().await {
        steps.push(snapshot.step);
        if snapshot.is_final() {
            break;
        }
    }

    assert_eq!(steps, (1..=steps.len()).collect::<Vec<_>>());
    assert!(stream.next().await.is_none());
}
