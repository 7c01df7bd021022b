//! Lazy execution of a run as a stream of state snapshots.

use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::collaborator::{CodeGenerator, CodeSandbox, SearchProvider};
use crate::controller::{RetryController, StepEvent};
use crate::run_state::{RunOutcome, RunState};

/// The state of a run immediately after one transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// 1-based index of the transition within the run.
    pub step: usize,
    /// What the transition did.
    pub event: StepEvent,
    /// Full state after the transition.
    pub state: RunState,
}

impl RunSnapshot {
    /// Returns `true` if this is the last snapshot of its run.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Every snapshot of a completed run, in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTrace {
    /// Snapshots in emission order.
    pub snapshots: Vec<RunSnapshot>,
}

impl RunTrace {
    /// Returns the last snapshot.
    #[must_use]
    pub fn last(&self) -> Option<&RunSnapshot> {
        self.snapshots.last()
    }

    /// Returns the state carried by the last snapshot.
    #[must_use]
    pub fn final_state(&self) -> Option<&RunState> {
        self.last().map(|snapshot| &snapshot.state)
    }

    /// Returns the outcome of the run, if it finished.
    #[must_use]
    pub fn outcome(&self) -> Option<&RunOutcome> {
        self.final_state().and_then(|state| state.outcome.as_ref())
    }

    /// Returns the events in order.
    pub fn events(&self) -> impl Iterator<Item = &StepEvent> {
        self.snapshots.iter().map(|snapshot| &snapshot.event)
    }

    /// Number of snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Returns `true` if the trace holds no snapshots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

/// Runs questions through a [`RetryController`].
///
/// Each call to [`Driver::run`] starts an independent run with fresh state.
/// Runs share the controller's collaborators but never any state.
#[derive(Debug)]
pub struct Driver<G, S, X> {
    controller: RetryController<G, S, X>,
}

impl<G, S, X> Driver<G, S, X>
where
    G: CodeGenerator,
    S: SearchProvider,
    X: CodeSandbox,
{
    /// Creates a driver over a controller.
    pub const fn new(controller: RetryController<G, S, X>) -> Self {
        Self { controller }
    }

    /// Returns the underlying controller.
    pub const fn controller(&self) -> &RetryController<G, S, X> {
        &self.controller
    }

    /// Starts a run and returns its snapshots as a lazy stream.
    ///
    /// Nothing happens until the stream is polled; each poll performs exactly
    /// one transition. The stream ends after the snapshot whose phase is
    /// `Done`. Dropping the stream abandons the run.
    pub fn run(&self, question: impl Into<String>) -> BoxStream<'_, RunSnapshot> {
        let controller = &self.controller;
        let initial = controller.start(question);

        stream::unfold((initial, 0_usize), move |(mut state, step)| async move {
            if state.is_terminal() {
                return None;
            }

            match controller.step(&mut state).await {
                Ok(event) => {
                    let step = step + 1;
                    let snapshot = RunSnapshot {
                        step,
                        event,
                        state: state.clone(),
                    };
                    Some((snapshot, (state, step)))
                }
                Err(e) => {
                    error!(run_id = %state.run_id, error = %e, "Run stopped on invalid transition");
                    None
                }
            }
        })
        .boxed()
    }

    /// Runs a question to completion and collects every snapshot.
    pub async fn run_to_completion(&self, question: impl Into<String>) -> RunTrace {
        let snapshots = self.run(question).collect().await;
        RunTrace { snapshots }
    }
}
