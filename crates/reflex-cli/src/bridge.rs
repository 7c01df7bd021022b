//! Adapters between the sandbox runners and the orchestrator's collaborator
//! traits.

use std::sync::Arc;

use async_trait::async_trait;
use reflex_orchestrator::{CodeSandbox, ExecutionOutcome, SearchProvider, SearchResult};
use reflex_sandbox::{ExecOutput, PythonRunner};

/// Exposes a [`PythonRunner`] as a [`CodeSandbox`].
///
/// Runner faults (Docker down, interpreter missing) are reported as
/// execution errors so they reach the generator like any other failure.
#[derive(Clone)]
pub struct SandboxBridge {
    runner: Arc<dyn PythonRunner>,
}

impl SandboxBridge {
    pub fn new(runner: Arc<dyn PythonRunner>) -> Self {
        Self { runner }
    }

    async fn execute(&self, source: &str) -> ExecutionOutcome {
        match self.runner.run(source).await {
            Ok(output) => outcome_from(&output),
            Err(e) => {
                tracing::warn!(runner = self.runner.name(), error = %e, "Sandbox fault");
                ExecutionOutcome::ExecutionError(format!("Sandbox error: {e}"))
            }
        }
    }
}

fn outcome_from(output: &ExecOutput) -> ExecutionOutcome {
    if output.success() {
        ExecutionOutcome::Ok
    } else {
        ExecutionOutcome::ExecutionError(output.error_message())
    }
}

#[async_trait]
impl CodeSandbox for SandboxBridge {
    async fn execute_imports_only(&self, imports: &str) -> ExecutionOutcome {
        self.execute(imports).await
    }

    async fn execute_full(&self, imports: &str, code: &str) -> ExecutionOutcome {
        self.execute(&format!("{imports}\n{code}")).await
    }
}

/// Search provider used when the search budget is zero.
pub struct NoSearch;

#[async_trait]
impl SearchProvider for NoSearch {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn search(&self, _query: &str) -> reflex_orchestrator::Result<Vec<SearchResult>> {
        Ok(Vec::new())
    }
}
