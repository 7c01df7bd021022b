//! Reflex Loop Orchestrator
//!
//! Drives the self-correcting code-generation loop: a generator proposes a
//! solution, a sandbox validates it, and failures feed back into the next
//! attempt, with a web search in between while the search budget lasts.

pub mod collaborator;
pub mod config;
pub mod controller;
pub mod conversation;
pub mod driver;
pub mod error;
pub mod providers;
pub mod run_state;
pub mod solution;
pub mod testing;
pub mod validator;

pub use collaborator::{CodeGenerator, CodeSandbox, ExecutionOutcome, SearchProvider, SearchResult};
pub use config::{Config, LlmConfig, SandboxBackend, SandboxConfig, SearchConfig, CONFIG_FILE_NAME};
pub use controller::{decide_next, Budget, NextStep, RetryController, StepEvent};
pub use conversation::{ConversationLog, ConversationTurn, TurnRole, SEARCH_RESULTS_PREFIX};
pub use driver::{Driver, RunSnapshot, RunTrace};
pub use error::{ProviderErrorKind, ReflexError, Result};
pub use providers::{OpenAiGenerator, TavilySearch};
pub use run_state::{Collaborator, Phase, RunOutcome, RunState, ValidationStatus};
pub use solution::Solution;
pub use validator::{FailurePhase, ValidationFailure, Validator, Verdict};
