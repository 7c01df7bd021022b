//! Reflex Report Generation
//!
//! Types and generators for describing a finished Reflex run. Reports can be
//! serialized to JSON for programmatic access or rendered to Markdown for
//! human review.
//!
//! # Types
//!
//! - [`Report`] - The complete report of one run
//! - [`ReportSummary`] - Outcome and counters
//! - [`TimelineEntry`] - One step of the run
//! - [`TranscriptEntry`] - One conversation turn
//! - [`FinalSolution`] - The last generated solution
//!
//! # Example
//!
//! ```rust
//! use reflex_report::{Report, ReportStatus, ReportSummary, FinalSolution};
//! use reflex_report::json::JsonGenerator;
//!
//! let report = Report::builder()
//!     .question("Print the first 10 primes")
//!     .summary(ReportSummary {
//!         status: ReportStatus::Succeeded,
//!         generations: 1,
//!         steps: 2,
//!         ..Default::default()
//!     })
//!     .transcript_entry("user", "Print the first 10 primes")
//!     .final_solution(FinalSolution::new("Sieve", "", "print([2, 3, 5, 7])"))
//!     .build()
//!     .unwrap();
//!
//! let json = JsonGenerator::new(&report).generate_pretty().unwrap();
//! assert!(json.contains("succeeded"));
//! ```

pub mod json;
mod markdown;

pub use markdown::MarkdownGenerator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix of conversation notices that carry raw web search results.
///
/// Such notices are left out of report transcripts.
pub const SEARCH_RESULTS_PREFIX: &str = "Web search results:";

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Failed to serialize the report to JSON.
    #[error("failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to read or write report files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid report data.
    #[error("invalid report data: {0}")]
    InvalidData(String),
}

/// Result type for report operations.
pub type Result<T> = std::result::Result<T, ReportError>;

// ============================================================================
// Report Status
// ============================================================================

/// How the run ended.
///
/// Mirrors the orchestrator's run outcome without depending on that crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// A generated solution passed validation.
    Succeeded,
    /// The attempt budgets ran out first.
    #[default]
    BudgetExhausted,
    /// The generator or search provider failed outright.
    CollaboratorFailed,
}

impl ReportStatus {
    /// Returns `true` if the run produced a passing solution.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns a human-readable description of the status.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Succeeded => "Solution passed validation",
            Self::BudgetExhausted => "Attempt budget exhausted",
            Self::CollaboratorFailed => "Collaborator failed",
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

// ============================================================================
// Report
// ============================================================================

/// Complete report of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// The coding question the run answered.
    pub question: String,

    /// Outcome and counters.
    pub summary: ReportSummary,

    /// One entry per step, in order.
    pub timeline: Vec<TimelineEntry>,

    /// The conversation, without raw search-result notices.
    pub transcript: Vec<TranscriptEntry>,

    /// The last generated solution, if any was produced.
    pub final_solution: Option<FinalSolution>,
}

impl Report {
    /// Creates a new report builder.
    #[must_use]
    pub fn builder() -> ReportBuilder {
        ReportBuilder::default()
    }

    /// Serializes the report to JSON.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::Serialization` if JSON serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(ReportError::from)
    }
}

// ============================================================================
// ReportBuilder
// ============================================================================

/// Builder for constructing [`Report`] instances.
#[derive(Debug, Clone, Default)]
pub struct ReportBuilder {
    question: Option<String>,
    summary: Option<ReportSummary>,
    timeline: Vec<TimelineEntry>,
    transcript: Vec<TranscriptEntry>,
    final_solution: Option<FinalSolution>,
}

impl ReportBuilder {
    /// Sets the question.
    #[must_use]
    pub fn question(mut self, question: impl Into<String>) -> Self {
        self.question = Some(question.into());
        self
    }

    /// Sets the report summary.
    #[must_use]
    pub fn summary(mut self, summary: ReportSummary) -> Self {
        self.summary = Some(summary);
        self
    }

    /// Adds a timeline entry.
    #[must_use]
    pub fn timeline_entry(mut self, entry: TimelineEntry) -> Self {
        self.timeline.push(entry);
        self
    }

    /// Sets the complete timeline.
    #[must_use]
    pub fn timeline(mut self, timeline: Vec<TimelineEntry>) -> Self {
        self.timeline = timeline;
        self
    }

    /// Adds a conversation turn.
    ///
    /// Turns whose content starts with [`SEARCH_RESULTS_PREFIX`] are skipped.
    #[must_use]
    pub fn transcript_entry(mut self, role: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        if !content.starts_with(SEARCH_RESULTS_PREFIX) {
            self.transcript.push(TranscriptEntry {
                role: role.into(),
                content,
            });
        }
        self
    }

    /// Sets the final solution.
    #[must_use]
    pub fn final_solution(mut self, solution: FinalSolution) -> Self {
        self.final_solution = Some(solution);
        self
    }

    /// Builds the report.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::InvalidData` if required fields are missing.
    pub fn build(self) -> Result<Report> {
        let question = self
            .question
            .ok_or_else(|| ReportError::InvalidData("question is required".to_string()))?;

        let summary = self
            .summary
            .ok_or_else(|| ReportError::InvalidData("summary is required".to_string()))?;

        Ok(Report {
            question,
            summary,
            timeline: self.timeline,
            transcript: self.transcript,
            final_solution: self.final_solution,
        })
    }
}

// ============================================================================
// ReportSummary
// ============================================================================

/// Outcome and counters of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Identifier of the run.
    pub run_id: String,

    /// How the run ended.
    pub status: ReportStatus,

    /// Generator calls over the whole run.
    pub generations: u32,

    /// Web searches performed.
    pub searches: u32,

    /// State transitions executed.
    pub steps: u32,

    /// Wall-clock duration in seconds.
    pub duration_seconds: u64,

    /// Why the run did not succeed, when it did not.
    pub failure: Option<String>,
}

// ============================================================================
// TimelineEntry
// ============================================================================

/// One step of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// When the step completed.
    pub timestamp: DateTime<Utc>,

    /// 1-based step number.
    pub step: u32,

    /// Short description of the step.
    pub event: String,

    /// Optional additional details.
    pub details: Option<String>,
}

impl TimelineEntry {
    /// Creates a new timeline entry.
    #[must_use]
    pub fn new(step: u32, event: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            step,
            event: event.into(),
            details: None,
        }
    }

    /// Creates a new timeline entry with details.
    #[must_use]
    pub fn with_details(step: u32, event: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            details: Some(details.into()),
            ..Self::new(step, event)
        }
    }

    /// Creates a new timeline entry with a specific timestamp.
    #[must_use]
    pub fn at_time(timestamp: DateTime<Utc>, step: u32, event: impl Into<String>) -> Self {
        Self {
            timestamp,
            ..Self::new(step, event)
        }
    }
}

// ============================================================================
// Transcript
// ============================================================================

/// One conversation turn as shown in a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// `user` or `assistant`.
    pub role: String,

    /// Turn text.
    pub content: String,
}

/// The last generated solution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalSolution {
    /// Prose description.
    pub prefix: String,

    /// Import block.
    pub imports: String,

    /// Code block.
    pub code: String,
}

impl FinalSolution {
    /// Creates a final solution.
    #[must_use]
    pub fn new(
        prefix: impl Into<String>,
        imports: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            imports: imports.into(),
            code: code.into(),
        }
    }

    /// Returns imports and code as one program.
    #[must_use]
    pub fn program(&self) -> String {
        if self.imports.trim().is_empty() {
            self.code.clone()
        } else {
            format!("{}\n{}", self.imports, self.code)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
