//! Markdown report generation.
//!
//! [`MarkdownGenerator`] renders a [`Report`] as a document with:
//!
//! - A summary table
//! - The question
//! - A step timeline
//! - The conversation history
//! - The final solution as a Python code block
//!
//! # Example
//!
//! ```rust
//! use reflex_report::{MarkdownGenerator, Report, ReportSummary};
//!
//! let report = Report::builder()
//!     .question("Print hello")
//!     .summary(ReportSummary::default())
//!     .build()
//!     .unwrap();
//!
//! let markdown = MarkdownGenerator::new(&report).generate();
//! assert!(markdown.contains("# Reflex Run Report"));
//! ```

use chrono::{DateTime, Utc};
use std::fmt::Write;

use crate::{Report, TimelineEntry, TranscriptEntry};

/// Maximum length of the details column in the timeline table.
const MAX_DETAILS_DISPLAY_LENGTH: usize = 120;

/// Generates Markdown reports from run results.
pub struct MarkdownGenerator<'a> {
    report: &'a Report,
}

impl<'a> MarkdownGenerator<'a> {
    /// Creates a new Markdown generator for the given report.
    #[must_use]
    pub const fn new(report: &'a Report) -> Self {
        Self { report }
    }

    /// Generates the complete Markdown report.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut output = String::new();

        Self::write_title(&mut output);
        self.write_summary(&mut output);
        self.write_question(&mut output);
        self.write_timeline(&mut output);
        self.write_transcript(&mut output);
        self.write_final_solution(&mut output);
        Self::write_footer(&mut output);

        output
    }

    fn write_title(output: &mut String) {
        let _ = writeln!(output, "# Reflex Run Report\n");
    }

    /// Writes the summary section with metrics table.
    fn write_summary(&self, output: &mut String) {
        let summary = &self.report.summary;

        let _ = writeln!(output, "## Summary\n");
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(output, "| Status | {} |", summary.status.description());
        if !summary.run_id.is_empty() {
            let _ = writeln!(output, "| Run ID | `{}` |", escape_inline_code(&summary.run_id));
        }
        let _ = writeln!(output, "| Generations | {} |", summary.generations);
        let _ = writeln!(output, "| Web Searches | {} |", summary.searches);
        let _ = writeln!(output, "| Steps | {} |", summary.steps);
        let _ = writeln!(
            output,
            "| Duration | {} |",
            format_duration(summary.duration_seconds)
        );
        if let Some(failure) = &summary.failure {
            let _ = writeln!(output, "| Failure | {} |", escape_markdown(failure));
        }
        let _ = writeln!(output);
    }

    fn write_question(&self, output: &mut String) {
        let _ = writeln!(output, "## Question\n");
        for line in self.report.question.lines() {
            let _ = writeln!(output, "> {line}");
        }
        let _ = writeln!(output);
    }

    /// Writes the timeline section.
    fn write_timeline(&self, output: &mut String) {
        let _ = writeln!(output, "## Timeline\n");

        if self.report.timeline.is_empty() {
            let _ = writeln!(output, "*No steps recorded.*\n");
            return;
        }

        let _ = writeln!(output, "| Time | Step | Event | Details |");
        let _ = writeln!(output, "|------|------|-------|---------|");

        for entry in &self.report.timeline {
            Self::write_timeline_entry(output, entry);
        }

        let _ = writeln!(output);
    }

    fn write_timeline_entry(output: &mut String, entry: &TimelineEntry) {
        let details = entry
            .details
            .as_deref()
            .map(|d| escape_markdown(&truncate_output(d, MAX_DETAILS_DISPLAY_LENGTH)))
            .unwrap_or_default();

        let time = format_timestamp(&entry.timestamp);
        let step = entry.step;
        let event = escape_markdown(&entry.event);
        let _ = writeln!(output, "| {time} | {step} | {event} | {details} |");
    }

    /// Writes the conversation history.
    fn write_transcript(&self, output: &mut String) {
        let _ = writeln!(output, "## Conversation\n");

        if self.report.transcript.is_empty() {
            let _ = writeln!(output, "*No conversation recorded.*\n");
            return;
        }

        for (index, entry) in self.report.transcript.iter().enumerate() {
            Self::write_transcript_entry(output, index + 1, entry);
        }
    }

    fn write_transcript_entry(output: &mut String, number: usize, entry: &TranscriptEntry) {
        let _ = writeln!(output, "### {number}. {}\n", capitalize(&entry.role));
        let _ = writeln!(output, "```text\n{}\n```\n", escape_fence(&entry.content));
    }

    fn write_final_solution(&self, output: &mut String) {
        let _ = writeln!(output, "## Final Solution\n");

        let Some(solution) = &self.report.final_solution else {
            let _ = writeln!(output, "*No solution was generated.*\n");
            return;
        };

        if !solution.prefix.trim().is_empty() {
            let _ = writeln!(output, "{}\n", escape_markdown(solution.prefix.trim()));
        }
        let _ = writeln!(output, "```python\n{}\n```\n", escape_fence(&solution.program()));
    }

    fn write_footer(output: &mut String) {
        let _ = writeln!(output, "---");
        let timestamp = format_timestamp(&Utc::now());
        let _ = writeln!(output, "*Generated by Reflex at {timestamp}*");
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Formats a duration in seconds to a human-readable string.
///
/// Examples:
/// - 65 seconds -> "1m 5s"
/// - 3661 seconds -> "1h 1m 1s"
/// - 45 seconds -> "45s"
fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    let mut parts = Vec::new();

    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if secs > 0 || parts.is_empty() {
        parts.push(format!("{secs}s"));
    }

    parts.join(" ")
}

/// Format: "YYYY-MM-DD HH:MM:SS UTC"
fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

/// Escapes special Markdown characters in text.
fn escape_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for ch in text.chars() {
        match ch {
            '*' | '_' | '`' | '#' | '[' | ']' | '(' | ')' | '!' | '\\' | '<' | '>' | '|' => {
                result.push('\\');
                result.push(ch);
            }
            // Table cells cannot span lines
            '\n' => result.push_str("<br>"),
            _ => result.push(ch),
        }
    }

    result
}

fn escape_inline_code(text: &str) -> String {
    text.replace('`', "'")
}

/// Keeps content from closing the surrounding code fence.
fn escape_fence(text: &str) -> String {
    text.replace("```", "'''")
}

/// Truncates to the first line and at most `max_length` bytes, on a char
/// boundary.
fn truncate_output(output: &str, max_length: usize) -> String {
    let first_line = output.lines().next().unwrap_or("");

    if first_line.len() <= max_length {
        first_line.to_string()
    } else {
        let truncate_at = first_line
            .char_indices()
            .take_while(|(idx, _)| *idx < max_length)
            .last()
            .map_or(0, |(idx, c)| idx + c.len_utf8());
        format!("{}...", &first_line[..truncate_at])
    }
}

// ============================================================================
// Tests
// ============================================================================
