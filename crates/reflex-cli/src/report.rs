//! Progress descriptions and report assembly for a finished run.

use std::path::Path;

use reflex_orchestrator::{RunOutcome, RunSnapshot, RunState, StepEvent, Verdict};
use reflex_report::json::JsonGenerator;
use reflex_report::{
    FinalSolution, MarkdownGenerator, Report, ReportStatus, ReportSummary, TimelineEntry,
};

/// File name of the JSON report.
pub const JSON_REPORT: &str = "reflex-report.json";

/// File name of the Markdown report.
pub const MARKDOWN_REPORT: &str = "reflex-report.md";

/// Short event label and optional details for one snapshot.
pub fn describe(snapshot: &RunSnapshot) -> (String, Option<String>) {
    match &snapshot.event {
        StepEvent::Generated { generation_attempts } => (
            "Generating code solution".to_string(),
            Some(format!(
                "attempt {generation_attempts} since last search, {} total",
                snapshot.state.total_generations()
            )),
        ),
        StepEvent::Validated {
            verdict: Verdict::Passed,
        } => ("Code check passed".to_string(), None),
        StepEvent::Validated { verdict: Verdict::Failed(failure) } => (
            format!("Code check failed ({} phase)", failure.phase),
            Some(failure.message.clone()),
        ),
        StepEvent::Searched { query, result_count } => (
            "Performing web search".to_string(),
            Some(format!("{result_count} result(s) for: {query}")),
        ),
        StepEvent::CollaboratorFailed { collaborator, cause } => {
            (format!("{collaborator} failed"), Some(cause.clone()))
        }
    }
}

/// One progress line for the terminal.
pub fn progress_line(snapshot: &RunSnapshot) -> String {
    let (event, details) = describe(snapshot);
    match (&snapshot.event, details) {
        (StepEvent::Validated { .. } | StepEvent::CollaboratorFailed { .. }, Some(details)) => {
            format!("Step {}: {event}: {details}", snapshot.step)
        }
        _ => format!("Step {}: {event}", snapshot.step),
    }
}

const fn report_status(outcome: Option<&RunOutcome>) -> ReportStatus {
    match outcome {
        Some(RunOutcome::Succeeded) => ReportStatus::Succeeded,
        Some(RunOutcome::CollaboratorFailed { .. }) => ReportStatus::CollaboratorFailed,
        Some(RunOutcome::BudgetExhausted) | None => ReportStatus::BudgetExhausted,
    }
}

fn failure_reason(state: &RunState) -> Option<String> {
    match &state.outcome {
        Some(RunOutcome::Succeeded) => None,
        Some(RunOutcome::CollaboratorFailed { collaborator, cause }) => {
            Some(format!("{collaborator}: {cause}"))
        }
        Some(RunOutcome::BudgetExhausted) => state.last_failure.as_ref().map(ToString::to_string),
        None => Some("run was interrupted".to_string()),
    }
}

/// Builds a report from the snapshots of one run.
pub fn build_report(snapshots: &[RunSnapshot]) -> anyhow::Result<Report> {
    let Some(last) = snapshots.last() else {
        anyhow::bail!("Run produced no steps");
    };
    let state = &last.state;

    let summary = ReportSummary {
        run_id: state.run_id.to_string(),
        status: report_status(state.outcome.as_ref()),
        generations: state.total_generations(),
        searches: state.search_attempts(),
        steps: u32::try_from(snapshots.len()).unwrap_or(u32::MAX),
        duration_seconds: u64::try_from(state.elapsed().num_seconds()).unwrap_or(0),
        failure: failure_reason(state),
    };

    let mut builder = Report::builder().question(state.question()).summary(summary);

    for snapshot in snapshots {
        let (event, details) = describe(snapshot);
        let step = u32::try_from(snapshot.step).unwrap_or(u32::MAX);
        let mut entry = TimelineEntry::at_time(snapshot.state.updated_at, step, event);
        entry.details = details;
        builder = builder.timeline_entry(entry);
    }

    for turn in state.conversation().turns() {
        builder = builder.transcript_entry(turn.role().to_string(), turn.content());
    }

    if let Some(solution) = &state.current_solution {
        builder = builder.final_solution(FinalSolution::new(
            &solution.prefix,
            &solution.imports,
            &solution.code,
        ));
    }

    Ok(builder.build()?)
}

/// Writes the JSON and Markdown reports into `output_dir`.
pub fn write_reports(report: &Report, output_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(output_dir)?;

    let md_path = output_dir.join(MARKDOWN_REPORT);
    std::fs::write(&md_path, MarkdownGenerator::new(report).generate())?;
    println!("  Markdown report: {}", md_path.display());

    let json_path = output_dir.join(JSON_REPORT);
    JsonGenerator::new(report).write_to_file(&json_path, true)?;
    println!("  JSON report: {}", json_path.display());

    Ok(())
}
