//! Reflex CLI
//!
//! Main entry point for answering a coding question with the
//! generate/validate/search loop.

mod bridge;
mod report;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use reflex_orchestrator::{
    CodeGenerator, CodeSandbox, Config, Driver, OpenAiGenerator, RetryController, RunSnapshot,
    SandboxBackend, SearchProvider, TavilySearch,
};
use reflex_sandbox::{DockerRunner, DockerSettings, ProcessRunner, PythonRunner};
use tracing_subscriber::EnvFilter;

use crate::bridge::{NoSearch, SandboxBridge};

/// Reflex - self-correcting code generation
///
/// Asks a chat model for a Python solution, executes it in a sandbox, and
/// feeds failures (plus web search results) back until it runs or the
/// attempt budget is spent.
#[derive(Parser, Debug)]
#[command(name = "reflex")]
#[command(version, about, long_about = None)]
struct Args {
    /// The coding question to answer
    #[arg(value_name = "QUESTION", conflicts_with = "question_file")]
    question: Option<String>,

    /// Read the question from a file instead
    #[arg(short = 'f', long, value_name = "FILE")]
    question_file: Option<PathBuf>,

    /// Path to configuration file (default: reflex.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Generations allowed before the first web search
    #[arg(long, value_name = "N")]
    max_initial_iterations: Option<u32>,

    /// Web searches allowed per run (0 disables search)
    #[arg(long, value_name = "N")]
    max_search_attempts: Option<u32>,

    /// Execution backend: docker or process
    #[arg(long, value_name = "BACKEND", value_parser = parse_backend)]
    sandbox: Option<SandboxBackend>,

    /// Chat model used for generation
    #[arg(long, value_name = "MODEL")]
    model: Option<String>,

    /// Output directory for reports
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<String>,

    /// Skip writing reflex-report.json and reflex-report.md
    #[arg(long)]
    no_report: bool,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,
}

fn parse_backend(value: &str) -> Result<SandboxBackend, String> {
    SandboxBackend::from_str_case_insensitive(value)
        .ok_or_else(|| format!("unknown sandbox backend '{value}' (expected docker or process)"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "Failed to read .env"),
    }

    tracing::info!("Reflex starting");
    tracing::debug!(config = ?args.config, "Config file");

    match run_reflex(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Runs one question through the loop.
///
/// Returns whether a passing solution was found.
async fn run_reflex(args: Args) -> anyhow::Result<bool> {
    let mut config = load_config(args.config.as_deref())?;
    apply_overrides(&mut config, &args);
    config.validate()?;

    let question = read_question(&args)?;
    print_config(&config);

    let generator: Arc<dyn CodeGenerator> = Arc::new(OpenAiGenerator::from_env(&config.llm)?);
    let search: Arc<dyn SearchProvider> = if config.max_search_attempts == 0 {
        Arc::new(NoSearch)
    } else {
        Arc::new(TavilySearch::from_env(&config.search)?)
    };
    let runner = build_runner(&config).await?;

    let controller = RetryController::from_config(
        generator,
        search,
        SandboxBridge::new(Arc::clone(&runner)),
        &config,
    );
    let driver = Driver::new(controller);

    println!();
    println!("Question: {question}");
    println!("Press Ctrl+C to stop");
    println!();

    let snapshots = drive(&driver, &question).await;

    println!();
    println!("Cleaning up...");
    if let Err(e) = runner.shutdown().await {
        tracing::warn!(error = %e, "Failed to shut down sandbox");
    }

    let Some(last) = snapshots.last() else {
        println!("Run stopped before the first step completed");
        return Ok(false);
    };
    print_summary(last);

    if !args.no_report {
        println!();
        println!("Generating reports...");
        let report = report::build_report(&snapshots)?;
        report::write_reports(&report, Path::new(&config.output_dir))?;
    }

    Ok(last.state.outcome.as_ref().is_some_and(|o| o.is_success()))
}

/// Consumes the run's snapshot stream, printing progress, until it ends or
/// the user interrupts.
async fn drive<G, S, X>(driver: &Driver<G, S, X>, question: &str) -> Vec<RunSnapshot>
where
    G: CodeGenerator,
    S: SearchProvider,
    X: CodeSandbox,
{
    let mut stream = driver.run(question);
    let mut snapshots = Vec::new();

    loop {
        tokio::select! {
            next = stream.next() => {
                let Some(snapshot) = next else { break };
                println!("{}", report::progress_line(&snapshot));
                snapshots.push(snapshot);
            }
            Ok(()) = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, abandoning run");
                println!("Interrupted");
                break;
            }
        }
    }

    snapshots
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\n\
                     Suggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(n) = args.max_initial_iterations {
        config.max_initial_iterations = n;
    }
    if let Some(n) = args.max_search_attempts {
        config.max_search_attempts = n;
    }
    if let Some(backend) = args.sandbox {
        config.sandbox.backend = backend;
    }
    if let Some(ref model) = args.model {
        config.llm.model.clone_from(model);
    }
    if let Some(ref output_dir) = args.output_dir {
        config.output_dir.clone_from(output_dir);
    }
}

fn read_question(args: &Args) -> anyhow::Result<String> {
    let question = match (&args.question, &args.question_file) {
        (Some(question), _) => question.clone(),
        (None, Some(path)) => std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read question file '{}': {e}", path.display())
        })?,
        (None, None) => anyhow::bail!(
            "No question given\n\n\
             Suggestion: Pass the question as an argument or use --question-file"
        ),
    };

    let question = question.trim().to_string();
    if question.is_empty() {
        anyhow::bail!("The question is empty");
    }
    Ok(question)
}

/// Creates the configured sandbox runner.
///
/// For Docker this also pulls the image and starts the container, so setup
/// problems surface before the first generation.
async fn build_runner(config: &Config) -> anyhow::Result<Arc<dyn PythonRunner>> {
    let timeout = Duration::from_secs(u64::from(config.sandbox.timeout_seconds));

    match config.sandbox.backend {
        SandboxBackend::Docker => {
            println!();
            println!("Checking Docker availability...");
            let runner = DockerRunner::new(DockerSettings {
                image: config.sandbox.image.clone(),
                interpreter: config.sandbox.interpreter.clone(),
                timeout,
                network_disabled: config.sandbox.network_disabled,
                keep_container: config.sandbox.keep_container,
            })
            .map_err(|e| {
                anyhow::anyhow!(
                    "Docker is not available: {e}\n\n\
                     Suggestion: Make sure Docker is installed and running, \
                     or use --sandbox process"
                )
            })?;
            runner.prepare().await.map_err(|e| {
                anyhow::anyhow!(
                    "Failed to prepare sandbox container: {e}\n\n\
                     Suggestion: Make sure the image '{}' can be pulled",
                    config.sandbox.image
                )
            })?;
            println!("Sandbox container is ready");
            Ok(Arc::new(runner))
        }
        SandboxBackend::Process => {
            tracing::warn!("Process backend runs generated code without isolation");
            Ok(Arc::new(ProcessRunner::new(&config.sandbox.interpreter, timeout)))
        }
    }
}

/// Prints the loaded configuration.
fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Model: {}", config.llm.model);
    println!("  Max initial iterations: {}", config.max_initial_iterations);
    println!("  Max search attempts: {}", config.max_search_attempts);
    println!("  Sandbox: {}", config.sandbox.backend);
    if config.sandbox.backend == SandboxBackend::Docker {
        println!("  Image: {}", config.sandbox.image);
    }
    println!("  Output directory: {}", config.output_dir);
}

/// Prints the final code and a summary of the run.
fn print_summary(last: &RunSnapshot) {
    let state = &last.state;

    if let Some(solution) = &state.current_solution {
        println!();
        println!("=== Final Code ===");
        println!("{}", solution.program());
    }

    println!();
    println!("=== Reflex Summary ===");
    match &state.outcome {
        Some(outcome) => println!("Outcome: {outcome}"),
        None => println!("Outcome: interrupted"),
    }
    println!("Generations: {}", state.total_generations());
    println!("Web searches: {}", state.search_attempts());
    println!("Steps: {}", last.step);

    let elapsed = state.elapsed();
    println!(
        "Duration: {}m {}s",
        elapsed.num_minutes(),
        elapsed.num_seconds() % 60
    );
}
