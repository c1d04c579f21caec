// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Troupe main entry point - CLI and commands.

use std::future::Future;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;

use troupe::config::{self, CheckpointBackend, CliOptions};
use troupe::runtime::Runtime;
use troupe::telemetry::{init_telemetry, TelemetryConfig};
use troupe::{Outcome, RunReport, WorkflowEngine, WorkflowError};

/// Troupe version string.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Troupe - multi-agent workflow orchestration.
#[derive(Parser)]
#[command(name = "troupe")]
#[command(author, version, about = "Multi-agent workflow orchestration", long_about = None)]
struct Cli {
    /// Language model provider
    #[arg(short, long, env = "TROUPE_PROVIDER")]
    provider: Option<Provider>,

    /// Model to use
    #[arg(short, long, env = "TROUPE_MODEL")]
    model: Option<String>,

    /// Base URL for the API
    #[arg(long, env = "TROUPE_BASE_URL")]
    base_url: Option<String>,

    /// Checkpoint back-end
    #[arg(long, value_enum)]
    store: Option<Store>,

    /// Checkpoint database path
    #[arg(long, env = "TROUPE_CHECKPOINT_PATH")]
    checkpoint_path: Option<String>,

    /// Engine-level retries per step
    #[arg(long)]
    max_step_retries: Option<u32>,

    /// Workspace root (defaults to the nearest directory with a config file)
    #[arg(short = 'C', long)]
    workspace: Option<PathBuf>,

    /// Output format
    #[arg(short = 'f', long, value_enum, default_value = "text")]
    output_format: OutputFormat,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Available providers.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Provider {
    /// OpenAI - GPT models
    Openai,
    /// Ollama - Local models
    Ollama,
    /// Any OpenAI-compatible endpoint
    OpenaiCompatible,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Openai => write!(f, "openai"),
            Provider::Ollama => write!(f, "ollama"),
            Provider::OpenaiCompatible => write!(f, "openai-compatible"),
        }
    }
}

/// Checkpoint back-ends.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Store {
    Sqlite,
    Memory,
}

impl From<Store> for CheckpointBackend {
    fn from(store: Store) -> Self {
        match store {
            Store::Sqlite => CheckpointBackend::Sqlite,
            Store::Memory => CheckpointBackend::Memory,
        }
    }
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Subcommands for troupe.
#[derive(Subcommand)]
enum Commands {
    /// Start a workflow for a task
    Submit {
        /// Task text
        task: String,
        /// Thread id (generated when omitted)
        #[arg(short, long)]
        thread: Option<String>,
    },

    /// Answer a paused thread's questions and continue
    Resume {
        thread: String,
        /// One answer per pending question, in order
        #[arg(required = true)]
        answers: Vec<String>,
    },

    /// Continue threads interrupted mid-run
    Recover {
        /// Only this thread
        thread: Option<String>,
    },

    /// Show a thread's status
    Status { thread: String },

    /// List a thread's checkpoints
    History { thread: String },

    /// Cancel a thread
    Cancel { thread: String },

    /// Initialize a new configuration file
    Init,

    /// Show version information
    Version,
}

fn main() {
    let cli = Cli::parse();

    let _guard = init_telemetry(&TelemetryConfig::from_verbosity(cli.verbose)).ok();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            std::process::exit(1);
        }
    };

    let code = match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            1
        }
    };
    drop(runtime);
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let cwd = std::env::current_dir()?;
    let workspace_root = cli
        .workspace
        .clone()
        .or_else(|| config::find_workspace_root(&cwd))
        .unwrap_or(cwd);

    match cli.command {
        Commands::Init => {
            let path = config::init_config(&workspace_root, None)?;
            println!("Created config file: {}", path.display());
            return Ok(0);
        }
        Commands::Version => {
            println!("troupe {}", VERSION);
            return Ok(0);
        }
        _ => {}
    }

    let cli_options = CliOptions {
        provider: cli.provider.map(|p| p.to_string()),
        model: cli.model.clone(),
        base_url: cli.base_url.clone(),
        checkpoint_backend: cli.store.map(Into::into),
        checkpoint_path: cli.checkpoint_path.clone(),
        max_step_retries: cli.max_step_retries,
    };
    let config = config::load_config(&workspace_root, cli_options)?;

    let mut runtime = Runtime::from_config(config)?;
    runtime.start_reaper();
    runtime.prune_expired().await?;

    let format = cli.output_format;
    let verbose = cli.verbose > 0;
    let engine = runtime.engine();

    let code = match cli.command {
        Commands::Submit { task, thread } => {
            let thread = thread.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let report = interruptible(engine, &thread, engine.submit(&thread, &task)).await?;
            print_report(&report, format, verbose)?
        }
        Commands::Resume { thread, answers } => {
            let report = interruptible(engine, &thread, engine.resume(&thread, &answers)).await?;
            print_report(&report, format, verbose)?
        }
        Commands::Recover { thread } => {
            let reports = match thread {
                Some(thread) => vec![engine.recover(&thread).await?],
                None => engine.recover_all().await?,
            };
            if reports.is_empty() && format == OutputFormat::Text {
                println!("{}", "Nothing to recover".dimmed());
            }
            let mut code = 0;
            for report in &reports {
                code = code.max(print_report(report, format, verbose)?);
            }
            code
        }
        Commands::Status { thread } => {
            let Some(state) = engine.state(&thread).await? else {
                anyhow::bail!(WorkflowError::NotFound(thread));
            };
            match format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "threadId": state.thread_id,
                        "status": state.status,
                        "cursor": state.cursor.to_string(),
                        "stepId": state.step_counter,
                        "pendingQuestions": state.pending_questions,
                        "completedSteps": state.completed_steps,
                        "lastError": state.last_error,
                    }))?
                ),
                OutputFormat::Text => {
                    println!("Thread:  {}", state.thread_id.bright_white());
                    println!("Status:  {}", state.status.to_string().bright_magenta());
                    println!("Cursor:  {}", state.cursor);
                    println!("Step id: {}", state.step_counter);
                    for (i, q) in state.pending_questions.iter().enumerate() {
                        println!("  {}. {}", i + 1, q.yellow());
                    }
                    if let Some(err) = &state.last_error {
                        println!("Last error ({}): {}", err.error_kind, err.message.red());
                    }
                }
            }
            0
        }
        Commands::History { thread } => {
            let history = engine.history(&thread).await?;
            if history.is_empty() {
                anyhow::bail!(WorkflowError::NotFound(thread));
            }
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&history)?),
                OutputFormat::Text => {
                    for meta in &history {
                        println!(
                            "{:>5}  {:<10} {:<24} {}",
                            meta.step_id,
                            meta.status.to_string(),
                            meta.cursor,
                            meta.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
                        );
                    }
                }
            }
            0
        }
        Commands::Cancel { thread } => {
            if engine.cancel(&thread).await? {
                println!("Cancelled {}", thread);
            } else {
                println!("{}", format!("{} is already finished", thread).dimmed());
            }
            0
        }
        Commands::Init | Commands::Version => 0,
    };

    runtime.shutdown().await;
    Ok(code)
}

/// Run `fut`, cancelling the thread on Ctrl-C and waiting for the engine to
/// settle.
async fn interruptible<F>(
    engine: &WorkflowEngine,
    thread: &str,
    fut: F,
) -> Result<RunReport, WorkflowError>
where
    F: Future<Output = Result<RunReport, WorkflowError>>,
{
    tokio::pin!(fut);
    let finished = tokio::select! {
        report = &mut fut => Some(report),
        _ = tokio::signal::ctrl_c() => None,
    };
    match finished {
        Some(report) => report,
        None => {
            eprintln!("{}", "Interrupted, cancelling...".yellow());
            engine.cancel(thread).await?;
            fut.await
        }
    }
}

fn print_report(report: &RunReport, format: OutputFormat, verbose: bool) -> anyhow::Result<i32> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(report.outcome.exit_code());
    }

    match &report.outcome {
        Outcome::Completed { output, .. } => {
            println!("{} {}", "✓".green(), format!("{} completed", report.thread_id).bold());
            if let Some(output) = output {
                println!("\n{}", output);
            }
        }
        Outcome::Paused { step, questions } => {
            println!(
                "{} {} paused at {}",
                "?".yellow(),
                report.thread_id.bold(),
                step.bright_cyan()
            );
            for (i, q) in questions.iter().enumerate() {
                println!("  {}. {}", i + 1, q);
            }
            println!(
                "\n{}",
                format!("Answer with: troupe resume {} \"<answer>\"...", report.thread_id).dimmed()
            );
        }
        Outcome::Failed {
            step,
            error_kind,
            message,
        } => {
            eprintln!(
                "{} {} failed{} ({}): {}",
                "✗".red(),
                report.thread_id.bold(),
                step.as_deref().map(|s| format!(" at {}", s)).unwrap_or_default(),
                error_kind,
                message.red()
            );
        }
        Outcome::Cancelled => {
            println!("{} {} cancelled", "-".dimmed(), report.thread_id.bold());
        }
    }

    if verbose {
        eprintln!("\n{}", report.metrics.format_report());
    }
    Ok(report.outcome.exit_code())
}
