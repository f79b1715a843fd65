//! taskmill CLI - work a feature backlog through agent validation loops.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use taskmill_core::{
    Config, Event, FeatureQueue, NewFeature, Runner,
};
use tracing_subscriber::EnvFilter;

/// taskmill - a feature queue with a self-correcting validation loop.
///
/// taskmill keeps an ordered backlog of features in feature_list.json,
/// exposes queue operations over it, and can drive an external coding
/// agent through bounded validation sessions until every feature passes.
#[derive(Parser, Debug)]
#[command(name = "taskmill")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Project directory holding feature_list.json.
    #[arg(
        short = 'C',
        long = "project-dir",
        default_value = ".",
        env = "TASKMILL_PROJECT_DIR",
        global = true
    )]
    project_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show progress statistics for the feature list.
    Stats,

    /// Show the next pending feature to work on.
    Next,

    /// Show a feature by id.
    Show {
        /// The feature id (explicit id, or array position for simple lists).
        id: u64,
    },

    /// Sample random passing features for regression checks.
    Regression {
        /// Maximum number of features to return.
        #[arg(short, long, default_value_t = 3, value_parser = clap::value_parser!(u64).range(1..=10))]
        limit: u64,
    },

    /// Mark a feature as passing.
    MarkPassing {
        /// The feature id.
        id: u64,
    },

    /// Move a feature to the end of the queue.
    Skip {
        /// The feature id.
        id: u64,
    },

    /// Flag a feature as being worked on.
    MarkInProgress {
        /// The feature id.
        id: u64,
    },

    /// Clear a feature's in-progress flag.
    ClearInProgress {
        /// The feature id.
        id: u64,
    },

    /// Record a validation attempt against a feature.
    Attempt {
        /// The feature id.
        id: u64,
        /// Error message from the failed attempt.
        #[arg(long)]
        error: Option<String>,
    },

    /// Append features from a JSON file to the queue.
    Create {
        /// Path to a JSON array of {category?, name?, description, steps}.
        file: PathBuf,
    },

    /// Check every stored feature for well-formedness.
    Validate,

    /// Run validation sessions against the external agent until the
    /// queue completes or a stop condition is reached.
    Run {
        /// Agent command to run.
        #[arg(short = 'a', long = "agent", default_value = "claude", env = "TASKMILL_AGENT")]
        agent: String,

        /// Space-separated arguments passed to the agent before the prompt.
        #[arg(long = "agent-args", default_value = "-p")]
        agent_args: String,

        /// Validation attempt cap per feature.
        #[arg(short = 'm', long = "max-iterations", default_value = "5")]
        max_iterations: u32,

        /// Maximum validation sessions for this run.
        #[arg(long = "max-sessions", default_value = "20")]
        max_sessions: u32,

        /// Delay in seconds between sessions.
        #[arg(short = 'd', long = "delay", default_value = "2")]
        delay: u64,

        /// Print all agent output as it streams.
        #[arg(short = 'v', long = "verbose")]
        verbose: bool,
    },
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_event(event: &Event, verbose: bool) {
    match event {
        Event::Started { max_sessions } => {
            println!("starting (max {max_sessions} sessions)");
        }
        Event::SessionStarted {
            session,
            feature_id,
            description,
        } => {
            println!("session {session}: validating feature #{feature_id} ({description})");
        }
        Event::AttemptStarted {
            attempt,
            max_iterations,
            ..
        } => {
            println!("  attempt {attempt}/{max_iterations}");
        }
        Event::AgentOutput { text, is_stderr } => {
            if verbose {
                if *is_stderr {
                    eprintln!("  agent! {text}");
                } else {
                    println!("  agent> {text}");
                }
            }
        }
        Event::AgentFinished {
            exit_code,
            duration_secs,
        } => {
            if verbose {
                println!("  agent finished (exit {exit_code:?}, {duration_secs:.1}s)");
            }
        }
        Event::AgentErrorDetected { pattern } => {
            eprintln!("  agent error pattern detected: {pattern}");
        }
        Event::AgentTimeout { timeout_secs } => {
            eprintln!("  agent timed out after {timeout_secs}s");
        }
        Event::RetryScheduled {
            backoff_secs,
            attempt,
            max_retries,
        } => {
            eprintln!("  retrying in {backoff_secs}s (attempt {attempt}/{max_retries})");
        }
        Event::SessionFinished {
            feature_id,
            outcome,
        } => {
            println!("  feature #{feature_id}: {outcome}");
        }
        Event::QueueProgress { passing, total } => {
            println!("progress: {passing}/{total} features passing");
        }
        Event::Progress { message } => println!("{message}"),
        Event::Warning { message } => eprintln!("warning: {message}"),
        Event::Error { message } => eprintln!("error: {message}"),
        Event::Completed { sessions } => {
            println!("queue complete after {sessions} sessions");
        }
        Event::Stopped { sessions, reason } => {
            println!("stopped after {sessions} sessions: {reason}");
        }
    }
}

async fn run_sessions(
    project_dir: PathBuf,
    agent: String,
    agent_args: String,
    max_iterations: u32,
    max_sessions: u32,
    delay: u64,
    verbose: bool,
) -> anyhow::Result<()> {
    let config = Config::new()
        .project_dir(project_dir)
        .agent_command(agent)
        .agent_args_str(agent_args)
        .max_iterations(max_iterations)
        .max_sessions(max_sessions)
        .delay(Duration::from_secs(delay));

    let (runner, mut events, handle) = Runner::new(config);

    // Ctrl-C requests cancellation; the runner stops at the next check
    let ctrl_c_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_handle.cancel();
        }
    });

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event, verbose);
        }
    });

    let outcome = runner.run().await?;
    drop(runner);
    let _ = printer.await;

    if outcome.is_completed() {
        Ok(())
    } else {
        bail!("run stopped before the queue completed");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    tracing::debug!(project_dir = %cli.project_dir.display(), "resolved project directory");
    let queue = FeatureQueue::new(&cli.project_dir);

    match cli.command {
        Command::Stats => print_json(&queue.stats()),
        Command::Next => match queue.next() {
            Some(feature) => print_json(&feature),
            None => print_json(&json!({
                "message": "all features are passing; nothing to do"
            })),
        },
        Command::Show { id } => match queue.get(id) {
            Some(feature) => print_json(&feature),
            None => bail!("feature {id} not found"),
        },
        Command::Regression { limit } => {
            let features = queue.for_regression(limit as usize);
            print_json(&json!({
                "count": features.len(),
                "features": features,
            }))
        }
        Command::MarkPassing { id } => match queue.mark_passing(id)? {
            Some(feature) => print_json(&feature),
            None => bail!("feature {id} not found"),
        },
        Command::Skip { id } => match queue.skip(id)? {
            Some(receipt) => print_json(&receipt),
            None => bail!("feature {id} not found or already passing"),
        },
        Command::MarkInProgress { id } => match queue.mark_in_progress(id)? {
            Some(feature) => print_json(&feature),
            None => bail!("feature {id} not found or already passing"),
        },
        Command::ClearInProgress { id } => match queue.clear_in_progress(id)? {
            Some(feature) => print_json(&feature),
            None => bail!("feature {id} not found"),
        },
        Command::Attempt { id, error } => match queue.increment_attempt(id, error.as_deref())? {
            Some(feature) => print_json(&feature),
            None => bail!("feature {id} not found"),
        },
        Command::Create { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let items: Vec<NewFeature> = serde_json::from_str(&content)
                .with_context(|| format!("failed to parse {}", file.display()))?;
            let created = queue.create_bulk(&items)?;
            print_json(&json!({ "created": created }))
        }
        Command::Validate => {
            let issues = queue.validate()?;
            if issues.is_empty() {
                println!("feature list is well-formed");
                Ok(())
            } else {
                print_json(&issues)?;
                bail!("{} malformed feature(s)", issues.len());
            }
        }
        Command::Run {
            agent,
            agent_args,
            max_iterations,
            max_sessions,
            delay,
            verbose,
        } => {
            run_sessions(
                cli.project_dir,
                agent,
                agent_args,
                max_iterations,
                max_sessions,
                delay,
                verbose,
            )
            .await
        }
    }
}
