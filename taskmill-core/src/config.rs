//! Configuration for the validation runner.
//!
//! This module provides the `Config` struct with a builder pattern for
//! configuring the project directory, the agent command, the validation
//! attempt cap, session limits, delays, and agent failure handling.

use crate::ralph::RalphConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Default agent command.
const DEFAULT_AGENT_COMMAND: &str = "claude";

/// Default agent arguments.
const DEFAULT_AGENT_ARGS: &str = "-p";

/// Default validation attempt cap per feature.
const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// Default maximum validation sessions per run.
const DEFAULT_MAX_SESSIONS: u32 = 20;

/// Default delay between sessions in seconds.
const DEFAULT_DELAY_SECS: u64 = 2;

/// Default agent execution timeout in seconds (15 minutes).
const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 900;

/// Default maximum retry attempts after agent error/timeout.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default initial backoff in seconds.
const DEFAULT_INITIAL_BACKOFF_SECS: u64 = 5;

/// Default backoff multiplier.
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default circuit breaker threshold (stop after N consecutive failures).
const DEFAULT_CIRCUIT_BREAKER_THRESHOLD: u32 = 5;

/// Default output patterns that indicate the agent process itself failed.
fn default_error_patterns() -> Vec<String> {
    vec![
        "Error: No messages returned".to_string(),
        "This error originated either by throwing inside of an async function".to_string(),
        "@anthropic-ai/claude-code".to_string(),
        "The promise rejected with the reason:".to_string(),
    ]
}

/// Configuration for the validation runner.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the feature list and loop state documents.
    pub project_dir: PathBuf,

    /// The agent command to run (e.g., "claude", "aider").
    pub agent_command: String,

    /// Arguments to pass to the agent command.
    pub agent_args: Vec<String>,

    /// Validation attempt cap per feature.
    pub max_iterations: u32,

    /// Maximum validation sessions before the runner stops.
    pub max_sessions: u32,

    /// Delay between validation sessions.
    pub delay: Duration,

    /// Agent execution timeout in seconds.
    pub agent_timeout_secs: u64,

    /// Output patterns that indicate agent process failure.
    pub error_patterns: Vec<String>,

    /// Maximum retry attempts after agent error/timeout.
    pub max_retries: u32,

    /// Initial backoff in seconds.
    pub initial_backoff_secs: u64,

    /// Backoff multiplier.
    pub backoff_multiplier: f64,

    /// Circuit breaker threshold (stop after N consecutive failures,
    /// 0 = disabled).
    pub circuit_breaker_threshold: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            agent_command: DEFAULT_AGENT_COMMAND.to_string(),
            agent_args: DEFAULT_AGENT_ARGS
                .split_whitespace()
                .map(String::from)
                .collect(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_sessions: DEFAULT_MAX_SESSIONS,
            delay: Duration::from_secs(DEFAULT_DELAY_SECS),
            agent_timeout_secs: DEFAULT_AGENT_TIMEOUT_SECS,
            error_patterns: default_error_patterns(),
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff_secs: DEFAULT_INITIAL_BACKOFF_SECS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            circuit_breaker_threshold: DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
        }
    }
}

impl Config {
    /// Create a new Config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the project directory.
    pub fn project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = dir.into();
        self
    }

    /// Set the agent command.
    pub fn agent_command(mut self, command: impl Into<String>) -> Self {
        self.agent_command = command.into();
        self
    }

    /// Set the agent arguments.
    pub fn agent_args(mut self, args: Vec<String>) -> Self {
        self.agent_args = args;
        self
    }

    /// Set the agent arguments from a string (space-separated).
    pub fn agent_args_str(mut self, args: impl Into<String>) -> Self {
        self.agent_args = args.into().split_whitespace().map(String::from).collect();
        self
    }

    /// Set the validation attempt cap per feature.
    pub fn max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Set the maximum validation sessions per run.
    pub fn max_sessions(mut self, max: u32) -> Self {
        self.max_sessions = max;
        self
    }

    /// Set the delay between sessions.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the delay between sessions in seconds.
    pub fn delay_secs(mut self, secs: u64) -> Self {
        self.delay = Duration::from_secs(secs);
        self
    }

    /// Set the agent execution timeout in seconds.
    pub fn agent_timeout_secs(mut self, secs: u64) -> Self {
        self.agent_timeout_secs = secs;
        self
    }

    /// Set the output patterns that indicate agent process failure.
    pub fn error_patterns(mut self, patterns: Vec<String>) -> Self {
        self.error_patterns = patterns;
        self
    }

    /// Add an error pattern to the list.
    pub fn add_error_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.error_patterns.push(pattern.into());
        self
    }

    /// Clear all error patterns.
    pub fn no_error_patterns(mut self) -> Self {
        self.error_patterns.clear();
        self
    }

    /// Set the maximum retry attempts after agent error/timeout.
    pub fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Set the initial backoff in seconds.
    pub fn initial_backoff_secs(mut self, secs: u64) -> Self {
        self.initial_backoff_secs = secs;
        self
    }

    /// Set the backoff multiplier.
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set the circuit breaker threshold (0 to disable).
    pub fn circuit_breaker_threshold(mut self, threshold: u32) -> Self {
        self.circuit_breaker_threshold = threshold;
        self
    }

    /// The ralph loop configuration slice of this config.
    pub fn ralph_config(&self) -> RalphConfig {
        RalphConfig::new().max_iterations(self.max_iterations)
    }

    /// Get a formatted display string for the agent command.
    pub fn agent_display(&self) -> String {
        if self.agent_args.is_empty() {
            self.agent_command.clone()
        } else {
            format!("{} {}", self.agent_command, self.agent_args.join(" "))
        }
    }
}
