//! Event system for the validation runner.
//!
//! The runner communicates lifecycle changes, agent output, and feature
//! outcomes to consumers (CLI, TUI) through a channel-based event stream.

use crate::ralph::LoopOutcome;
use tokio::sync::mpsc;

/// Default channel buffer size.
const DEFAULT_CHANNEL_SIZE: usize = 100;

/// Events emitted by the runner during execution.
#[derive(Debug, Clone)]
pub enum Event {
    /// The runner has started.
    Started {
        /// Maximum number of validation sessions configured.
        max_sessions: u32,
    },

    /// A validation session is starting for a feature.
    SessionStarted {
        /// Session number (1-indexed).
        session: u32,
        /// The feature under validation.
        feature_id: u64,
        /// Description of the feature.
        description: String,
    },

    /// One validation attempt is being handed to the agent.
    AttemptStarted {
        /// The feature under validation.
        feature_id: u64,
        /// The attempt about to run (1-indexed).
        attempt: u32,
        /// The configured attempt cap.
        max_iterations: u32,
    },

    /// Output from the agent (stdout or stderr).
    AgentOutput {
        /// The output text.
        text: String,
        /// Whether this is from stderr.
        is_stderr: bool,
    },

    /// The agent process has finished one invocation.
    AgentFinished {
        /// Exit code from the agent process.
        exit_code: Option<i32>,
        /// Duration in seconds.
        duration_secs: f64,
    },

    /// A configured error pattern appeared in agent output.
    AgentErrorDetected {
        /// The pattern that matched.
        pattern: String,
    },

    /// The agent exceeded its wall-clock timeout.
    AgentTimeout {
        /// The timeout that was exceeded, in seconds.
        timeout_secs: u64,
    },

    /// A retry of the agent invocation has been scheduled.
    RetryScheduled {
        /// Seconds until the retry.
        backoff_secs: u64,
        /// The retry attempt number.
        attempt: u32,
        /// Maximum retries configured.
        max_retries: u32,
    },

    /// A validation session reached a terminal state.
    SessionFinished {
        /// The feature that was under validation.
        feature_id: u64,
        /// How the session ended.
        outcome: LoopOutcome,
    },

    /// Queue progress after a session.
    QueueProgress {
        /// Number of passing features.
        passing: usize,
        /// Total number of features.
        total: usize,
    },

    /// General progress message.
    Progress {
        /// The progress message.
        message: String,
    },

    /// Warning message.
    Warning {
        /// The warning message.
        message: String,
    },

    /// Error message (non-fatal).
    Error {
        /// The error message.
        message: String,
    },

    /// The runner has completed: the whole queue passes.
    Completed {
        /// Total validation sessions run.
        sessions: u32,
    },

    /// The runner has stopped without completing the queue.
    Stopped {
        /// Total validation sessions run.
        sessions: u32,
        /// Reason for stopping.
        reason: StopReason,
    },
}

/// Reasons for the runner stopping without completing the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The configured session cap was reached.
    MaxSessions,
    /// The feature list is empty or absent.
    EmptyQueue,
    /// Externally cancelled.
    Cancelled,
    /// Too many consecutive agent failures.
    CircuitBreaker {
        /// Consecutive failures at the time of tripping.
        consecutive_failures: u32,
    },
    /// A fatal error occurred.
    FatalError {
        /// The error message.
        message: String,
    },
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::MaxSessions => write!(f, "maximum sessions reached"),
            StopReason::EmptyQueue => write!(f, "feature queue is empty"),
            StopReason::Cancelled => write!(f, "cancelled"),
            StopReason::CircuitBreaker {
                consecutive_failures,
            } => write!(
                f,
                "circuit breaker tripped after {consecutive_failures} consecutive failures"
            ),
            StopReason::FatalError { message } => write!(f, "fatal error: {message}"),
        }
    }
}

/// Sender for events.
pub type EventSender = mpsc::Sender<Event>;

/// Receiver for events.
pub type EventReceiver = mpsc::Receiver<Event>;

/// Create a new event channel with the default buffer size.
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_SIZE)
}

/// Create a new event channel with a custom buffer size.
pub fn channel_with_size(size: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(size)
}

impl Event {
    /// Create a progress event with the given message.
    pub fn progress(message: impl Into<String>) -> Self {
        Self::Progress {
            message: message.into(),
        }
    }

    /// Create a warning event with the given message.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::Warning {
            message: message.into(),
        }
    }

    /// Create an error event with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Create an agent output event for stdout.
    pub fn agent_output(text: impl Into<String>) -> Self {
        Self::AgentOutput {
            text: text.into(),
            is_stderr: false,
        }
    }

    /// Create an agent output event for stderr.
    pub fn agent_stderr(text: impl Into<String>) -> Self {
        Self::AgentOutput {
            text: text.into(),
            is_stderr: true,
        }
    }
}
