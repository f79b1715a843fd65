//! Error types for the taskmill core library.
//!
//! This module provides a unified error type for all operations in
//! taskmill-core, covering the feature store, loop state persistence,
//! agent execution, progress logging, and configuration.
//!
//! Expected domain conditions (unknown feature id, mutation of an
//! already-passing feature, an exhausted validation loop) are *not*
//! errors: queue and loop operations report those through `Option` and
//! result enums. Only genuine I/O and process failures land here.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for taskmill-core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The persisted feature list exists but cannot be parsed.
    ///
    /// Only surfaced by the strict loading path; ordinary queue
    /// operations degrade an unreadable store to an empty one.
    #[error("feature list at '{path}' is corrupt: {source}")]
    CorruptStore {
        /// The path holding unparsable content.
        path: PathBuf,
        /// The underlying JSON parse error.
        #[source]
        source: serde_json::Error,
    },

    /// Failed to read the feature list file from disk.
    #[error("failed to read feature list '{path}': {source}")]
    StoreRead {
        /// The path that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write the feature list file to disk.
    #[error("failed to write feature list '{path}': {source}")]
    StoreWrite {
        /// The path that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize the feature list to JSON.
    #[error("failed to serialize feature list for '{path}': {source}")]
    StoreSerialize {
        /// The destination path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Failed to write the loop state file to disk.
    #[error("failed to write loop state '{path}': {source}")]
    StateWrite {
        /// The path that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize the loop state to JSON.
    #[error("failed to serialize loop state for '{path}': {source}")]
    StateSerialize {
        /// The destination path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Failed to append to the progress log.
    #[error("failed to append to progress log '{path}': {source}")]
    ProgressWrite {
        /// The path that could not be appended to.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The agent process encountered an error during execution.
    #[error("agent execution failed: {message}")]
    AgentError {
        /// Description of what went wrong.
        message: String,
    },

    /// The configured agent command was not found.
    #[error("agent command not found: '{command}'")]
    AgentNotFound {
        /// The command that was not found.
        command: String,
    },

    /// A configured error pattern appeared in the agent's output.
    #[error("agent error pattern detected: '{pattern}'")]
    AgentErrorDetected {
        /// The pattern that matched.
        pattern: String,
    },

    /// The agent process exceeded its wall-clock timeout.
    #[error("agent timed out after {timeout_secs}s")]
    AgentTimeout {
        /// The timeout that was exceeded, in seconds.
        timeout_secs: u64,
    },

    /// Configuration error.
    #[error("configuration error: {message}")]
    ConfigError {
        /// Description of the configuration problem.
        message: String,
    },

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Create a new `AgentError` with the given message.
    pub fn agent_error(message: impl Into<String>) -> Self {
        Self::AgentError {
            message: message.into(),
        }
    }

    /// Create a new `AgentNotFound` error for the given command.
    pub fn agent_not_found(command: impl Into<String>) -> Self {
        Self::AgentNotFound {
            command: command.into(),
        }
    }

    /// Create a new `AgentErrorDetected` error for the given pattern.
    pub fn agent_error_detected(pattern: impl Into<String>) -> Self {
        Self::AgentErrorDetected {
            pattern: pattern.into(),
        }
    }

    /// Create a new `AgentTimeout` error.
    pub fn agent_timeout(timeout_secs: u64) -> Self {
        Self::AgentTimeout { timeout_secs }
    }

    /// Create a new `ConfigError` with the given message.
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }
}

/// A specialized `Result` type for taskmill-core operations.
pub type Result<T> = std::result::Result<T, Error>;
