//! External agent execution.
//!
//! The agent is an opaque external process (like `claude` or `aider`)
//! that receives a rendered prompt as its final argument and returns free
//! text. This module spawns it, streams stdout/stderr through the event
//! system, watches for configured failure patterns, and enforces a
//! wall-clock timeout. What the agent does with the prompt is its own
//! business; the loop only ever reads its text back.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::{Event, EventSender};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// An external agent process that can be invoked with a prompt.
#[derive(Debug, Clone)]
pub struct Agent {
    /// The command to run.
    command: String,
    /// Arguments to pass before the prompt.
    args: Vec<String>,
    /// Output patterns that indicate the agent process failed.
    error_patterns: Vec<String>,
    /// Wall-clock timeout in seconds for one invocation.
    timeout_secs: u64,
}

/// Forward lines from one stream into the shared line channel.
async fn forward_lines<R>(reader: R, is_stderr: bool, tx: mpsc::Sender<(String, bool)>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send((line, is_stderr)).await.is_err() {
            break;
        }
    }
}

impl Agent {
    /// Create a new agent.
    pub fn new(
        command: impl Into<String>,
        args: Vec<String>,
        error_patterns: Vec<String>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            command: command.into(),
            args,
            error_patterns,
            timeout_secs,
        }
    }

    /// Create an agent from a runner config.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.agent_command,
            config.agent_args.clone(),
            config.error_patterns.clone(),
            config.agent_timeout_secs,
        )
    }

    /// The command this agent will run.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The arguments this agent will pass before the prompt.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Invoke the agent with the given prompt.
    ///
    /// The prompt is appended as the final argument. Output lines are
    /// streamed through `events` in arrival order and captured for the
    /// returned [`AgentOutput`].
    ///
    /// # Errors
    ///
    /// [`Error::AgentNotFound`] if the command does not exist,
    /// [`Error::AgentErrorDetected`] if a configured failure pattern
    /// appears in the output, [`Error::AgentTimeout`] if the invocation
    /// exceeds the wall-clock timeout, and [`Error::AgentError`] for
    /// other process failures.
    pub async fn run(&self, prompt: &str, events: &EventSender) -> Result<AgentOutput> {
        let start = Instant::now();
        let deadline = Duration::from_secs(self.timeout_secs);

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .arg(prompt)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::agent_not_found(&self.command)
            } else {
                Error::agent_error(format!("failed to spawn agent process: {e}"))
            }
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::agent_error("failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::agent_error("failed to capture stderr"))?;

        let (line_tx, mut line_rx) = mpsc::channel::<(String, bool)>(64);
        let stdout_task = tokio::spawn(forward_lines(stdout, false, line_tx.clone()));
        let stderr_task = tokio::spawn(forward_lines(stderr, true, line_tx));

        let mut lines: Vec<(String, bool)> = Vec::new();
        let mut detected: Option<String> = None;

        // The channel closes once both streams hit EOF. Detection of an
        // error pattern stops the read early.
        let streamed = timeout(deadline, async {
            while let Some((text, is_stderr)) = line_rx.recv().await {
                let event = if is_stderr {
                    Event::agent_stderr(&text)
                } else {
                    Event::agent_output(&text)
                };
                let _ = events.send(event).await;

                if let Some(pattern) = self
                    .error_patterns
                    .iter()
                    .find(|p| text.contains(p.as_str()))
                {
                    detected = Some(pattern.clone());
                    lines.push((text, is_stderr));
                    break;
                }
                lines.push((text, is_stderr));
            }
        })
        .await;

        if streamed.is_err() {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            let _ = events
                .send(Event::AgentTimeout {
                    timeout_secs: self.timeout_secs,
                })
                .await;
            return Err(Error::agent_timeout(self.timeout_secs));
        }

        if let Some(pattern) = detected {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            let _ = events
                .send(Event::AgentErrorDetected {
                    pattern: pattern.clone(),
                })
                .await;
            return Err(Error::agent_error_detected(pattern));
        }

        let _ = stdout_task.await;
        let _ = stderr_task.await;

        let status = match timeout(deadline, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(Error::agent_error(format!("wait failed: {e}"))),
            Err(_) => {
                let _ = child.kill().await;
                let _ = events
                    .send(Event::AgentTimeout {
                        timeout_secs: self.timeout_secs,
                    })
                    .await;
                return Err(Error::agent_timeout(self.timeout_secs));
            }
        };

        let duration_secs = start.elapsed().as_secs_f64();
        let exit_code = status.code();

        let _ = events
            .send(Event::AgentFinished {
                exit_code,
                duration_secs,
            })
            .await;

        Ok(AgentOutput::from_lines(lines, exit_code, duration_secs))
    }
}

/// Output captured from one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentOutput {
    /// All stdout output, joined with newlines.
    pub stdout: String,
    /// All stderr output, joined with newlines.
    pub stderr: String,
    /// Combined stdout and stderr in arrival order, joined with newlines.
    pub combined: String,
    /// Exit code of the process, if available.
    pub exit_code: Option<i32>,
    /// Duration of the run in seconds.
    pub duration_secs: f64,
}

impl AgentOutput {
    fn from_lines(lines: Vec<(String, bool)>, exit_code: Option<i32>, duration_secs: f64) -> Self {
        let stdout = lines
            .iter()
            .filter(|(_, is_stderr)| !is_stderr)
            .map(|(text, _)| text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let stderr = lines
            .iter()
            .filter(|(_, is_stderr)| *is_stderr)
            .map(|(text, _)| text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let combined = lines
            .iter()
            .map(|(text, _)| text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        Self {
            stdout,
            stderr,
            combined,
            exit_code,
            duration_secs,
        }
    }

    /// An empty output, used when an invocation is abandoned after
    /// exhausting retries.
    pub fn empty() -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            combined: String::new(),
            exit_code: None,
            duration_secs: 0.0,
        }
    }

    /// Whether the combined output contains the given phrase.
    pub fn contains(&self, phrase: &str) -> bool {
        self.combined.contains(phrase)
    }

    /// Whether the agent exited successfully (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}
