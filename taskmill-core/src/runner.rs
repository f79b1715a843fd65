//! Validation runner.
//!
//! The runner drives the whole queue: pick the next pending feature,
//! open a validation session for it, exchange prompts and output with
//! the external agent until the session reaches a terminal outcome, and
//! move on. It stops when the queue completes, a session cap is hit,
//! the circuit breaker trips, or it is cancelled from outside.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::agent::{Agent, AgentOutput};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::{channel, Event, EventReceiver, EventSender, StopReason};
use crate::progress::ProgressLog;
use crate::queue::FeatureQueue;
use crate::ralph::{LoopTurn, RalphLoopController};

/// Calculate exponential backoff duration in seconds.
fn calculate_backoff(attempt: u32, config: &Config) -> u64 {
    let backoff = config.initial_backoff_secs as f64
        * config.backoff_multiplier.powi((attempt - 1) as i32);
    backoff as u64
}

/// The runner that works the feature queue through validation sessions.
#[derive(Debug)]
pub struct Runner {
    /// Configuration for the runner.
    config: Config,
    /// Event sender for communicating with consumers.
    events: EventSender,
    /// Shared cancellation flag.
    cancel_flag: Arc<AtomicBool>,
}

/// Handle for controlling a running runner instance.
///
/// The handle can be cloned and used to cancel the runner from another
/// task or thread.
#[derive(Debug, Clone)]
pub struct RunnerHandle {
    cancel_flag: Arc<AtomicBool>,
}

impl RunnerHandle {
    /// Signal the runner to cancel at the next opportunity.
    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::SeqCst)
    }
}

/// The outcome of a runner execution.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Every feature in the queue passes.
    Completed {
        /// Total validation sessions run.
        sessions: u32,
    },
    /// The runner stopped before the queue completed.
    Stopped {
        /// Total validation sessions run.
        sessions: u32,
        /// Reason for stopping.
        reason: StopReason,
    },
}

impl Outcome {
    /// Get the number of validation sessions run.
    pub fn sessions(&self) -> u32 {
        match self {
            Outcome::Completed { sessions } => *sessions,
            Outcome::Stopped { sessions, .. } => *sessions,
        }
    }

    /// Check if the outcome was a completed queue.
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed { .. })
    }

    /// Check if the outcome was a stop.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Outcome::Stopped { .. })
    }
}

impl Runner {
    /// Create a new runner with the given configuration.
    ///
    /// Returns a tuple of (Runner, EventReceiver, RunnerHandle). The
    /// receiver yields lifecycle and output events; the handle cancels
    /// the run from elsewhere.
    pub fn new(config: Config) -> (Self, EventReceiver, RunnerHandle) {
        let (tx, rx) = channel();
        let cancel_flag = Arc::new(AtomicBool::new(false));

        let runner = Self {
            config,
            events: tx,
            cancel_flag: cancel_flag.clone(),
        };

        let handle = RunnerHandle { cancel_flag };

        (runner, rx, handle)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::SeqCst)
    }

    async fn stop(&self, sessions: u32, reason: StopReason) -> Result<Outcome> {
        let _ = self
            .events
            .send(Event::Stopped {
                sessions,
                reason: reason.clone(),
            })
            .await;
        Ok(Outcome::Stopped { sessions, reason })
    }

    async fn fatal(&self, sessions: u32, err: Error) -> Result<Outcome> {
        self.stop(
            sessions,
            StopReason::FatalError {
                message: err.to_string(),
            },
        )
        .await
    }

    /// Run validation sessions until the queue completes or a stop
    /// condition is reached.
    ///
    /// Each session: take the first pending feature, open a ralph loop
    /// for it, and exchange prompts/output with the agent until the loop
    /// reports done. Agent failures (error pattern, timeout) are retried
    /// with exponential backoff; persistent failure trips the circuit
    /// breaker.
    pub async fn run(&self) -> Result<Outcome> {
        let _ = self
            .events
            .send(Event::Started {
                max_sessions: self.config.max_sessions,
            })
            .await;

        let agent = Agent::from_config(&self.config);
        let queue = FeatureQueue::new(&self.config.project_dir);
        let ralph = RalphLoopController::with_config(
            &self.config.project_dir,
            self.config.ralph_config(),
        );
        let progress = ProgressLog::new(&self.config.project_dir);

        let mut sessions: u32 = 0;
        let mut consecutive_failures: u32 = 0;

        loop {
            if self.is_cancelled() {
                return self.stop(sessions, StopReason::Cancelled).await;
            }

            if queue.is_complete() {
                let _ = self.events.send(Event::Completed { sessions }).await;
                return Ok(Outcome::Completed { sessions });
            }

            // is_complete() was false, so a missing next feature means
            // the list is empty rather than finished
            let Some(feature) = queue.next() else {
                return self.stop(sessions, StopReason::EmptyQueue).await;
            };

            if sessions >= self.config.max_sessions {
                return self.stop(sessions, StopReason::MaxSessions).await;
            }
            sessions += 1;

            let feature_id = feature.id.unwrap_or(0);
            let _ = self
                .events
                .send(Event::SessionStarted {
                    session: sessions,
                    feature_id,
                    description: feature.display_text().to_string(),
                })
                .await;

            let mut prompt = match ralph.start_validation(feature_id) {
                Ok(Some(prompt)) => prompt,
                Ok(None) => {
                    let _ = self
                        .events
                        .send(Event::warning(format!(
                            "feature #{feature_id} vanished before validation"
                        )))
                        .await;
                    continue;
                }
                Err(e) => return self.fatal(sessions, e).await,
            };

            let outcome = loop {
                if self.is_cancelled() {
                    return self.stop(sessions, StopReason::Cancelled).await;
                }

                let attempt = queue
                    .get(feature_id)
                    .map(|f| f.attempt_count + 1)
                    .unwrap_or(1);
                let _ = self
                    .events
                    .send(Event::AttemptStarted {
                        feature_id,
                        attempt,
                        max_iterations: self.config.max_iterations,
                    })
                    .await;

                // Agent invocation with retry and circuit breaker
                let mut retry_attempt = 0u32;
                let output = loop {
                    if self.config.circuit_breaker_threshold > 0
                        && consecutive_failures >= self.config.circuit_breaker_threshold
                    {
                        return self
                            .stop(
                                sessions,
                                StopReason::CircuitBreaker {
                                    consecutive_failures,
                                },
                            )
                            .await;
                    }

                    match agent.run(&prompt, &self.events).await {
                        Ok(output) => {
                            consecutive_failures = 0;
                            break output;
                        }
                        Err(Error::AgentErrorDetected { .. }) | Err(Error::AgentTimeout { .. }) => {
                            retry_attempt += 1;
                            consecutive_failures += 1;

                            if retry_attempt > self.config.max_retries {
                                // Abandon this invocation; the empty
                                // output still counts as an attempt
                                break AgentOutput::empty();
                            }

                            let backoff = calculate_backoff(retry_attempt, &self.config);
                            let _ = self
                                .events
                                .send(Event::RetryScheduled {
                                    backoff_secs: backoff,
                                    attempt: retry_attempt,
                                    max_retries: self.config.max_retries,
                                })
                                .await;
                            tokio::time::sleep(Duration::from_secs(backoff)).await;
                        }
                        Err(e) => return self.fatal(sessions, e).await,
                    }
                };

                match ralph.continue_validation(&output.combined) {
                    Ok(LoopTurn::Done { outcome }) => break outcome,
                    Ok(LoopTurn::Continue { prompt: next_prompt }) => prompt = next_prompt,
                    Err(e) => return self.fatal(sessions, e).await,
                }
            };

            let _ = self
                .events
                .send(Event::SessionFinished {
                    feature_id,
                    outcome,
                })
                .await;
            if let Err(e) = progress.append(sessions, &format!("feature #{feature_id}: {outcome}"))
            {
                let _ = self
                    .events
                    .send(Event::warning(format!("progress log unavailable: {e}")))
                    .await;
            }

            let stats = queue.stats();
            let _ = self
                .events
                .send(Event::QueueProgress {
                    passing: stats.passing,
                    total: stats.total,
                })
                .await;

            if !self.config.delay.is_zero() {
                tokio::time::sleep(self.config.delay).await;
            }
        }
    }
}
