//! The ralph validation loop.
//!
//! A ralph loop drives one feature at a time through bounded validation
//! attempts: render a prompt, hand it to the external agent, scan the
//! output for a promise marker, and either finish or re-render with the
//! updated attempt count. At most one loop is active per project at a
//! time; its pointer state is persisted independently of the feature
//! list so a restarted process can pick the session back up.

use crate::error::{Error, Result};
use crate::feature::Feature;
use crate::queue::FeatureQueue;
use crate::store::write_atomic;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::warn;

/// File name of the loop state document inside a project directory.
pub const LOOP_STATE_FILE: &str = ".ralph-loop-state.json";

/// Default attempt cap per feature.
const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// Configuration for a ralph loop controller.
#[derive(Debug, Clone)]
pub struct RalphConfig {
    /// Maximum validation attempts per feature before the loop gives up.
    pub max_iterations: u32,
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl RalphConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the attempt cap.
    pub fn max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }
}

/// Persisted pointer to the active validation session.
///
/// A `current_feature` of `None` means no session is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RalphLoopState {
    /// Id of the feature under validation, if any.
    pub current_feature: Option<u64>,
    /// How many loop turns this session has taken.
    pub iteration: u32,
}

impl Default for RalphLoopState {
    fn default() -> Self {
        Self::idle()
    }
}

impl RalphLoopState {
    /// The no-session state.
    pub fn idle() -> Self {
        Self {
            current_feature: None,
            iteration: 0,
        }
    }

    /// Whether a session is active.
    pub fn is_active(&self) -> bool {
        self.current_feature.is_some()
    }
}

/// A promise marker captured from agent output.
///
/// The marker grammar is fixed: the first `<promise>…</promise>` pair in
/// the output wins, and the captured token is matched by substring
/// containment against the per-feature completion tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promise {
    token: String,
}

impl Promise {
    /// The raw captured token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Whether this promise signals successful validation of `id`.
    pub fn validates(&self, id: u64) -> bool {
        self.token.contains(&format!("FEATURE_{id}_VALIDATED"))
    }

    /// Whether this promise signals that `id` is blocked.
    pub fn blocks(&self, id: u64) -> bool {
        self.token.contains(&format!("FEATURE_{id}_BLOCKED"))
    }
}

/// Scan agent output for the first promise marker.
pub fn detect_promise(output: &str) -> Option<Promise> {
    static PROMISE_RE: OnceLock<Regex> = OnceLock::new();
    let re = PROMISE_RE.get_or_init(|| {
        Regex::new(r"<promise>(.+?)</promise>").expect("promise pattern is valid")
    });

    re.captures(output).map(|caps| Promise {
        token: caps[1].to_string(),
    })
}

/// Terminal outcome of a validation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The agent promised successful validation; the feature now passes.
    Validated,
    /// The agent promised it is blocked; the feature stays pending.
    Blocked,
    /// The attempt cap was reached without a promise.
    Exhausted,
    /// No session was active, or its feature no longer resolves.
    NoSession,
}

impl std::fmt::Display for LoopOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopOutcome::Validated => write!(f, "validated"),
            LoopOutcome::Blocked => write!(f, "blocked"),
            LoopOutcome::Exhausted => write!(f, "attempt cap reached"),
            LoopOutcome::NoSession => write!(f, "no active session"),
        }
    }
}

/// Result of feeding agent output to [`RalphLoopController::continue_validation`].
#[derive(Debug, Clone)]
pub enum LoopTurn {
    /// The session reached a terminal state.
    Done {
        /// Why the session ended.
        outcome: LoopOutcome,
    },
    /// The session continues; hand this prompt to the agent next.
    Continue {
        /// The re-rendered validation prompt.
        prompt: String,
    },
}

impl LoopTurn {
    /// Whether the session is over.
    pub fn is_done(&self) -> bool {
        matches!(self, LoopTurn::Done { .. })
    }

    /// The next prompt, when the session continues.
    pub fn prompt(&self) -> Option<&str> {
        match self {
            LoopTurn::Continue { prompt } => Some(prompt),
            LoopTurn::Done { .. } => None,
        }
    }
}

/// Drives one feature at a time through bounded validation attempts.
#[derive(Debug, Clone)]
pub struct RalphLoopController {
    queue: FeatureQueue,
    config: RalphConfig,
    state_path: PathBuf,
}

impl RalphLoopController {
    /// Create a controller for `project_dir` with the default config.
    pub fn new(project_dir: impl AsRef<Path>) -> Self {
        Self::with_config(project_dir, RalphConfig::default())
    }

    /// Create a controller for `project_dir` with an explicit config.
    pub fn with_config(project_dir: impl AsRef<Path>, config: RalphConfig) -> Self {
        let project_dir = project_dir.as_ref();
        Self {
            queue: FeatureQueue::new(project_dir),
            config,
            state_path: project_dir.join(LOOP_STATE_FILE),
        }
    }

    /// The queue this controller operates on.
    pub fn queue(&self) -> &FeatureQueue {
        &self.queue
    }

    /// The controller's configuration.
    pub fn config(&self) -> &RalphConfig {
        &self.config
    }

    /// The persisted loop state. Absent or unreadable state degrades to
    /// idle, the same policy the feature store uses.
    pub fn state(&self) -> RalphLoopState {
        if !self.state_path.exists() {
            return RalphLoopState::idle();
        }
        match std::fs::read_to_string(&self.state_path)
            .map_err(|e| e.to_string())
            .and_then(|content| serde_json::from_str(&content).map_err(|e| e.to_string()))
        {
            Ok(state) => state,
            Err(err) => {
                warn!(path = %self.state_path.display(), %err, "loop state unreadable, treating as idle");
                RalphLoopState::idle()
            }
        }
    }

    fn save_state(&self, state: &RalphLoopState) -> Result<()> {
        let content =
            serde_json::to_string_pretty(state).map_err(|source| Error::StateSerialize {
                path: self.state_path.clone(),
                source,
            })?;
        write_atomic(&self.state_path, &content).map_err(|source| Error::StateWrite {
            path: self.state_path.clone(),
            source,
        })
    }

    /// Render the validation prompt for a feature.
    ///
    /// The rendering is deterministic: feature id and name, the ordered
    /// steps, the attempt the agent is about to make, the cap, the last
    /// recorded error, and both promise tokens.
    pub fn render_prompt(&self, feature: &Feature) -> String {
        let id = feature.id.unwrap_or(0);
        let name = feature
            .name
            .as_deref()
            .unwrap_or_else(|| feature.display_text());
        let steps = feature
            .steps
            .iter()
            .map(|step| format!("- {step}"))
            .collect::<Vec<_>>()
            .join("\n");
        let attempt = feature.attempt_count + 1;
        let cap = self.config.max_iterations;
        let last_error = feature.last_error.as_deref().unwrap_or("None");

        format!(
            r#"# VALIDATION LOOP

You are validating feature #{id}: "{name}"

## TASK

Work through these steps in order and verify each one:

{steps}

## RULES

1. If every step passes, output exactly: <promise>FEATURE_{id}_VALIDATED</promise>
2. If a step fails: record what failed, fix it, and re-run the step until it passes.
3. If you cannot make progress after fixing, output exactly: <promise>FEATURE_{id}_BLOCKED</promise>

## STATUS

- Attempt: {attempt} / {cap}
- Last error: {last_error}

Begin validation now.
"#
        )
    }

    /// Start a validation session for a feature.
    ///
    /// Returns the initial prompt, or `None` when the id does not
    /// resolve. The feature is flagged in-progress (a no-op for features
    /// that already pass) and the loop state is reset to point at it.
    ///
    /// # Errors
    ///
    /// Returns an error only for I/O failures while persisting.
    pub fn start_validation(&self, id: u64) -> Result<Option<String>> {
        let Some(feature) = self.queue.get(id) else {
            return Ok(None);
        };

        self.queue.mark_in_progress(id)?;
        self.save_state(&RalphLoopState {
            current_feature: Some(id),
            iteration: 0,
        })?;

        Ok(Some(self.render_prompt(&feature)))
    }

    /// Feed one round of agent output to the active session.
    ///
    /// A validated promise marks the feature passing, even when the
    /// attempt cap has been reached. A blocked promise, or an exhausted
    /// cap, releases the feature without marking it. Anything else counts
    /// an attempt and re-renders the prompt. With no active session the
    /// call reports done immediately.
    ///
    /// # Errors
    ///
    /// Returns an error only for I/O failures while persisting.
    pub fn continue_validation(&self, output: &str) -> Result<LoopTurn> {
        let state = self.state();
        let Some(id) = state.current_feature else {
            return Ok(LoopTurn::Done {
                outcome: LoopOutcome::NoSession,
            });
        };
        let Some(feature) = self.queue.get(id) else {
            self.save_state(&RalphLoopState::idle())?;
            return Ok(LoopTurn::Done {
                outcome: LoopOutcome::NoSession,
            });
        };

        let promise = detect_promise(output);

        if promise.as_ref().is_some_and(|p| p.validates(id)) {
            self.queue.mark_passing(id)?;
            self.save_state(&RalphLoopState::idle())?;
            return Ok(LoopTurn::Done {
                outcome: LoopOutcome::Validated,
            });
        }

        if promise.as_ref().is_some_and(|p| p.blocks(id)) {
            self.queue.clear_in_progress(id)?;
            self.save_state(&RalphLoopState::idle())?;
            return Ok(LoopTurn::Done {
                outcome: LoopOutcome::Blocked,
            });
        }

        if feature.attempt_count >= self.config.max_iterations {
            self.queue.clear_in_progress(id)?;
            self.save_state(&RalphLoopState::idle())?;
            return Ok(LoopTurn::Done {
                outcome: LoopOutcome::Exhausted,
            });
        }

        self.queue.increment_attempt(id, None)?;
        self.save_state(&RalphLoopState {
            current_feature: Some(id),
            iteration: state.iteration + 1,
        })?;

        match self.queue.get(id) {
            Some(updated) => Ok(LoopTurn::Continue {
                prompt: self.render_prompt(&updated),
            }),
            None => Ok(LoopTurn::Done {
                outcome: LoopOutcome::NoSession,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn controller_with(features: Vec<Feature>) -> (TempDir, RalphLoopController) {
        let dir = TempDir::new().unwrap();
        let controller = RalphLoopController::new(dir.path());
        controller.queue().store().save(&features).unwrap();
        (dir, controller)
    }

    fn pending_feature(id: u64) -> Feature {
        Feature {
            id: Some(id),
            name: Some(format!("Feature {id}")),
            ..Feature::new(
                format!("Implement feature {id}"),
                vec!["Open the app".to_string(), "Check the result".to_string()],
            )
        }
    }

    #[test]
    fn test_detect_promise_first_occurrence_wins() {
        let output = "noise <promise>FIRST</promise> more <promise>SECOND</promise>";
        let promise = detect_promise(output).unwrap();
        assert_eq!(promise.token(), "FIRST");
    }

    #[test]
    fn test_detect_promise_none_without_marker() {
        assert!(detect_promise("no markers here").is_none());
        assert!(detect_promise("<promise></promise>").is_none());
    }

    #[test]
    fn test_promise_matching_is_containment() {
        let promise = detect_promise("<promise>done: FEATURE_3_VALIDATED ok</promise>").unwrap();
        assert!(promise.validates(3));
        assert!(!promise.validates(33));
        assert!(!promise.blocks(3));
    }

    #[test]
    fn test_promise_ids_do_not_prefix_match() {
        let promise = detect_promise("<promise>FEATURE_11_VALIDATED</promise>").unwrap();
        assert!(promise.validates(11));
        assert!(!promise.validates(1));
    }

    #[test]
    fn test_state_defaults_to_idle() {
        let (_dir, controller) = controller_with(vec![pending_feature(1)]);
        let state = controller.state();
        assert!(!state.is_active());
        assert_eq!(state.iteration, 0);
    }

    #[test]
    fn test_corrupt_state_degrades_to_idle() {
        let dir = TempDir::new().unwrap();
        let controller = RalphLoopController::new(dir.path());
        std::fs::write(dir.path().join(LOOP_STATE_FILE), "garbage").unwrap();

        assert_eq!(controller.state(), RalphLoopState::idle());
    }

    #[test]
    fn test_start_validation_unknown_id() {
        let (_dir, controller) = controller_with(vec![pending_feature(1)]);
        assert!(controller.start_validation(42).unwrap().is_none());
        assert!(!controller.state().is_active());
    }

    #[test]
    fn test_start_validation_marks_and_points() {
        let (_dir, controller) = controller_with(vec![pending_feature(1)]);

        let prompt = controller.start_validation(1).unwrap().unwrap();
        assert!(prompt.contains("feature #1"));
        assert!(prompt.contains("- Open the app"));
        assert!(prompt.contains("- Check the result"));
        assert!(prompt.contains("Attempt: 1 / 5"));
        assert!(prompt.contains("FEATURE_1_VALIDATED"));
        assert!(prompt.contains("FEATURE_1_BLOCKED"));
        assert!(prompt.contains("Last error: None"));

        let feature = controller.queue().get(1).unwrap();
        assert_eq!(feature.in_progress, Some(true));

        let state = controller.state();
        assert_eq!(state.current_feature, Some(1));
        assert_eq!(state.iteration, 0);
    }

    #[test]
    fn test_prompt_shows_last_error() {
        let (_dir, controller) = controller_with(vec![pending_feature(1)]);
        controller
            .queue()
            .increment_attempt(1, Some("button missing"))
            .unwrap();

        let prompt = controller.start_validation(1).unwrap().unwrap();
        assert!(prompt.contains("Last error: button missing"));
        assert!(prompt.contains("Attempt: 2 / 5"));
    }

    #[test]
    fn test_validated_promise_finishes_session() {
        let (_dir, controller) = controller_with(vec![pending_feature(1)]);
        controller.start_validation(1).unwrap();

        let turn = controller
            .continue_validation("all good <promise>FEATURE_1_VALIDATED</promise>")
            .unwrap();
        assert!(matches!(
            turn,
            LoopTurn::Done {
                outcome: LoopOutcome::Validated
            }
        ));

        let feature = controller.queue().get(1).unwrap();
        assert!(feature.passes);
        assert_eq!(feature.in_progress, Some(false));
        assert!(!controller.state().is_active());
    }

    #[test]
    fn test_blocked_promise_releases_without_passing() {
        let (_dir, controller) = controller_with(vec![pending_feature(1)]);
        controller.start_validation(1).unwrap();

        let turn = controller
            .continue_validation("<promise>FEATURE_1_BLOCKED</promise>")
            .unwrap();
        assert!(matches!(
            turn,
            LoopTurn::Done {
                outcome: LoopOutcome::Blocked
            }
        ));

        let feature = controller.queue().get(1).unwrap();
        assert!(!feature.passes);
        assert_eq!(feature.in_progress, Some(false));
        assert!(!controller.state().is_active());
    }

    #[test]
    fn test_no_promise_continues_with_new_prompt() {
        let (_dir, controller) = controller_with(vec![pending_feature(1)]);
        controller.start_validation(1).unwrap();

        let turn = controller.continue_validation("still working on it").unwrap();
        let prompt = turn.prompt().expect("session should continue");
        assert!(prompt.contains("Attempt: 2 / 5"));

        let feature = controller.queue().get(1).unwrap();
        assert_eq!(feature.attempt_count, 1);
        assert_eq!(controller.state().iteration, 1);
    }

    #[test]
    fn test_cap_reached_ends_session() {
        let (_dir, controller) = controller_with(vec![pending_feature(1)]);
        controller.start_validation(1).unwrap();

        for _ in 0..5 {
            let turn = controller.continue_validation("no promise yet").unwrap();
            assert!(!turn.is_done());
        }

        let turn = controller.continue_validation("no promise yet").unwrap();
        assert!(matches!(
            turn,
            LoopTurn::Done {
                outcome: LoopOutcome::Exhausted
            }
        ));

        let feature = controller.queue().get(1).unwrap();
        assert!(!feature.passes);
        assert_eq!(feature.attempt_count, 5);
        assert_eq!(feature.in_progress, Some(false));
        assert!(!controller.state().is_active());
    }

    #[test]
    fn test_validated_wins_even_at_cap() {
        let dir = TempDir::new().unwrap();
        let controller =
            RalphLoopController::with_config(dir.path(), RalphConfig::new().max_iterations(1));
        controller
            .queue()
            .store()
            .save(&[pending_feature(1)])
            .unwrap();
        controller.start_validation(1).unwrap();
        controller.continue_validation("nope").unwrap();

        // attempt_count is now at the cap; a validated promise still lands
        let turn = controller
            .continue_validation("<promise>FEATURE_1_VALIDATED</promise>")
            .unwrap();
        assert!(matches!(
            turn,
            LoopTurn::Done {
                outcome: LoopOutcome::Validated
            }
        ));
        assert!(controller.queue().get(1).unwrap().passes);
    }

    #[test]
    fn test_continue_without_session_is_done() {
        let (_dir, controller) = controller_with(vec![pending_feature(1)]);

        let turn = controller.continue_validation("whatever").unwrap();
        assert!(matches!(
            turn,
            LoopTurn::Done {
                outcome: LoopOutcome::NoSession
            }
        ));
    }

    #[test]
    fn test_configurable_cap_appears_in_prompt() {
        let dir = TempDir::new().unwrap();
        let controller =
            RalphLoopController::with_config(dir.path(), RalphConfig::new().max_iterations(3));
        controller
            .queue()
            .store()
            .save(&[pending_feature(1)])
            .unwrap();

        let prompt = controller.start_validation(1).unwrap().unwrap();
        assert!(prompt.contains("Attempt: 1 / 3"));
    }
}
