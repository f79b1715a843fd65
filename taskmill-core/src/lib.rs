//! taskmill core library
//!
//! This crate provides the core functionality for taskmill: a persistent
//! feature backlog worked through by an external coding agent, queue
//! operations over it, a bounded promise-driven validation loop per
//! feature, agent execution, and the runner that ties them together.

pub mod agent;
pub mod config;
pub mod error;
pub mod event;
pub mod feature;
pub mod progress;
pub mod queue;
pub mod ralph;
pub mod runner;
pub mod store;

pub use agent::{Agent, AgentOutput};
pub use config::Config;
pub use error::{Error, Result};
pub use event::{Event, EventReceiver, EventSender, StopReason};
pub use feature::{validate_features, Feature, NewFeature, ValidationIssue};
pub use progress::ProgressLog;
pub use queue::{FeatureQueue, QueueStats, SkipReceipt};
pub use ralph::{
    detect_promise, LoopOutcome, LoopTurn, Promise, RalphConfig, RalphLoopController,
    RalphLoopState,
};
pub use runner::{Outcome, Runner, RunnerHandle};
pub use store::FeatureStore;
