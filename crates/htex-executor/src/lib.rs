//! Submitter-side façade (component C6) plus the elasticity controller
//! (component C7). The address-probe helper workers use to find this
//! process (component C8) lives in `htex-worker`, the crate that actually
//! consumes it.
//!
//! `Executor` owns the task-id → future map indirectly: the map itself
//! lives inside a dedicated management task (`crate::executor`'s
//! `run_management_task`), mutated only through a command channel, matching
//! the single-mutation-point discipline `htex-interchange::registry`
//! already uses for worker liveness.

mod error;
mod executor;
mod strategy;

pub use error::{ExecutorError, TaskError};
pub use executor::{Executor, ExecutorConfig, TaskHandle, TaskOutcome, DEFAULT_LAUNCH_CMD};
pub use strategy::{PollItem, StrategyConfig, TaskStatusPoller};
