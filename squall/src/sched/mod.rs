//! Time source and task runner behind the stateful operators.
//!
//! Operators never read the wall clock; they go through a [Scheduler]
//! so that the same pipeline runs against the real clock in production
//! and a virtual clock in tests.

mod mock;
mod queue;
mod real;

pub use mock::MockScheduler;
pub use real::RealScheduler;

pub(crate) use queue::DeadlineQueue;

use std::sync::Arc;
use thiserror::Error;

/// A scheduled callback.
pub type TaskFn = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Error)]
pub enum SchedError {
    #[error("task registry is full ({0} tasks)")]
    TasksExhausted(usize),
    #[error("scheduler is shut down")]
    ShutDown,
}

/// The clock and timer interface consumed by operators.
pub trait Scheduler: Send + Sync {
    /// Run `task` every `interval` seconds of engine time, first at
    /// now + interval.
    fn add_periodic_task(&self, task: TaskFn, interval: i64) -> Result<TaskHandle, SchedError>;

    /// Run `task` once at now + delay seconds.
    fn add_once_task(&self, task: TaskFn, delay: i64) -> Result<TaskHandle, SchedError>;

    /// Engine time in seconds since the unix epoch.
    fn unix_time(&self) -> i64;

    /// Advance the virtual clock, firing every task due at or before
    /// `t` before returning.  Only the mock clock supports this.
    fn set_time(&self, t: i64);

    /// Cancel every registered task.
    fn clear(&self);
}

/// Requests removal of a scheduled task when invoked.  Dropping a
/// handle does not cancel its task; cancellation is an explicit act,
/// idempotent and safe after the task has already fired.
pub struct TaskHandle(Box<dyn Fn() + Send + Sync>);

impl TaskHandle {
    pub(crate) fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        TaskHandle(Box::new(f))
    }

    pub fn cancel(&self) {
        (self.0)()
    }
}

/// Registry entry shared by both scheduler implementations.
pub(crate) struct Task {
    pub task: TaskFn,
    pub interval: i64,
    pub once: bool,
}
