//! Cooperative, priority-based task scheduler.
//!
//! Interleaves many units of deferred work on a single logical thread:
//! producers hand callbacks to [`Scheduler::schedule`] with a
//! [`Priority`], the scheduler orders them by expiration time on a pair
//! of binary heaps, and a time-sliced work loop runs them, yielding back
//! to the host every few milliseconds so it can paint and handle input.
//! Tasks too large for one slice return [`TaskResult::Continue`] to be
//! resumed on a later pass.
//!
//! The scheduler reaches its embedding only through the
//! [`SchedulerHost`] trait (a clock, an immediate wake, a one-shot
//! timer, and an optional input-pending probe); [`VirtualHost`] is the
//! deterministic in-crate implementation used by the tests.

pub mod heap;
pub mod host;
pub mod priority;
pub mod scheduler;
pub mod task;

/// Milliseconds on the host's monotonic clock.
pub type TimeMs = i64;

pub use host::{
    CONTINUOUS_YIELD_MS, FRAME_YIELD_MS, MAX_YIELD_MS, SchedulerHost, TimerId, VirtualHost,
    YieldPolicy,
};
pub use priority::{MAX_TIMEOUT, Priority};
pub use scheduler::{ContinuationPolicy, Scheduler, SchedulerConfig, SchedulerError};
pub use task::{TaskCallback, TaskHandle, TaskId, TaskResult};
