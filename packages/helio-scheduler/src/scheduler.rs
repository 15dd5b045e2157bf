use crate::TimeMs;
use crate::heap::MinHeap;
use crate::host::{FRAME_YIELD_MS, FramePacer, SchedulerHost, TimerId, YieldPolicy};
use crate::priority::{Priority, PriorityGuard};
use crate::task::{HeapEntry, Task, TaskCallback, TaskHandle, TaskId, TaskKey, TaskResult};

use slotmap::SlotMap;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("frame rate must be between 0 and 125 fps, got {0}")]
    InvalidFrameRate(u32),
}

/// What the work loop does when a task yields a continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContinuationPolicy {
    /// Keep running the continuation within the current time slice,
    /// subject to the usual yield check.
    #[default]
    ContinueInSlice,
    /// Hand control back to the host as soon as a task yields.
    YieldImmediately,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub yield_policy: YieldPolicy,
    pub continuation_policy: ContinuationPolicy,
    /// Per-slice time budget in milliseconds.
    pub frame_interval: TimeMs,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            yield_policy: YieldPolicy::default(),
            continuation_policy: ContinuationPolicy::default(),
            frame_interval: FRAME_YIELD_MS,
        }
    }
}

/// Cooperative priority scheduler over a pair of binary heaps.
///
/// Tasks eligible to run sit in the ready queue ordered by expiration
/// time; tasks scheduled with a delay wait in the delayed queue ordered
/// by start time and are promoted as the clock advances. The work loop
/// runs ready tasks until the time budget is spent, then yields to the
/// host and re-arms itself while work remains.
///
/// One scheduler owns one logical thread of work. Everything is interior
/// mutability on a single thread; the public API may be called
/// reentrantly from inside a running task's callback.
pub struct Scheduler<H: SchedulerHost> {
    host: H,
    weak: Weak<Scheduler<H>>,

    tasks: RefCell<SlotMap<TaskKey, Task>>,
    ready: RefCell<MinHeap<HeapEntry>>,
    delayed: RefCell<MinHeap<HeapEntry>>,
    next_task_id: Cell<u64>,

    current_task: Cell<Option<TaskId>>,
    current_priority: Cell<Priority>,
    paused: Cell<bool>,
    performing_work: Cell<bool>,

    // Arming guards; see request_host_callback / request_host_timeout.
    host_callback_scheduled: Cell<bool>,
    work_requested: Cell<bool>,
    wake_running: Cell<bool>,
    host_timeout: Cell<Option<TimerId>>,

    pacer: FramePacer,
    continuation_policy: ContinuationPolicy,
    default_frame_interval: TimeMs,
}

impl<H: SchedulerHost + 'static> Scheduler<H> {
    pub fn new(host: H) -> Rc<Self> {
        Self::with_config(host, SchedulerConfig::default())
    }

    pub fn with_config(host: H, config: SchedulerConfig) -> Rc<Self> {
        Rc::new_cyclic(|weak| Self {
            host,
            weak: weak.clone(),
            tasks: RefCell::new(SlotMap::with_key()),
            ready: RefCell::new(MinHeap::new()),
            delayed: RefCell::new(MinHeap::new()),
            next_task_id: Cell::new(1),
            current_task: Cell::new(None),
            current_priority: Cell::new(Priority::Normal),
            paused: Cell::new(false),
            performing_work: Cell::new(false),
            host_callback_scheduled: Cell::new(false),
            work_requested: Cell::new(false),
            wake_running: Cell::new(false),
            host_timeout: Cell::new(None),
            pacer: FramePacer::new(config.yield_policy, config.frame_interval),
            continuation_policy: config.continuation_policy,
            default_frame_interval: config.frame_interval,
        })
    }

    /// Schedules `callback` to run as soon as the work loop reaches it.
    pub fn schedule<F>(&self, priority: Priority, callback: F) -> TaskHandle
    where
        F: FnOnce(bool) -> TaskResult + 'static,
    {
        self.schedule_inner(priority, Box::new(callback), 0)
    }

    /// Schedules `callback` to become eligible `delay` milliseconds from
    /// now. A non-positive delay schedules it immediately.
    pub fn schedule_delayed<F>(&self, priority: Priority, delay: TimeMs, callback: F) -> TaskHandle
    where
        F: FnOnce(bool) -> TaskResult + 'static,
    {
        self.schedule_inner(priority, Box::new(callback), delay)
    }

    fn schedule_inner(&self, priority: Priority, callback: TaskCallback, delay: TimeMs) -> TaskHandle {
        let now = self.host.now();
        let start_time = if delay > 0 { now + delay } else { now };
        let expiration_time = priority.expiration_after(start_time);

        let id = TaskId(self.next_task_id.get());
        self.next_task_id.set(id.0 + 1);
        let key = self.tasks.borrow_mut().insert(Task {
            id,
            callback: Some(callback),
            priority,
            start_time,
            expiration_time,
        });

        if start_time > now {
            // Delayed: ordered by the time it becomes eligible.
            self.delayed.borrow_mut().push(HeapEntry {
                sort_index: start_time,
                id,
                key,
            });
            let earliest_overall = self.ready.borrow().is_empty()
                && self.delayed.borrow().peek().map(|e| e.id) == Some(id);
            if earliest_overall {
                // All pending work is delayed and this runs first; move
                // the delayed wake to its start time.
                self.cancel_host_timeout();
                self.request_host_timeout(start_time - now);
            }
            tracing::trace!(task = %id, ?priority, delay, "scheduled delayed task");
        } else {
            // Eligible now: ordered by expiration.
            self.ready.borrow_mut().push(HeapEntry {
                sort_index: expiration_time,
                id,
                key,
            });
            if !self.host_callback_scheduled.get() && !self.performing_work.get() {
                self.host_callback_scheduled.set(true);
                self.request_host_callback();
            }
            tracing::trace!(task = %id, ?priority, "scheduled task");
        }

        TaskHandle { key, id }
    }

    /// Cancels the task. Queued entries are discarded lazily when they
    /// surface at a heap root; an in-flight invocation is unaffected.
    /// Idempotent, and a no-op after the task completes.
    pub fn cancel(&self, handle: TaskHandle) {
        if let Some(task) = self.tasks.borrow_mut().get_mut(handle.key) {
            if task.callback.take().is_some() {
                tracing::trace!(task = %handle.id, "task cancelled");
            }
        }
    }

    /// Whether a long-running task should return a continuation now and
    /// let the host breathe.
    pub fn should_yield(&self) -> bool {
        self.pacer.should_yield(&self.host)
    }

    /// Signals that the host wants to paint; the input-aware yield
    /// policy will yield at the next frame boundary.
    pub fn request_paint(&self) {
        self.pacer.request_paint(&self.host);
    }

    /// Priority context of the code currently running.
    pub fn current_priority(&self) -> Priority {
        self.current_priority.get()
    }

    /// Id of the task whose callback is executing right now, if any.
    pub fn running_task(&self) -> Option<TaskId> {
        self.current_task.get()
    }

    /// Head of the ready queue, cancelled entries included.
    pub fn first_ready_task(&self) -> Option<TaskId> {
        self.ready.borrow().peek().map(|e| e.id)
    }

    /// True when neither queue holds any entries.
    pub fn is_idle(&self) -> bool {
        self.ready.borrow().is_empty() && self.delayed.borrow().is_empty()
    }

    /// Stops the work loop from executing tasks. Already-armed host
    /// callbacks still fire but run nothing until `resume`.
    pub fn pause(&self) {
        self.paused.set(true);
    }

    pub fn resume(&self) {
        self.paused.set(false);
        if !self.host_callback_scheduled.get() && !self.performing_work.get() {
            self.host_callback_scheduled.set(true);
            self.request_host_callback();
        }
    }

    /// Runs `f` with the given priority context, restoring the previous
    /// context on every exit path. Affects only code running
    /// synchronously inside `f`; tasks always carry the priority that
    /// was passed to `schedule`.
    pub fn run_with_priority<R>(&self, priority: Priority, f: impl FnOnce() -> R) -> R {
        let _ctx = PriorityGuard::new(&self.current_priority, priority);
        f()
    }

    /// Runs `f` with the priority context lowered to at most Normal.
    /// Already-lenient contexts (Low, Idle) are kept as they are.
    pub fn run_next<R>(&self, f: impl FnOnce() -> R) -> R {
        let level = match self.current_priority.get() {
            Priority::Immediate | Priority::UserBlocking | Priority::Normal => Priority::Normal,
            lower => lower,
        };
        let _ctx = PriorityGuard::new(&self.current_priority, level);
        f()
    }

    /// Captures the current priority context and re-applies it whenever
    /// the returned closure runs, regardless of the ambient priority at
    /// that point.
    pub fn wrap_callback<R>(&self, mut f: impl FnMut() -> R + 'static) -> impl FnMut() -> R + 'static {
        let level = self.current_priority.get();
        let weak = self.weak.clone();
        move || {
            if let Some(scheduler) = weak.upgrade() {
                let _ctx = PriorityGuard::new(&scheduler.current_priority, level);
                f()
            } else {
                f()
            }
        }
    }

    /// Adjusts the per-slice budget to one frame at `fps`. `0` resets to
    /// the configured default. Out-of-range requests are logged and
    /// ignored, leaving the previous setting intact.
    pub fn set_frame_rate(&self, fps: u32) {
        if let Err(err) = self.try_set_frame_rate(fps) {
            tracing::error!(%err, "ignoring frame rate request");
        }
    }

    pub fn try_set_frame_rate(&self, fps: u32) -> Result<(), SchedulerError> {
        if fps > 125 {
            return Err(SchedulerError::InvalidFrameRate(fps));
        }
        if fps > 0 {
            self.pacer.set_frame_interval(TimeMs::from(1_000 / fps));
        } else {
            self.pacer.set_frame_interval(self.default_frame_interval);
        }
        Ok(())
    }

    /// Moves every delayed task whose start time has passed into the
    /// ready queue, re-keyed by expiration time. Cancelled delayed
    /// entries are dropped without promotion.
    fn advance_timers(&self, now: TimeMs) {
        enum Step {
            Stale,
            Cancelled,
            Due(TimeMs),
            Wait,
        }

        let mut delayed = self.delayed.borrow_mut();
        let mut tasks = self.tasks.borrow_mut();
        let mut ready = self.ready.borrow_mut();
        loop {
            let Some(&entry) = delayed.peek() else { break };
            let step = match tasks.get(entry.key) {
                None => Step::Stale,
                Some(task) if task.callback.is_none() => Step::Cancelled,
                Some(task) if task.start_time <= now => Step::Due(task.expiration_time),
                Some(_) => Step::Wait,
            };
            match step {
                Step::Stale => {
                    delayed.pop();
                }
                Step::Cancelled => {
                    delayed.pop();
                    tasks.remove(entry.key);
                }
                Step::Due(expiration_time) => {
                    delayed.pop();
                    ready.push(HeapEntry {
                        sort_index: expiration_time,
                        id: entry.id,
                        key: entry.key,
                    });
                    tracing::trace!(task = %entry.id, "delayed task became ready");
                }
                Step::Wait => break,
            }
        }
    }

    /// Returns the ready-queue head that still has a callback, shedding
    /// cancelled and stale entries along the way.
    fn peek_live_ready(&self) -> Option<HeapEntry> {
        let mut ready = self.ready.borrow_mut();
        let mut tasks = self.tasks.borrow_mut();
        loop {
            let entry = *ready.peek()?;
            let live = tasks
                .get(entry.key)
                .is_some_and(|task| task.callback.is_some());
            if live {
                return Some(entry);
            }
            ready.pop();
            tasks.remove(entry.key);
        }
    }

    /// Executes ready tasks until the budget runs out or the queue
    /// drains. Returns whether work remains.
    fn work_loop(&self, initial_time: TimeMs) -> bool {
        let mut now = initial_time;
        self.advance_timers(now);

        while !self.paused.get() {
            let Some(entry) = self.peek_live_ready() else {
                break;
            };
            let (task_id, priority, expiration_time) = {
                let tasks = self.tasks.borrow();
                let task = &tasks[entry.key];
                (task.id, task.priority, task.expiration_time)
            };
            if expiration_time > now && self.pacer.should_yield(&self.host) {
                // Budget spent and the head is not overdue; it can wait
                // for the next slice.
                break;
            }

            let Some(callback) = self.tasks.borrow_mut()[entry.key].callback.take() else {
                continue;
            };
            let did_timeout = expiration_time <= now;
            self.current_task.set(Some(task_id));
            let result = {
                // Restores the priority context even if the callback
                // panics and this frame unwinds.
                let _ctx = PriorityGuard::new(&self.current_priority, priority);
                callback(did_timeout)
            };
            self.current_task.set(None);
            now = self.host.now();

            match result {
                TaskResult::Continue(next) => {
                    // The task stays at the head of the ready queue; its
                    // sort index has not changed.
                    if let Some(task) = self.tasks.borrow_mut().get_mut(entry.key) {
                        task.callback = Some(next);
                    }
                    if self.continuation_policy == ContinuationPolicy::YieldImmediately {
                        self.advance_timers(now);
                        return true;
                    }
                }
                TaskResult::Complete => {
                    // Pop only if still the head: the callback may have
                    // scheduled something that expires sooner.
                    let mut ready = self.ready.borrow_mut();
                    if ready.peek().is_some_and(|head| head.id == task_id) {
                        ready.pop();
                    }
                    drop(ready);
                    self.tasks.borrow_mut().remove(entry.key);
                }
            }
            self.advance_timers(now);
        }

        if !self.ready.borrow().is_empty() {
            return true;
        }
        let next_start = self.delayed.borrow().peek().map(|e| e.sort_index);
        if let Some(start_time) = next_start {
            self.request_host_timeout(start_time - now);
        }
        false
    }

    /// One host invocation: reset bookkeeping, run the work loop, and
    /// report whether the host should call back.
    fn flush_work(&self, initial_time: TimeMs) -> bool {
        self.host_callback_scheduled.set(false);
        // Any delayed wake is superseded; the loop re-arms one if needed.
        self.cancel_host_timeout();
        self.performing_work.set(true);
        let _flush = FlushGuard { scheduler: self };
        self.work_loop(initial_time)
    }

    /// Entry point for the host's "soon" wake.
    fn perform_work_until_deadline(&self) {
        if !self.work_requested.get() {
            self.wake_running.set(false);
            return;
        }
        let now = self.host.now();
        self.pacer.begin_slice(now);
        {
            // If a task panics, the guard still re-arms the loop on the
            // way out, so the error surfaces to the host without
            // stranding the remaining tasks.
            let mut rearm = RearmGuard {
                scheduler: self,
                has_more_work: true,
            };
            rearm.has_more_work = self.flush_work(now);
        }
        self.pacer.end_slice();
    }

    /// Entry point for the host's delayed wake.
    fn handle_timeout(&self, now: TimeMs) {
        self.host_timeout.set(None);
        self.advance_timers(now);

        if self.host_callback_scheduled.get() {
            return;
        }
        if !self.ready.borrow().is_empty() {
            self.host_callback_scheduled.set(true);
            self.request_host_callback();
        } else {
            let next_start = self.delayed.borrow().peek().map(|e| e.sort_index);
            if let Some(start_time) = next_start {
                self.request_host_timeout(start_time - now);
            }
        }
    }

    fn request_host_callback(&self) {
        self.work_requested.set(true);
        if !self.wake_running.get() {
            self.wake_running.set(true);
            self.schedule_wake();
        }
    }

    fn schedule_wake(&self) {
        let weak = self.weak.clone();
        self.host.schedule_soon(Box::new(move || {
            if let Some(scheduler) = weak.upgrade() {
                scheduler.perform_work_until_deadline();
            }
        }));
    }

    fn request_host_timeout(&self, delay: TimeMs) {
        let weak = self.weak.clone();
        let timer = self.host.schedule_after(
            Box::new(move || {
                if let Some(scheduler) = weak.upgrade() {
                    let now = scheduler.host.now();
                    scheduler.handle_timeout(now);
                }
            }),
            delay.max(0),
        );
        self.host_timeout.set(Some(timer));
    }

    fn cancel_host_timeout(&self) {
        if let Some(timer) = self.host_timeout.take() {
            self.host.cancel_timer(timer);
        }
    }
}

/// Restores flush-level bookkeeping on every exit path, including
/// unwinding out of a panicking callback.
struct FlushGuard<'a, H: SchedulerHost> {
    scheduler: &'a Scheduler<H>,
}

impl<H: SchedulerHost> Drop for FlushGuard<'_, H> {
    fn drop(&mut self) {
        self.scheduler.current_task.set(None);
        self.scheduler.performing_work.set(false);
    }
}

/// Re-arms the host wake (or winds the loop down) when a host
/// invocation ends, normally or by unwinding. While unwinding,
/// `has_more_work` still holds its initial `true`, so the remaining
/// tasks get another slice.
struct RearmGuard<'a, H: SchedulerHost + 'static> {
    scheduler: &'a Scheduler<H>,
    has_more_work: bool,
}

impl<H: SchedulerHost + 'static> Drop for RearmGuard<'_, H> {
    fn drop(&mut self) {
        if self.has_more_work {
            self.scheduler.schedule_wake();
        } else {
            self.scheduler.wake_running.set(false);
            self.scheduler.work_requested.set(false);
        }
    }
}
