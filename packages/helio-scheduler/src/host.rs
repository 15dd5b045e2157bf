use crate::TimeMs;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// Default per-slice budget: the scheduler yields several times per
/// frame rather than trying to align with frame boundaries.
pub const FRAME_YIELD_MS: TimeMs = 5;
/// Past this, yield if any input is pending, continuous included.
pub const CONTINUOUS_YIELD_MS: TimeMs = 50;
/// Hard ceiling: never hold the host longer than this, signals or not.
pub const MAX_YIELD_MS: TimeMs = 300;

/// Handle for a delayed one-shot wake armed on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerId(pub u64);

/// Capabilities the scheduler needs from its embedding environment.
///
/// The scheduler core never touches a platform primitive directly; a web
/// embedding would back `schedule_soon` with a message channel, a native
/// embedding with its event loop's immediate queue. `VirtualHost` is the
/// in-crate implementation for tests and manual driving.
pub trait SchedulerHost {
    /// Monotonic clock reading in milliseconds.
    fn now(&self) -> TimeMs;

    /// Invoke `wake` at the next opportunity, cheaper than a timer.
    fn schedule_soon(&self, wake: Box<dyn FnOnce()>);

    /// Invoke `wake` once after `delay` milliseconds.
    fn schedule_after(&self, wake: Box<dyn FnOnce()>, delay: TimeMs) -> TimerId;

    /// Disarm a timer from `schedule_after`. Firing or already-fired
    /// timers are a no-op.
    fn cancel_timer(&self, timer: TimerId);

    /// Whether this host can report pending input at all. When false the
    /// input-aware yield policy degrades to the plain elapsed check.
    fn has_urgent_event_signal(&self) -> bool {
        false
    }

    /// Best-effort "the user is interacting right now" probe.
    /// `include_continuous` widens it to continuous events (mouse moves)
    /// rather than just discrete ones (clicks, key presses).
    fn urgent_event_pending(&self, _include_continuous: bool) -> bool {
        false
    }
}

impl<H: SchedulerHost + ?Sized> SchedulerHost for Rc<H> {
    fn now(&self) -> TimeMs {
        (**self).now()
    }

    fn schedule_soon(&self, wake: Box<dyn FnOnce()>) {
        (**self).schedule_soon(wake)
    }

    fn schedule_after(&self, wake: Box<dyn FnOnce()>, delay: TimeMs) -> TimerId {
        (**self).schedule_after(wake, delay)
    }

    fn cancel_timer(&self, timer: TimerId) {
        (**self).cancel_timer(timer)
    }

    fn has_urgent_event_signal(&self) -> bool {
        (**self).has_urgent_event_signal()
    }

    fn urgent_event_pending(&self, include_continuous: bool) -> bool {
        (**self).urgent_event_pending(include_continuous)
    }
}

/// When `should_yield` starts returning true within a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum YieldPolicy {
    /// Yield as soon as the elapsed budget is spent.
    Elapsed,
    /// After the budget is spent, keep going while the host reports no
    /// pending input, up to hard ceilings (50 ms for continuous input,
    /// 300 ms unconditionally). Falls back to `Elapsed` behavior when
    /// the host has no input signal.
    #[default]
    InputAware,
}

/// Tracks the running time slice and decides when to hand control back
/// to the host.
pub(crate) struct FramePacer {
    policy: YieldPolicy,
    frame_interval: Cell<TimeMs>,
    slice_start: Cell<TimeMs>,
    needs_paint: Cell<bool>,
}

impl FramePacer {
    pub fn new(policy: YieldPolicy, frame_interval: TimeMs) -> Self {
        Self {
            policy,
            frame_interval: Cell::new(frame_interval),
            slice_start: Cell::new(0),
            needs_paint: Cell::new(false),
        }
    }

    pub fn begin_slice(&self, now: TimeMs) {
        self.slice_start.set(now);
    }

    pub fn end_slice(&self) {
        // Control went back to the host, which had its chance to paint.
        self.needs_paint.set(false);
    }

    pub fn set_frame_interval(&self, interval: TimeMs) {
        self.frame_interval.set(interval);
    }

    pub fn request_paint(&self, host: &impl SchedulerHost) {
        // Only meaningful where the richer heuristic is consulted;
        // otherwise we yield every frame interval regardless.
        if self.policy == YieldPolicy::InputAware && host.has_urgent_event_signal() {
            self.needs_paint.set(true);
        }
    }

    pub fn should_yield(&self, host: &impl SchedulerHost) -> bool {
        let elapsed = host.now() - self.slice_start.get();
        if elapsed < self.frame_interval.get() {
            // Blocked for less than a frame's worth; keep going.
            return false;
        }
        if self.policy == YieldPolicy::InputAware && host.has_urgent_event_signal() {
            if self.needs_paint.get() {
                return true;
            }
            if elapsed < CONTINUOUS_YIELD_MS {
                // Only discrete input (a click, a key press) justifies
                // interrupting this early.
                return host.urgent_event_pending(false);
            }
            if elapsed < MAX_YIELD_MS {
                return host.urgent_event_pending(true);
            }
            // Held the thread long enough that unseen host work (network,
            // paint without a request_paint) may be waiting.
            return true;
        }
        true
    }
}

struct VirtualTimer {
    id: TimerId,
    fire_at: TimeMs,
    wake: Box<dyn FnOnce()>,
}

/// Deterministic host for tests and event-loop-less embeddings: a manual
/// clock, a FIFO wake queue, and one-shot timers fired explicitly.
#[derive(Default)]
pub struct VirtualHost {
    now: Cell<TimeMs>,
    wakes: RefCell<VecDeque<Box<dyn FnOnce()>>>,
    timers: RefCell<Vec<VirtualTimer>>,
    next_timer: Cell<u64>,
    discrete_input: Cell<bool>,
    continuous_input: Cell<bool>,
}

impl VirtualHost {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Move the clock forward. Does not fire anything by itself; pair
    /// with `fire_due_timers` / `pump` so tests control interleaving.
    pub fn advance(&self, ms: TimeMs) {
        self.now.set(self.now.get() + ms);
    }

    /// Runs the wakes queued so far. Wakes scheduled while pumping are
    /// left for the next call, mirroring one host task per turn.
    /// Returns how many ran.
    pub fn pump(&self) -> usize {
        let batch: Vec<_> = self.wakes.borrow_mut().drain(..).collect();
        let count = batch.len();
        for wake in batch {
            wake();
        }
        count
    }

    /// Fires every timer whose deadline has passed, earliest first.
    pub fn fire_due_timers(&self) -> usize {
        let now = self.now.get();
        let mut due: Vec<_> = {
            let mut timers = self.timers.borrow_mut();
            let mut due = Vec::new();
            let mut i = 0;
            while i < timers.len() {
                if timers[i].fire_at <= now {
                    due.push(timers.remove(i));
                } else {
                    i += 1;
                }
            }
            due
        };
        due.sort_by_key(|t| t.fire_at);
        let count = due.len();
        for timer in due {
            (timer.wake)();
        }
        count
    }

    pub fn pending_wakes(&self) -> usize {
        self.wakes.borrow().len()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Deadline of the earliest armed timer, if any.
    pub fn next_timer_deadline(&self) -> Option<TimeMs> {
        self.timers.borrow().iter().map(|t| t.fire_at).min()
    }

    pub fn set_discrete_input_pending(&self, pending: bool) {
        self.discrete_input.set(pending);
    }

    pub fn set_continuous_input_pending(&self, pending: bool) {
        self.continuous_input.set(pending);
    }
}

impl SchedulerHost for VirtualHost {
    fn now(&self) -> TimeMs {
        self.now.get()
    }

    fn schedule_soon(&self, wake: Box<dyn FnOnce()>) {
        self.wakes.borrow_mut().push_back(wake);
    }

    fn schedule_after(&self, wake: Box<dyn FnOnce()>, delay: TimeMs) -> TimerId {
        let id = TimerId(self.next_timer.get());
        self.next_timer.set(id.0 + 1);
        self.timers.borrow_mut().push(VirtualTimer {
            id,
            fire_at: self.now.get() + delay.max(0),
            wake,
        });
        id
    }

    fn cancel_timer(&self, timer: TimerId) {
        self.timers.borrow_mut().retain(|t| t.id != timer);
    }

    fn has_urgent_event_signal(&self) -> bool {
        true
    }

    fn urgent_event_pending(&self, include_continuous: bool) -> bool {
        self.discrete_input.get() || (include_continuous && self.continuous_input.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_host_pump_runs_one_batch() {
        let host = VirtualHost::new();
        let inner = host.clone();
        host.schedule_soon(Box::new(move || {
            inner.schedule_soon(Box::new(|| {}));
        }));
        assert_eq!(host.pump(), 1);
        assert_eq!(host.pending_wakes(), 1);
        assert_eq!(host.pump(), 1);
        assert_eq!(host.pending_wakes(), 0);
    }

    #[test]
    fn virtual_host_timers_fire_only_when_due() {
        let host = VirtualHost::new();
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        host.schedule_after(Box::new(move || flag.set(true)), 100);
        host.advance(50);
        assert_eq!(host.fire_due_timers(), 0);
        assert!(!fired.get());
        host.advance(50);
        assert_eq!(host.fire_due_timers(), 1);
        assert!(fired.get());
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let host = VirtualHost::new();
        let id = host.schedule_after(Box::new(|| panic!("should not fire")), 10);
        host.cancel_timer(id);
        host.advance(20);
        assert_eq!(host.fire_due_timers(), 0);
    }

    #[test]
    fn pacer_elapsed_policy_ignores_input_signals() {
        let host = VirtualHost::new();
        let pacer = FramePacer::new(YieldPolicy::Elapsed, FRAME_YIELD_MS);
        pacer.begin_slice(host.now());
        assert!(!pacer.should_yield(&host));
        host.advance(FRAME_YIELD_MS);
        assert!(pacer.should_yield(&host));
    }

    #[test]
    fn pacer_input_aware_holds_without_input() {
        let host = VirtualHost::new();
        let pacer = FramePacer::new(YieldPolicy::InputAware, FRAME_YIELD_MS);
        pacer.begin_slice(host.now());
        host.advance(10);
        // Past the frame budget but no pending input: keep the slice.
        assert!(!pacer.should_yield(&host));
        host.set_discrete_input_pending(true);
        assert!(pacer.should_yield(&host));
    }

    #[test]
    fn pacer_input_aware_never_exceeds_max_interval() {
        let host = VirtualHost::new();
        let pacer = FramePacer::new(YieldPolicy::InputAware, FRAME_YIELD_MS);
        pacer.begin_slice(host.now());
        host.advance(MAX_YIELD_MS);
        assert!(pacer.should_yield(&host));
    }

    #[test]
    fn pacer_continuous_input_counts_after_50ms() {
        let host = VirtualHost::new();
        let pacer = FramePacer::new(YieldPolicy::InputAware, FRAME_YIELD_MS);
        pacer.begin_slice(host.now());
        host.set_continuous_input_pending(true);
        host.advance(10);
        assert!(!pacer.should_yield(&host));
        host.advance(CONTINUOUS_YIELD_MS);
        assert!(pacer.should_yield(&host));
    }
}
