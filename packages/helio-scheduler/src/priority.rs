use crate::TimeMs;
use std::cell::Cell;

/// Largest timeout the policy will hand out. Keeps `start + timeout`
/// well inside the representable range no matter how long the process
/// has been running.
pub const MAX_TIMEOUT: TimeMs = (1 << 30) - 1;

const IMMEDIATE_TIMEOUT: TimeMs = -1;
const USER_BLOCKING_TIMEOUT: TimeMs = 250;
const NORMAL_TIMEOUT: TimeMs = 5_000;
const LOW_TIMEOUT: TimeMs = 10_000;

/// Priority levels, most urgent first.
///
/// Each level maps to a timeout; a task's expiration time is its start
/// time plus that timeout, so a more urgent task always expires (and
/// therefore sorts) earlier than a less urgent one scheduled at the same
/// instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    /// Expires immediately: treated as already overdue when it runs.
    Immediate,
    /// The user is waiting on this (e.g. a discrete input response).
    UserBlocking,
    #[default]
    Normal,
    /// Background work that can be deferred for a while.
    Low,
    /// Never expires on its own; runs only when nothing else wants to.
    Idle,
}

impl Priority {
    /// Timeout used to derive a task's expiration time.
    pub fn timeout(self) -> TimeMs {
        match self {
            Priority::Immediate => IMMEDIATE_TIMEOUT,
            Priority::UserBlocking => USER_BLOCKING_TIMEOUT,
            Priority::Normal => NORMAL_TIMEOUT,
            Priority::Low => LOW_TIMEOUT,
            Priority::Idle => MAX_TIMEOUT,
        }
    }

    /// Absolute expiration time for a task becoming eligible at `start`.
    pub fn expiration_after(self, start: TimeMs) -> TimeMs {
        start.saturating_add(self.timeout())
    }
}

/// Saves the current priority on construction and restores it on drop,
/// so the previous level comes back on every exit path, including
/// unwinding out of a panicking callback.
pub struct PriorityGuard<'a> {
    slot: &'a Cell<Priority>,
    previous: Priority,
}

impl<'a> PriorityGuard<'a> {
    pub fn new(slot: &'a Cell<Priority>, level: Priority) -> Self {
        let previous = slot.replace(level);
        Self { slot, previous }
    }
}

impl Drop for PriorityGuard<'_> {
    fn drop(&mut self) {
        self.slot.set(self.previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn more_urgent_levels_expire_sooner() {
        let start = 1_000;
        let mut expirations: Vec<TimeMs> = [
            Priority::Immediate,
            Priority::UserBlocking,
            Priority::Normal,
            Priority::Low,
            Priority::Idle,
        ]
        .iter()
        .map(|p| p.expiration_after(start))
        .collect();
        let sorted = expirations.clone();
        expirations.sort();
        assert_eq!(expirations, sorted);
    }

    #[test]
    fn immediate_is_overdue_at_creation() {
        assert!(Priority::Immediate.expiration_after(100) < 100);
    }

    #[test]
    fn guard_restores_on_drop() {
        let slot = Cell::new(Priority::Normal);
        {
            let _guard = PriorityGuard::new(&slot, Priority::UserBlocking);
            assert_eq!(slot.get(), Priority::UserBlocking);
        }
        assert_eq!(slot.get(), Priority::Normal);
    }

    #[test]
    fn guard_restores_during_unwind() {
        let slot = Cell::new(Priority::Low);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = PriorityGuard::new(&slot, Priority::Immediate);
            panic!("callback failed");
        }));
        assert!(result.is_err());
        assert_eq!(slot.get(), Priority::Low);
    }
}
