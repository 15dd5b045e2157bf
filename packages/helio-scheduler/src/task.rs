use crate::TimeMs;
use crate::priority::Priority;
use slotmap::new_key_type;
use std::cmp::Ordering;
use std::fmt;

new_key_type! {
    /// Arena key for a live task. Versioned, so handles to completed
    /// tasks can never alias a newer task in the same slot.
    pub struct TaskKey;
}

/// Monotonically increasing task identity. Never reused; doubles as the
/// FIFO tie-break between tasks with equal sort keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a task callback produced.
pub enum TaskResult {
    /// The task finished and can be dropped.
    Complete,
    /// The task yielded mid-work; invoke this callback later to resume,
    /// with a freshly computed `did_timeout`.
    Continue(TaskCallback),
}

/// A unit of deferred work. Receives `did_timeout`: whether the task is
/// already past its expiration time when invoked.
pub type TaskCallback = Box<dyn FnOnce(bool) -> TaskResult>;

pub(crate) struct Task {
    pub id: TaskId,
    /// `None` once cancelled (or while the callback is being run).
    pub callback: Option<TaskCallback>,
    pub priority: Priority,
    pub start_time: TimeMs,
    pub expiration_time: TimeMs,
}

/// Returned by `schedule`; lets the producer cancel the task later.
/// Cheap to copy and safe to hold past completion.
#[derive(Debug, Clone, Copy)]
pub struct TaskHandle {
    pub(crate) key: TaskKey,
    pub(crate) id: TaskId,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }
}

/// Heap entry for either queue. `sort_index` is the start time while the
/// task sits in the delayed queue and the expiration time once promoted
/// to the ready queue; `id` breaks ties in insertion order. The arena
/// key rides along and never participates in ordering.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HeapEntry {
    pub sort_index: TimeMs,
    pub id: TaskId,
    pub key: TaskKey,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.sort_index == other.sort_index && self.id == other.id
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_index
            .cmp(&other.sort_index)
            .then(self.id.cmp(&other.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_order_by_sort_index_then_id() {
        let key = TaskKey::default();
        let a = HeapEntry {
            sort_index: 10,
            id: TaskId(1),
            key,
        };
        let b = HeapEntry {
            sort_index: 10,
            id: TaskId(2),
            key,
        };
        let c = HeapEntry {
            sort_index: 5,
            id: TaskId(3),
            key,
        };
        assert!(c < a);
        assert!(a < b);
    }
}
