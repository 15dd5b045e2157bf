use smallvec::SmallVec;

/// Array-backed binary min-heap.
///
/// Both scheduler queues are built on this: the ready queue keyed by
/// expiration time and the delayed queue keyed by start time. Ordering is
/// whatever `T: Ord` says; entries with equal keys must break ties
/// themselves (the scheduler's entries compare their task id last), which
/// is what makes repeated `pop` deterministic.
///
/// There is no remove-by-value. Cancelled entries stay in place and are
/// discarded by the caller when they surface at the root.
pub struct MinHeap<T> {
    items: SmallVec<[T; 8]>,
}

impl<T: Ord> MinHeap<T> {
    pub fn new() -> Self {
        Self {
            items: SmallVec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// O(log n).
    pub fn push(&mut self, item: T) {
        self.items.push(item);
        self.sift_up(self.items.len() - 1);
    }

    /// O(1).
    pub fn peek(&self) -> Option<&T> {
        self.items.first()
    }

    /// Removes and returns the minimum. O(log n).
    pub fn pop(&mut self) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        let last = self.items.len() - 1;
        self.items.swap(0, last);
        let min = self.items.pop();
        if !self.items.is_empty() {
            self.sift_down(0);
        }
        min
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.items[i] < self.items[parent] {
                self.items.swap(i, parent);
                i = parent;
            } else {
                return;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let len = self.items.len();
        loop {
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            let mut smallest = i;
            if left < len && self.items[left] < self.items[smallest] {
                smallest = left;
            }
            if right < len && self.items[right] < self.items[smallest] {
                smallest = right;
            }
            if smallest == i {
                return;
            }
            self.items.swap(i, smallest);
            i = smallest;
        }
    }
}

impl<T: Ord> Default for MinHeap<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_ascending_order() {
        let mut heap = MinHeap::new();
        for v in [5, 3, 8, 1, 9, 2, 7] {
            heap.push(v);
        }
        let mut out = Vec::new();
        while let Some(v) = heap.pop() {
            out.push(v);
        }
        assert_eq!(out, vec![1, 2, 3, 5, 7, 8, 9]);
    }

    #[test]
    fn peek_does_not_remove() {
        let mut heap = MinHeap::new();
        heap.push(4);
        heap.push(2);
        assert_eq!(heap.peek(), Some(&2));
        assert_eq!(heap.len(), 2);
        assert_eq!(heap.pop(), Some(2));
        assert_eq!(heap.pop(), Some(4));
        assert_eq!(heap.pop(), None);
    }

    #[test]
    fn equal_keys_pop_in_insertion_order() {
        // Entries carry (key, seq); seq is the tie-break, like task ids.
        let mut heap = MinHeap::new();
        heap.push((10, 1));
        heap.push((10, 2));
        heap.push((5, 3));
        heap.push((10, 4));
        assert_eq!(heap.pop(), Some((5, 3)));
        assert_eq!(heap.pop(), Some((10, 1)));
        assert_eq!(heap.pop(), Some((10, 2)));
        assert_eq!(heap.pop(), Some((10, 4)));
    }

    #[test]
    fn interleaved_push_pop() {
        let mut heap = MinHeap::new();
        heap.push(3);
        heap.push(1);
        assert_eq!(heap.pop(), Some(1));
        heap.push(0);
        heap.push(2);
        assert_eq!(heap.pop(), Some(0));
        assert_eq!(heap.pop(), Some(2));
        assert_eq!(heap.pop(), Some(3));
        assert!(heap.is_empty());
    }
}
