//! Max-priority binary heap of queued jobs.
//!
//! The heap is a plain `Vec` laid out as an implicit binary tree. Every entry
//! records its own slot in that `Vec`, and every structural mutation keeps the
//! recorded slot in step with the real one. `std::collections::BinaryHeap`
//! does not expose positions, which is why this is hand rolled.
//!
//! Ordering is by priority, highest first. Entries of equal priority are
//! ordered by a monotonically increasing sequence number assigned at insert
//! time, so equal priorities come out first-in first-out.

use crate::scheduler::job::JobRecord;

/// A job record wrapped with its heap bookkeeping.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub name: String,
    pub priority: i64,
    pub record: JobRecord,
    sequence: u64,
    index: usize,
}

impl QueueEntry {
    /// True if `self` must sit above `other` in the heap.
    fn outranks(&self, other: &QueueEntry) -> bool {
        self.priority > other.priority
            || (self.priority == other.priority && self.sequence < other.sequence)
    }
}

/// Not synchronized; see [`ConcurrentQueue`](crate::scheduler::queue::ConcurrentQueue).
#[derive(Debug, Default)]
pub struct PriorityQueue {
    entries: Vec<QueueEntry>,
    next_sequence: u64,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record and return the slot it settled in.
    pub fn insert(&mut self, name: String, priority: i64, record: JobRecord) -> usize {
        let index = self.entries.len();
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        self.entries.push(QueueEntry {
            name,
            priority,
            record,
            sequence,
            index,
        });
        self.sift_up(index)
    }

    /// Remove and return the highest-priority entry.
    pub fn extract_max(&mut self) -> Option<QueueEntry> {
        if self.entries.is_empty() {
            return None;
        }

        let last = self.entries.len() - 1;
        self.swap(0, last);
        let mut entry = self.entries.pop()?;
        if !self.entries.is_empty() {
            self.sift_down(0);
        }

        // Detached from the heap; the slot no longer means anything.
        entry.index = usize::MAX;
        Some(entry)
    }

    pub fn peek_max(&self) -> Option<&QueueEntry> {
        self.entries.first()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.entries.swap(a, b);
        self.entries[a].index = a;
        self.entries[b].index = b;
    }

    fn sift_up(&mut self, mut index: usize) -> usize {
        while index > 0 {
            let parent = (index - 1) / 2;
            if !self.entries[index].outranks(&self.entries[parent]) {
                break;
            }
            self.swap(index, parent);
            index = parent;
        }
        index
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.entries.len();
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut top = index;

            if left < len && self.entries[left].outranks(&self.entries[top]) {
                top = left;
            }
            if right < len && self.entries[right].outranks(&self.entries[top]) {
                top = right;
            }
            if top == index {
                break;
            }
            self.swap(index, top);
            index = top;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(heap: &mut PriorityQueue, name: &str, priority: i64) -> usize {
        heap.insert(
            name.to_string(),
            priority,
            JobRecord::new(name, priority, "true"),
        )
    }

    fn assert_indices_consistent(heap: &PriorityQueue) {
        for (slot, entry) in heap.entries.iter().enumerate() {
            assert_eq!(entry.index, slot, "entry {} has a stale index", entry.name);
        }
    }

    fn assert_heap_property(heap: &PriorityQueue) {
        for child in 1..heap.entries.len() {
            let parent = (child - 1) / 2;
            assert!(!heap.entries[child].outranks(&heap.entries[parent]));
        }
    }

    #[test]
    fn empty_heap() {
        let mut heap = PriorityQueue::new();
        assert!(heap.is_empty());
        assert!(heap.peek_max().is_none());
        assert!(heap.extract_max().is_none());
    }

    #[test]
    fn extracts_in_priority_order() {
        let mut heap = PriorityQueue::new();
        for (name, priority) in [("a", 5), ("b", 1), ("c", 10), ("d", -3), ("e", 7)] {
            insert(&mut heap, name, priority);
        }

        let order: Vec<String> = std::iter::from_fn(|| heap.extract_max())
            .map(|e| e.name)
            .collect();
        assert_eq!(order, vec!["c", "e", "a", "b", "d"]);
    }

    #[test]
    fn equal_priorities_are_first_in_first_out() {
        let mut heap = PriorityQueue::new();
        for name in ["first", "second", "third", "fourth"] {
            insert(&mut heap, name, 3);
        }
        insert(&mut heap, "urgent", 4);

        let order: Vec<String> = std::iter::from_fn(|| heap.extract_max())
            .map(|e| e.name)
            .collect();
        assert_eq!(order, vec!["urgent", "first", "second", "third", "fourth"]);
    }

    #[test]
    fn insert_reports_final_slot() {
        let mut heap = PriorityQueue::new();
        assert_eq!(insert(&mut heap, "low", 1), 0);
        assert_eq!(insert(&mut heap, "lower", 0), 1);
        // Sifts past both to the root
        assert_eq!(insert(&mut heap, "high", 9), 0);
        assert_eq!(heap.peek_max().map(|e| e.name.as_str()), Some("high"));
    }

    #[test]
    fn peek_does_not_remove() {
        let mut heap = PriorityQueue::new();
        insert(&mut heap, "only", 2);
        assert_eq!(heap.peek_max().map(|e| e.priority), Some(2));
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn indices_track_positions_through_mutations() {
        let mut heap = PriorityQueue::new();
        let priorities = [4, 9, 1, 9, 6, 2, 8, 3, 7, 5, 0, 6];
        for (i, p) in priorities.iter().enumerate() {
            insert(&mut heap, &format!("job-{i}"), *p);
            assert_indices_consistent(&heap);
            assert_heap_property(&heap);
        }

        let mut last = i64::MAX;
        while let Some(entry) = heap.extract_max() {
            assert!(entry.priority <= last);
            assert_eq!(entry.index, usize::MAX);
            last = entry.priority;
            assert_indices_consistent(&heap);
            assert_heap_property(&heap);
        }
    }
}
