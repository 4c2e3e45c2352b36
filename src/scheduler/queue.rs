use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::scheduler::heap::{PriorityQueue, QueueEntry};
use crate::scheduler::job::JobRecord;

/// Thread-safe wrapper around [`PriorityQueue`].
///
/// Every operation holds a single mutex for its whole duration and does
/// nothing but heap work under it, so contention stays cheap.
#[derive(Debug, Default)]
pub struct ConcurrentQueue {
    heap: Mutex<PriorityQueue>,
}

impl ConcurrentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record and return its slot at insertion time.
    ///
    /// The slot is advisory only: the next extraction may move the entry.
    pub fn enqueue(&self, name: impl Into<String>, priority: i64, record: JobRecord) -> usize {
        self.lock().insert(name.into(), priority, record)
    }

    pub fn dequeue(&self) -> Option<QueueEntry> {
        self.lock().extract_max()
    }

    pub fn peek(&self) -> Option<QueueEntry> {
        self.lock().peek_max().cloned()
    }

    pub fn size(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // Heap mutations have no panicking steps between index updates; poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, PriorityQueue> {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
