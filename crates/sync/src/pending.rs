use std::collections::VecDeque;

/// Bounded FIFO of records awaiting publication.
///
/// When full, pushing evicts the oldest entry. Sync favors fresh data over
/// a complete backlog.
#[derive(Debug, Clone)]
pub struct PendingQueue<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> PendingQueue<T> {
    /// `capacity` is raised to at least 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Appends a value. Returns the evicted oldest value, if the queue was full.
    pub fn push(&mut self, value: T) -> Option<T> {
        let evicted = if self.buf.len() == self.capacity {
            self.buf.pop_front()
        } else {
            None
        };
        self.buf.push_back(value);
        evicted
    }

    /// Clones up to `n` values from the front.
    pub fn peek_front(&self, n: usize) -> Vec<T> {
        self.buf.iter().take(n).cloned().collect()
    }

    /// Removes up to `n` values from the front.
    pub fn pop_front(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        self.buf.drain(..n);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
