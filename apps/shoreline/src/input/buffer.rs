use std::collections::VecDeque;

/// Bounded FIFO that evicts its oldest entry instead of refusing new ones.
#[derive(Debug)]
pub struct DropOldestBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
    dropped: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub queued: usize,
    pub capacity: usize,
    pub dropped: u64,
}

impl<T> DropOldestBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "buffer capacity must be positive");
        Self {
            items: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            dropped: 0,
        }
    }

    /// Appends `item`, returning the evicted entry when the buffer was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.dropped += 1;
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn clear(&mut self) -> usize {
        let discarded = self.items.len();
        self.items.clear();
        discarded
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            queued: self.items.len(),
            capacity: self.capacity,
            dropped: self.dropped,
        }
    }
}
