//! Fixed-capacity queue shared by producers and the export worker.
//!
//! # Architecture
//!
//! 1. **Ring Buffer Storage**:
//!    - Fixed-size circular buffer prevents memory growth
//!    - O(1) push operations with no memory reallocation
//!    - FIFO ordering ensures records are exported in order
//!    - When full, new records are dropped and counted
//!
//! 2. **Thread Safety**:
//!    - The ring buffer sits behind a mutex held only for a push or a pop run
//!    - An atomic length mirror lets producers check the export threshold
//!      and the worker check for work without taking the lock
//!    - Lock poisoning is recovered so a panicking producer cannot wedge
//!      every other producer

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A fixed-size ring buffer.
///
/// - `head`: Points to next write position
/// - `tail`: Points to next read position
/// - `size`: Current number of elements
///
/// When the buffer is full, new items are rejected rather than overwriting
/// old ones.
#[derive(Debug)]
struct RingBuffer<T> {
    buffer: Vec<Option<T>>,
    head: usize,
    tail: usize,
    size: usize,
}

impl<T> RingBuffer<T> {
    fn new(capacity: usize) -> Self {
        let mut buffer = Vec::with_capacity(capacity);
        buffer.extend((0..capacity).map(|_| None));
        Self {
            buffer,
            head: 0,
            tail: 0,
            size: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn push(&mut self, item: T) -> Result<(), T> {
        if self.size == self.capacity() {
            return Err(item);
        }

        self.buffer[self.head] = Some(item);
        self.head = (self.head + 1) % self.capacity();
        self.size += 1;
        Ok(())
    }

    fn take_into(&mut self, max_items: usize, out: &mut Vec<T>) -> usize {
        let count = self.size.min(max_items);
        out.reserve(count);

        for _ in 0..count {
            if let Some(item) = self.buffer[self.tail].take() {
                out.push(item);
            }
            self.tail = (self.tail + 1) % self.capacity();
            self.size -= 1;
        }

        if self.size == 0 {
            self.head = 0;
            self.tail = 0;
        }

        count
    }
}

/// Bounded multi-producer, single-consumer FIFO with drop-on-full semantics.
///
/// ```
/// use telemetry_batch_export::BoundedQueue;
///
/// let queue = BoundedQueue::new(2);
/// assert!(queue.enqueue("a"));
/// assert!(queue.enqueue("b"));
/// assert!(!queue.enqueue("c"));
/// assert_eq!(queue.dropped_count(), 1);
///
/// let mut batch = Vec::new();
/// assert_eq!(queue.try_dequeue_batch(10, &mut batch), 2);
/// assert_eq!(batch, ["a", "b"]);
/// ```
#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: Mutex<RingBuffer<T>>,
    len: AtomicUsize,
    dropped: AtomicU64,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Creates a queue holding at most `capacity` items.
    ///
    /// A capacity of zero is raised to one; the processor options never
    /// produce it.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(RingBuffer::new(capacity)),
            len: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RingBuffer<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `item` unless the queue is full.
    ///
    /// Never blocks beyond the short internal lock. On a full queue the item
    /// is dropped, the dropped counter is incremented and `false` is returned.
    pub fn enqueue(&self, item: T) -> bool {
        let mut items = self.lock();
        match items.push(item) {
            Ok(()) => {
                self.len.store(items.size, Ordering::Release);
                true
            }
            Err(_rejected) => {
                drop(items);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Moves up to `max_items` items, oldest first, into `out`.
    ///
    /// Returns how many were moved. Only the export worker calls this.
    pub fn try_dequeue_batch(&self, max_items: usize, out: &mut Vec<T>) -> usize {
        if max_items == 0 || self.is_empty() {
            return 0;
        }
        let mut items = self.lock();
        let taken = items.take_into(max_items, out);
        self.len.store(items.size, Ordering::Release);
        taken
    }

    /// Removes every queued item and returns how many were discarded.
    ///
    /// The discarded items are added to the dropped counter.
    pub fn drain_all(&self) -> usize {
        let mut discarded = Vec::new();
        let count = {
            let mut items = self.lock();
            let count = items.take_into(usize::MAX, &mut discarded);
            self.len.store(items.size, Ordering::Release);
            count
        };
        self.record_dropped(count);
        count
    }

    /// Counts items that were dropped without ever reaching the queue.
    pub fn record_dropped(&self, count: usize) {
        if count > 0 {
            self.dropped.fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    /// Approximate number of queued items.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of items dropped over the queue's lifetime.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
