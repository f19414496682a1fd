//! Batched message queue between producer threads and the aggregator
//!
//! Each handle owns a private local batch that can be appended to without
//! any lock; a flush splices the whole batch onto the shared mutex-protected
//! FIFO in O(1) and signals the consumer. The consumer likewise drains the
//! entire shared FIFO into its own local batch under one lock and then
//! returns items one at a time lock-free. The batching is the pipeline's
//! throughput story: with the default threshold, producers take the shared
//! lock once per five items instead of once per item.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

/// Local-batch size at which a `FlushMode::Default` push flushes
pub const DEFAULT_FLUSH_THRESHOLD: usize = 5;

/// How a push interacts with the local batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Append locally; flush once the batch reaches the threshold
    Default,
    /// Bypass the local batch and append to the shared FIFO under lock
    Flush,
    /// Append locally unconditionally; an explicit flush sends it later
    NoFlush,
}

/// Outcome of a dequeue attempt
#[derive(Debug, PartialEq, Eq)]
pub enum Popped<T> {
    Item(T),
    /// Deadline passed with nothing available (timed pop only)
    Timeout,
    /// The queue has shut down and is fully drained
    Shutdown,
}

struct Inner<T> {
    fifo: VecDeque<T>,
}

/// Shared side of a staging queue. One per producer/consumer pair; every
/// handle opened against it holds an `Arc`, which doubles as the refcount.
pub struct StagingQueue<T> {
    inner: Mutex<Inner<T>>,
    cond: Condvar,
    done: AtomicBool,
}

impl<T> StagingQueue<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(StagingQueue {
            inner: Mutex::new(Inner { fifo: VecDeque::new() }),
            cond: Condvar::new(),
            done: AtomicBool::new(false),
        })
    }

    /// Open a handle onto this queue
    pub fn handle(self: &Arc<Self>) -> StagingHandle<T> {
        StagingHandle {
            shared: Arc::clone(self),
            local: VecDeque::new(),
            threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }

    /// Signal shutdown: wakes every waiter; subsequent pushes fail and pops
    /// report `Shutdown` once the FIFO is drained.
    pub fn shutdown(&self) {
        self.done.store(true, Ordering::SeqCst);
        let _guard = self.inner.lock().unwrap();
        self.cond.notify_all();
    }

    pub fn is_shut_down(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Number of items currently in the shared FIFO
    pub fn shared_len(&self) -> usize {
        self.inner.lock().unwrap().fifo.len()
    }
}

/// Per-owner handle: private local batch plus a reference to the shared FIFO
pub struct StagingHandle<T> {
    shared: Arc<StagingQueue<T>>,
    local: VecDeque<T>,
    threshold: usize,
}

impl<T> StagingHandle<T> {
    /// Append an item. Returns `false` when the queue has shut down and the
    /// item was discarded.
    pub fn push(&mut self, item: T, mode: FlushMode) -> bool {
        if self.shared.is_shut_down() {
            return false;
        }
        match mode {
            FlushMode::Flush => {
                let mut inner = self.shared.inner.lock().unwrap();
                inner.fifo.push_back(item);
                self.shared.cond.notify_one();
                true
            }
            FlushMode::Default | FlushMode::NoFlush => {
                self.local.push_back(item);
                if mode == FlushMode::Default && self.local.len() >= self.threshold {
                    self.flush()
                } else {
                    true
                }
            }
        }
    }

    /// Splice the local batch onto the shared FIFO and signal the consumer.
    /// Returns `false` when the queue has shut down (the batch is dropped).
    pub fn flush(&mut self) -> bool {
        if self.shared.is_shut_down() {
            self.local.clear();
            return false;
        }
        if self.local.is_empty() {
            return true;
        }
        let mut inner = self.shared.inner.lock().unwrap();
        inner.fifo.append(&mut self.local);
        self.shared.cond.notify_one();
        true
    }

    /// Dequeue one item, blocking until something arrives or shutdown.
    pub fn pop(&mut self) -> Popped<T> {
        if self.local.is_empty() {
            let mut inner = self.shared.inner.lock().unwrap();
            while inner.fifo.is_empty() && !self.shared.is_shut_down() {
                inner = self.shared.cond.wait(inner).unwrap();
            }
            if inner.fifo.is_empty() {
                return Popped::Shutdown;
            }
            std::mem::swap(&mut self.local, &mut inner.fifo);
        }
        match self.local.pop_front() {
            Some(item) => Popped::Item(item),
            None => Popped::Shutdown,
        }
    }

    /// Dequeue one item, waiting no later than `deadline`.
    ///
    /// Pending items already drained into the local batch are returned even
    /// past the deadline; the deadline bounds only the wait on the shared
    /// FIFO.
    pub fn pop_deadline(&mut self, deadline: Instant) -> Popped<T> {
        if self.local.is_empty() {
            let mut inner = self.shared.inner.lock().unwrap();
            loop {
                if !inner.fifo.is_empty() || self.shared.is_shut_down() {
                    break;
                }
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let (guard, wait) =
                    self.shared.cond.wait_timeout(inner, deadline - now).unwrap();
                inner = guard;
                if wait.timed_out() {
                    break;
                }
            }
            if inner.fifo.is_empty() {
                return if self.shared.is_shut_down() {
                    Popped::Shutdown
                } else {
                    Popped::Timeout
                };
            }
            std::mem::swap(&mut self.local, &mut inner.fifo);
        }
        match self.local.pop_front() {
            Some(item) => Popped::Item(item),
            None => Popped::Shutdown,
        }
    }

    /// Override the auto-flush threshold for this handle
    pub fn set_flush_threshold(&mut self, threshold: usize) {
        self.threshold = threshold;
    }

    /// Number of items staged locally, not yet flushed
    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    /// Number of items in the shared FIFO
    pub fn shared_len(&self) -> usize {
        self.shared.shared_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_noflush_stays_local() {
        let queue = StagingQueue::new();
        let mut handle = queue.handle();

        for i in 0..10 {
            assert!(handle.push(i, FlushMode::NoFlush));
        }
        assert_eq!(handle.local_len(), 10);
        assert_eq!(handle.shared_len(), 0);

        assert!(handle.flush());
        assert_eq!(handle.local_len(), 0);
        assert_eq!(handle.shared_len(), 10);
    }

    #[test]
    fn test_default_mode_flushes_at_threshold() {
        let queue = StagingQueue::new();
        let mut handle = queue.handle();

        for i in 0..DEFAULT_FLUSH_THRESHOLD - 1 {
            handle.push(i, FlushMode::Default);
        }
        assert_eq!(handle.shared_len(), 0);

        handle.push(99, FlushMode::Default);
        assert_eq!(handle.local_len(), 0);
        assert_eq!(handle.shared_len(), DEFAULT_FLUSH_THRESHOLD);
    }

    #[test]
    fn test_flush_mode_bypasses_local_batch() {
        let queue = StagingQueue::new();
        let mut handle = queue.handle();

        handle.push(1, FlushMode::NoFlush);
        handle.push(2, FlushMode::Flush);

        // The direct push skipped ahead of the staged item.
        assert_eq!(handle.local_len(), 1);
        assert_eq!(handle.shared_len(), 1);
    }

    #[test]
    fn test_fifo_order_within_one_producer() {
        let queue = StagingQueue::new();
        let mut producer = queue.handle();
        let mut consumer = queue.handle();

        for i in 0..20 {
            producer.push(i, FlushMode::NoFlush);
        }
        producer.flush();

        for expected in 0..20 {
            assert_eq!(consumer.pop(), Popped::Item(expected));
        }
    }

    #[test]
    fn test_pop_drains_shared_in_one_lock() {
        let queue = StagingQueue::new();
        let mut producer = queue.handle();
        let mut consumer = queue.handle();

        for i in 0..7 {
            producer.push(i, FlushMode::NoFlush);
        }
        producer.flush();

        assert_eq!(consumer.pop(), Popped::Item(0));
        // The remaining items moved to the consumer's local batch.
        assert_eq!(consumer.local_len(), 6);
        assert_eq!(consumer.shared_len(), 0);
    }

    #[test]
    fn test_timed_pop_times_out() {
        let queue: Arc<StagingQueue<u32>> = StagingQueue::new();
        let mut consumer = queue.handle();

        let start = Instant::now();
        let deadline = start + Duration::from_millis(30);
        assert_eq!(consumer.pop_deadline(deadline), Popped::Timeout);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_timed_pop_wakes_on_flush() {
        let queue = StagingQueue::new();
        let mut consumer = queue.handle();

        let producer_queue = Arc::clone(&queue);
        let t = thread::spawn(move || {
            let mut producer = producer_queue.handle();
            thread::sleep(Duration::from_millis(20));
            producer.push(7u32, FlushMode::Flush);
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        assert_eq!(consumer.pop_deadline(deadline), Popped::Item(7));
        t.join().unwrap();
    }

    #[test]
    fn test_shutdown_wakes_blocked_consumer() {
        let queue: Arc<StagingQueue<u32>> = StagingQueue::new();
        let mut consumer = queue.handle();

        let q = Arc::clone(&queue);
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            q.shutdown();
        });

        assert_eq!(consumer.pop(), Popped::Shutdown);
        t.join().unwrap();
    }

    #[test]
    fn test_shutdown_drains_pending_items_first() {
        let queue = StagingQueue::new();
        let mut producer = queue.handle();
        let mut consumer = queue.handle();

        producer.push(1, FlushMode::Flush);
        queue.shutdown();

        assert_eq!(consumer.pop(), Popped::Item(1));
        assert_eq!(consumer.pop(), Popped::Shutdown);
        assert!(!producer.push(2, FlushMode::Flush));
    }

    #[test]
    fn test_many_producers_one_consumer() {
        let queue = StagingQueue::new();
        let mut consumer = queue.handle();
        let mut threads = Vec::new();

        for p in 0..4 {
            let q = Arc::clone(&queue);
            threads.push(thread::spawn(move || {
                let mut producer = q.handle();
                for i in 0..100 {
                    producer.push(p * 1000 + i, FlushMode::Default);
                }
                producer.flush();
            }));
        }
        for t in threads {
            t.join().unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..400 {
            match consumer.pop() {
                Popped::Item(v) => seen.push(v),
                other => panic!("expected item, got {:?}", other),
            }
        }
        // Per-producer order is preserved even though global order is not.
        for p in 0..4 {
            let from_p: Vec<i32> = seen.iter().copied().filter(|v| v / 1000 == p).collect();
            let mut sorted = from_p.clone();
            sorted.sort();
            assert_eq!(from_p, sorted);
            assert_eq!(from_p.len(), 100);
        }
    }
}
