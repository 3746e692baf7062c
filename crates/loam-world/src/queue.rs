//! Deferred-mutation queue: concurrent push, steal-all drain.
//!
//! The tick loop must never block on producers, and producers (the
//! network-receive path, background workers, gameplay callbacks) must
//! never mutate realm state directly. Everything goes through a
//! [`DeferredQueue`], which any thread pushes to and the tick thread
//! drains once per phase.

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Unbounded multi-producer queue drained in one non-blocking sweep.
pub struct DeferredQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Default for DeferredQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DeferredQueue<T> {
    /// A fresh, empty queue.
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Enqueue from any thread. Never blocks.
    pub fn push(&self, item: T) {
        // The receiver lives as long as self, so send cannot fail.
        let _ = self.tx.send(item);
    }

    /// Drain everything queued at this instant without blocking.
    ///
    /// Items pushed concurrently with the drain may land in this
    /// sweep or the next; neither is ever lost.
    pub fn steal(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
