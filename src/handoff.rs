use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Mutex-guarded queue used to move batches of items between threads.
///
/// Producers append under the lock; the consumer swaps the whole backing
/// `Vec` out in one step, so a drain racing with a push either sees the
/// whole push or none of it.
pub struct HandoffQueue<T> {
    items: Mutex<Vec<T>>,
}

impl<T> HandoffQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, item: T) {
        self.items.lock().push(item);
    }

    pub fn push_many<I>(&self, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        self.items.lock().extend(items);
    }

    /// Swap the queued items into `out`.
    ///
    /// Whatever `out` held before ends up in the queue's spare buffer, so
    /// callers should pass an empty vector.
    pub fn drain_into(&self, out: &mut Vec<T>) {
        debug_assert!(out.is_empty());
        std::mem::swap(&mut *self.items.lock(), out);
    }

    pub fn drain(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.lock())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl<T> Default for HandoffQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Count of raw frames seen by the capture thread since the last refresh
#[derive(Debug, Default)]
pub struct FrameCounter {
    frames: AtomicU64,
}

impl FrameCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: u64) {
        self.frames.fetch_add(n, Ordering::Relaxed);
    }

    /// Read and reset in one atomic step.
    pub fn take(&self) -> u64 {
        self.frames.swap(0, Ordering::Relaxed)
    }
}
