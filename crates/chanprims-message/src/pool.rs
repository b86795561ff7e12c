use parking_lot::Mutex;

/// Bounded LIFO pool of reusable values.
pub(crate) struct SynchronizedPool<T> {
    items: Mutex<Vec<T>>,
    max_count: usize,
}

impl<T> SynchronizedPool<T> {
    pub(crate) fn new(max_count: usize) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            max_count,
        }
    }

    pub(crate) fn take(&self) -> Option<T> {
        self.items.lock().pop()
    }

    /// Keep `item` for reuse. Returns false, dropping it, when the pool is full.
    pub(crate) fn give(&self, item: T) -> bool {
        let mut items = self.items.lock();
        if items.len() >= self.max_count {
            return false;
        }
        items.push(item);
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.items.lock().len()
    }
}
