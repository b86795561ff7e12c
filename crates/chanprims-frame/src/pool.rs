//! Pooled byte buffers shared by encoders and transports.
//!
//! Buffers are grouped into power-of-two size classes starting at
//! [`MIN_BUFFER_SIZE`] and ending at the first class that covers the
//! configured maximum buffer size. A buffer is only taken back into the pool
//! when its length is exactly a size class and the byte budget allows it.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{FrameError, Result};

/// Smallest size class handed out by a pooling manager.
pub const MIN_BUFFER_SIZE: usize = 128;

/// Default pool budget used by transports: 512 KiB.
pub const DEFAULT_MAX_BUFFER_POOL_SIZE: i64 = 512 * 1024;

struct SizeClass {
    size: usize,
    buffers: Mutex<Vec<Vec<u8>>>,
}

/// Bounded pool of byte buffers keyed by size class.
pub struct BufferManager {
    classes: Vec<SizeClass>,
    max_pool_size: usize,
    max_buffer_size: usize,
    pooled_bytes: AtomicUsize,
}

impl BufferManager {
    /// Create a manager holding at most `max_pool_size` bytes of idle buffers,
    /// pooling buffers up to `max_buffer_size` bytes.
    ///
    /// A pool size of zero creates a manager that never retains buffers.
    pub fn new(max_pool_size: i64, max_buffer_size: i32) -> Result<Self> {
        if max_pool_size < 0 {
            return Err(FrameError::invalid_argument(
                "max_pool_size",
                format!("must be non-negative, got {max_pool_size}"),
            ));
        }
        if max_buffer_size < 0 {
            return Err(FrameError::invalid_argument(
                "max_buffer_size",
                format!("must be non-negative, got {max_buffer_size}"),
            ));
        }

        let max_pool_size = usize::try_from(max_pool_size).unwrap_or(usize::MAX);
        let max_buffer_size = max_buffer_size as usize;

        let mut classes = Vec::new();
        if max_pool_size > 0 {
            let mut size = MIN_BUFFER_SIZE;
            loop {
                classes.push(SizeClass {
                    size,
                    buffers: Mutex::new(Vec::new()),
                });
                if size >= max_buffer_size || size > max_pool_size {
                    break;
                }
                size *= 2;
            }
        }

        tracing::debug!(
            max_pool_size,
            max_buffer_size,
            classes = classes.len(),
            "buffer manager created"
        );

        Ok(Self {
            classes,
            max_pool_size,
            max_buffer_size,
            pooled_bytes: AtomicUsize::new(0),
        })
    }

    /// A manager that never retains buffers; every take allocates exactly.
    pub fn unpooled() -> Self {
        Self {
            classes: Vec::new(),
            max_pool_size: 0,
            max_buffer_size: 0,
            pooled_bytes: AtomicUsize::new(0),
        }
    }

    /// Take a buffer whose length is at least `size`.
    pub fn take_buffer(&self, size: usize) -> Vec<u8> {
        let Some(class) = self.class_for(size) else {
            return vec![0u8; size];
        };

        if let Some(mut buffer) = class.buffers.lock().pop() {
            self.pooled_bytes.fetch_sub(class.size, Ordering::AcqRel);
            buffer.fill(0);
            return buffer;
        }

        vec![0u8; class.size]
    }

    /// Give a buffer back to the pool.
    ///
    /// Buffers that did not come from a size class of this manager, or that
    /// would push the pool over budget, are dropped.
    pub fn return_buffer(&self, buffer: Vec<u8>) {
        let len = buffer.len();
        let Some(class) = self.classes.iter().find(|class| class.size == len) else {
            tracing::trace!(len, "ignoring buffer that is not a pooled size class");
            return;
        };

        let reserved = self
            .pooled_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let next = current.checked_add(len)?;
                (next <= self.max_pool_size).then_some(next)
            });
        if reserved.is_err() {
            tracing::trace!(len, "buffer pool full, dropping buffer");
            return;
        }

        class.buffers.lock().push(buffer);
    }

    /// Drop every pooled buffer.
    pub fn clear(&self) {
        for class in &self.classes {
            let drained = std::mem::take(&mut *class.buffers.lock());
            self.pooled_bytes
                .fetch_sub(drained.len() * class.size, Ordering::AcqRel);
        }
        tracing::debug!("buffer pool cleared");
    }

    /// Bytes currently held idle in the pool.
    pub fn pooled_bytes(&self) -> usize {
        self.pooled_bytes.load(Ordering::Acquire)
    }

    /// Number of idle buffers currently pooled.
    pub fn pooled_count(&self) -> usize {
        self.classes
            .iter()
            .map(|class| class.buffers.lock().len())
            .sum()
    }

    pub fn max_pool_size(&self) -> usize {
        self.max_pool_size
    }

    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    fn class_for(&self, size: usize) -> Option<&SizeClass> {
        if size > self.max_buffer_size {
            return None;
        }
        self.classes.iter().find(|class| class.size >= size)
    }
}

impl std::fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferManager")
            .field("max_pool_size", &self.max_pool_size)
            .field("max_buffer_size", &self.max_buffer_size)
            .field("pooled_bytes", &self.pooled_bytes())
            .finish()
    }
}
