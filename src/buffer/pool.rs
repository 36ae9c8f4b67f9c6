//! Pooled byte buffers shared across sessions
//!
//! The pool is the only state every session touches, so rent and return are
//! lock-free. Buffers are bucketed into power-of-two size classes; requests
//! above the largest class get a one-off allocation that is dropped on return.

use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Rent-by-size / return allocator
///
/// `rent` hands out a buffer whose length is at least `min_len`. Ownership of
/// the `Vec` moves to the caller and back on `give_back`, so a buffer cannot be
/// returned twice or touched after it was returned.
pub trait BufferPool: Send + Sync + 'static {
    /// Take a buffer of at least `min_len` bytes
    fn rent(&self, min_len: usize) -> Vec<u8>;

    /// Hand a buffer back for reuse
    fn give_back(&self, buf: Vec<u8>);
}

/// Configuration for [`SharedBufferPool`]
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Smallest size class. Rounded up to a power of two.
    pub min_size: usize,
    /// Largest size class. Rounded up to a power of two.
    pub max_size: usize,
    /// Maximum number of idle buffers kept per class
    pub max_per_class: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            min_size: 256,
            max_size: 1024 * 1024,
            max_per_class: 256,
        }
    }
}

impl BufferPoolConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_max_per_class(mut self, count: usize) -> Self {
        self.max_per_class = count;
        self
    }
}

/// Snapshot of pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Buffers handed out
    pub rented: u64,
    /// Buffers handed back
    pub returned: u64,
    /// Rents served from an idle buffer
    pub reused: u64,
}

/// Lock-free size-class buffer pool
pub struct SharedBufferPool {
    min_size: usize,
    max_size: usize,
    classes: Vec<ArrayQueue<Vec<u8>>>,
    rented: AtomicU64,
    returned: AtomicU64,
    reused: AtomicU64,
}

static GLOBAL_POOL: OnceLock<Arc<SharedBufferPool>> = OnceLock::new();

impl SharedBufferPool {
    /// Create a pool from a configuration
    #[must_use]
    pub fn new(config: BufferPoolConfig) -> Self {
        let min_size = config.min_size.max(1).next_power_of_two();
        let max_size = config.max_size.max(min_size).next_power_of_two();
        let num_classes = (max_size / min_size).trailing_zeros() as usize + 1;
        let per_class = config.max_per_class.max(1);

        Self {
            min_size,
            max_size,
            classes: (0..num_classes)
                .map(|_| ArrayQueue::new(per_class))
                .collect(),
            rented: AtomicU64::new(0),
            returned: AtomicU64::new(0),
            reused: AtomicU64::new(0),
        }
    }

    /// Process-wide pool used by sessions that are not given their own
    pub fn global() -> Arc<SharedBufferPool> {
        Arc::clone(GLOBAL_POOL.get_or_init(|| Arc::new(Self::new(BufferPoolConfig::default()))))
    }

    fn class_index(&self, size: usize) -> Option<usize> {
        if size > self.max_size {
            return None;
        }
        if size <= self.min_size {
            return Some(0);
        }
        Some((size.next_power_of_two() / self.min_size).trailing_zeros() as usize)
    }

    fn class_size(&self, index: usize) -> usize {
        self.min_size << index
    }

    /// Current counter values
    #[must_use]
    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            rented: self.rented.load(Ordering::Acquire),
            returned: self.returned.load(Ordering::Acquire),
            reused: self.reused.load(Ordering::Acquire),
        }
    }

    /// Buffers currently rented and not yet returned
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        let returned = self.returned.load(Ordering::Acquire);
        let rented = self.rented.load(Ordering::Acquire);
        rented.saturating_sub(returned)
    }

    /// Idle buffers currently held across all classes
    #[must_use]
    pub fn idle(&self) -> usize {
        self.classes.iter().map(ArrayQueue::len).sum()
    }
}

impl Default for SharedBufferPool {
    fn default() -> Self {
        Self::new(BufferPoolConfig::default())
    }
}

impl BufferPool for SharedBufferPool {
    fn rent(&self, min_len: usize) -> Vec<u8> {
        self.rented.fetch_add(1, Ordering::AcqRel);

        let Some(index) = self.class_index(min_len) else {
            return vec![0u8; min_len];
        };

        if let Some(buf) = self.classes[index].pop() {
            self.reused.fetch_add(1, Ordering::Relaxed);
            return buf;
        }

        vec![0u8; self.class_size(index)]
    }

    fn give_back(&self, buf: Vec<u8>) {
        self.returned.fetch_add(1, Ordering::AcqRel);

        // Only exact class sizes go back; anything else is an oversized one-off.
        let len = buf.len();
        if let Some(index) = self.class_index(len) {
            if self.class_size(index) == len {
                let _ = self.classes[index].push(buf);
            }
        }
    }
}

impl std::fmt::Debug for SharedBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBufferPool")
            .field("min_size", &self.min_size)
            .field("max_size", &self.max_size)
            .field("classes", &self.classes.len())
            .field("stats", &self.stats())
            .finish()
    }
}
