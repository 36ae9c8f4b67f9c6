//! Multi-producer send queue over pooled chunks
//!
//! Writers copy their bytes into pool-rented chunks and push them onto a
//! lock-free pending queue. The single active sender drains the whole pending
//! queue into an "active batch" and transmits it with one vectored write.
//! Partial writes advance the batch in place; buffers go back to the pool only
//! once every byte in the batch has been sent.

use crate::buffer::pool::BufferPool;
use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A pool-rented buffer plus the number of meaningful bytes in it
struct PooledChunk {
    buf: Vec<u8>,
    len: usize,
}

/// View into one owned buffer of the active batch
#[derive(Debug, Clone, Copy)]
struct ActiveRange {
    owner: usize,
    offset: usize,
    len: usize,
}

#[derive(Default)]
struct ActiveBatch {
    ranges: VecDeque<ActiveRange>,
    owners: Vec<Vec<u8>>,
    remaining: usize,
    batch_len: usize,
}

impl ActiveBatch {
    fn advance(&mut self, mut sent: usize) {
        while sent > 0 {
            let Some(front) = self.ranges.front_mut() else {
                break;
            };

            if sent >= front.len {
                sent -= front.len;
                self.ranges.pop_front();
                continue;
            }

            front.offset += sent;
            front.len -= sent;
            break;
        }
    }

    fn release(&mut self, pool: &dyn BufferPool) {
        for buf in self.owners.drain(..) {
            pool.give_back(buf);
        }
        self.ranges.clear();
        self.remaining = 0;
        self.batch_len = 0;
    }
}

/// Thread-safe queue of pooled chunks with a single active batch
pub struct PooledSendQueue {
    pool: Arc<dyn BufferPool>,
    pending: SegQueue<PooledChunk>,
    pending_bytes: AtomicUsize,
    // Pending plus unsent active bytes; bumped before a chunk is pushed.
    queued: AtomicUsize,
    active: Mutex<ActiveBatch>,
}

impl PooledSendQueue {
    /// Create an empty queue renting from `pool`
    #[must_use]
    pub fn new(pool: Arc<dyn BufferPool>) -> Self {
        Self {
            pool,
            pending: SegQueue::new(),
            pending_bytes: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            active: Mutex::new(ActiveBatch::default()),
        }
    }

    /// Copy `data` into a pooled chunk and append it to the pending queue
    ///
    /// Safe to call from any number of threads at once. Empty input is ignored.
    pub fn enqueue(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        self.queued.fetch_add(data.len(), Ordering::AcqRel);
        self.push_chunk(data);
    }

    /// Enqueue `data` only if the queued total stays within `limit`
    ///
    /// The room is reserved atomically, so concurrent callers can never push
    /// the total past `limit` together. On refusal returns the total the
    /// write would have produced.
    pub fn try_enqueue(&self, data: &[u8], limit: usize) -> std::result::Result<(), usize> {
        if data.is_empty() {
            return Ok(());
        }

        self.queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                let wanted = queued + data.len();
                (wanted <= limit).then_some(wanted)
            })
            .map_err(|queued| queued + data.len())?;

        self.push_chunk(data);
        Ok(())
    }

    fn push_chunk(&self, data: &[u8]) {
        let mut buf = self.pool.rent(data.len());
        buf[..data.len()].copy_from_slice(data);

        self.pending_bytes.fetch_add(data.len(), Ordering::AcqRel);
        self.pending.push(PooledChunk {
            buf,
            len: data.len(),
        });
    }

    /// Drain the pending queue into a new active batch if none is in flight
    ///
    /// Returns the number of bytes left to transmit in the active batch.
    pub fn build_active_if_empty(&self) -> usize {
        let mut active = self.active.lock();
        if active.remaining > 0 {
            return active.remaining;
        }

        active.ranges.clear();
        active.owners.clear();
        active.remaining = 0;
        active.batch_len = 0;

        while let Some(chunk) = self.pending.pop() {
            self.pending_bytes.fetch_sub(chunk.len, Ordering::AcqRel);

            let owner = active.owners.len();
            active.ranges.push_back(ActiveRange {
                owner,
                offset: 0,
                len: chunk.len,
            });
            active.owners.push(chunk.buf);
            active.remaining += chunk.len;
        }

        active.batch_len = active.remaining;
        active.remaining
    }

    /// Account for `bytes_sent` bytes of the active batch
    ///
    /// Returns `Some(batch_len)` once the whole batch has gone out and its
    /// buffers are back in the pool, `None` while bytes remain.
    pub fn complete(&self, bytes_sent: usize) -> Option<usize> {
        let mut active = self.active.lock();
        if active.remaining == 0 {
            return None;
        }

        if bytes_sent < active.remaining {
            active.advance(bytes_sent);
            active.remaining -= bytes_sent;
            self.queued.fetch_sub(bytes_sent, Ordering::AcqRel);
            return None;
        }

        self.queued.fetch_sub(active.remaining, Ordering::AcqRel);
        let batch_len = active.batch_len;
        active.release(self.pool.as_ref());
        Some(batch_len)
    }

    /// Return every pending and active buffer to the pool
    pub fn clear(&self) {
        while let Some(chunk) = self.pending.pop() {
            self.pending_bytes.fetch_sub(chunk.len, Ordering::AcqRel);
            self.queued.fetch_sub(chunk.len, Ordering::AcqRel);
            self.pool.give_back(chunk.buf);
        }

        let mut active = self.active.lock();
        self.queued.fetch_sub(active.remaining, Ordering::AcqRel);
        active.release(self.pool.as_ref());
    }

    /// Whether a batch is in flight
    #[must_use]
    pub fn has_active(&self) -> bool {
        self.active.lock().remaining > 0
    }

    /// Bytes left to transmit in the active batch
    #[must_use]
    pub fn active_total(&self) -> usize {
        self.active.lock().remaining
    }

    /// Chunks waiting behind the active batch
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Bytes waiting behind the active batch
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes.load(Ordering::Acquire)
    }

    /// Pending plus not-yet-sent active bytes
    #[must_use]
    pub fn queued_bytes(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Run `f` over the active ranges as I/O slices, in send order
    ///
    /// The batch stays locked for the duration of `f`, so `f` must not block.
    pub fn with_active_slices<R>(&self, f: impl FnOnce(&[IoSlice<'_>]) -> R) -> R {
        let active = self.active.lock();
        let slices: Vec<IoSlice<'_>> = active
            .ranges
            .iter()
            .map(|r| IoSlice::new(&active.owners[r.owner][r.offset..r.offset + r.len]))
            .collect();
        f(&slices)
    }
}

impl Drop for PooledSendQueue {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for PooledSendQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSendQueue")
            .field("pending_len", &self.pending_len())
            .field("pending_bytes", &self.pending_bytes())
            .field("active_total", &self.active_total())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::pool::{BufferPoolConfig, SharedBufferPool};

    fn queue() -> (Arc<SharedBufferPool>, PooledSendQueue) {
        let pool = Arc::new(SharedBufferPool::new(
            BufferPoolConfig::new().with_min_size(8).with_max_size(64),
        ));
        let queue = PooledSendQueue::new(pool.clone());
        (pool, queue)
    }

    fn active_bytes(queue: &PooledSendQueue) -> Vec<u8> {
        queue.with_active_slices(|slices| {
            slices.iter().flat_map(|s| s.iter().copied()).collect()
        })
    }

    #[test]
    fn test_empty_enqueue_ignored() {
        let (pool, queue) = queue();
        queue.enqueue(&[]);
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(queue.build_active_if_empty(), 0);
        assert!(!queue.has_active());
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_build_drains_all_pending_in_order() {
        let (_pool, queue) = queue();
        queue.enqueue(b"one");
        queue.enqueue(b"two");
        queue.enqueue(b"three");

        assert_eq!(queue.build_active_if_empty(), 11);
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(active_bytes(&queue), b"onetwothree");
    }

    #[test]
    fn test_build_does_not_mix_batches() {
        let (_pool, queue) = queue();
        queue.enqueue(b"first");
        queue.build_active_if_empty();

        queue.enqueue(b"second");
        assert_eq!(queue.build_active_if_empty(), 5);
        assert_eq!(active_bytes(&queue), b"first");
        assert_eq!(queue.pending_len(), 1);
        assert_eq!(queue.queued_bytes(), 11);
    }

    #[test]
    fn test_partial_complete_advances_in_place() {
        let (pool, queue) = queue();
        queue.enqueue(b"abc");
        queue.enqueue(b"defgh");
        queue.build_active_if_empty();

        assert_eq!(queue.complete(4), None);
        assert_eq!(queue.active_total(), 4);
        assert_eq!(active_bytes(&queue), b"efgh");
        assert_eq!(pool.outstanding(), 2);

        assert_eq!(queue.complete(1), None);
        assert_eq!(active_bytes(&queue), b"fgh");

        assert_eq!(queue.complete(3), Some(8));
        assert!(!queue.has_active());
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_complete_without_active_is_noop() {
        let (_pool, queue) = queue();
        assert_eq!(queue.complete(10), None);
    }

    #[test]
    fn test_clear_returns_everything() {
        let (pool, queue) = queue();
        queue.enqueue(b"in flight");
        queue.build_active_if_empty();
        queue.complete(2);
        queue.enqueue(b"waiting");
        queue.enqueue(&[7u8; 200]);
        assert_eq!(pool.outstanding(), 3);

        queue.clear();
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(queue.queued_bytes(), 0);
        assert!(!queue.has_active());
    }

    #[test]
    fn test_try_enqueue_respects_limit() {
        let (pool, queue) = queue();
        assert_eq!(queue.try_enqueue(b"12345678", 10), Ok(()));
        assert_eq!(queue.try_enqueue(b"abc", 10), Err(11));
        assert_eq!(queue.try_enqueue(b"ab", 10), Ok(()));
        assert_eq!(queue.queued_bytes(), 10);

        // Sent bytes free room again.
        queue.build_active_if_empty();
        assert_eq!(queue.complete(4), None);
        assert_eq!(queue.try_enqueue(b"wxyz", 10), Ok(()));
        assert_eq!(queue.queued_bytes(), 10);

        queue.clear();
        assert_eq!(queue.queued_bytes(), 0);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_try_enqueue_concurrent_writers_never_exceed_limit() {
        let (pool, queue) = queue();
        let queue = Arc::new(queue);
        let limit = 4096;

        let writers: Vec<_> = (0..8)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    let mut accepted = 0;
                    for _ in 0..200 {
                        if queue.try_enqueue(&[1u8; 24], limit).is_ok() {
                            accepted += 24;
                        }
                    }
                    accepted
                })
            })
            .collect();

        let accepted: usize = writers.into_iter().map(|w| w.join().unwrap()).sum();
        assert!(accepted <= limit);
        assert_eq!(queue.queued_bytes(), accepted);
        assert_eq!(queue.pending_bytes(), accepted);

        queue.clear();
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_drop_returns_buffers() {
        let (pool, queue) = queue();
        queue.enqueue(b"leftover");
        drop(queue);
        assert_eq!(pool.outstanding(), 0);
    }
}
