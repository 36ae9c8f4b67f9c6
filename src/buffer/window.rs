//! Fixed-capacity sliding receive window

use crate::buffer::peek;
use crate::error::{NetworkError, Result};

/// Default receive window capacity
pub const DEFAULT_WINDOW_CAPACITY: usize = 32 * 1024;

/// Fixed-capacity byte arena with independent read and write cursors
///
/// Bytes land in `[write, capacity)` as they arrive from the socket and are
/// handed to the protocol layer as `[read, write)`. The two cursors move
/// separately so a partial message can be left in place and re-presented once
/// more bytes arrive. Unread bytes are slid back to offset zero only when the
/// tail runs out of room.
///
/// Invariant: `0 <= read <= write <= capacity`.
pub struct ByteWindow {
    buf: Box<[u8]>,
    read: usize,
    write: usize,
}

impl ByteWindow {
    /// Create a window of `capacity` bytes
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` for a zero capacity.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(NetworkError::invalid_state(
                "receive window capacity must be non-zero",
            ));
        }

        Ok(Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            read: 0,
            write: 0,
        })
    }

    /// Total capacity in bytes
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes received but not yet consumed
    #[must_use]
    pub fn data_size(&self) -> usize {
        self.write - self.read
    }

    /// Space left after the write cursor
    #[must_use]
    pub fn free_size(&self) -> usize {
        self.capacity() - self.write
    }

    #[must_use]
    pub fn read_pos(&self) -> usize {
        self.read
    }

    #[must_use]
    pub fn write_pos(&self) -> usize {
        self.write
    }

    /// Unconsumed bytes, `[read, write)`
    #[must_use]
    pub fn readable(&self) -> &[u8] {
        &self.buf[self.read..self.write]
    }

    /// Region the next receive may fill, `[write, capacity)`
    pub fn writable_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.write..]
    }

    /// Drop all content and move both cursors to zero
    pub fn reset(&mut self) {
        self.read = 0;
        self.write = 0;
    }

    /// Make sure at least `size` contiguous bytes are writable
    ///
    /// Compacts when the tail is too short. Returns `false` when even a fully
    /// compacted window cannot fit `size` bytes; the session treats that as
    /// fatal.
    pub fn ensure_free(&mut self, size: usize) -> bool {
        if self.free_size() >= size {
            return true;
        }

        self.clean();
        self.free_size() >= size
    }

    /// Record `n` bytes written into the writable region
    pub fn on_write(&mut self, n: usize) -> bool {
        if n > self.free_size() {
            return false;
        }

        self.write += n;
        true
    }

    /// Record `n` bytes consumed from the readable region
    ///
    /// A fully drained window collapses both cursors to zero.
    pub fn on_read(&mut self, n: usize) -> bool {
        if n > self.data_size() {
            return false;
        }

        self.read += n;
        if self.read == self.write {
            self.reset();
        }

        true
    }

    /// Slide unread bytes down to offset zero
    pub fn clean(&mut self) {
        let len = self.data_size();
        if len == 0 {
            self.reset();
            return;
        }

        if self.read == 0 {
            return;
        }

        self.buf.copy_within(self.read..self.write, 0);
        self.read = 0;
        self.write = len;
    }

    #[must_use]
    pub fn peek_u16_le(&self) -> Option<u16> {
        peek::peek_u16_le(self.readable())
    }

    #[must_use]
    pub fn peek_i16_le(&self) -> Option<i16> {
        peek::peek_i16_le(self.readable())
    }

    #[must_use]
    pub fn peek_u32_le(&self) -> Option<u32> {
        peek::peek_u32_le(self.readable())
    }

    #[must_use]
    pub fn peek_i32_le(&self) -> Option<i32> {
        peek::peek_i32_le(self.readable())
    }
}

impl Default for ByteWindow {
    fn default() -> Self {
        Self {
            buf: vec![0u8; DEFAULT_WINDOW_CAPACITY].into_boxed_slice(),
            read: 0,
            write: 0,
        }
    }
}

impl std::fmt::Debug for ByteWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteWindow")
            .field("capacity", &self.capacity())
            .field("read", &self.read)
            .field("write", &self.write)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(window: &mut ByteWindow, data: &[u8]) {
        assert!(window.ensure_free(data.len()));
        window.writable_mut()[..data.len()].copy_from_slice(data);
        assert!(window.on_write(data.len()));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(ByteWindow::new(0).is_err());
    }

    #[test]
    fn test_default_capacity() {
        let window = ByteWindow::default();
        assert_eq!(window.capacity(), DEFAULT_WINDOW_CAPACITY);
        assert_eq!(window.free_size(), DEFAULT_WINDOW_CAPACITY);
        assert_eq!(window.data_size(), 0);
    }

    #[test]
    fn test_write_then_partial_read() {
        let mut window = ByteWindow::new(16).unwrap();
        fill(&mut window, b"abcdef");

        assert_eq!(window.readable(), b"abcdef");
        assert!(window.on_read(2));
        assert_eq!(window.readable(), b"cdef");
        assert_eq!(window.read_pos(), 2);
        assert_eq!(window.write_pos(), 6);
    }

    #[test]
    fn test_drain_collapses_cursors() {
        let mut window = ByteWindow::new(16).unwrap();
        fill(&mut window, b"hello");

        assert!(window.on_read(5));
        assert_eq!(window.read_pos(), 0);
        assert_eq!(window.write_pos(), 0);
        assert_eq!(window.free_size(), 16);
    }

    #[test]
    fn test_out_of_range_counts_rejected() {
        let mut window = ByteWindow::new(8).unwrap();
        assert!(!window.on_write(9));
        assert!(window.on_write(4));
        assert!(!window.on_read(5));
        assert_eq!(window.data_size(), 4);
    }

    #[test]
    fn test_ensure_free_compacts() {
        let mut window = ByteWindow::new(8).unwrap();
        fill(&mut window, b"abcdefgh");
        assert!(window.on_read(6));
        assert_eq!(window.free_size(), 0);

        assert!(window.ensure_free(6));
        assert_eq!(window.read_pos(), 0);
        assert_eq!(window.readable(), b"gh");
        assert_eq!(window.free_size(), 6);
    }

    #[test]
    fn test_ensure_free_beyond_capacity() {
        let mut window = ByteWindow::new(8).unwrap();
        assert!(!window.ensure_free(9));

        fill(&mut window, b"abc");
        assert!(!window.ensure_free(6));
        assert!(window.ensure_free(5));
    }

    #[test]
    fn test_clean_noop_at_origin() {
        let mut window = ByteWindow::new(8).unwrap();
        fill(&mut window, b"xyz");
        window.clean();
        assert_eq!(window.read_pos(), 0);
        assert_eq!(window.readable(), b"xyz");
    }

    #[test]
    fn test_peek_over_readable_region() {
        let mut window = ByteWindow::new(16).unwrap();
        fill(&mut window, &[0xAA, 0x03, 0x00, 0x00, 0x00]);
        assert!(window.on_read(1));

        assert_eq!(window.peek_u16_le(), Some(3));
        assert_eq!(window.peek_u32_le(), Some(3));
        assert_eq!(window.data_size(), 4);

        assert!(window.on_read(3));
        assert_eq!(window.peek_u16_le(), None);
        assert_eq!(window.peek_i16_le(), None);
    }
}
