//! Receive window, pooled send queue and the buffer pool behind them

pub mod peek;
pub mod pool;
pub mod send_queue;
pub mod window;

pub use peek::{peek_i16_le, peek_i32_le, peek_u16_le, peek_u32_le};
pub use pool::{BufferPool, BufferPoolConfig, BufferPoolStats, SharedBufferPool};
pub use send_queue::PooledSendQueue;
pub use window::{ByteWindow, DEFAULT_WINDOW_CAPACITY};
