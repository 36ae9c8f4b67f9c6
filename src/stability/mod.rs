//! Cancellation primitives

pub mod shutdown;

pub use shutdown::ShutdownSignal;
