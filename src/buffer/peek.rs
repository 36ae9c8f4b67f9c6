//! Little-endian header peeking over byte slices
//!
//! Protocol layers use these to check whether a length or type header is
//! already available before consuming anything from the receive window.
//! Nothing here advances a cursor.

use bytes::Buf;

fn head(data: &[u8], size: usize) -> Option<&[u8]> {
    if data.len() < size {
        return None;
    }
    Some(&data[..size])
}

/// Peek an unsigned 16-bit little-endian value
#[must_use]
pub fn peek_u16_le(data: &[u8]) -> Option<u16> {
    head(data, 2).map(|mut b| b.get_u16_le())
}

/// Peek a signed 16-bit little-endian value
#[must_use]
pub fn peek_i16_le(data: &[u8]) -> Option<i16> {
    head(data, 2).map(|mut b| b.get_i16_le())
}

/// Peek an unsigned 32-bit little-endian value
#[must_use]
pub fn peek_u32_le(data: &[u8]) -> Option<u32> {
    head(data, 4).map(|mut b| b.get_u32_le())
}

/// Peek a signed 32-bit little-endian value
#[must_use]
pub fn peek_i32_le(data: &[u8]) -> Option<i32> {
    head(data, 4).map(|mut b| b.get_i32_le())
}
