//! Single-owner FIFO buffers.
//!
//! Unlike the queues in [`crate::queue`], these buffers have exactly one
//! owner that both writes and reads; there is no internal synchronization
//! and no sharing. They exist for the "streaming through a scratch buffer"
//! pattern: parsers, codecs and protocol handlers that append at one end
//! and consume from the other.
//!
//! - [`RingBuffer`] wraps around; writes and reads may split into two
//!   spans at the seam.
//! - [`ShiftBuffer`] keeps items in one linear run and compacts toward
//!   offset zero when the leading gap grows too large, which keeps the
//!   contents addressable as a single slice.
//!
//! Both grow on demand, preserve FIFO order across growth, and guarantee
//! that a panicking user `Clone` neither leaks nor double-drops items.

mod ring_buffer;
mod shift_buffer;

pub use ring_buffer::RingBuffer;
pub use shift_buffer::ShiftBuffer;
