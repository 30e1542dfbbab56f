//! Buffer type and utility operations.
//!
//! This module provides [`ByteBuffer`], a position/limit/capacity cursor over
//! shared byte storage, together with the helper operations every other part
//! of the crate moves bytes through: slicing with advance, fill, skip/unget,
//! scatter writes, multi-buffer accounting, string codecs and a hex dumper.
//!
//! # Buffer model
//!
//! A buffer is a window onto contiguous memory with three indices:
//!
//! ```text
//! 0 <= position <= limit <= capacity
//! remaining = limit - position
//! ```
//!
//! Metadata operations (`flip`, `clear`, `rewind`, `mark`/`reset`, `skip`,
//! `unget`) move the indices without touching the bytes. Data operations
//! read or write at the position and advance it. Operations that would move
//! past the window fail with *buffer-underflow* (reads) or *buffer-overflow*
//! (writes) and leave the position unchanged.
//!
//! Storage is shared (`Arc`) so [`ByteBuffer::slice`] returns a zero-copy
//! view; a view that is subsequently written to detaches via copy-on-write.

mod dump;
mod pool;
pub mod strings;

pub use dump::{dump, Dumper};
pub use pool::{heap_buffer_pool, BufferPool};

use crate::error::{Error, Result};
use std::sync::Arc;

/// A position/limit/capacity cursor over shared byte storage.
///
/// # Examples
///
/// ```
/// use evio::buffer::ByteBuffer;
///
/// let mut buf = ByteBuffer::allocate(8);
/// buf.put_slice(b"abc").unwrap();
/// buf.flip();
/// assert_eq!(buf.remaining(), 3);
/// assert_eq!(buf.get_u8().unwrap(), b'a');
/// ```
#[derive(Clone)]
pub struct ByteBuffer {
    /// Full backing storage; views share it and window into it.
    storage: Arc<Vec<u8>>,
    /// Offset of this view into the storage.
    origin: usize,
    capacity: usize,
    position: usize,
    limit: usize,
    mark: Option<usize>,
}

impl ByteBuffer {
    /// Creates a zero-filled buffer with the given capacity.
    ///
    /// Position is 0 and the limit equals the capacity.
    #[must_use]
    pub fn allocate(capacity: usize) -> Self {
        Self {
            storage: Arc::new(vec![0; capacity]),
            origin: 0,
            capacity,
            position: 0,
            limit: capacity,
            mark: None,
        }
    }

    /// Wraps an existing byte vector.
    ///
    /// Position is 0 and the limit equals the vector length.
    #[must_use]
    pub fn wrap(data: Vec<u8>) -> Self {
        let capacity = data.len();
        Self {
            storage: Arc::new(data),
            origin: 0,
            capacity,
            position: 0,
            limit: capacity,
            mark: None,
        }
    }

    /// Wraps a copy of the given bytes.
    #[must_use]
    pub fn from_slice(data: &[u8]) -> Self {
        Self::wrap(data.to_vec())
    }

    /// The empty buffer.
    #[must_use]
    pub fn empty() -> Self {
        Self::allocate(0)
    }

    /// Returns the current position.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Returns the current limit.
    #[inline]
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Returns the capacity.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of bytes between the position and the limit.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.limit - self.position
    }

    /// Returns true if any bytes remain between the position and the limit.
    #[inline]
    #[must_use]
    pub const fn has_remaining(&self) -> bool {
        self.position < self.limit
    }

    /// Sets the position.
    ///
    /// # Panics
    ///
    /// Panics if `position > limit`.
    pub fn set_position(&mut self, position: usize) -> &mut Self {
        assert!(position <= self.limit, "position {position} > limit {}", self.limit);
        self.position = position;
        if self.mark.is_some_and(|m| m > position) {
            self.mark = None;
        }
        self
    }

    /// Sets the limit.
    ///
    /// # Panics
    ///
    /// Panics if `limit > capacity`.
    pub fn set_limit(&mut self, limit: usize) -> &mut Self {
        assert!(limit <= self.capacity, "limit {limit} > capacity {}", self.capacity);
        self.limit = limit;
        if self.position > limit {
            self.position = limit;
        }
        if self.mark.is_some_and(|m| m > limit) {
            self.mark = None;
        }
        self
    }

    /// Flips the buffer: the limit becomes the position, the position zero.
    ///
    /// Call after writing to prepare the written range for reading.
    pub fn flip(&mut self) -> &mut Self {
        self.limit = self.position;
        self.position = 0;
        self.mark = None;
        self
    }

    /// Clears the buffer: position zero, limit at capacity.
    pub fn clear(&mut self) -> &mut Self {
        self.position = 0;
        self.limit = self.capacity;
        self.mark = None;
        self
    }

    /// Rewinds the buffer: position zero, limit unchanged.
    pub fn rewind(&mut self) -> &mut Self {
        self.position = 0;
        self.mark = None;
        self
    }

    /// Marks the current position for a later [`reset`](Self::reset).
    pub fn mark(&mut self) -> &mut Self {
        self.mark = Some(self.position);
        self
    }

    /// Resets the position to the mark.
    ///
    /// # Panics
    ///
    /// Panics if no mark is set.
    pub fn reset(&mut self) -> &mut Self {
        let mark = self.mark.expect("reset without mark");
        self.position = mark;
        self
    }

    /// Advances the position by `count` bytes.
    ///
    /// # Errors
    ///
    /// Fails with *buffer-underflow* when `count` exceeds the remaining
    /// bytes; the position is unchanged on failure.
    pub fn skip(&mut self, count: usize) -> Result<()> {
        if count > self.remaining() {
            return Err(Error::buffer_underflow());
        }
        self.position += count;
        Ok(())
    }

    /// Moves the position back by `count` bytes.
    ///
    /// # Errors
    ///
    /// Fails with *buffer-underflow* when `count` exceeds the position; the
    /// position is unchanged on failure.
    pub fn unget(&mut self, count: usize) -> Result<()> {
        if count > self.position {
            return Err(Error::buffer_underflow());
        }
        self.position -= count;
        if self.mark.is_some_and(|m| m > self.position) {
            self.mark = None;
        }
        Ok(())
    }

    /// Takes a slice of `size` bytes out of this buffer as a zero-copy view,
    /// advancing the position past it.
    ///
    /// A non-negative `size` counts from the position; a negative `size`
    /// counts back from the limit (the view covers the *last* `|size|`
    /// remaining bytes). The source position moves to `position + size`
    /// for a head slice and to `limit + size` for a tail slice; the source
    /// limit is unchanged.
    ///
    /// # Errors
    ///
    /// Fails with *buffer-underflow* when `|size|` exceeds the remaining
    /// bytes; the source is unchanged on failure.
    pub fn slice(&mut self, size: isize) -> Result<ByteBuffer> {
        let magnitude = size.unsigned_abs();
        if magnitude > self.remaining() {
            return Err(Error::buffer_underflow());
        }
        let (start, end) = if size < 0 {
            // count from end
            (self.limit - magnitude, self.limit)
        } else {
            (self.position, self.position + magnitude)
        };
        let view = ByteBuffer {
            storage: Arc::clone(&self.storage),
            origin: self.origin + start,
            capacity: end - start,
            position: 0,
            limit: end - start,
            mark: None,
        };
        // A tail slice leaves the position at the start of the view; a head
        // slice advances past it.
        self.position = if size < 0 { start } else { end };
        if self.mark.is_some_and(|m| m > self.position) {
            self.mark = None;
        }
        Ok(view)
    }

    /// Writes `count` copies of `value` at the position, advancing it.
    ///
    /// # Errors
    ///
    /// Fails with *buffer-overflow* when `count` exceeds the remaining
    /// bytes; the position is unchanged on failure.
    pub fn fill(&mut self, value: u8, count: usize) -> Result<()> {
        if count > self.remaining() {
            return Err(Error::buffer_overflow());
        }
        let start = self.origin + self.position;
        let data = Arc::make_mut(&mut self.storage);
        data[start..start + count].fill(value);
        self.position += count;
        Ok(())
    }

    /// Removes `count` bytes from the position and returns them.
    ///
    /// # Errors
    ///
    /// Fails with *buffer-underflow* when `count` exceeds the remaining
    /// bytes; the position is unchanged on failure.
    pub fn take(&mut self, count: usize) -> Result<Vec<u8>> {
        if count > self.remaining() {
            return Err(Error::buffer_underflow());
        }
        let start = self.origin + self.position;
        let bytes = self.storage[start..start + count].to_vec();
        self.position += count;
        Ok(bytes)
    }

    /// Reads one byte.
    ///
    /// # Errors
    ///
    /// Fails with *buffer-underflow* when no bytes remain.
    pub fn get_u8(&mut self) -> Result<u8> {
        if !self.has_remaining() {
            return Err(Error::buffer_underflow());
        }
        let b = self.storage[self.origin + self.position];
        self.position += 1;
        Ok(b)
    }

    /// Writes one byte.
    ///
    /// # Errors
    ///
    /// Fails with *buffer-overflow* when no bytes remain.
    pub fn put_u8(&mut self, value: u8) -> Result<()> {
        if !self.has_remaining() {
            return Err(Error::buffer_overflow());
        }
        let at = self.origin + self.position;
        Arc::make_mut(&mut self.storage)[at] = value;
        self.position += 1;
        Ok(())
    }

    /// Reads a big-endian `u32`.
    ///
    /// # Errors
    ///
    /// Fails with *buffer-underflow* when fewer than four bytes remain; the
    /// position is unchanged on failure.
    pub fn get_u32(&mut self) -> Result<u32> {
        if self.remaining() < 4 {
            return Err(Error::buffer_underflow());
        }
        let start = self.origin + self.position;
        let raw: [u8; 4] = self.storage[start..start + 4]
            .try_into()
            .map_err(|_| Error::buffer_underflow())?;
        self.position += 4;
        Ok(u32::from_be_bytes(raw))
    }

    /// Writes a big-endian `u32`.
    ///
    /// # Errors
    ///
    /// Fails with *buffer-overflow* when fewer than four bytes remain; the
    /// position is unchanged on failure.
    pub fn put_u32(&mut self, value: u32) -> Result<()> {
        if self.remaining() < 4 {
            return Err(Error::buffer_overflow());
        }
        let start = self.origin + self.position;
        let data = Arc::make_mut(&mut self.storage);
        data[start..start + 4].copy_from_slice(&value.to_be_bytes());
        self.position += 4;
        Ok(())
    }

    /// Reads exactly `dst.len()` bytes into `dst`.
    ///
    /// # Errors
    ///
    /// Fails with *buffer-underflow* when fewer bytes remain; the position
    /// is unchanged on failure.
    pub fn get_slice(&mut self, dst: &mut [u8]) -> Result<()> {
        if dst.len() > self.remaining() {
            return Err(Error::buffer_underflow());
        }
        let start = self.origin + self.position;
        dst.copy_from_slice(&self.storage[start..start + dst.len()]);
        self.position += dst.len();
        Ok(())
    }

    /// Writes all of `src`.
    ///
    /// # Errors
    ///
    /// Fails with *buffer-overflow* when `src` does not fit; the position is
    /// unchanged on failure.
    pub fn put_slice(&mut self, src: &[u8]) -> Result<()> {
        if src.len() > self.remaining() {
            return Err(Error::buffer_overflow());
        }
        let start = self.origin + self.position;
        let data = Arc::make_mut(&mut self.storage);
        data[start..start + src.len()].copy_from_slice(src);
        self.position += src.len();
        Ok(())
    }

    /// Moves all remaining bytes of `src` into this buffer, advancing both.
    ///
    /// # Errors
    ///
    /// Fails with *buffer-overflow* when `src.remaining()` does not fit;
    /// neither buffer is changed on failure.
    pub fn put_buffer(&mut self, src: &mut ByteBuffer) -> Result<()> {
        let n = src.remaining();
        if n > self.remaining() {
            return Err(Error::buffer_overflow());
        }
        let src_start = src.origin + src.position;
        // Split borrows: copy out of src storage, into ours.
        let from = src.storage[src_start..src_start + n].to_vec();
        self.put_slice(&from)?;
        src.position += n;
        Ok(())
    }

    /// Returns the remaining bytes as a slice.
    #[inline]
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        let start = self.origin + self.position;
        &self.storage[start..self.origin + self.limit]
    }

    /// Copies the remaining bytes into a new vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes().to_vec()
    }

    /// Reads the byte at an absolute index without moving the position.
    ///
    /// Returns `None` when `index >= capacity`.
    #[must_use]
    pub fn get_at(&self, index: usize) -> Option<u8> {
        (index < self.capacity).then(|| self.storage[self.origin + index])
    }
}

impl std::fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("position", &self.position)
            .field("limit", &self.limit)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl PartialEq for ByteBuffer {
    /// Buffers compare equal when their remaining bytes are equal.
    fn eq(&self, other: &Self) -> bool {
        self.bytes() == other.bytes()
    }
}

impl Eq for ByteBuffer {}

impl From<&[u8]> for ByteBuffer {
    fn from(data: &[u8]) -> Self {
        Self::from_slice(data)
    }
}

/// Returns true if any of the buffers has bytes remaining.
#[must_use]
pub fn any_has_remaining(buffers: &[ByteBuffer]) -> bool {
    buffers.iter().any(ByteBuffer::has_remaining)
}

/// Returns the total number of bytes remaining across all the buffers.
#[must_use]
pub fn total_remaining(buffers: &[ByteBuffer]) -> u64 {
    buffers.iter().map(|b| b.remaining() as u64).sum()
}

/// Scatters as many bytes as possible from `src` across `dsts` in order.
///
/// Returns the total number of bytes moved. `src` stops advancing when every
/// destination is full or `src` is exhausted, whichever comes first.
pub fn put_into(dsts: &mut [ByteBuffer], src: &mut ByteBuffer) -> u64 {
    let mut total = 0u64;
    for dst in dsts {
        if !src.has_remaining() {
            break;
        }
        let n = dst.remaining().min(src.remaining());
        if n == 0 {
            continue;
        }
        // Bounded by both sides, so neither transfer can fail.
        if let Ok(chunk) = src.take(n) {
            if dst.put_slice(&chunk).is_ok() {
                total += n as u64;
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_remaining_limit_invariant() {
        let mut buf = ByteBuffer::allocate(16);
        buf.put_slice(b"hello").unwrap();
        assert_eq!(buf.position() + buf.remaining(), buf.limit());
        buf.flip();
        assert_eq!(buf.position() + buf.remaining(), buf.limit());
        buf.skip(2).unwrap();
        assert_eq!(buf.position() + buf.remaining(), buf.limit());
    }

    #[test]
    fn slice_positive_advances_source() {
        let mut buf = ByteBuffer::from_slice(b"0123456789");
        buf.set_position(2);
        let view = buf.slice(3).unwrap();
        assert_eq!(view.bytes(), b"234");
        assert_eq!(buf.position(), 5);
        assert_eq!(buf.limit(), 10);
    }

    #[test]
    fn slice_negative_counts_from_end() {
        // Literal scenario: position 2, limit 10, slice(-3) -> bytes 7..10.
        let mut buf = ByteBuffer::from_slice(b"0123456789");
        buf.set_position(2);
        let view = buf.slice(-3).unwrap();
        assert_eq!(view.bytes(), b"789");
        assert_eq!(buf.position(), 7);
        assert_eq!(buf.limit(), 10);
    }

    #[test]
    fn slice_underflow_leaves_source_unchanged() {
        let mut buf = ByteBuffer::from_slice(b"abc");
        buf.set_position(1);
        assert!(buf.slice(5).is_err());
        assert!(buf.slice(-5).is_err());
        assert_eq!(buf.position(), 1);
        assert_eq!(buf.limit(), 3);
    }

    #[test]
    fn slice_is_zero_copy_view() {
        let mut buf = ByteBuffer::from_slice(b"abcdef");
        let view = buf.slice(2).unwrap();
        assert_eq!(view.bytes(), b"ab");
        // Writing to the view detaches it without touching the source.
        let mut view = view;
        view.clear();
        view.put_slice(b"XY").unwrap();
        assert_eq!(buf.bytes(), b"cdef");
    }

    #[test]
    fn skip_and_unget_clamp() {
        let mut buf = ByteBuffer::from_slice(b"abcd");
        buf.skip(2).unwrap();
        assert_eq!(buf.position(), 2);
        assert!(buf.skip(3).is_err());
        assert_eq!(buf.position(), 2);
        buf.unget(1).unwrap();
        assert_eq!(buf.position(), 1);
        assert!(buf.unget(2).is_err());
        assert_eq!(buf.position(), 1);
    }

    #[test]
    fn fill_writes_and_advances() {
        let mut buf = ByteBuffer::allocate(6);
        buf.fill(0xAA, 4).unwrap();
        assert_eq!(buf.position(), 4);
        assert!(buf.fill(0xBB, 3).is_err());
        assert_eq!(buf.position(), 4);
        buf.flip();
        assert_eq!(buf.bytes(), &[0xAA, 0xAA, 0xAA, 0xAA]);
    }

    #[test]
    fn u32_round_trip_is_big_endian() {
        let mut buf = ByteBuffer::allocate(4);
        buf.put_u32(0x0102_0304).unwrap();
        buf.flip();
        assert_eq!(buf.bytes(), &[1, 2, 3, 4]);
        assert_eq!(buf.get_u32().unwrap(), 0x0102_0304);
    }

    #[test]
    fn put_into_scatters_in_order() {
        let mut dsts = vec![ByteBuffer::allocate(2), ByteBuffer::allocate(3)];
        let mut src = ByteBuffer::from_slice(b"abcdefgh");
        let moved = put_into(&mut dsts, &mut src);
        assert_eq!(moved, 5);
        assert_eq!(src.remaining(), 3);
        dsts[0].flip();
        dsts[1].flip();
        assert_eq!(dsts[0].bytes(), b"ab");
        assert_eq!(dsts[1].bytes(), b"cde");
    }

    #[test]
    fn mark_and_reset() {
        let mut buf = ByteBuffer::from_slice(b"abcdef");
        buf.skip(2).unwrap();
        buf.mark();
        buf.skip(3).unwrap();
        buf.reset();
        assert_eq!(buf.position(), 2);
    }

    #[test]
    fn take_removes_bytes() {
        let mut buf = ByteBuffer::from_slice(b"abcdef");
        let taken = buf.take(4).unwrap();
        assert_eq!(taken, b"abcd");
        assert_eq!(buf.remaining(), 2);
        assert!(buf.take(3).is_err());
    }
}
