//! Trivial buffer pool interface.

use super::ByteBuffer;
use std::sync::Arc;

/// A source of uniformly-sized buffers.
///
/// Channel implementations allocate staging buffers through a pool so the
/// allocation strategy can be swapped without touching the channel code. The
/// contract is deliberately small; pooling policies live behind it.
pub trait BufferPool: Send + Sync {
    /// Allocates a buffer, cleared and ready for writing.
    fn allocate(&self) -> ByteBuffer;

    /// Returns a buffer to the pool.
    fn free(&self, buffer: ByteBuffer);

    /// Discards a buffer whose contents may be sensitive; it must not be
    /// handed out again.
    fn discard(&self, buffer: ByteBuffer);
}

struct HeapPool {
    size: usize,
}

impl BufferPool for HeapPool {
    fn allocate(&self) -> ByteBuffer {
        ByteBuffer::allocate(self.size)
    }

    fn free(&self, _buffer: ByteBuffer) {}

    fn discard(&self, _buffer: ByteBuffer) {}
}

/// Creates a pool that allocates fresh heap buffers of `size` bytes and
/// drops returned ones.
#[must_use]
pub fn heap_buffer_pool(size: usize) -> Arc<dyn BufferPool> {
    Arc::new(HeapPool { size })
}
