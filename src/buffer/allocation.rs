use std::{fmt, sync::Arc};

use bytemuck::Pod;

use crate::{buffer::GraphicsBuffer, region::Region};

/// Owning handle to `count` contiguous elements of a [`GraphicsBuffer`].
///
/// Dropping the handle frees the range. The start may move when the buffer is
/// compacted, so read it again before every use.
pub struct BufferAllocation<T: Pod> {
    buffer: GraphicsBuffer<T>,
    region: Arc<Region>,
}

impl<T: Pod> BufferAllocation<T> {
    pub(crate) fn new(buffer: GraphicsBuffer<T>, region: Arc<Region>) -> Self {
        Self { buffer, region }
    }

    #[inline]
    pub fn start(&self) -> u64 {
        debug_assert!(
            !self.region.is_released(),
            "allocation used after its buffer was cleared"
        );
        self.region.start()
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.region.count()
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.start() + self.count()
    }

    pub fn byte_offset(&self) -> u64 {
        self.start() * self.buffer.stride()
    }

    pub fn byte_size(&self) -> u64 {
        self.count() * self.buffer.stride()
    }

    /// False once the range was released by [`GraphicsBuffer::clear`].
    pub fn is_live(&self) -> bool {
        !self.region.is_released()
    }

    pub fn buffer(&self) -> GraphicsBuffer<T> {
        self.buffer.clone()
    }

    /// Frees the range now.
    pub fn release(self) {}
}

impl<T: Pod> Drop for BufferAllocation<T> {
    fn drop(&mut self) {
        if self.region.is_released() {
            return;
        }
        self.buffer.free_region(&self.region);
    }
}

impl<T: Pod> fmt::Debug for BufferAllocation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferAllocation")
            .field("buffer", &self.buffer.name())
            .field("start", &self.region.start())
            .field("count", &self.region.count())
            .finish()
    }
}
