mod allocation;
mod spec;

pub use allocation::BufferAllocation;
pub use spec::BufferSpec;

use std::{fmt, marker::PhantomData, sync::Arc};

use anyhow::Context;
use bytemuck::Pod;
use parking_lot::Mutex;

use crate::{
    command::CommandRecorder,
    compact::RegionMove,
    context::GpuContext,
    device::{BufferDesc, BufferUsage, MemoryLocation, RawResource},
    region::{Region, RegionAllocator, grown_capacity},
    tracker::{GpuResource, TrackedResource},
};

struct BufferInner {
    context: Arc<GpuContext>,
    resource: TrackedResource,
    counter: Option<TrackedResource>,
    regions: Mutex<RegionAllocator>,
    stride: u64,
    spec: BufferSpec,
}

/// Growable GPU buffer of `T` elements, carved into [`BufferAllocation`]s.
///
/// Cheap to clone; every clone and every live allocation keeps the backing
/// storage alive.
pub struct GraphicsBuffer<T: Pod> {
    inner: Arc<BufferInner>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Pod> GraphicsBuffer<T> {
    pub(crate) fn new(context: Arc<GpuContext>, spec: BufferSpec) -> anyhow::Result<Self> {
        let stride = size_of::<T>() as u64;
        assert!(stride > 0, "zero-sized element types can't be stored in a buffer");

        let capacity = spec.initial_capacity.max(1);
        let size = capacity
            .checked_mul(stride)
            .filter(|size| *size <= context.max_buffer_size())
            .with_context(|| {
                format!(
                    "'{}': initial capacity of {capacity} elements exceeds the maximum buffer size",
                    spec.name()
                )
            })?;

        let device = context.device();
        let key = device
            .create_buffer(&BufferDesc {
                size,
                usage: spec.usage,
                memory: MemoryLocation::Device,
                debug_name: spec.debug_name.clone(),
            })
            .with_context(|| format!("failed to create buffer '{}'", spec.name()))?;
        let resource = TrackedResource::new(spec.name(), RawResource::Buffer(key), size);

        let counter = if spec.has_counter {
            let name = format!("{} counter", spec.name());
            let key = device
                .create_buffer(&BufferDesc {
                    size: 4,
                    usage: BufferUsage::Storage,
                    memory: MemoryLocation::Device,
                    debug_name: Some(name.clone()),
                })
                .with_context(|| format!("failed to create counter for '{}'", spec.name()))?;
            Some(TrackedResource::new(name, RawResource::Buffer(key), 4))
        } else {
            None
        };

        log::debug!(
            "created buffer '{}': {capacity} x {stride} bytes",
            spec.name()
        );

        Ok(Self {
            inner: Arc::new(BufferInner {
                context,
                resource,
                counter,
                regions: Mutex::new(RegionAllocator::new(capacity)),
                stride,
                spec,
            }),
            _marker: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        self.inner.resource.name()
    }

    pub fn spec(&self) -> &BufferSpec {
        &self.inner.spec
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.inner.context
    }

    /// Element size in bytes.
    pub fn stride(&self) -> u64 {
        self.inner.stride
    }

    /// Capacity in elements.
    pub fn capacity(&self) -> u64 {
        self.inner.regions.lock().capacity()
    }

    /// Number of live allocations.
    pub fn allocation_count(&self) -> usize {
        self.inner.regions.lock().len()
    }

    /// `(start, count)` of every live allocation, in placement order.
    pub fn allocated_ranges(&self) -> Vec<(u64, u64)> {
        self.inner
            .regions
            .lock()
            .regions()
            .iter()
            .map(|r| (r.start(), r.count()))
            .collect()
    }

    pub fn counter(&self) -> Option<&TrackedResource> {
        self.inner.counter.as_ref()
    }

    /// Reserves `count` elements, growing through the default recorder if needed.
    pub fn allocate(&self, count: u64) -> anyhow::Result<BufferAllocation<T>> {
        self.allocate_with(self.inner.context.default_recorder(), count)
    }

    /// Reserves `count` elements; growth copies are recorded on `recorder`,
    /// which must be open.
    pub fn allocate_with(
        &self,
        recorder: &CommandRecorder,
        count: u64,
    ) -> anyhow::Result<BufferAllocation<T>> {
        let _span = tracing::trace_span!("allocate", buffer = %self.name(), count).entered();
        let inner = &self.inner;
        let mut regions = inner.regions.lock();

        let max_size = inner.context.max_buffer_size();
        let needed = regions.placement(count).checked_add(count).with_context(|| {
            format!(
                "'{}' can't fit {count} more elements: the request exceeds the maximum buffer size of {max_size} bytes",
                self.name()
            )
        })?;
        let mut capacity = regions.capacity();
        while capacity < needed {
            capacity = grown_capacity(capacity);
            let size = capacity.checked_mul(inner.stride);
            anyhow::ensure!(
                size.is_some_and(|size| size <= max_size),
                "'{}' can't fit {count} more elements: growing to {capacity} elements exceeds the maximum buffer size of {max_size} bytes",
                self.name()
            );
        }

        if capacity != regions.capacity() {
            let desc = BufferDesc {
                size: capacity * inner.stride,
                usage: inner.spec.usage,
                memory: MemoryLocation::Device,
                debug_name: inner.spec.debug_name.clone(),
            };
            recorder
                .recording()
                .grow_buffer(&inner.resource, &desc)
                .with_context(|| format!("failed to grow '{}'", self.name()))?;
            regions.set_capacity(capacity);
        }

        let region = regions
            .try_allocate(count)
            .with_context(|| format!("'{}': no room for {count} elements after growth", self.name()))?;
        log::trace!("{}: allocated [{}, {})", self.name(), region.start(), region.end());
        drop(regions);

        Ok(BufferAllocation::new(self.clone(), region))
    }

    /// Closes every gap through the default recorder. Returns the moves made.
    pub fn compact(&self) -> Vec<RegionMove> {
        self.compact_with(self.inner.context.default_recorder())
    }

    pub fn compact_with(&self, recorder: &CommandRecorder) -> Vec<RegionMove> {
        let _span = tracing::trace_span!("compact", buffer = %self.name()).entered();
        let mut regions = self.inner.regions.lock();
        let moves = regions.compact();
        if !moves.is_empty() {
            recorder
                .recording()
                .compact(&self.inner.resource, &moves, self.inner.stride);
        }
        moves
    }

    /// Releases every allocation at once; outstanding handles become inert.
    pub fn clear(&self) {
        self.inner.regions.lock().clear();
        log::debug!("{}: cleared", self.name());
    }

    pub(crate) fn free_region(&self, region: &Arc<Region>) {
        self.inner.regions.lock().free(region);
    }
}

impl<T: Pod> Clone for GraphicsBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Pod> GpuResource for GraphicsBuffer<T> {
    fn tracked(&self) -> &TrackedResource {
        &self.inner.resource
    }
}

impl<T: Pod> fmt::Debug for GraphicsBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicsBuffer")
            .field("name", &self.name())
            .field("stride", &self.stride())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl Drop for BufferInner {
    fn drop(&mut self) {
        // Streams recorded this frame may still reference the storage.
        let recorder = self.context.default_recorder();
        recorder.retire(self.resource.raw());
        if let Some(counter) = &self.counter {
            recorder.retire(counter.raw());
        }
    }
}
