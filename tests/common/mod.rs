#![allow(dead_code)]

use std::sync::Arc;

use arbor_gpu::{BufferSpec, GpuConfig, GpuContext, GpuResource, GraphicsBuffer, HeadlessDevice, device::BufferKey};
use bytemuck::Pod;

pub fn headless() -> (Arc<HeadlessDevice>, Arc<GpuContext>) {
    headless_with(GpuConfig::minimal())
}

pub fn headless_with(config: GpuConfig) -> (Arc<HeadlessDevice>, Arc<GpuContext>) {
    let device = Arc::new(HeadlessDevice::new());
    let context = GpuContext::new(device.clone(), config).expect("headless context");
    (device, context)
}

pub fn buffer<T: Pod>(context: &Arc<GpuContext>, capacity: u64) -> GraphicsBuffer<T> {
    context
        .create_buffer(BufferSpec::new(capacity).debug_name("test buffer"))
        .expect("test buffer")
}

pub fn key(resource: &dyn GpuResource) -> BufferKey {
    resource.tracked().raw().buffer().expect("a buffer")
}
