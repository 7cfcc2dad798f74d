use std::sync::Arc;

use anyhow::Context;
use bytemuck::Pod;
use parking_lot::Mutex;
use slotmap::SlotMap;

use crate::{
    buffer::{BufferSpec, GraphicsBuffer},
    command::{CommandRecorder, PipelineDesc, PipelineKey, PipelineState, upload::UploadRing},
    config::GpuConfig,
    device::{BufferDesc, BufferUsage, Device, MemoryLocation, RawResource},
    texture::{Texture, TextureSpec},
    tracker::TrackedResource,
};

/// State every recorder shares: the device, the upload ring and the scratch
/// buffer used for moves inside a single buffer.
pub(crate) struct Shared {
    pub device: Arc<dyn Device>,
    pub config: GpuConfig,
    pub upload: UploadRing,
    pub scratch: TrackedResource,
    pub max_buffer_size: u64,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.upload.destroy(self.device.as_ref());
        self.device.destroy(self.scratch.raw());
    }
}

/// Entry point: owns the device handle and the default recorder.
///
/// The default recorder is the shared stream that growth and uploads go through
/// when the caller does not name one; [`GpuContext::end_frame`] flushes it.
pub struct GpuContext {
    shared: Arc<Shared>,
    default_recorder: CommandRecorder,
    pipelines: Mutex<SlotMap<PipelineKey, Arc<PipelineState>>>,
}

impl GpuContext {
    pub fn new(device: Arc<dyn Device>, config: GpuConfig) -> anyhow::Result<Arc<Self>> {
        let upload = UploadRing::new(
            device.as_ref(),
            config.frames_in_flight,
            config.upload_ring_size,
        )
        .context("failed to create upload rings")?;

        let scratch_key = device
            .create_buffer(&BufferDesc {
                size: config.scratch_size,
                usage: BufferUsage::Transfer,
                memory: MemoryLocation::Device,
                debug_name: Some("scratch copy buffer".to_string()),
            })
            .context("failed to create scratch buffer")?;
        let scratch = TrackedResource::new(
            "scratch copy buffer",
            RawResource::Buffer(scratch_key),
            config.scratch_size,
        );

        let max_buffer_size = config.max_buffer_size.min(device.limits().max_buffer_size);

        let shared = Arc::new(Shared {
            device,
            config,
            upload,
            scratch,
            max_buffer_size,
        });

        let default_recorder = CommandRecorder::new("default", shared.clone());
        default_recorder.open();

        log::debug!(
            "GPU context ready: {} upload rings of {} bytes, max buffer {} bytes",
            shared.config.frames_in_flight,
            shared.config.upload_ring_size,
            max_buffer_size
        );

        Ok(Arc::new(Self {
            shared,
            default_recorder,
            pipelines: Mutex::new(SlotMap::with_key()),
        }))
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.shared.device
    }

    pub fn config(&self) -> &GpuConfig {
        &self.shared.config
    }

    pub fn max_buffer_size(&self) -> u64 {
        self.shared.max_buffer_size
    }

    /// Stream executed ahead of every frame; always open between frames.
    pub fn default_recorder(&self) -> &CommandRecorder {
        &self.default_recorder
    }

    /// A new, closed recorder.
    pub fn create_recorder(&self, name: impl Into<String>) -> CommandRecorder {
        CommandRecorder::new(name, self.shared.clone())
    }

    pub fn create_buffer<T: Pod>(self: &Arc<Self>, spec: BufferSpec) -> anyhow::Result<GraphicsBuffer<T>> {
        GraphicsBuffer::new(self.clone(), spec)
    }

    pub fn create_texture(self: &Arc<Self>, spec: TextureSpec) -> anyhow::Result<Texture> {
        Texture::new(self.clone(), spec)
    }

    pub fn create_pipeline(&self, desc: PipelineDesc) -> Arc<PipelineState> {
        let mut pipelines = self.pipelines.lock();
        let key = pipelines.insert_with_key(|key| Arc::new(PipelineState::new(key, desc)));
        pipelines[key].clone()
    }

    pub fn pipeline(&self, key: PipelineKey) -> Option<Arc<PipelineState>> {
        self.pipelines.lock().get(key).cloned()
    }

    /// Flushes the default stream, waits for it, reopens it and rotates the upload ring.
    ///
    /// Every other recorder that staged uploads this frame must have executed
    /// before this is called.
    pub fn end_frame(&self) -> anyhow::Result<()> {
        let _span = tracing::trace_span!("end_frame").entered();
        self.default_recorder
            .cycle()
            .context("failed to execute default command stream")?;
        self.shared.upload.advance();
        Ok(())
    }
}
