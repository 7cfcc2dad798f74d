use std::sync::Arc;

use anyhow::Context;
use bytemuck::Pod;
use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;

use crate::{
    buffer::{BufferAllocation, GraphicsBuffer},
    command::{
        BindPoint, BindingKind, Command, CommandSignature, CommandStream, PipelineState,
        ResourceView, Transition, ViewKind,
        upload::Staged,
    },
    compact::RegionMove,
    context::Shared,
    device::{BufferDesc, BufferKey, RawResource, TextureKey},
    state::ResourceState,
    texture::Texture,
    tracker::{GpuResource, TrackedResource, request_state},
};

/// Staging offsets for buffer data.
const BUFFER_PLACEMENT_ALIGNMENT: u64 = 4;
/// Staging offsets for texture data.
const TEXTURE_PLACEMENT_ALIGNMENT: u64 = 512;

#[derive(Default)]
struct RecorderState {
    stream: CommandStream,
    open: bool,
    // Closed with commands that were never executed.
    pending: bool,
    pipeline: Option<Arc<PipelineState>>,
    retired: Vec<RawResource>,
}

/// Thread-safe front of one command stream.
///
/// Every call takes the recorder lock for its whole duration, so multi-step
/// operations (stage bytes, transition, copy) never interleave with other
/// callers. The shared upload ring and resource states are only locked inside
/// it; buffer region locks are only taken outside it.
pub struct CommandRecorder {
    name: String,
    shared: Arc<Shared>,
    state: Mutex<RecorderState>,
}

/// Locked, open recorder.
pub(crate) struct Recording<'a> {
    name: &'a str,
    shared: &'a Shared,
    state: MutexGuard<'a, RecorderState>,
}

impl CommandRecorder {
    pub(crate) fn new(name: impl Into<String>, shared: Arc<Shared>) -> Self {
        Self {
            name: name.into(),
            shared,
            state: Mutex::new(RecorderState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Number of recorded, not yet executed commands.
    pub fn len(&self) -> usize {
        self.state.lock().stream.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `f` over the recorded stream.
    pub fn inspect<R>(&self, f: impl FnOnce(&CommandStream) -> R) -> R {
        f(&self.state.lock().stream)
    }

    pub fn open(&self) {
        let mut state = self.state.lock();
        Self::open_locked(&self.name, &mut state);
    }

    pub fn close(&self) {
        let mut state = self.state.lock();
        Self::close_locked(&mut state);
    }

    /// Submits the closed stream and waits for it to finish.
    pub fn execute(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        self.execute_locked(&mut state)
    }

    /// Close, execute and reopen without letting another thread record in between.
    pub fn cycle(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        Self::close_locked(&mut state);
        self.execute_locked(&mut state)?;
        Self::open_locked(&self.name, &mut state);
        Ok(())
    }

    /// Tracked states already reflect every recorded command, so a stream can
    /// only be left behind by executing it.
    fn open_locked(name: &str, state: &mut RecorderState) {
        debug_assert!(!state.open, "command recorder '{name}' opened twice");
        assert!(
            !state.pending,
            "command recorder '{name}' reopened with {} unexecuted commands",
            state.stream.len()
        );
        state.stream.clear();
        state.pipeline = None;
        state.open = true;
    }

    fn close_locked(state: &mut RecorderState) {
        state.open = false;
        state.pipeline = None;
        state.pending = !state.stream.is_empty();
    }

    fn execute_locked(&self, state: &mut RecorderState) -> anyhow::Result<()> {
        assert!(
            !state.open,
            "cannot execute open command recorder '{}'",
            self.name
        );
        let _span = tracing::trace_span!("execute", recorder = %self.name).entered();

        let submitted = if state.stream.is_empty() {
            Ok(())
        } else {
            self.shared
                .device
                .submit(&self.name, &state.stream)
                .with_context(|| format!("failed to execute command stream '{}'", self.name))
        };

        // Whatever the outcome, nothing will reference retired storage again.
        for raw in state.retired.drain(..) {
            self.shared.device.destroy(raw);
        }
        submitted?;

        log::trace!("{}: executed {} commands", self.name, state.stream.len());
        state.stream.clear();
        state.pending = false;
        Ok(())
    }

    /// Destroys `raw` once the stream recorded so far has executed.
    pub(crate) fn retire(&self, raw: RawResource) {
        self.state.lock().retired.push(raw);
    }

    pub(crate) fn recording(&self) -> Recording<'_> {
        let state = self.state.lock();
        assert!(state.open, "command recorder '{}' is not open", self.name);
        Recording {
            name: &self.name,
            shared: &self.shared,
            state,
        }
    }

    /// Ensures `resource` is in `state` for what is recorded next. Returns
    /// whether a transition was emitted.
    pub fn request_state(&self, resource: Option<&dyn GpuResource>, state: ResourceState) -> bool {
        let mut rec = self.recording();
        let before = rec.state.stream.len();
        request_state(resource.map(|r| r.tracked()), state, &mut rec.state.stream);
        rec.state.stream.len() != before
    }

    pub fn upload_buffer<T: Pod>(
        &self,
        buffer: &GraphicsBuffer<T>,
        element_offset: u64,
        data: &[T],
    ) -> anyhow::Result<()> {
        let offset = element_offset * buffer.stride();
        let bytes: &[u8] = bytemuck::cast_slice(data);
        assert!(
            offset + bytes.len() as u64 <= buffer.tracked().size(),
            "upload of {} elements at {} overruns '{}'",
            data.len(),
            element_offset,
            buffer.tracked().name()
        );
        self.upload_bytes(buffer, offset, bytes)
    }

    pub fn upload_allocation<T: Pod>(
        &self,
        allocation: &BufferAllocation<T>,
        data: &[T],
    ) -> anyhow::Result<()> {
        assert!(
            data.len() as u64 <= allocation.count(),
            "upload of {} elements into an allocation of {}",
            data.len(),
            allocation.count()
        );
        let buffer = allocation.buffer();
        self.upload_bytes(&buffer, allocation.byte_offset(), bytemuck::cast_slice(data))
    }

    /// Stages `data` and records a copy into `resource` at `offset` bytes.
    pub fn upload_bytes(
        &self,
        resource: &dyn GpuResource,
        offset: u64,
        data: &[u8],
    ) -> anyhow::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let _span = tracing::trace_span!("upload", bytes = data.len()).entered();

        let mut rec = self.recording();
        let staged = rec.stage(data, BUFFER_PLACEMENT_ALIGNMENT)?;
        let dst = rec.request_buffer(resource.tracked(), ResourceState::COPY_DST);
        rec.push(Command::CopyBuffer {
            src: staged.buffer,
            src_offset: staged.offset,
            dst,
            dst_offset: offset,
            size: data.len() as u64,
        });
        Ok(())
    }

    pub fn upload_texture(&self, texture: &Texture, mip: u32, data: &[u8]) -> anyhow::Result<()> {
        let spec = texture.spec();
        assert!(mip < spec.mips, "mip {mip} out of range for '{}'", texture.tracked().name());
        assert_eq!(
            data.len() as u64,
            spec.mip_size(mip),
            "texture upload size does not match mip {mip} of '{}'",
            texture.tracked().name()
        );

        let mut rec = self.recording();
        let staged = rec.stage(data, TEXTURE_PLACEMENT_ALIGNMENT)?;
        let dst = rec.request_texture(texture.tracked(), ResourceState::COPY_DST);
        rec.push(Command::CopyBufferToTexture {
            src: staged.buffer,
            src_offset: staged.offset,
            dst,
            mip,
        });
        Ok(())
    }

    /// Copies between two buffers; `size == None` copies the smaller of both.
    pub fn copy_buffer(
        &self,
        src: &dyn GpuResource,
        dst: &dyn GpuResource,
        src_offset: u64,
        dst_offset: u64,
        size: Option<u64>,
    ) {
        let size = size.unwrap_or_else(|| src.tracked().size().min(dst.tracked().size()));
        let mut rec = self.recording();
        rec.copy_buffer(src.tracked(), dst.tracked(), src_offset, dst_offset, size);
    }

    /// Moves bytes inside one buffer through the scratch buffer.
    pub fn copy_within(&self, buffer: &dyn GpuResource, src_offset: u64, dst_offset: u64, size: u64) {
        let mut rec = self.recording();
        rec.copy_within(buffer.tracked(), src_offset, dst_offset, size);
    }

    pub fn copy_texture(&self, src: &Texture, dst: &Texture) {
        let mut rec = self.recording();
        let src = rec.request_texture(src.tracked(), ResourceState::COPY_SRC);
        let dst = rec.request_texture(dst.tracked(), ResourceState::COPY_DST);
        rec.push(Command::CopyTexture { src, dst });
    }

    /// Resolves a multisampled texture; plain textures are copied instead.
    pub fn resolve_texture(&self, src: &Texture, dst: &Texture) {
        if src.spec().sample_count() <= 1 && dst.spec().sample_count() <= 1 {
            self.copy_texture(src, dst);
            return;
        }
        assert!(
            dst.spec().sample_count() <= 1,
            "cannot resolve to multisampled texture '{}'",
            dst.tracked().name()
        );

        let mut rec = self.recording();
        let src = rec.request_texture(src.tracked(), ResourceState::RESOLVE_SRC);
        let dst = rec.request_texture(dst.tracked(), ResourceState::RESOLVE_DST);
        rec.push(Command::ResolveTexture { src, dst });
    }

    /// Binds `pipeline`; rebinding the current pipeline records nothing.
    pub fn set_pipeline(&self, pipeline: &Arc<PipelineState>) {
        let mut rec = self.recording();
        if rec
            .state
            .pipeline
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, pipeline))
        {
            return;
        }
        rec.push(Command::SetPipeline {
            pipeline: pipeline.key(),
            kind: pipeline.kind(),
        });
        rec.state.pipeline = Some(pipeline.clone());
    }

    pub fn set_constants(&self, point: BindPoint, offset: u32, values: &[u32]) {
        let mut rec = self.recording();
        let Some(parameter) = rec.parameter(BindingKind::Constants, point) else {
            return;
        };
        rec.push(Command::SetConstants {
            parameter,
            offset,
            values: SmallVec::from_slice(values),
        });
    }

    pub fn bind_cbv(&self, point: BindPoint, resource: &dyn GpuResource) {
        self.bind(point, resource, ViewKind::Constant, 0);
    }

    pub fn bind_srv(&self, point: BindPoint, resource: &dyn GpuResource) {
        self.bind(point, resource, ViewKind::ShaderResource, 0);
    }

    pub fn bind_uav(&self, point: BindPoint, resource: &dyn GpuResource) {
        self.bind(point, resource, ViewKind::UnorderedAccess, 0);
    }

    pub fn bind_texture_uav(&self, point: BindPoint, texture: &Texture, mip: u32) {
        assert!(
            texture.spec().sample_count() <= 1,
            "can't use multisampled texture '{}' as a UAV",
            texture.tracked().name()
        );
        self.bind(point, texture, ViewKind::UnorderedAccess, mip);
    }

    fn bind(&self, point: BindPoint, resource: &dyn GpuResource, kind: ViewKind, mip: u32) {
        let (state, binding) = match kind {
            ViewKind::Constant => (ResourceState::CONSTANT_BUFFER, BindingKind::Constant),
            ViewKind::ShaderResource => (ResourceState::SHADER_RESOURCE, BindingKind::ShaderResource),
            ViewKind::UnorderedAccess => {
                (ResourceState::UNORDERED_ACCESS, BindingKind::UnorderedAccess)
            }
        };

        let mut rec = self.recording();
        // The state is requested even when the pipeline does not use the slot.
        let raw = rec.request(resource.tracked(), state);
        let Some(parameter) = rec.parameter(binding, point) else {
            return;
        };
        rec.push(Command::BindResource {
            parameter,
            view: ResourceView {
                resource: raw,
                kind,
                mip,
            },
        });
    }

    pub fn set_index_buffer(&self, buffer: &dyn GpuResource) {
        let mut rec = self.recording();
        let size = buffer.tracked().size();
        let key = rec.request_buffer(buffer.tracked(), ResourceState::INDEX_BUFFER);
        rec.push(Command::SetIndexBuffer { buffer: key, size });
    }

    pub fn set_render_target(&self, color: Option<&Texture>, depth: Option<&Texture>) {
        let (width, height) = match (color, depth) {
            (Some(target), _) | (None, Some(target)) => (target.spec().width, target.spec().height),
            (None, None) => panic!("set_render_target needs a color or depth target"),
        };

        let mut rec = self.recording();
        let color = rec.request_optional_texture(color, ResourceState::RENDER_TARGET);
        let depth = rec.request_optional_texture(depth, ResourceState::DEPTH_WRITE);
        rec.push(Command::SetRenderTargets {
            colors: color.into_iter().collect(),
            depth,
            width,
            height,
        });
    }

    pub fn set_render_targets(&self, depth: Option<&Texture>, colors: &[&Texture]) {
        assert!(!colors.is_empty(), "set_render_targets needs at least one color target");
        let (width, height) = (colors[0].spec().width, colors[0].spec().height);

        let mut rec = self.recording();
        let depth = rec.request_optional_texture(depth, ResourceState::DEPTH_WRITE);
        let colors = colors
            .iter()
            .map(|t| rec.request_texture(t.tracked(), ResourceState::RENDER_TARGET))
            .collect();
        rec.push(Command::SetRenderTargets {
            colors,
            depth,
            width,
            height,
        });
    }

    /// Clears to `color`, or to the texture's clear color when `None`.
    pub fn clear_render_target(&self, target: &Texture, color: Option<[f32; 4]>) {
        let color = color.unwrap_or(target.spec().clear_color);
        let mut rec = self.recording();
        let target = rec.request_texture(target.tracked(), ResourceState::RENDER_TARGET);
        rec.push(Command::ClearRenderTarget { target, color });
    }

    pub fn clear_depth(&self, target: &Texture) {
        let depth = target.spec().clear_depth;
        let mut rec = self.recording();
        let target = rec.request_texture(target.tracked(), ResourceState::DEPTH_WRITE);
        rec.push(Command::ClearDepth { target, depth });
    }

    pub fn dispatch(&self, x: u32, y: u32, z: u32) {
        self.recording().push(Command::Dispatch { x, y, z });
    }

    /// Dispatches enough groups of `group` threads to cover `threads`.
    pub fn dispatch_threads(&self, threads: [u32; 3], group: [u32; 3]) {
        let [x, y, z] = group_counts(threads, group);
        self.dispatch(x, y, z);
    }

    pub fn dispatch_mesh(&self, x: u32, y: u32, z: u32) {
        self.recording().push(Command::DispatchMesh { x, y, z });
    }

    pub fn dispatch_mesh_threads(&self, threads: [u32; 3], group: [u32; 3]) {
        let [x, y, z] = group_counts(threads, group);
        self.dispatch_mesh(x, y, z);
    }

    /// Executes up to `max_count` argument records starting at record
    /// `command_start`; the buffer's counter, if any, caps the count.
    pub fn execute_indirect<T: Pod>(
        &self,
        signature: CommandSignature,
        arguments: &GraphicsBuffer<T>,
        max_count: u32,
        command_start: u64,
    ) {
        let mut rec = self.recording();
        let args = rec.request_buffer(arguments.tracked(), ResourceState::INDIRECT_ARGUMENT);
        let counter = request_state(
            arguments.counter(),
            ResourceState::INDIRECT_ARGUMENT,
            &mut rec.state.stream,
        )
        .map(|raw| buffer_key(raw, "indirect counter"));

        rec.push(Command::ExecuteIndirect {
            signature,
            arguments: args,
            offset: command_start * signature.stride as u64,
            max_count,
            counter,
        });
    }

    /// Zeroes the append counter of `buffer`, if it has one.
    pub fn reset_counter<T: Pod>(&self, buffer: &GraphicsBuffer<T>) -> anyhow::Result<()> {
        match buffer.counter() {
            Some(counter) => self.upload_bytes(counter, 0, bytemuck::bytes_of(&0u32)),
            None => Ok(()),
        }
    }

    /// Orders unordered-access writes before later accesses of the same resources.
    pub fn barrier_uav(&self, resources: &[&dyn GpuResource]) {
        if resources.is_empty() {
            return;
        }
        let raws = resources.iter().map(|r| r.tracked().raw()).collect();
        self.recording().push(Command::UavBarrier(raws));
    }

    pub fn present(&self, texture: &Texture) {
        self.recording()
            .request(texture.tracked(), ResourceState::PRESENT);
    }

    pub fn begin_event(&self, name: impl Into<String>) {
        self.recording().push(Command::BeginEvent(name.into()));
    }

    pub fn end_event(&self) {
        self.recording().push(Command::EndEvent);
    }
}

impl Drop for CommandRecorder {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.pending {
            log::warn!("{}: dropped with unexecuted commands", self.name);
        }
        for raw in state.retired.drain(..) {
            self.shared.device.destroy(raw);
        }
    }
}

impl Recording<'_> {
    pub(crate) fn push(&mut self, command: Command) {
        self.state.stream.push(command);
    }

    pub(crate) fn request(&mut self, resource: &TrackedResource, state: ResourceState) -> RawResource {
        resource.request(state, &mut self.state.stream)
    }

    fn request_buffer(&mut self, resource: &TrackedResource, state: ResourceState) -> BufferKey {
        buffer_key(self.request(resource, state), resource.name())
    }

    fn request_texture(&mut self, resource: &TrackedResource, state: ResourceState) -> TextureKey {
        texture_key(self.request(resource, state), resource.name())
    }

    fn request_optional_texture(
        &mut self,
        texture: Option<&Texture>,
        state: ResourceState,
    ) -> Option<TextureKey> {
        request_state(texture.map(|t| t.tracked()), state, &mut self.state.stream)
            .map(|raw| texture_key(raw, "render target"))
    }

    fn parameter(&self, kind: BindingKind, point: BindPoint) -> Option<u32> {
        let pipeline = self
            .state
            .pipeline
            .as_ref()
            .unwrap_or_else(|| panic!("{}: no pipeline bound", self.name));
        pipeline.parameter(kind, point)
    }

    fn retire(&mut self, raw: RawResource) {
        self.state.retired.push(raw);
    }

    /// Copies `data` into upload memory, falling back to a one-off staging
    /// buffer when this frame's ring is full.
    fn stage(&mut self, data: &[u8], align: u64) -> anyhow::Result<Staged> {
        let shared = self.shared;
        let device = shared.device.as_ref();
        if let Some(staged) = shared.upload.stage(device, data, align)? {
            return Ok(staged);
        }

        log::warn!(
            "{}: upload ring exhausted ({} bytes used), staging {} bytes separately",
            self.name,
            shared.upload.used(),
            data.len()
        );
        let buffer = device
            .create_buffer(&BufferDesc::staging(data.len() as u64, "overflow staging"))
            .context("failed to create overflow staging buffer")?;
        device
            .write_mapped(buffer, 0, data)
            .context("failed to write overflow staging buffer")?;
        self.retire(RawResource::Buffer(buffer));
        Ok(Staged { buffer, offset: 0 })
    }

    pub(crate) fn copy_buffer(
        &mut self,
        src: &TrackedResource,
        dst: &TrackedResource,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    ) {
        let src = self.request_buffer(src, ResourceState::COPY_SRC);
        let dst = self.request_buffer(dst, ResourceState::COPY_DST);
        self.push(Command::CopyBuffer {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        });
    }

    /// A buffer can't be both copy source and destination, so the bytes go out
    /// to scratch and back, one scratch-sized chunk at a time. Chunks are
    /// walked in the direction that never overwrites unread source bytes.
    pub(crate) fn copy_within(
        &mut self,
        buffer: &TrackedResource,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    ) {
        if size == 0 || src_offset == dst_offset {
            return;
        }
        let shared = self.shared;
        let chunk = shared.scratch.size();

        let mut chunks = Vec::new();
        let mut done = 0;
        while done < size {
            let len = chunk.min(size - done);
            chunks.push((done, len));
            done += len;
        }
        if dst_offset > src_offset {
            chunks.reverse();
        }

        for (at, len) in chunks {
            self.copy_buffer(buffer, &shared.scratch, src_offset + at, 0, len);
            self.copy_buffer(&shared.scratch, buffer, 0, dst_offset + at, len);
        }
    }

    /// Replaces the storage behind `resource` with a buffer described by
    /// `desc`, copying every existing byte across.
    pub(crate) fn grow_buffer(
        &mut self,
        resource: &TrackedResource,
        desc: &BufferDesc,
    ) -> anyhow::Result<()> {
        let old = resource.snapshot();
        let new_key = self
            .shared
            .device
            .create_buffer(desc)
            .with_context(|| format!("failed to grow '{}' to {} bytes", resource.name(), desc.size))?;

        let state = if old.size > 0 {
            let src = self.request_buffer(resource, ResourceState::COPY_SRC);
            self.push(Command::Transition(Transition {
                resource: RawResource::Buffer(new_key),
                before: ResourceState::UNDEFINED,
                after: ResourceState::COPY_DST,
            }));
            self.push(Command::CopyBuffer {
                src,
                src_offset: 0,
                dst: new_key,
                dst_offset: 0,
                size: old.size,
            });
            ResourceState::COPY_DST
        } else {
            ResourceState::UNDEFINED
        };

        let old_raw = resource.replace(RawResource::Buffer(new_key), state, desc.size);
        self.retire(old_raw);
        log::debug!(
            "{}: grew '{}' from {} to {} bytes",
            self.name,
            resource.name(),
            old.size,
            desc.size
        );
        Ok(())
    }

    /// Performs the data moves of a compaction pass.
    pub(crate) fn compact(&mut self, resource: &TrackedResource, moves: &[RegionMove], stride: u64) {
        for region_move in moves {
            let (from, to, len) = region_move.byte_range(stride);
            self.copy_within(resource, from, to, len);
        }
    }
}

fn group_counts(threads: [u32; 3], group: [u32; 3]) -> [u32; 3] {
    [0, 1, 2].map(|i| threads[i].div_ceil(group[i].max(1)))
}

fn buffer_key(raw: RawResource, name: &str) -> BufferKey {
    raw.buffer()
        .unwrap_or_else(|| panic!("'{name}' is not a buffer"))
}

fn texture_key(raw: RawResource, name: &str) -> TextureKey {
    raw.texture()
        .unwrap_or_else(|| panic!("'{name}' is not a texture"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_counts_round_up() {
        assert_eq!(group_counts([65, 1, 1], [64, 1, 1]), [2, 1, 1]);
        assert_eq!(group_counts([64, 8, 0], [64, 8, 1]), [1, 1, 0]);
    }
}
