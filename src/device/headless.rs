use std::ops::Range;

use anyhow::{Context, bail, ensure};
use bytemuck::Pod;
use parking_lot::Mutex;
use slotmap::SlotMap;

use crate::{
    buffer::GraphicsBuffer,
    command::{Command, CommandStream, PipelineKind, ViewKind},
    device::{BufferDesc, BufferKey, Device, DeviceLimits, MemoryLocation, RawResource, TextureKey},
    state::ResourceState,
    texture::TextureSpec,
    tracker::GpuResource,
};

/// Counters of everything the headless device has done.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct HeadlessStats {
    pub submits: u64,
    pub commands: u64,
    pub transitions: u64,
    pub copies: u64,
    pub copied_bytes: u64,
    pub dispatches: u64,
    pub indirect_commands: u64,
    pub buffers_created: u64,
    pub buffers_destroyed: u64,
    pub textures_created: u64,
    pub textures_destroyed: u64,
}

struct HeadlessBuffer {
    data: Vec<u8>,
    memory: MemoryLocation,
    state: ResourceState,
    name: String,
}

struct HeadlessTexture {
    spec: TextureSpec,
    mips: Vec<Vec<u8>>,
    state: ResourceState,
    name: String,
}

#[derive(Default)]
struct HeadlessInner {
    buffers: SlotMap<BufferKey, HeadlessBuffer>,
    textures: SlotMap<TextureKey, HeadlessTexture>,
    stats: HeadlessStats,
}

/// Per-submission execution state.
#[derive(Default)]
struct Pass {
    pipeline: Option<PipelineKind>,
    event_depth: usize,
}

/// CPU backend that executes streams in memory.
///
/// Every command is validated against the state the device last observed for
/// each resource: a transition whose `before` disagrees, or an access from a
/// state that does not cover it, fails the submission. Used by the tests and
/// the demo binary.
pub struct HeadlessDevice {
    limits: DeviceLimits,
    inner: Mutex<HeadlessInner>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::with_limits(DeviceLimits {
            max_buffer_size: 1 << 31,
        })
    }

    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            limits,
            inner: Mutex::new(HeadlessInner::default()),
        }
    }

    pub fn stats(&self) -> HeadlessStats {
        self.inner.lock().stats
    }

    pub fn live_buffers(&self) -> usize {
        self.inner.lock().buffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.inner.lock().textures.len()
    }

    pub fn read_buffer(&self, key: BufferKey) -> Option<Vec<u8>> {
        self.inner.lock().buffers.get(key).map(|b| b.data.clone())
    }

    pub fn read_texture(&self, key: TextureKey, mip: u32) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .textures
            .get(key)
            .and_then(|t| t.mips.get(mip as usize).cloned())
    }

    /// Current contents of a buffer, or mip 0 of a texture.
    pub fn read(&self, resource: &dyn GpuResource) -> Option<Vec<u8>> {
        match resource.tracked().raw() {
            RawResource::Buffer(key) => self.read_buffer(key),
            RawResource::Texture(key) => self.read_texture(key, 0),
        }
    }

    /// Elements of `buffer` in `[start, start + count)`.
    pub fn read_elements<T: Pod>(&self, buffer: &GraphicsBuffer<T>, start: u64, count: u64) -> Vec<T> {
        let stride = buffer.stride() as usize;
        let bytes = self.read(buffer).unwrap_or_default();
        let range = start as usize * stride..(start + count) as usize * stride;
        bytemuck::pod_collect_to_vec(&bytes[range])
    }

    /// State the device last observed for `raw`.
    pub fn state(&self, raw: RawResource) -> Option<ResourceState> {
        let inner = self.inner.lock();
        match raw {
            RawResource::Buffer(key) => inner.buffers.get(key).map(|b| b.state),
            RawResource::Texture(key) => inner.textures.get(key).map(|t| t.state),
        }
    }
}

impl Device for HeadlessDevice {
    fn create_buffer(&self, desc: &BufferDesc) -> anyhow::Result<BufferKey> {
        ensure!(
            desc.size <= self.limits.max_buffer_size,
            "buffer of {} bytes exceeds the device limit of {}",
            desc.size,
            self.limits.max_buffer_size
        );
        let mut inner = self.inner.lock();
        inner.stats.buffers_created += 1;
        Ok(inner.buffers.insert(HeadlessBuffer {
            data: vec![0; desc.size as usize],
            memory: desc.memory,
            state: ResourceState::UNDEFINED,
            name: desc.debug_name.clone().unwrap_or_default(),
        }))
    }

    fn destroy_buffer(&self, key: BufferKey) {
        let mut inner = self.inner.lock();
        if inner.buffers.remove(key).is_some() {
            inner.stats.buffers_destroyed += 1;
        } else {
            log::warn!("destroying unknown buffer {key:?}");
        }
    }

    fn create_texture(&self, spec: &TextureSpec) -> anyhow::Result<TextureKey> {
        let mips = (0..spec.mips)
            .map(|mip| vec![0; spec.mip_size(mip) as usize])
            .collect();
        let mut inner = self.inner.lock();
        inner.stats.textures_created += 1;
        Ok(inner.textures.insert(HeadlessTexture {
            spec: spec.clone(),
            mips,
            state: ResourceState::UNDEFINED,
            name: spec.debug_name.clone().unwrap_or_default(),
        }))
    }

    fn destroy_texture(&self, key: TextureKey) {
        let mut inner = self.inner.lock();
        if inner.textures.remove(key).is_some() {
            inner.stats.textures_destroyed += 1;
        } else {
            log::warn!("destroying unknown texture {key:?}");
        }
    }

    fn write_mapped(&self, key: BufferKey, offset: u64, data: &[u8]) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        let buffer = inner.buffers.get_mut(key).context("write to unknown buffer")?;
        ensure!(
            buffer.memory == MemoryLocation::Upload,
            "'{}' is not host visible",
            buffer.name
        );
        let range = byte_range(&buffer.name, buffer.data.len(), offset, data.len() as u64)?;
        buffer.data[range].copy_from_slice(data);
        Ok(())
    }

    fn submit(&self, label: &str, stream: &CommandStream) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        let mut pass = Pass::default();

        for (index, command) in stream.iter().enumerate() {
            inner
                .execute(&mut pass, command)
                .with_context(|| format!("{label}: command {index} ({}) failed", command.name()))?;
            inner.stats.commands += 1;
        }
        ensure!(
            pass.event_depth == 0,
            "{label}: {} debug events left open",
            pass.event_depth
        );
        inner.stats.submits += 1;
        Ok(())
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }
}

impl HeadlessInner {
    fn execute(&mut self, pass: &mut Pass, command: &Command) -> anyhow::Result<()> {
        match command {
            Command::Transition(transition) => {
                let (name, state) = self.state_mut(transition.resource)?;
                ensure!(
                    *state == transition.before,
                    "'{name}': transition from {} but resource is in {}",
                    transition.before,
                    state
                );
                *state = transition.after;
                self.stats.transitions += 1;
            }
            Command::UavBarrier(resources) => {
                for raw in resources {
                    self.state_of(*raw)?;
                }
            }
            Command::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                ensure!(src != dst, "copy source and destination are the same buffer");
                let src = self.readable_buffer(*src)?;
                let data = src.data[byte_range(&src.name, src.data.len(), *src_offset, *size)?].to_vec();

                let dst = self.writable_buffer(*dst)?;
                let range = byte_range(&dst.name, dst.data.len(), *dst_offset, *size)?;
                dst.data[range].copy_from_slice(&data);
                self.stats.copies += 1;
                self.stats.copied_bytes += size;
            }
            Command::CopyBufferToTexture {
                src,
                src_offset,
                dst,
                mip,
            } => {
                let texture = self.texture(*dst)?;
                let size = texture.spec.mip_size(*mip);
                ensure!(*mip < texture.spec.mips, "'{}' has no mip {mip}", texture.name);

                let src = self.readable_buffer(*src)?;
                let data = src.data[byte_range(&src.name, src.data.len(), *src_offset, size)?].to_vec();

                let texture = self.texture_in(*dst, ResourceState::COPY_DST)?;
                texture.mips[*mip as usize] = data;
                self.stats.copies += 1;
                self.stats.copied_bytes += size;
            }
            Command::CopyTexture { src, dst } => {
                let src = self.texture_in(*src, ResourceState::COPY_SRC)?;
                let (spec, mips) = (src.spec.clone(), src.mips.clone());
                let dst = self.texture_in(*dst, ResourceState::COPY_DST)?;
                ensure!(
                    dst.spec.format == spec.format
                        && dst.spec.width == spec.width
                        && dst.spec.height == spec.height,
                    "'{}': texture copy between mismatched formats or extents",
                    dst.name
                );
                for (to, from) in dst.mips.iter_mut().zip(mips) {
                    *to = from;
                }
                self.stats.copies += 1;
            }
            Command::ResolveTexture { src, dst } => {
                let src = self.texture_in(*src, ResourceState::RESOLVE_SRC)?;
                let data = src.mips[0].clone();
                let dst = self.texture_in(*dst, ResourceState::RESOLVE_DST)?;
                ensure!(
                    dst.spec.sample_count() <= 1,
                    "'{}': resolve into a multisampled texture",
                    dst.name
                );
                dst.mips[0] = data;
            }
            Command::SetPipeline { kind, .. } => pass.pipeline = Some(*kind),
            Command::SetConstants { .. } => {
                ensure!(pass.pipeline.is_some(), "constants set without a pipeline");
            }
            Command::BindResource { view, .. } => {
                ensure!(pass.pipeline.is_some(), "resource bound without a pipeline");
                let required = match view.kind {
                    ViewKind::Constant => ResourceState::CONSTANT_BUFFER,
                    ViewKind::ShaderResource => ResourceState::SHADER_RESOURCE,
                    ViewKind::UnorderedAccess => ResourceState::UNORDERED_ACCESS,
                };
                self.require(view.resource, required)?;
            }
            Command::SetIndexBuffer { buffer, .. } => {
                self.require(RawResource::Buffer(*buffer), ResourceState::INDEX_BUFFER)?;
            }
            Command::SetRenderTargets { colors, depth, .. } => {
                for color in colors {
                    self.texture_in(*color, ResourceState::RENDER_TARGET)?;
                }
                if let Some(depth) = depth {
                    self.texture_in(*depth, ResourceState::DEPTH_WRITE)?;
                }
            }
            Command::ClearRenderTarget { target, color } => {
                let texture = self.texture_in(*target, ResourceState::RENDER_TARGET)?;
                let texel = encode_color(&texture.spec, *color);
                fill(&mut texture.mips[0], &texel);
            }
            Command::ClearDepth { target, depth } => {
                let texture = self.texture_in(*target, ResourceState::DEPTH_WRITE)?;
                let texel = encode_depth(&texture.spec, *depth);
                fill(&mut texture.mips[0], &texel);
            }
            Command::Dispatch { .. } => {
                ensure!(
                    pass.pipeline == Some(PipelineKind::Compute),
                    "dispatch without a compute pipeline"
                );
                self.stats.dispatches += 1;
            }
            Command::DispatchMesh { .. } => {
                ensure!(
                    pass.pipeline == Some(PipelineKind::Graphics),
                    "mesh dispatch without a graphics pipeline"
                );
                self.stats.dispatches += 1;
            }
            Command::ExecuteIndirect {
                signature,
                arguments,
                offset,
                max_count,
                counter,
            } => {
                ensure!(pass.pipeline.is_some(), "indirect execution without a pipeline");
                let count = match counter {
                    Some(counter) => {
                        let counter = self.buffer_in(*counter, ResourceState::INDIRECT_ARGUMENT)?;
                        let bytes = &counter.data[byte_range(&counter.name, counter.data.len(), 0, 4)?];
                        (*max_count).min(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
                    }
                    None => *max_count,
                };
                let args = self.buffer_in(*arguments, ResourceState::INDIRECT_ARGUMENT)?;
                byte_range(
                    &args.name,
                    args.data.len(),
                    *offset,
                    count as u64 * signature.stride as u64,
                )?;
                self.stats.indirect_commands += count as u64;
            }
            Command::BeginEvent(_) => pass.event_depth += 1,
            Command::EndEvent => {
                ensure!(pass.event_depth > 0, "debug event ended without a begin");
                pass.event_depth -= 1;
            }
        }
        Ok(())
    }

    fn state_mut(&mut self, raw: RawResource) -> anyhow::Result<(&str, &mut ResourceState)> {
        match raw {
            RawResource::Buffer(key) => {
                let buffer = self.buffers.get_mut(key).context("unknown buffer")?;
                ensure!(
                    buffer.memory == MemoryLocation::Device,
                    "'{}': upload memory is not state tracked",
                    buffer.name
                );
                Ok((&buffer.name, &mut buffer.state))
            }
            RawResource::Texture(key) => {
                let texture = self.textures.get_mut(key).context("unknown texture")?;
                Ok((&texture.name, &mut texture.state))
            }
        }
    }

    fn state_of(&mut self, raw: RawResource) -> anyhow::Result<ResourceState> {
        self.state_mut(raw).map(|(_, state)| *state)
    }

    fn require(&mut self, raw: RawResource, required: ResourceState) -> anyhow::Result<()> {
        let (name, state) = self.state_mut(raw)?;
        if !state.contains(&required) {
            bail!("'{name}' is in {state} but {required} is required");
        }
        Ok(())
    }

    fn buffer_in(&mut self, key: BufferKey, required: ResourceState) -> anyhow::Result<&mut HeadlessBuffer> {
        self.require(RawResource::Buffer(key), required)?;
        self.buffers.get_mut(key).context("unknown buffer")
    }

    /// Upload memory is always readable; device memory must be a copy source.
    fn readable_buffer(&mut self, key: BufferKey) -> anyhow::Result<&mut HeadlessBuffer> {
        let memory = self.buffers.get(key).context("unknown copy source")?.memory;
        match memory {
            MemoryLocation::Upload => self.buffers.get_mut(key).context("unknown copy source"),
            MemoryLocation::Device => self.buffer_in(key, ResourceState::COPY_SRC),
        }
    }

    fn writable_buffer(&mut self, key: BufferKey) -> anyhow::Result<&mut HeadlessBuffer> {
        self.buffer_in(key, ResourceState::COPY_DST)
    }

    fn texture(&self, key: TextureKey) -> anyhow::Result<&HeadlessTexture> {
        self.textures.get(key).context("unknown texture")
    }

    fn texture_in(&mut self, key: TextureKey, required: ResourceState) -> anyhow::Result<&mut HeadlessTexture> {
        self.require(RawResource::Texture(key), required)?;
        self.textures.get_mut(key).context("unknown texture")
    }
}

fn byte_range(name: &str, len: usize, offset: u64, size: u64) -> anyhow::Result<Range<usize>> {
    let end = offset.checked_add(size).context("byte range overflows")?;
    ensure!(
        end <= len as u64,
        "'{name}': range [{offset}, {end}) is outside its {len} bytes"
    );
    Ok(offset as usize..end as usize)
}

fn fill(data: &mut [u8], texel: &[u8]) {
    for chunk in data.chunks_exact_mut(texel.len()) {
        chunk.copy_from_slice(texel);
    }
}

fn encode_color(spec: &TextureSpec, color: [f32; 4]) -> Vec<u8> {
    match spec.texel_size() {
        16 => bytemuck::bytes_of(&color).to_vec(),
        4 => color
            .iter()
            .map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect(),
        n => vec![0; n as usize],
    }
}

fn encode_depth(spec: &TextureSpec, depth: f32) -> Vec<u8> {
    let mut texel = vec![0; spec.texel_size() as usize];
    if texel.len() >= 4 {
        texel[..4].copy_from_slice(&depth.to_le_bytes());
    }
    texel
}

#[cfg(test)]
mod tests {
    use smallvec::smallvec;

    use super::*;
    use crate::command::Transition;

    fn device_buffer(device: &HeadlessDevice, size: u64) -> BufferKey {
        device
            .create_buffer(&BufferDesc {
                size,
                usage: crate::device::BufferUsage::Storage,
                memory: MemoryLocation::Device,
                debug_name: Some("test".into()),
            })
            .unwrap()
    }

    fn transition(key: BufferKey, before: ResourceState, after: ResourceState) -> Command {
        Command::Transition(Transition {
            resource: RawResource::Buffer(key),
            before,
            after,
        })
    }

    #[test]
    fn copies_staged_bytes() {
        let device = HeadlessDevice::new();
        let staging = device.create_buffer(&BufferDesc::staging(8, "staging")).unwrap();
        let dst = device_buffer(&device, 8);
        device.write_mapped(staging, 0, &[1, 2, 3, 4]).unwrap();

        let mut stream = CommandStream::default();
        stream.push(transition(dst, ResourceState::UNDEFINED, ResourceState::COPY_DST));
        stream.push(Command::CopyBuffer {
            src: staging,
            src_offset: 0,
            dst,
            dst_offset: 4,
            size: 4,
        });
        device.submit("test", &stream).unwrap();

        assert_eq!(device.read_buffer(dst).unwrap(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
        assert_eq!(device.state(RawResource::Buffer(dst)), Some(ResourceState::COPY_DST));
        assert_eq!(device.stats().copied_bytes, 4);
    }

    #[test]
    fn rejects_stale_transition() {
        let device = HeadlessDevice::new();
        let key = device_buffer(&device, 4);

        let mut stream = CommandStream::default();
        stream.push(transition(key, ResourceState::COPY_SRC, ResourceState::COPY_DST));
        assert!(device.submit("test", &stream).is_err());
    }

    #[test]
    fn rejects_copy_without_barrier() {
        let device = HeadlessDevice::new();
        let a = device_buffer(&device, 4);
        let b = device_buffer(&device, 4);

        let mut stream = CommandStream::default();
        stream.push(Command::CopyBuffer {
            src: a,
            src_offset: 0,
            dst: b,
            dst_offset: 0,
            size: 4,
        });
        assert!(device.submit("test", &stream).is_err());
    }

    #[test]
    fn rejects_out_of_bounds_copy() {
        let device = HeadlessDevice::new();
        let staging = device.create_buffer(&BufferDesc::staging(16, "staging")).unwrap();
        let dst = device_buffer(&device, 8);

        let mut stream = CommandStream::default();
        stream.push(transition(dst, ResourceState::UNDEFINED, ResourceState::COPY_DST));
        stream.push(Command::CopyBuffer {
            src: staging,
            src_offset: 0,
            dst,
            dst_offset: 4,
            size: 8,
        });
        assert!(device.submit("test", &stream).is_err());
    }

    #[test]
    fn uav_barrier_checks_resources_exist() {
        let device = HeadlessDevice::new();
        let key = device_buffer(&device, 4);
        device.destroy_buffer(key);

        let mut stream = CommandStream::default();
        stream.push(Command::UavBarrier(smallvec![RawResource::Buffer(key)]));
        assert!(device.submit("test", &stream).is_err());
        assert_eq!(device.stats().buffers_destroyed, 1);
    }

    #[test]
    fn unbalanced_events_fail() {
        let device = HeadlessDevice::new();
        let mut stream = CommandStream::default();
        stream.push(Command::BeginEvent("frame".into()));
        assert!(device.submit("test", &stream).is_err());
    }
}
