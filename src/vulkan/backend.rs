use std::{mem::ManuallyDrop, sync::Arc};

use anyhow::{Context, bail, ensure};
use ash::{ext::debug_utils, vk};
use parking_lot::Mutex;
use slotmap::SlotMap;
use vk_mem::Alloc;

use crate::{
    command::{Command, CommandStream},
    device::{BufferDesc, BufferKey, Device, DeviceLimits, MemoryLocation, RawResource, TextureKey},
    state::ResourceState,
    texture::TextureSpec,
};

use super::{
    barrier::PendingBarriers,
    debug::{DebugMessenger, ENABLE_VALIDATION},
    device::create_logical_device,
    device_context::DeviceContext,
    instance::create_instance,
    physical::pick_physical_device,
};

struct VkBuffer {
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    size: u64,
    memory: MemoryLocation,
}

struct VkTexture {
    image: vk::Image,
    allocation: vk_mem::Allocation,
    spec: TextureSpec,
}

#[derive(Default)]
struct Resources {
    buffers: SlotMap<BufferKey, VkBuffer>,
    textures: SlotMap<TextureKey, VkTexture>,
}

impl Resources {
    fn buffer(&self, key: BufferKey) -> anyhow::Result<&VkBuffer> {
        self.buffers.get(key).context("stream references a destroyed buffer")
    }

    fn texture(&self, key: TextureKey) -> anyhow::Result<&VkTexture> {
        self.textures.get(key).context("stream references a destroyed texture")
    }
}

struct Submission {
    pool: vk::CommandPool,
    cmd: vk::CommandBuffer,
    fence: vk::Fence,
}

/// Vulkan 1.3 backend without a surface.
///
/// Streams are recorded into one reusable command buffer and waited on with a
/// fence. Transfers, barriers and debug labels are translated; pipeline and
/// draw commands need shader objects this backend does not own and fail the
/// submission.
pub struct VulkanDevice {
    _entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<DebugMessenger>,
    context: DeviceContext,
    queue: vk::Queue,
    allocator: ManuallyDrop<vk_mem::Allocator>,
    resources: Mutex<Resources>,
    submission: Mutex<Submission>,
    limits: DeviceLimits,
}

impl VulkanDevice {
    pub fn new() -> anyhow::Result<Self> {
        let entry = unsafe { ash::Entry::load() }.context("failed to load the Vulkan library")?;
        let instance = create_instance(&entry).context("failed to create instance")?;
        let debug = DebugMessenger::new(&entry, &instance);

        let physical = pick_physical_device(&instance).context("failed to pick physical device")?;
        let (device, queue) =
            create_logical_device(&instance, &physical).context("failed to create logical device")?;

        let debug_utils = ENABLE_VALIDATION
            .then(|| Arc::new(debug_utils::Device::new(&instance, &device)));
        let context = DeviceContext {
            device: device.clone(),
            debug_utils,
        };

        let allocator = {
            let create_info = vk_mem::AllocatorCreateInfo::new(&instance, &device, physical.device);
            unsafe { vk_mem::Allocator::new(create_info) }.context("failed to create allocator")?
        };

        let submission = {
            let pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(physical.queue_family)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            let pool = unsafe { device.create_command_pool(&pool_info, None) }
                .context("failed to create command pool")?;
            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let cmd = unsafe { device.allocate_command_buffers(&alloc_info) }
                .context("failed to allocate command buffer")?[0];
            let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }
                .context("failed to create submission fence")?;
            Submission { pool, cmd, fence }
        };

        Ok(Self {
            _entry: entry,
            instance,
            debug,
            context,
            queue,
            allocator: ManuallyDrop::new(allocator),
            resources: Mutex::new(Resources::default()),
            submission: Mutex::new(submission),
            limits: physical.limits,
        })
    }

    fn record(&self, cmd: vk::CommandBuffer, stream: &CommandStream, resources: &Resources) -> anyhow::Result<()> {
        let device = self.context.device.as_ref();
        let mut barriers = PendingBarriers::default();

        for command in stream {
            if !matches!(command, Command::Transition(_) | Command::UavBarrier(_)) {
                barriers.flush(device, cmd);
            }

            match command {
                Command::Transition(transition) => match transition.resource {
                    RawResource::Buffer(key) => {
                        barriers.buffer(resources.buffer(key)?.buffer, transition.before, transition.after)
                    }
                    RawResource::Texture(key) => {
                        let texture = resources.texture(key)?;
                        barriers.image(
                            texture.image,
                            texture.spec.aspect(),
                            transition.before,
                            transition.after,
                        )
                    }
                },
                Command::UavBarrier(_) => barriers.unordered_access(),
                Command::CopyBuffer {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => {
                    let region = vk::BufferCopy {
                        src_offset: *src_offset,
                        dst_offset: *dst_offset,
                        size: *size,
                    };
                    unsafe {
                        device.cmd_copy_buffer(
                            cmd,
                            resources.buffer(*src)?.buffer,
                            resources.buffer(*dst)?.buffer,
                            &[region],
                        )
                    };
                }
                Command::CopyBufferToTexture {
                    src,
                    src_offset,
                    dst,
                    mip,
                } => {
                    let texture = resources.texture(*dst)?;
                    let (width, height) = texture.spec.mip_extent(*mip);
                    let region = vk::BufferImageCopy::default()
                        .buffer_offset(*src_offset)
                        .image_subresource(subresource(&texture.spec, *mip))
                        .image_extent(vk::Extent3D {
                            width,
                            height,
                            depth: 1,
                        });
                    unsafe {
                        device.cmd_copy_buffer_to_image(
                            cmd,
                            resources.buffer(*src)?.buffer,
                            texture.image,
                            ResourceState::COPY_DST.layout,
                            &[region],
                        )
                    };
                }
                Command::CopyTexture { src, dst } => {
                    let (src, dst) = (resources.texture(*src)?, resources.texture(*dst)?);
                    let regions = (0..src.spec.mips.min(dst.spec.mips))
                        .map(|mip| {
                            let (width, height) = src.spec.mip_extent(mip);
                            vk::ImageCopy::default()
                                .src_subresource(subresource(&src.spec, mip))
                                .dst_subresource(subresource(&dst.spec, mip))
                                .extent(vk::Extent3D {
                                    width,
                                    height,
                                    depth: 1,
                                })
                        })
                        .collect::<Vec<_>>();
                    unsafe {
                        device.cmd_copy_image(
                            cmd,
                            src.image,
                            ResourceState::COPY_SRC.layout,
                            dst.image,
                            ResourceState::COPY_DST.layout,
                            &regions,
                        )
                    };
                }
                Command::ResolveTexture { src, dst } => {
                    let (src, dst) = (resources.texture(*src)?, resources.texture(*dst)?);
                    let region = vk::ImageResolve::default()
                        .src_subresource(subresource(&src.spec, 0))
                        .dst_subresource(subresource(&dst.spec, 0))
                        .extent(vk::Extent3D {
                            width: src.spec.width,
                            height: src.spec.height,
                            depth: 1,
                        });
                    unsafe {
                        device.cmd_resolve_image(
                            cmd,
                            src.image,
                            ResourceState::RESOLVE_SRC.layout,
                            dst.image,
                            ResourceState::RESOLVE_DST.layout,
                            &[region],
                        )
                    };
                }
                Command::BeginEvent(name) => self.context.begin_label(cmd, name),
                Command::EndEvent => self.context.end_label(cmd),
                other => bail!("{} is not supported by the Vulkan backend", other.name()),
            }
        }

        barriers.flush(device, cmd);
        Ok(())
    }
}

fn subresource(spec: &TextureSpec, mip: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers::default()
        .aspect_mask(spec.aspect())
        .mip_level(mip)
        .base_array_layer(0)
        .layer_count(1)
}

impl Device for VulkanDevice {
    fn create_buffer(&self, desc: &BufferDesc) -> anyhow::Result<BufferKey> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(desc.size.max(1))
            .usage(desc.usage.to_vk())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let allocation_info = match desc.memory {
            MemoryLocation::Device => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            },
            MemoryLocation::Upload => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::MAPPED
                    | vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                ..Default::default()
            },
        };

        let (buffer, allocation) =
            unsafe { self.allocator.create_buffer(&buffer_info, &allocation_info) }
                .context("failed to create buffer")?;
        if let Some(name) = desc.debug_name.as_deref() {
            self.context.name_object(buffer, name)?;
        }

        Ok(self.resources.lock().buffers.insert(VkBuffer {
            buffer,
            allocation,
            size: desc.size,
            memory: desc.memory,
        }))
    }

    fn destroy_buffer(&self, key: BufferKey) {
        if let Some(mut buffer) = self.resources.lock().buffers.remove(key) {
            unsafe { self.allocator.destroy_buffer(buffer.buffer, &mut buffer.allocation) };
        }
    }

    fn create_texture(&self, spec: &TextureSpec) -> anyhow::Result<TextureKey> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(spec.format)
            .extent(vk::Extent3D {
                width: spec.width,
                height: spec.height,
                depth: 1,
            })
            .mip_levels(spec.mips)
            .array_layers(1)
            .samples(spec.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(spec.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let allocation_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };

        let (image, allocation) =
            unsafe { self.allocator.create_image(&image_info, &allocation_info) }
                .context("failed to create image")?;
        if let Some(name) = spec.debug_name.as_deref() {
            self.context.name_object(image, name)?;
        }

        Ok(self.resources.lock().textures.insert(VkTexture {
            image,
            allocation,
            spec: spec.clone(),
        }))
    }

    fn destroy_texture(&self, key: TextureKey) {
        if let Some(mut texture) = self.resources.lock().textures.remove(key) {
            unsafe { self.allocator.destroy_image(texture.image, &mut texture.allocation) };
        }
    }

    fn write_mapped(&self, key: BufferKey, offset: u64, data: &[u8]) -> anyhow::Result<()> {
        let resources = self.resources.lock();
        let buffer = resources.buffer(key)?;
        ensure!(
            buffer.memory == MemoryLocation::Upload,
            "buffer is not host visible"
        );
        ensure!(
            offset + data.len() as u64 <= buffer.size,
            "mapped write of {} bytes at {offset} overruns {} bytes",
            data.len(),
            buffer.size
        );

        let info = self.allocator.get_allocation_info(&buffer.allocation);
        let mapped = info.mapped_data.cast::<u8>();
        ensure!(!mapped.is_null(), "buffer is not persistently mapped");
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.add(offset as usize), data.len());
        }
        Ok(())
    }

    fn submit(&self, label: &str, stream: &CommandStream) -> anyhow::Result<()> {
        let _span = tracing::trace_span!("vk_submit", label).entered();
        let submission = self.submission.lock();
        let resources = self.resources.lock();
        let device = self.context.device.as_ref();
        let cmd = submission.cmd;

        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .context("failed to reset command buffer")?;
            device
                .begin_command_buffer(
                    cmd,
                    &vk::CommandBufferBeginInfo::default()
                        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
                )
                .context("failed to begin command buffer")?;
        }

        self.context.begin_label(cmd, label);
        self.record(cmd, stream, &resources)
            .with_context(|| format!("failed to record '{label}'"))?;
        self.context.end_label(cmd);

        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        unsafe {
            device
                .end_command_buffer(cmd)
                .context("failed to end command buffer")?;
            device
                .queue_submit(self.queue, &[submit_info], submission.fence)
                .context("failed to submit command buffer")?;
            device
                .wait_for_fences(&[submission.fence], true, u64::MAX)
                .context("failed to wait for submission")?;
            device
                .reset_fences(&[submission.fence])
                .context("failed to reset submission fence")?;
        }
        Ok(())
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::trace!("Destroying Vulkan device");
        let device = self.context.device.clone();
        unsafe {
            if let Err(e) = device.device_wait_idle() {
                log::warn!("device_wait_idle failed during shutdown: {e:?}");
            }

            let resources = self.resources.get_mut();
            for (_, mut buffer) in resources.buffers.drain() {
                self.allocator.destroy_buffer(buffer.buffer, &mut buffer.allocation);
            }
            for (_, mut texture) in resources.textures.drain() {
                self.allocator.destroy_image(texture.image, &mut texture.allocation);
            }

            let submission = self.submission.get_mut();
            device.destroy_fence(submission.fence, None);
            device.destroy_command_pool(submission.pool, None);

            ManuallyDrop::drop(&mut self.allocator);
            device.destroy_device(None);
            if let Some(debug) = &self.debug {
                debug.destroy();
            }
            self.instance.destroy_instance(None);
        }
        log::trace!("Vulkan device destroyed");
    }
}
