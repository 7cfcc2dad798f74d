use ash::vk;

use crate::state::ResourceState;

/// Barrier batch flushed before the next non-transition command.
#[derive(Default)]
pub struct PendingBarriers {
    buffers: Vec<vk::BufferMemoryBarrier2<'static>>,
    images: Vec<vk::ImageMemoryBarrier2<'static>>,
    memory: Vec<vk::MemoryBarrier2<'static>>,
}

impl PendingBarriers {
    pub fn buffer(&mut self, buffer: vk::Buffer, before: ResourceState, after: ResourceState) {
        self.buffers.push(
            vk::BufferMemoryBarrier2::default()
                .src_stage_mask(before.stage)
                .src_access_mask(before.access)
                .dst_stage_mask(after.stage)
                .dst_access_mask(after.access)
                .buffer(buffer)
                .offset(0)
                .size(vk::WHOLE_SIZE),
        );
    }

    pub fn image(
        &mut self,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        before: ResourceState,
        after: ResourceState,
    ) {
        self.images.push(
            vk::ImageMemoryBarrier2::default()
                .src_stage_mask(before.stage)
                .src_access_mask(before.access)
                .dst_stage_mask(after.stage)
                .dst_access_mask(after.access)
                .old_layout(before.layout)
                .new_layout(after.layout)
                .image(image)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(aspect)
                        .base_mip_level(0)
                        .level_count(vk::REMAINING_MIP_LEVELS)
                        .base_array_layer(0)
                        .layer_count(vk::REMAINING_ARRAY_LAYERS),
                ),
        );
    }

    /// Orders earlier shader writes before any later shader access.
    pub fn unordered_access(&mut self) {
        let stages = ResourceState::UNORDERED_ACCESS.stage;
        self.memory.push(
            vk::MemoryBarrier2::default()
                .src_stage_mask(stages)
                .src_access_mask(vk::AccessFlags2::SHADER_WRITE)
                .dst_stage_mask(stages)
                .dst_access_mask(vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::SHADER_WRITE),
        );
    }

    pub fn flush(&mut self, device: &ash::Device, cmd: vk::CommandBuffer) {
        if self.buffers.is_empty() && self.images.is_empty() && self.memory.is_empty() {
            return;
        }
        let dependency_info = vk::DependencyInfo::default()
            .memory_barriers(&self.memory)
            .buffer_memory_barriers(&self.buffers)
            .image_memory_barriers(&self.images);
        unsafe { device.cmd_pipeline_barrier2(cmd, &dependency_info) };

        self.buffers.clear();
        self.images.clear();
        self.memory.clear();
    }
}
