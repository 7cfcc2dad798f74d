use std::fmt;

use ash::vk;

/// Usage a resource is visible to on the GPU timeline.
///
/// A state is satisfied by another when every stage, every access bit and the
/// layout are already covered, see [`ResourceState::contains`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ResourceState {
    pub layout: vk::ImageLayout,
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
}

const fn stages(bits: &[vk::PipelineStageFlags2]) -> vk::PipelineStageFlags2 {
    let mut raw = 0;
    let mut i = 0;
    while i < bits.len() {
        raw |= bits[i].as_raw();
        i += 1;
    }
    vk::PipelineStageFlags2::from_raw(raw)
}

const fn accesses(bits: &[vk::AccessFlags2]) -> vk::AccessFlags2 {
    let mut raw = 0;
    let mut i = 0;
    while i < bits.len() {
        raw |= bits[i].as_raw();
        i += 1;
    }
    vk::AccessFlags2::from_raw(raw)
}

const SHADER_STAGES: vk::PipelineStageFlags2 = stages(&[
    vk::PipelineStageFlags2::VERTEX_SHADER,
    vk::PipelineStageFlags2::FRAGMENT_SHADER,
    vk::PipelineStageFlags2::COMPUTE_SHADER,
]);

impl ResourceState {
    pub const UNDEFINED: ResourceState = ResourceState {
        layout: vk::ImageLayout::UNDEFINED,
        stage: vk::PipelineStageFlags2::TOP_OF_PIPE,
        access: vk::AccessFlags2::NONE,
    };

    pub const COPY_SRC: ResourceState = ResourceState {
        layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        stage: vk::PipelineStageFlags2::TRANSFER,
        access: vk::AccessFlags2::TRANSFER_READ,
    };

    pub const COPY_DST: ResourceState = ResourceState {
        layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        stage: vk::PipelineStageFlags2::TRANSFER,
        access: vk::AccessFlags2::TRANSFER_WRITE,
    };

    pub const SHADER_RESOURCE: ResourceState = ResourceState {
        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        stage: SHADER_STAGES,
        access: vk::AccessFlags2::SHADER_READ,
    };

    pub const UNORDERED_ACCESS: ResourceState = ResourceState {
        layout: vk::ImageLayout::GENERAL,
        stage: SHADER_STAGES,
        access: accesses(&[vk::AccessFlags2::SHADER_READ, vk::AccessFlags2::SHADER_WRITE]),
    };

    // Buffer-only states keep an undefined layout; buffers have none.
    pub const CONSTANT_BUFFER: ResourceState = ResourceState {
        layout: vk::ImageLayout::UNDEFINED,
        stage: SHADER_STAGES,
        access: vk::AccessFlags2::UNIFORM_READ,
    };

    pub const INDEX_BUFFER: ResourceState = ResourceState {
        layout: vk::ImageLayout::UNDEFINED,
        stage: vk::PipelineStageFlags2::INDEX_INPUT,
        access: vk::AccessFlags2::INDEX_READ,
    };

    pub const INDIRECT_ARGUMENT: ResourceState = ResourceState {
        layout: vk::ImageLayout::UNDEFINED,
        stage: vk::PipelineStageFlags2::DRAW_INDIRECT,
        access: vk::AccessFlags2::INDIRECT_COMMAND_READ,
    };

    pub const RENDER_TARGET: ResourceState = ResourceState {
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        access: accesses(&[
            vk::AccessFlags2::COLOR_ATTACHMENT_READ,
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        ]),
    };

    pub const DEPTH_WRITE: ResourceState = ResourceState {
        layout: vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
        stage: stages(&[
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS,
            vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
        ]),
        access: accesses(&[
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ]),
    };

    pub const RESOLVE_SRC: ResourceState = ResourceState {
        layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        stage: vk::PipelineStageFlags2::RESOLVE,
        access: vk::AccessFlags2::TRANSFER_READ,
    };

    pub const RESOLVE_DST: ResourceState = ResourceState {
        layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        stage: vk::PipelineStageFlags2::RESOLVE,
        access: vk::AccessFlags2::TRANSFER_WRITE,
    };

    pub const PRESENT: ResourceState = ResourceState {
        layout: vk::ImageLayout::PRESENT_SRC_KHR,
        stage: vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
        access: vk::AccessFlags2::NONE,
    };

    const NAMED: [(&'static str, ResourceState); 13] = [
        ("UNDEFINED", Self::UNDEFINED),
        ("COPY_SRC", Self::COPY_SRC),
        ("COPY_DST", Self::COPY_DST),
        ("SHADER_RESOURCE", Self::SHADER_RESOURCE),
        ("UNORDERED_ACCESS", Self::UNORDERED_ACCESS),
        ("CONSTANT_BUFFER", Self::CONSTANT_BUFFER),
        ("INDEX_BUFFER", Self::INDEX_BUFFER),
        ("INDIRECT_ARGUMENT", Self::INDIRECT_ARGUMENT),
        ("RENDER_TARGET", Self::RENDER_TARGET),
        ("DEPTH_WRITE", Self::DEPTH_WRITE),
        ("RESOLVE_SRC", Self::RESOLVE_SRC),
        ("RESOLVE_DST", Self::RESOLVE_DST),
        ("PRESENT", Self::PRESENT),
    ];

    /// True when `self` already provides everything `required` asks for.
    pub fn contains(&self, required: &ResourceState) -> bool {
        self.layout == required.layout
            && self.stage.contains(required.stage)
            && self.access.contains(required.access)
    }

    /// Name of the matching predefined state, if any.
    pub fn name(&self) -> Option<&'static str> {
        Self::NAMED
            .iter()
            .find(|(_, state)| state == self)
            .map(|(name, _)| *name)
    }
}

impl Default for ResourceState {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(
                f,
                "{{ layout: {:?}, stage: {:?}, access: {:?} }}",
                self.layout, self.stage, self.access
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_contains_itself() {
        for (_, state) in ResourceState::NAMED {
            assert!(state.contains(&state));
        }
    }

    #[test]
    fn wider_stage_mask_satisfies_narrower_request() {
        let compute_read = ResourceState {
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            stage: vk::PipelineStageFlags2::COMPUTE_SHADER,
            access: vk::AccessFlags2::SHADER_READ,
        };
        assert!(ResourceState::SHADER_RESOURCE.contains(&compute_read));
        assert!(!compute_read.contains(&ResourceState::SHADER_RESOURCE));
    }

    #[test]
    fn copy_directions_are_distinct() {
        assert!(!ResourceState::COPY_SRC.contains(&ResourceState::COPY_DST));
        assert!(!ResourceState::COPY_DST.contains(&ResourceState::COPY_SRC));
        assert!(!ResourceState::UNDEFINED.contains(&ResourceState::COPY_DST));
    }

    #[test]
    fn layout_mismatch_is_never_contained() {
        // Same access bits as a write-capable state, different layout.
        assert!(!ResourceState::UNORDERED_ACCESS.contains(&ResourceState::SHADER_RESOURCE));
    }

    #[test]
    fn display_uses_known_names() {
        assert_eq!(ResourceState::COPY_DST.to_string(), "COPY_DST");
        assert_eq!(ResourceState::default().to_string(), "UNDEFINED");
    }
}
