use ash::vk;

#[derive(PartialEq, Clone, Debug)]
pub struct TextureSpec {
    pub format: vk::Format,
    pub width: u32,
    pub height: u32,
    pub mips: u32,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
    pub debug_name: Option<String>,
}

impl Default for TextureSpec {
    fn default() -> Self {
        Self {
            format: vk::Format::R8G8B8A8_UNORM,
            width: 1,
            height: 1,
            mips: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            usage: vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST,
            clear_color: [0.0; 4],
            clear_depth: 0.0,
            debug_name: None,
        }
    }
}

impl TextureSpec {
    pub fn color(width: u32, height: u32, format: vk::Format) -> Self {
        Self {
            format,
            width,
            height,
            ..Default::default()
        }
        .usage(
            vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::STORAGE
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST,
        )
    }

    pub fn depth(width: u32, height: u32) -> Self {
        Self {
            format: vk::Format::D32_SFLOAT,
            width,
            height,
            ..Default::default()
        }
        .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED)
    }

    pub fn usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    pub fn mips(mut self, mips: u32) -> Self {
        self.mips = mips.max(1);
        self
    }

    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    pub fn clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    pub fn debug_name(mut self, name: impl Into<String>) -> Self {
        self.debug_name = Some(name.into());
        self
    }

    pub fn sample_count(&self) -> u32 {
        self.samples.as_raw().max(1)
    }

    pub fn is_depth(&self) -> bool {
        matches!(
            self.format,
            vk::Format::D16_UNORM
                | vk::Format::D32_SFLOAT
                | vk::Format::D24_UNORM_S8_UINT
                | vk::Format::D32_SFLOAT_S8_UINT
        )
    }

    pub fn aspect(&self) -> vk::ImageAspectFlags {
        if self.is_depth() {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        }
    }

    /// Bytes per texel for the formats the engine creates.
    pub fn texel_size(&self) -> u64 {
        match self.format {
            vk::Format::R8_UNORM => 1,
            vk::Format::D16_UNORM => 2,
            vk::Format::R8G8B8A8_UNORM
            | vk::Format::R8G8B8A8_SRGB
            | vk::Format::B8G8R8A8_UNORM
            | vk::Format::B8G8R8A8_SRGB
            | vk::Format::R32_UINT
            | vk::Format::R32_SFLOAT
            | vk::Format::D32_SFLOAT
            | vk::Format::D24_UNORM_S8_UINT => 4,
            vk::Format::R16G16B16A16_SFLOAT | vk::Format::D32_SFLOAT_S8_UINT => 8,
            vk::Format::R32G32B32A32_SFLOAT => 16,
            _ => 4,
        }
    }

    pub fn mip_extent(&self, mip: u32) -> (u32, u32) {
        ((self.width >> mip).max(1), (self.height >> mip).max(1))
    }

    pub fn mip_size(&self, mip: u32) -> u64 {
        let (w, h) = self.mip_extent(mip);
        w as u64 * h as u64 * self.texel_size()
    }
}
