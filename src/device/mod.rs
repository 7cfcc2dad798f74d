mod headless;

pub use headless::{HeadlessDevice, HeadlessStats};

use ash::vk;
use slotmap::new_key_type;

use crate::{command::CommandStream, texture::TextureSpec};

new_key_type! { pub struct BufferKey; }
new_key_type! { pub struct TextureKey; }

/// Backend handle of a buffer or texture.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum RawResource {
    Buffer(BufferKey),
    Texture(TextureKey),
}

impl RawResource {
    pub fn buffer(self) -> Option<BufferKey> {
        match self {
            RawResource::Buffer(key) => Some(key),
            RawResource::Texture(_) => None,
        }
    }

    pub fn texture(self) -> Option<TextureKey> {
        match self {
            RawResource::Texture(key) => Some(key),
            RawResource::Buffer(_) => None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BufferUsage {
    Storage,
    Uniform,
    Index,
    Indirect,
    Transfer,
}

impl BufferUsage {
    pub fn to_vk(self) -> vk::BufferUsageFlags {
        // Every buffer can be grown or compacted, so both copy directions are always needed.
        let copy = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
        copy | match self {
            BufferUsage::Storage => vk::BufferUsageFlags::STORAGE_BUFFER,
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER,
            BufferUsage::Indirect => {
                vk::BufferUsageFlags::INDIRECT_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER
            }
            BufferUsage::Transfer => vk::BufferUsageFlags::empty(),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum MemoryLocation {
    /// GPU resident, only reachable through copies.
    Device,
    /// Host visible and persistently mapped. Never state tracked.
    Upload,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct BufferDesc {
    pub size: u64,
    pub usage: BufferUsage,
    pub memory: MemoryLocation,
    pub debug_name: Option<String>,
}

impl BufferDesc {
    pub fn staging(size: u64, debug_name: impl Into<String>) -> Self {
        Self {
            size,
            usage: BufferUsage::Transfer,
            memory: MemoryLocation::Upload,
            debug_name: Some(debug_name.into()),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DeviceLimits {
    pub max_buffer_size: u64,
}

/// A GPU backend: owns the real resources and consumes recorded streams.
///
/// Resource handles are plain slotmap keys; everything that needs ordering goes
/// through a [`CommandStream`].
pub trait Device: Send + Sync {
    fn create_buffer(&self, desc: &BufferDesc) -> anyhow::Result<BufferKey>;

    fn destroy_buffer(&self, key: BufferKey);

    fn create_texture(&self, spec: &TextureSpec) -> anyhow::Result<TextureKey>;

    fn destroy_texture(&self, key: TextureKey);

    /// Host write into a buffer created with [`MemoryLocation::Upload`].
    fn write_mapped(&self, key: BufferKey, offset: u64, data: &[u8]) -> anyhow::Result<()>;

    /// Submits `stream` and blocks until the GPU has finished executing it.
    fn submit(&self, label: &str, stream: &CommandStream) -> anyhow::Result<()>;

    fn limits(&self) -> DeviceLimits;

    fn destroy(&self, raw: RawResource) {
        match raw {
            RawResource::Buffer(key) => self.destroy_buffer(key),
            RawResource::Texture(key) => self.destroy_texture(key),
        }
    }
}
