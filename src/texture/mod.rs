mod spec;

pub use spec::TextureSpec;

use std::{fmt, sync::Arc};

use anyhow::Context;

use crate::{
    context::GpuContext,
    device::RawResource,
    tracker::{GpuResource, TrackedResource},
};

/// A state-tracked image. Its storage is released through the default
/// recorder when the texture is dropped.
pub struct Texture {
    context: Arc<GpuContext>,
    resource: TrackedResource,
    spec: TextureSpec,
}

impl Texture {
    pub(crate) fn new(context: Arc<GpuContext>, spec: TextureSpec) -> anyhow::Result<Self> {
        let name = spec.debug_name.as_deref().unwrap_or("unnamed texture").to_string();
        assert!(
            spec.mips >= 1 && spec.width >= 1 && spec.height >= 1,
            "texture '{name}' has an empty extent"
        );
        let key = context
            .device()
            .create_texture(&spec)
            .with_context(|| format!("failed to create texture '{name}'"))?;

        log::debug!(
            "created texture '{name}': {}x{} {:?}, {} mips",
            spec.width,
            spec.height,
            spec.format,
            spec.mips
        );
        Ok(Self {
            context,
            resource: TrackedResource::new(name, RawResource::Texture(key), 0),
            spec,
        })
    }

    pub fn spec(&self) -> &TextureSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        self.resource.name()
    }
}

impl GpuResource for Texture {
    fn tracked(&self) -> &TrackedResource {
        &self.resource
    }
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("name", &self.name())
            .field("width", &self.spec.width)
            .field("height", &self.spec.height)
            .field("format", &self.spec.format)
            .finish()
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.context.default_recorder().retire(self.resource.raw());
    }
}
