//! Sub-allocated GPU buffers with automatic resource-state tracking.
//!
//! Fixed-stride [`GraphicsBuffer`]s hand out [`BufferAllocation`]s by first
//! fit and grow by doubling. Every access recorded on a [`CommandRecorder`]
//! goes through the resource's tracked [`ResourceState`] first, so the
//! barriers a stream needs are emitted as it is recorded.

pub mod buffer;
pub mod command;
pub mod compact;
pub mod config;
pub mod context;
pub mod device;
pub mod mesh;
pub mod region;
pub mod state;
pub mod texture;
pub mod tracker;
#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use buffer::{BufferAllocation, BufferSpec, GraphicsBuffer};
pub use command::{CommandRecorder, CommandStream};
pub use config::GpuConfig;
pub use context::GpuContext;
pub use device::{Device, HeadlessDevice};
pub use state::ResourceState;
pub use texture::{Texture, TextureSpec};
pub use tracker::{GpuResource, TrackedResource};
