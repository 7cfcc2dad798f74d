mod backend;
mod barrier;
mod debug;
mod device;
mod device_context;
mod instance;
mod physical;

pub use backend::VulkanDevice;
pub use device_context::DeviceContext;
