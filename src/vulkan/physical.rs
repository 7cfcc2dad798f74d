use std::ffi::CStr;

use anyhow::Context;
use ash::vk;

use crate::device::DeviceLimits;

#[derive(Clone, Copy, Debug)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub queue_family: u32,
    pub limits: DeviceLimits,
}

/// First device with a queue family that can do graphics, compute and transfer.
pub fn pick_physical_device(instance: &ash::Instance) -> anyhow::Result<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .context("failed to enumerate physical devices")?;

    let (device, queue_family) = devices
        .into_iter()
        .filter(|device| supports_vulkan_13(instance, *device))
        .find_map(|device| find_queue_family(instance, device).map(|family| (device, family)))
        .context("no suitable physical device")?;

    let mut maintenance4 = vk::PhysicalDeviceMaintenance4Properties::default();
    let mut props = vk::PhysicalDeviceProperties2::default().push_next(&mut maintenance4);
    unsafe { instance.get_physical_device_properties2(device, &mut props) };
    let name = unsafe { CStr::from_ptr(props.properties.device_name.as_ptr()) };
    log::debug!("Selected physical device: {name:?}");
    let max_buffer_size = maintenance4.max_buffer_size;

    Ok(PhysicalDeviceInfo {
        device,
        queue_family,
        limits: DeviceLimits { max_buffer_size },
    })
}

fn supports_vulkan_13(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let props = unsafe { instance.get_physical_device_properties(device) };
    props.api_version >= vk::API_VERSION_1_3
}

fn find_queue_family(instance: &ash::Instance, device: vk::PhysicalDevice) -> Option<u32> {
    let required = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    families
        .iter()
        .position(|family| family.queue_count > 0 && family.queue_flags.contains(required))
        .map(|index| index as u32)
}
