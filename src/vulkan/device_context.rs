use std::sync::Arc;

use ash::{ext::debug_utils, vk};

use super::debug::object_name;

/// Logical device plus the optional debug-utils loader used for naming and labels.
#[derive(Clone)]
pub struct DeviceContext {
    pub device: Arc<ash::Device>,
    pub debug_utils: Option<Arc<debug_utils::Device>>,
}

impl DeviceContext {
    pub fn name_object<T>(&self, handle: T, debug_name: impl AsRef<str>) -> anyhow::Result<()>
    where
        T: vk::Handle,
    {
        let Some(debug) = &self.debug_utils else {
            return Ok(());
        };

        let name = object_name(debug_name.as_ref());
        let name_info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&name);

        unsafe {
            debug
                .set_debug_utils_object_name(&name_info)
                .map_err(|e| anyhow::anyhow!("failed to set debug name: {e:?}"))
        }
    }

    pub fn begin_label(&self, cmd: vk::CommandBuffer, label: &str) {
        if let Some(debug) = &self.debug_utils {
            let name = object_name(label);
            let label = vk::DebugUtilsLabelEXT::default().label_name(&name);
            unsafe { debug.cmd_begin_debug_utils_label(cmd, &label) };
        }
    }

    pub fn end_label(&self, cmd: vk::CommandBuffer) {
        if let Some(debug) = &self.debug_utils {
            unsafe { debug.cmd_end_debug_utils_label(cmd) };
        }
    }
}
