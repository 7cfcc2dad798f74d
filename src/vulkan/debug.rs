use std::ffi::{CStr, CString, c_char, c_void};

use anyhow::{Context, bail};
use ash::{Entry, ext::debug_utils, vk};

#[cfg(debug_assertions)]
pub const ENABLE_VALIDATION: bool = true;
#[cfg(not(debug_assertions))]
pub const ENABLE_VALIDATION: bool = false;

const VALIDATION_LAYERS: [&CStr; 1] = [c"VK_LAYER_KHRONOS_validation"];

unsafe extern "system" fn validation_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _: *mut c_void,
) -> vk::Bool32 {
    use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;

    let message = unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy();
    match severity {
        Severity::VERBOSE => log::trace!("{kind:?}: {message}"),
        Severity::INFO => log::debug!("{kind:?}: {message}"),
        Severity::WARNING => log::warn!("{kind:?}: {message}"),
        _ => log::error!("{kind:?}: {message}"),
    }
    vk::FALSE
}

pub fn validation_layers() -> Vec<*const c_char> {
    VALIDATION_LAYERS.iter().map(|name| name.as_ptr()).collect()
}

pub fn ensure_validation_layers(entry: &Entry) -> anyhow::Result<()> {
    let available = unsafe { entry.enumerate_instance_layer_properties() }
        .context("failed to enumerate instance layers")?;

    for required in VALIDATION_LAYERS {
        let present = available
            .iter()
            .any(|layer| layer.layer_name_as_c_str().is_ok_and(|name| name == required));
        if !present {
            bail!("validation layer {} is not installed", required.to_string_lossy());
        }
    }
    Ok(())
}

pub fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(validation_callback))
}

pub struct DebugMessenger {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    /// Installs the validation callback; failure only costs diagnostics.
    pub fn new(entry: &Entry, instance: &ash::Instance) -> Option<Self> {
        if !ENABLE_VALIDATION {
            return None;
        }
        let loader = debug_utils::Instance::new(entry, instance);
        match unsafe { loader.create_debug_utils_messenger(&messenger_create_info(), None) } {
            Ok(messenger) => Some(Self { loader, messenger }),
            Err(e) => {
                log::warn!("failed to create debug messenger: {e:?}");
                None
            }
        }
    }

    pub fn destroy(&self) {
        unsafe { self.loader.destroy_debug_utils_messenger(self.messenger, None) };
    }
}

pub fn object_name(name: &str) -> CString {
    CString::new(name.replace('\0', " ")).unwrap_or_default()
}
