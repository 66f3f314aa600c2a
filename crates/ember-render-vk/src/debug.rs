// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_void, CStr};

use ash::ext::debug_utils;
use ash::vk;

use crate::error::{Result, VkResultExt};

pub(crate) const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

const LOG_TARGET: &str = "ember-vk-validation";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader hands us a valid callback data struct for the
    // duration of the call; p_message is either null or NUL-terminated.
    let message = unsafe {
        let p_message = (*data).p_message;
        if p_message.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr(p_message).to_string_lossy()
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!(target: LOG_TARGET, "[{:?}] {}", types, message);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!(target: LOG_TARGET, "[{:?}] {}", types, message);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        tracing::info!(target: LOG_TARGET, "[{:?}] {}", types, message);
    } else {
        tracing::trace!(target: LOG_TARGET, "[{:?}] {}", types, message);
    }

    // Never abort the call that triggered the message.
    vk::FALSE
}

pub(crate) fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
                | vk::DebugUtilsMessageTypeFlagsEXT::DEVICE_ADDRESS_BINDING,
        )
        .pfn_user_callback(Some(debug_callback))
}

pub(crate) struct DebugMessenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    /// # Safety
    /// `instance` must have been created from `entry` with the debug utils
    /// extension enabled.
    pub(crate) unsafe fn new(entry: &ash::Entry, instance: &ash::Instance) -> Result<Self> {
        let loader = debug_utils::Instance::new(entry, instance);
        let info = messenger_create_info();
        // SAFETY: the extension is enabled (caller contract) and `info`
        // carries no borrowed pointers besides the static callback.
        let handle = unsafe { loader.create_debug_utils_messenger(&info, None) }
            .during("vkCreateDebugUtilsMessengerEXT")?;
        Ok(Self { loader, handle })
    }

    /// # Safety
    /// Must run before the parent instance is destroyed, and only once.
    pub(crate) unsafe fn destroy(&self) {
        tracing::debug!("destroying debug messenger {:?}", self.handle);
        // SAFETY: handle was created by this loader (caller guarantees
        // single destruction).
        unsafe { self.loader.destroy_debug_utils_messenger(self.handle, None) };
    }
}
