// SPDX-License-Identifier: CEPL-1.0
//! Loader, instance and the validation messenger.

use ash::ext::debug_utils;
use ash::{vk, Entry};
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, c_void, CStr};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Result, VkError};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const APP_NAME: &CStr = c"prism";

struct DebugMessenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

/// Owns the loader entry and the `VkInstance`. Everything created from the
/// instance keeps an `Arc` to this so it is destroyed last.
pub struct InstanceContext {
    entry: Entry,
    instance: ash::Instance,
    debug: Option<DebugMessenger>,
}

impl InstanceContext {
    /// `display` is `None` for a headless instance without WSI extensions.
    pub fn new(display: Option<RawDisplayHandle>, validation: bool) -> Result<Self> {
        unsafe {
            let entry = Entry::load()?;
            let instance = create_instance(&entry, display, validation)?;

            let debug = if validation {
                let loader = debug_utils::Instance::new(&entry, &instance);
                match loader.create_debug_utils_messenger(&messenger_info(), None) {
                    Ok(handle) => Some(DebugMessenger { loader, handle }),
                    Err(e) => {
                        instance.destroy_instance(None);
                        return Err(e.into());
                    }
                }
            } else {
                None
            };

            Ok(Self {
                entry,
                instance,
                debug,
            })
        }
    }

    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    #[inline]
    pub fn raw(&self) -> &ash::Instance {
        &self.instance
    }
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            if let Some(dbg) = self.debug.take() {
                dbg.loader.destroy_debug_utils_messenger(dbg.handle, None);
            }
            self.instance.destroy_instance(None);
        }
        debug!("instance destroyed");
    }
}

fn has_name(names: impl IntoIterator<Item = *const c_char>, want: &CStr) -> bool {
    names
        .into_iter()
        .any(|p| unsafe { CStr::from_ptr(p) } == want)
}

unsafe fn create_instance(
    entry: &Entry,
    display: Option<RawDisplayHandle>,
    validation: bool,
) -> Result<ash::Instance> {
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: APP_NAME.as_ptr(),
        application_version: vk::make_api_version(0, 0, 1, 0),
        p_engine_name: APP_NAME.as_ptr(),
        engine_version: vk::make_api_version(0, 0, 1, 0),
        api_version: vk::API_VERSION_1_1,
        ..Default::default()
    };

    // --- Extensions: WSI for this display, portability, debug utils ---
    let mut extensions: Vec<*const c_char> = match display {
        Some(dh) => ash_window::enumerate_required_extensions(dh)?.to_vec(),
        None => Vec::new(),
    };

    let available = entry.enumerate_instance_extension_properties(None)?;
    let mut flags = vk::InstanceCreateFlags::empty();
    if has_name(
        available.iter().map(|e| e.extension_name.as_ptr()),
        ash::khr::portability_enumeration::NAME,
    ) {
        extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
        flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }
    if validation {
        extensions.push(debug_utils::NAME.as_ptr());
    }

    // --- Layers ---
    let layers: Vec<*const c_char> = if validation {
        let props = entry.enumerate_instance_layer_properties()?;
        if !has_name(
            props.iter().map(|l| l.layer_name.as_ptr()),
            VALIDATION_LAYER,
        ) {
            error!("validation layers requested, but not available");
            return Err(VkError::MissingValidationLayer);
        }
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    // Chained so instance creation itself is covered by the messenger.
    let mut dbg_info = messenger_info();
    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_next: if validation {
            (&mut dbg_info as *mut vk::DebugUtilsMessengerCreateInfoEXT) as *const c_void
        } else {
            std::ptr::null()
        },
        flags,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    let instance = entry.create_instance(&create_info, None)?;
    info!(
        api = "1.1",
        validation,
        extensions = extensions.len(),
        portability = flags.contains(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR),
        "Vulkan instance created"
    );
    Ok(instance)
}

fn messenger_info<'a>() -> vk::DebugUtilsMessengerCreateInfoEXT<'a> {
    vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    }
}

/// Validation output, routed into `tracing` at the matching level.
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => error!(target: "vulkan", ?types, "{msg}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => warn!(target: "vulkan", ?types, "{msg}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => debug!(target: "vulkan", ?types, "{msg}"),
        _ => trace!(target: "vulkan", ?types, "{msg}"),
    }
    vk::FALSE
}
