use std::ffi::{c_char, c_void, CStr};
use ash::vk;
use color_eyre::Result;
use raw_window_handle::RawDisplayHandle;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan entry and instance. In debug builds the Khronos validation layer
/// is enabled when present and its messages are routed into `log`.
pub struct RenderInstance {
    pub instance: ash::Instance,
    pub entry: ash::Entry,

    debug_messenger: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl RenderInstance {
    pub fn new(display_handle: RawDisplayHandle) -> Result<Self> {
        let entry = ash::Entry::linked();
        let validation = cfg!(debug_assertions) && Self::validation_available(&entry)?;
        if cfg!(debug_assertions) && !validation {
            log::warn!("validation layer unavailable, running without it");
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"quadra")
            .api_version(vk::API_VERSION_1_3);

        let layer_names: Vec<*const c_char> = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let mut extension_names: Vec<*const c_char> =
            ash_window::enumerate_required_extensions(display_handle)?.to_vec();
        if validation {
            extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
        }
        #[cfg(target_os = "macos")]
        {
            extension_names.push(ash::khr::portability_enumeration::NAME.as_ptr());
            extension_names.push(ash::khr::get_physical_device_properties2::NAME.as_ptr());
        }

        let instance_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layer_names)
            .enabled_extension_names(&extension_names);
        #[cfg(target_os = "macos")]
        let instance_info =
            instance_info.flags(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR);

        let instance = unsafe { entry.create_instance(&instance_info, None)? };

        let debug_messenger = if validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(debug_callback));
            let messenger = unsafe { loader.create_debug_utils_messenger(&info, None)? };
            Some((loader, messenger))
        } else {
            None
        };

        Ok(Self {
            instance,
            entry,
            debug_messenger,
        })
    }

    fn validation_available(entry: &ash::Entry) -> Result<bool> {
        let layer_props = unsafe { entry.enumerate_instance_layer_properties()? };
        Ok(layer_props.iter().any(|props| {
            props
                .layer_name_as_c_str()
                .is_ok_and(|name| name == VALIDATION_LAYER)
        }))
    }
}

impl Drop for RenderInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug_messenger.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let level = match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::Level::Error,
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::Level::Warn,
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::Level::Info,
        _ => log::Level::Trace,
    };
    let message = unsafe { CStr::from_ptr((*callback_data).p_message) };
    log::log!(level, "[vulkan {message_type:?}] {message:?}");

    vk::FALSE
}
