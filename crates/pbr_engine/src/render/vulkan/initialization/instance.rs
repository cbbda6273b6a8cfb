//! Vulkan instance and validation messenger

use ash::extensions::ext::DebugUtils;
use ash::{vk, Entry};
use std::ffi::{c_char, CStr, CString};
use std::rc::Rc;

use crate::render::vulkan::error::{VulkanError, VulkanResult};

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// Instance creation options
#[derive(Debug, Clone)]
pub struct InstanceDesc<'a> {
    /// Application name reported to the driver
    pub application_name: &'a str,
    /// Window-system extensions supplied by the windowing layer
    pub required_extensions: &'a [String],
    /// Enable the Khronos validation layer and debug messenger
    pub enable_validation: bool,
    /// Most verbose level forwarded from the validation layer
    pub log_level: log::LevelFilter,
}

/// Vulkan instance with optional debug messenger, destroyed on drop
pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    extensions: Vec<String>,
}

impl Instance {
    /// Load the Vulkan library and create an instance
    pub fn new(desc: &InstanceDesc<'_>) -> VulkanResult<Rc<Self>> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e}")))?;

        let layers: Vec<String> = if desc.enable_validation {
            let available_layers: Vec<String> = entry
                .enumerate_instance_layer_properties()
                .map_err(VulkanError::api("vkEnumerateInstanceLayerProperties"))?
                .iter()
                .map(|p| unsafe { CStr::from_ptr(p.layer_name.as_ptr()) }.to_string_lossy().into_owned())
                .collect();
            let wanted = vec![VALIDATION_LAYER.to_string()];
            if let Some(missing) = first_missing(&wanted, &available_layers) {
                return Err(VulkanError::MissingLayer(missing));
            }
            wanted
        } else {
            Vec::new()
        };

        // Validation features come from the layer rather than the loader.
        let mut available_extensions = extension_names(
            entry
                .enumerate_instance_extension_properties(None)
                .map_err(VulkanError::api("vkEnumerateInstanceExtensionProperties"))?,
        );
        for layer in &layers {
            let layer_name = to_cstring(layer)?;
            available_extensions.extend(extension_names(
                entry
                    .enumerate_instance_extension_properties(Some(&layer_name))
                    .map_err(VulkanError::api("vkEnumerateInstanceExtensionProperties"))?,
            ));
        }

        let extensions = instance_extensions(desc.required_extensions, desc.enable_validation);
        if let Some(missing) = first_missing(&extensions, &available_extensions) {
            return Err(VulkanError::MissingExtension(missing));
        }

        let app_name = to_cstring(desc.application_name)?;
        let engine_name = to_cstring("pbr_engine")?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let extension_cstrings = extensions.iter().map(|e| to_cstring(e)).collect::<VulkanResult<Vec<_>>>()?;
        let extension_ptrs: Vec<*const c_char> = extension_cstrings.iter().map(|e| e.as_ptr()).collect();
        let layer_names = layers.iter().map(|l| to_cstring(l)).collect::<VulkanResult<Vec<_>>>()?;
        let layer_ptrs: Vec<*const c_char> = layer_names.iter().map(|l| l.as_ptr()).collect();

        let enabled_features = [vk::ValidationFeatureEnableEXT::SYNCHRONIZATION_VALIDATION];
        let mut validation_features =
            vk::ValidationFeaturesEXT::builder().enabled_validation_features(&enabled_features);

        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);
        if desc.enable_validation {
            create_info = create_info.push_next(&mut validation_features);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(VulkanError::api("vkCreateInstance"))?;

        let debug = if desc.enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(severity_for_level(desc.log_level))
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(debug_callback));
            match unsafe { debug_utils.create_debug_utils_messenger(&messenger_info, None) } {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(result) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(VulkanError::api("vkCreateDebugUtilsMessengerEXT")(result));
                }
            }
        } else {
            None
        };

        log::info!(
            "Vulkan instance created ({} extensions, validation {})",
            extensions.len(),
            if desc.enable_validation { "on" } else { "off" }
        );

        Ok(Rc::new(Self {
            entry,
            instance,
            debug,
            extensions,
        }))
    }

    /// Loader entry points
    pub const fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Instance dispatch table
    pub const fn raw(&self) -> &ash::Instance {
        &self.instance
    }

    /// Raw instance handle
    pub fn handle(&self) -> vk::Instance {
        self.instance.handle()
    }

    /// Enabled instance extensions
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Whether the debug messenger is installed
    pub const fn validation_enabled(&self) -> bool {
        self.debug.is_some()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        log::debug!("Vulkan instance destroyed");
    }
}

/// Window-system extensions plus the debug and validation-feature extensions when validating
pub(crate) fn instance_extensions(required: &[String], enable_validation: bool) -> Vec<String> {
    let mut extensions = required.to_vec();
    if enable_validation {
        extensions.push(DebugUtils::name().to_string_lossy().into_owned());
        extensions.push(vk::ExtValidationFeaturesFn::name().to_string_lossy().into_owned());
    }
    extensions
}

fn extension_names(properties: Vec<vk::ExtensionProperties>) -> Vec<String> {
    properties
        .iter()
        .map(|p| unsafe { CStr::from_ptr(p.extension_name.as_ptr()) }.to_string_lossy().into_owned())
        .collect()
}

fn to_cstring(value: &str) -> VulkanResult<CString> {
    CString::new(value).map_err(|_| VulkanError::InitializationFailed(format!("Interior NUL in name {value:?}")))
}

/// First entry of `required` that `available` does not list
pub(crate) fn first_missing(required: &[String], available: &[String]) -> Option<String> {
    required.iter().find(|name| !available.contains(name)).cloned()
}

/// Messenger severities matching the most verbose enabled log level.
///
/// Validation errors are always forwarded.
pub fn severity_for_level(level: log::LevelFilter) -> vk::DebugUtilsMessageSeverityFlagsEXT {
    use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;
    match level {
        log::LevelFilter::Off | log::LevelFilter::Error => Severity::ERROR,
        log::LevelFilter::Warn => Severity::ERROR | Severity::WARNING,
        log::LevelFilter::Info => Severity::ERROR | Severity::WARNING | Severity::INFO,
        log::LevelFilter::Debug | log::LevelFilter::Trace => {
            Severity::ERROR | Severity::WARNING | Severity::INFO | Severity::VERBOSE
        }
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::trace!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_missing() {
        let available = vec!["VK_KHR_surface".to_string(), "VK_KHR_xcb_surface".to_string()];
        assert_eq!(first_missing(&["VK_KHR_surface".to_string()], &available), None);
        assert_eq!(
            first_missing(&["VK_KHR_surface".to_string(), "VK_EXT_debug_utils".to_string()], &available),
            Some("VK_EXT_debug_utils".to_string())
        );
    }

    #[test]
    fn test_validation_enables_feature_extension() {
        let required = vec!["VK_KHR_surface".to_string()];
        assert_eq!(instance_extensions(&required, false), required);

        let validating = instance_extensions(&required, true);
        assert_eq!(validating[0], "VK_KHR_surface");
        assert!(validating.contains(&"VK_EXT_debug_utils".to_string()));
        assert!(validating.contains(&"VK_EXT_validation_features".to_string()));
    }

    #[test]
    fn test_severity_follows_log_level() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;
        assert_eq!(severity_for_level(log::LevelFilter::Off), Severity::ERROR);
        assert!(severity_for_level(log::LevelFilter::Warn).contains(Severity::WARNING));
        assert!(!severity_for_level(log::LevelFilter::Warn).contains(Severity::INFO));
        assert!(severity_for_level(log::LevelFilter::Trace).contains(Severity::VERBOSE));
    }
}
