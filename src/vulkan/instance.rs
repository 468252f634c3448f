use ash::{ext::debug_utils, khr::surface, vk, Entry, Instance};
use log::{info, warn, Level};
use std::ffi::{CStr, CString};

use super::surface::SurfaceProvider;
use crate::{RendererError, Result};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan instance wrapper that owns the global instance, optional validation
/// messenger, and the window surface.
pub struct VulkanInstance {
    entry: Entry,
    instance: Instance,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    debug_utils: Option<debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl VulkanInstance {
    /// Create the instance and the surface handed out by `surface_provider`.
    pub fn from_surface<S: SurfaceProvider>(
        surface_provider: &S,
        app_name: &str,
        enable_validation: bool,
    ) -> Result<Self> {
        unsafe {
            let entry = Entry::load().map_err(|e| {
                RendererError::DeviceInitFailed(format!("Failed to load Vulkan entry: {e:?}"))
            })?;

            let validation_layers = if enable_validation {
                Self::query_validation_layers(&entry)?
            } else {
                Vec::new()
            };
            let validation_enabled = !validation_layers.is_empty();

            let mut extensions = surface_provider.required_extensions();
            if validation_enabled {
                extensions.push(debug_utils::NAME);
            }
            Self::check_extensions(&entry, &extensions)?;
            let extension_ptrs: Vec<*const i8> = extensions.iter().map(|e| e.as_ptr()).collect();
            let layer_ptrs: Vec<*const i8> = validation_layers.iter().map(|l| l.as_ptr()).collect();

            let app_name = CString::new(app_name).unwrap_or_else(|_| c"Ash Editor".to_owned());
            let app_info = vk::ApplicationInfo::default()
                .application_name(&app_name)
                .application_version(vk::make_api_version(0, 0, 1, 0))
                .engine_name(c"Ash Editor Renderer")
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_2);

            let mut create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_extension_names(&extension_ptrs)
                .enabled_layer_names(&layer_ptrs);

            let mut debug_create_info =
                validation_enabled.then_some(Self::debug_messenger_create_info());
            if let Some(ref mut info) = debug_create_info {
                create_info = create_info.push_next(info);
            }

            let instance = entry.create_instance(&create_info, None).map_err(|e| {
                RendererError::DeviceInitFailed(format!("Failed to create Vulkan instance: {e:?}"))
            })?;

            let debug_utils_loader =
                validation_enabled.then(|| debug_utils::Instance::new(&entry, &instance));

            let debug_messenger = if let Some(ref utils) = debug_utils_loader {
                let create_info = Self::debug_messenger_create_info();
                Some(
                    utils
                        .create_debug_utils_messenger(&create_info, None)
                        .map_err(|e| {
                            RendererError::DeviceInitFailed(format!(
                                "Failed to create debug messenger: {e:?}"
                            ))
                        })?,
                )
            } else {
                None
            };

            let surface = surface_provider.create_surface(&entry, &instance)?;
            let surface_loader = surface::Instance::new(&entry, &instance);

            info!(
                "Vulkan instance created ({} extensions, validation {})",
                extensions.len(),
                if validation_enabled { "on" } else { "off" }
            );

            Ok(Self {
                entry,
                instance,
                surface_loader,
                surface,
                debug_utils: debug_utils_loader,
                debug_messenger,
            })
        }
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn surface_loader(&self) -> &surface::Instance {
        &self.surface_loader
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    fn check_extensions(entry: &Entry, required: &[&CStr]) -> Result<()> {
        let available = unsafe { entry.enumerate_instance_extension_properties(None)? };
        let names: Vec<&CStr> = available
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok())
            .collect();
        let missing = missing_extensions(&names, required);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(RendererError::MissingExtension(missing.join(", ")))
        }
    }

    fn query_validation_layers(entry: &Entry) -> Result<Vec<&'static CStr>> {
        let available_layers = unsafe {
            entry.enumerate_instance_layer_properties().map_err(|e| {
                RendererError::DeviceInitFailed(format!(
                    "Failed to enumerate instance layer properties: {e:?}"
                ))
            })?
        };

        let found = available_layers
            .iter()
            .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER));

        if found {
            Ok(vec![VALIDATION_LAYER])
        } else {
            warn!("Validation layer {VALIDATION_LAYER:?} not available");
            Ok(Vec::new())
        }
    }

    fn debug_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
        vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback))
    }
}

/// Names in `required` that are absent from `available`.
pub fn missing_extensions(available: &[&CStr], required: &[&CStr]) -> Vec<String> {
    required
        .iter()
        .filter(|name| !available.contains(name))
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

/// Maps a validation message severity onto a log level.
pub fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Level {
    use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;

    if severity.contains(Severity::ERROR) {
        Level::Error
    } else if severity.contains(Severity::WARNING) {
        Level::Warn
    } else if severity.contains(Severity::INFO) {
        Level::Info
    } else {
        Level::Debug
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger) {
                utils.destroy_debug_utils_messenger(messenger, None);
            }

            if self.surface != vk::SurfaceKHR::null() {
                self.surface_loader.destroy_surface(self.surface, None);
                self.surface = vk::SurfaceKHR::null();
            }

            self.instance.destroy_instance(None);
        }
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_types: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = if !callback_data.is_null() && !(*callback_data).p_message.is_null() {
        CStr::from_ptr((*callback_data).p_message)
            .to_string_lossy()
            .into_owned()
    } else {
        String::from("<null>")
    };

    log::log!(
        target: "vulkan",
        severity_level(message_severity),
        "[{message_types:?}] {message}"
    );

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;
    use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;

    #[test]
    fn severity_maps_to_log_level() {
        assert_eq!(severity_level(Severity::ERROR), Level::Error);
        assert_eq!(severity_level(Severity::WARNING), Level::Warn);
        assert_eq!(severity_level(Severity::INFO), Level::Info);
        assert_eq!(severity_level(Severity::VERBOSE), Level::Debug);
    }

    #[test]
    fn combined_severity_reports_the_most_severe() {
        assert_eq!(
            severity_level(Severity::INFO | Severity::ERROR),
            Level::Error
        );
        assert_eq!(
            severity_level(Severity::VERBOSE | Severity::WARNING),
            Level::Warn
        );
    }

    #[test]
    fn reports_missing_extensions() {
        let available = [c"VK_KHR_surface", c"VK_KHR_xlib_surface"];
        let required = [c"VK_KHR_surface", c"VK_EXT_debug_utils"];
        assert_eq!(
            missing_extensions(&available, &required),
            vec!["VK_EXT_debug_utils".to_string()]
        );
        assert!(missing_extensions(&available, &available).is_empty());
    }
}
