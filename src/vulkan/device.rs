use std::ffi::CStr;
use std::sync::Arc;

use ash::{khr, vk};
use log::info;
use parking_lot::Mutex;

use super::instance::VulkanInstance;
use crate::{RendererError, Result};

/// A device queue that may be shared between threads.
///
/// Vulkan requires external synchronization of `vkQueueSubmit` and
/// `vkQueuePresentKHR`; every submission goes through `lock`.
pub struct SharedQueue {
    handle: vk::Queue,
    family: u32,
    index: u32,
    lock: Mutex<()>,
}

impl SharedQueue {
    fn new(device: &ash::Device, family: u32, index: u32) -> Self {
        Self {
            handle: unsafe { device.get_device_queue(family, index) },
            family,
            index,
            lock: Mutex::new(()),
        }
    }

    pub fn handle(&self) -> vk::Queue {
        self.handle
    }

    pub fn family(&self) -> u32 {
        self.family
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn submit(
        &self,
        device: &ash::Device,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> Result<()> {
        let _guard = self.lock.lock();
        unsafe {
            device
                .queue_submit(self.handle, submits, fence)
                .map_err(|e| RendererError::VulkanError(format!("Failed to submit queue: {e}")))
        }
    }

    /// Present and report whether the swapchain was suboptimal.
    pub fn present(
        &self,
        loader: &khr::swapchain::Device,
        info: &vk::PresentInfoKHR<'_>,
    ) -> std::result::Result<bool, vk::Result> {
        let _guard = self.lock.lock();
        unsafe { loader.queue_present(self.handle, info) }
    }

    pub fn wait_idle(&self, device: &ash::Device) -> Result<()> {
        let _guard = self.lock.lock();
        unsafe { device.queue_wait_idle(self.handle)? };
        Ok(())
    }
}

/// Queue family choice for a physical device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
    /// Number of queues exposed by the graphics family.
    pub graphics_queue_count: u32,
}

impl QueueFamilies {
    /// Upload work goes to a second graphics-family queue when one exists.
    pub fn has_dedicated_upload(&self) -> bool {
        self.graphics_queue_count > 1
    }
}

/// Picks the first graphics family and a present family, preferring one family for both.
pub fn select_queue_families(
    families: &[vk::QueueFamilyProperties],
    supports_present: impl Fn(u32) -> bool,
) -> Option<QueueFamilies> {
    let graphics: Vec<u32> = families
        .iter()
        .enumerate()
        .filter(|(_, f)| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|(i, _)| i as u32)
        .collect();

    let (graphics, present) = match graphics.iter().copied().find(|&i| supports_present(i)) {
        Some(index) => (index, index),
        None => {
            let graphics = *graphics.first()?;
            let present = (0..families.len() as u32).find(|&i| supports_present(i))?;
            (graphics, present)
        }
    };

    Some(QueueFamilies {
        graphics,
        present,
        graphics_queue_count: families[graphics as usize].queue_count,
    })
}

/// Ranks devices so that discrete GPUs win over integrated, virtual, and CPU ones.
pub fn device_type_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 4,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 3,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 1,
        _ => 0,
    }
}

/// Whether `available` contains every bit of `wanted`.
pub fn format_supports(available: vk::FormatFeatureFlags, wanted: vk::FormatFeatureFlags) -> bool {
    (available & wanted) == wanted
}

/// Logical device with its queues and the swapchain loader.
pub struct VulkanDevice {
    pub device: Arc<ash::Device>,
    pub physical_device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilies,
    pub graphics_queue: Arc<SharedQueue>,
    pub present_queue: Arc<SharedQueue>,
    /// Queue used by the upload context; aliases `graphics_queue` when the
    /// graphics family exposes a single queue.
    pub upload_queue: Arc<SharedQueue>,
    pub swapchain_loader: khr::swapchain::Device,
    pub instance: Arc<VulkanInstance>,
}

impl VulkanDevice {
    pub fn new(instance: Arc<VulkanInstance>) -> Result<Self> {
        let vk_instance = instance.instance();
        let physical_devices = unsafe { vk_instance.enumerate_physical_devices() }.map_err(|e| {
            RendererError::DeviceInitFailed(format!("Failed to enumerate physical devices: {e}"))
        })?;

        let mut candidates = Vec::new();
        for physical_device in physical_devices {
            if let Some(families) = Self::queue_families(&instance, physical_device)? {
                if Self::supports_swapchain(vk_instance, physical_device)? {
                    let properties =
                        unsafe { vk_instance.get_physical_device_properties(physical_device) };
                    candidates.push((physical_device, properties, families));
                }
            }
        }

        let (physical_device, properties, queue_families) = candidates
            .into_iter()
            .max_by_key(|(_, props, _)| device_type_score(props.device_type))
            .ok_or_else(|| {
                RendererError::DeviceInitFailed("No Vulkan-capable GPU with presentation".into())
            })?;

        let device_name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unknown>".to_string());
        info!(
            "Selected GPU '{device_name}' ({:?}), graphics family {}, present family {}",
            properties.device_type, queue_families.graphics, queue_families.present
        );

        let graphics_queue_count = if queue_families.has_dedicated_upload() { 2 } else { 1 };
        let graphics_priorities = [1.0f32, 0.5];
        let present_priorities = [1.0f32];

        let mut queue_infos = vec![vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_families.graphics)
            .queue_priorities(&graphics_priorities[..graphics_queue_count])];
        if queue_families.present != queue_families.graphics {
            queue_infos.push(
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(queue_families.present)
                    .queue_priorities(&present_priorities),
            );
        }

        let extensions = [khr::swapchain::NAME.as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe {
            vk_instance
                .create_device(physical_device, &create_info, None)
                .map_err(|e| {
                    RendererError::DeviceInitFailed(format!("Failed to create device: {e}"))
                })?
        };
        let device = Arc::new(device);

        let graphics_queue = Arc::new(SharedQueue::new(&device, queue_families.graphics, 0));
        let present_queue = if queue_families.present == queue_families.graphics {
            Arc::clone(&graphics_queue)
        } else {
            Arc::new(SharedQueue::new(&device, queue_families.present, 0))
        };
        let upload_queue = if queue_families.has_dedicated_upload() {
            info!("Using a dedicated upload queue");
            Arc::new(SharedQueue::new(&device, queue_families.graphics, 1))
        } else {
            info!("Upload work shares the graphics queue");
            Arc::clone(&graphics_queue)
        };

        let memory_properties =
            unsafe { vk_instance.get_physical_device_memory_properties(physical_device) };
        let swapchain_loader = khr::swapchain::Device::new(vk_instance, &device);

        Ok(Self {
            device,
            physical_device,
            properties,
            memory_properties,
            queue_families,
            graphics_queue,
            present_queue,
            upload_queue,
            swapchain_loader,
            instance,
        })
    }

    fn queue_families(
        instance: &VulkanInstance,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Option<QueueFamilies>> {
        let families = unsafe {
            instance
                .instance()
                .get_physical_device_queue_family_properties(physical_device)
        };
        let mut present_support = Vec::with_capacity(families.len());
        for index in 0..families.len() as u32 {
            let supported = unsafe {
                instance.surface_loader().get_physical_device_surface_support(
                    physical_device,
                    index,
                    instance.surface(),
                )?
            };
            present_support.push(supported);
        }
        Ok(select_queue_families(&families, |i| present_support[i as usize]))
    }

    fn supports_swapchain(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Result<bool> {
        let extensions = unsafe { instance.enumerate_device_extension_properties(physical_device)? };
        let wanted: &CStr = khr::swapchain::NAME;
        Ok(extensions
            .iter()
            .any(|ext| ext.extension_name_as_c_str() == Ok(wanted)))
    }

    pub fn min_uniform_buffer_offset_alignment(&self) -> u64 {
        self.properties.limits.min_uniform_buffer_offset_alignment
    }

    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .instance()
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    /// Optimal-tiling feature check for `format`.
    pub fn supports_optimal(&self, format: vk::Format, wanted: vk::FormatFeatureFlags) -> bool {
        format_supports(self.format_properties(format).optimal_tiling_features, wanted)
    }

    /// Whether mip chains for `format` can be generated with linear blits.
    pub fn supports_linear_blit(&self, format: vk::Format) -> bool {
        self.supports_optimal(
            format,
            vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR
                | vk::FormatFeatureFlags::BLIT_SRC
                | vk::FormatFeatureFlags::BLIT_DST,
        )
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn prefers_family_with_graphics_and_present() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::COMPUTE, 2),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 16),
        ];
        let selected = select_queue_families(&families, |i| i != 0).unwrap();
        assert_eq!(selected.graphics, 2);
        assert_eq!(selected.present, 2);
        assert!(selected.has_dedicated_upload());
    }

    #[test]
    fn falls_back_to_separate_present_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::TRANSFER, 1),
        ];
        let selected = select_queue_families(&families, |i| i == 1).unwrap();
        assert_eq!(selected.graphics, 0);
        assert_eq!(selected.present, 1);
        assert!(!selected.has_dedicated_upload());
    }

    #[test]
    fn no_graphics_family_is_rejected() {
        let families = [family(vk::QueueFlags::COMPUTE, 4)];
        assert!(select_queue_families(&families, |_| true).is_none());
    }

    #[test]
    fn discrete_gpus_rank_first() {
        assert!(
            device_type_score(vk::PhysicalDeviceType::DISCRETE_GPU)
                > device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
        );
        assert!(
            device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
                > device_type_score(vk::PhysicalDeviceType::CPU)
        );
    }

    #[test]
    fn format_support_requires_every_bit() {
        let available = vk::FormatFeatureFlags::SAMPLED_IMAGE
            | vk::FormatFeatureFlags::BLIT_SRC
            | vk::FormatFeatureFlags::BLIT_DST;
        assert!(format_supports(
            available,
            vk::FormatFeatureFlags::BLIT_SRC | vk::FormatFeatureFlags::BLIT_DST
        ));
        assert!(!format_supports(
            available,
            vk::FormatFeatureFlags::BLIT_SRC | vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR
        ));
    }
}
