use std::sync::Arc;

use ash::vk;

use crate::{RendererError, Result};

/// Per-slot synchronization primitives.
pub struct FrameSync {
    device: Arc<ash::Device>,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

impl FrameSync {
    /// The fence starts signaled so the first wait on a fresh slot returns immediately.
    pub fn new(device: Arc<ash::Device>) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            let image_available = device.create_semaphore(&semaphore_info, None).map_err(|e| {
                RendererError::VulkanError(format!("Failed to create semaphore: {e}"))
            })?;
            let render_finished = device.create_semaphore(&semaphore_info, None).map_err(|e| {
                RendererError::VulkanError(format!("Failed to create semaphore: {e}"))
            })?;
            let in_flight = device
                .create_fence(&fence_info, None)
                .map_err(|e| RendererError::VulkanError(format!("Failed to create fence: {e}")))?;

            Ok(Self {
                device,
                image_available,
                render_finished,
                in_flight,
            })
        }
    }

    pub fn wait(&self) -> Result<()> {
        unsafe {
            self.device
                .wait_for_fences(&[self.in_flight], true, u64::MAX)?;
        }
        Ok(())
    }

    pub fn reset(&self) -> Result<()> {
        unsafe { self.device.reset_fences(&[self.in_flight])? };
        Ok(())
    }

    /// Restores the slot after a frame that acquired an image but never submitted.
    ///
    /// The acquire semaphore may hold a signal nothing will wait on, and the
    /// fence may be reset with no submission to signal it, so both are
    /// recreated once the device is idle.
    pub fn rearm(&mut self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
            let image_available = self
                .device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?;
            let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
            let in_flight = match self.device.create_fence(&fence_info, None) {
                Ok(fence) => fence,
                Err(e) => {
                    self.device.destroy_semaphore(image_available, None);
                    return Err(e.into());
                }
            };
            self.device.destroy_semaphore(self.image_available, None);
            self.device.destroy_fence(self.in_flight, None);
            self.image_available = image_available;
            self.in_flight = in_flight;
        }
        Ok(())
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.image_available, None);
            self.device.destroy_semaphore(self.render_finished, None);
            self.device.destroy_fence(self.in_flight, None);
        }
    }
}
