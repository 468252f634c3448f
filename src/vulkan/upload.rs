use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use super::device::SharedQueue;
use crate::{RendererError, Result};

struct UploadState {
    pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
}

/// Synchronous one-shot submission helper.
///
/// Owns a command pool, one primary command buffer and one fence on the upload
/// queue. Calls are serialized, so the asset worker and the main thread can
/// both upload.
pub struct UploadContext {
    device: Arc<ash::Device>,
    queue: Arc<SharedQueue>,
    state: Mutex<UploadState>,
}

impl UploadContext {
    pub fn new(device: Arc<ash::Device>, queue: Arc<SharedQueue>) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue.family())
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        unsafe {
            let pool = device.create_command_pool(&pool_info, None).map_err(|e| {
                RendererError::VulkanError(format!("Failed to create upload command pool: {e}"))
            })?;

            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let command_buffer = match device.allocate_command_buffers(&alloc_info) {
                Ok(buffers) => buffers[0],
                Err(e) => {
                    device.destroy_command_pool(pool, None);
                    return Err(RendererError::VulkanError(format!(
                        "Failed to allocate upload command buffer: {e}"
                    )));
                }
            };

            let fence = match device.create_fence(&vk::FenceCreateInfo::default(), None) {
                Ok(fence) => fence,
                Err(e) => {
                    device.destroy_command_pool(pool, None);
                    return Err(RendererError::VulkanError(format!(
                        "Failed to create upload fence: {e}"
                    )));
                }
            };

            Ok(Self {
                device,
                queue,
                state: Mutex::new(UploadState {
                    pool,
                    command_buffer,
                    fence,
                }),
            })
        }
    }

    pub fn queue_family(&self) -> u32 {
        self.queue.family()
    }

    /// Records `record` into the upload command buffer, submits it and blocks
    /// until the GPU has finished.
    pub fn immediate_submit<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let state = self.state.lock();
        let cmd = state.command_buffer;

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            let recorded = self
                .device
                .begin_command_buffer(cmd, &begin_info)
                .map_err(RendererError::from)
                .and_then(|()| {
                    record(&self.device, cmd);
                    self.device
                        .end_command_buffer(cmd)
                        .map_err(RendererError::from)
                });

            let completed = recorded.and_then(|()| {
                let command_buffers = [cmd];
                let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);
                self.queue
                    .submit(&self.device, std::slice::from_ref(&submit), state.fence)?;
                self.device
                    .wait_for_fences(&[state.fence], true, u64::MAX)
                    .map_err(RendererError::from)
            });

            // The pool lacks RESET_COMMAND_BUFFER; only a pool reset returns the
            // buffer to the initial state, whichever step failed.
            with_cleanup(completed, || {
                self.device.reset_fences(&[state.fence])?;
                self.device
                    .reset_command_pool(state.pool, vk::CommandPoolResetFlags::empty())?;
                Ok(())
            })
        }
    }
}

/// Runs `cleanup` whatever `result` is. The first error wins.
fn with_cleanup<T>(result: Result<T>, cleanup: impl FnOnce() -> Result<()>) -> Result<T> {
    let cleaned = cleanup();
    let value = result?;
    cleaned.map(|()| value)
}

impl Drop for UploadContext {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        unsafe {
            self.device.destroy_fence(state.fence, None);
            self.device.destroy_command_pool(state.pool, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_runs_after_a_failed_step() {
        let mut reset = false;
        let result: Result<()> = with_cleanup(Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY.into()), || {
            reset = true;
            Ok(())
        });
        assert!(reset);
        assert!(matches!(
            result,
            Err(RendererError::Vulkan(vk::Result::ERROR_OUT_OF_HOST_MEMORY))
        ));
    }

    #[test]
    fn cleanup_error_surfaces_after_success() {
        let result = with_cleanup(Ok(7), || Err(vk::Result::ERROR_DEVICE_LOST.into()));
        assert!(matches!(
            result,
            Err(RendererError::Vulkan(vk::Result::ERROR_DEVICE_LOST))
        ));
        assert_eq!(with_cleanup(Ok(7), || Ok(())).unwrap(), 7);
    }
}
