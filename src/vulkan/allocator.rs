use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use vk_mem::Alloc;

use super::device::VulkanDevice;
use crate::{RendererError, Result};

/// Where an allocation should live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryLocation {
    /// Device-local, never mapped.
    GpuOnly,
    /// Host-visible, written sequentially by the CPU.
    CpuToGpu,
}

impl MemoryLocation {
    fn create_info(self) -> vk_mem::AllocationCreateInfo {
        match self {
            MemoryLocation::GpuOnly => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            },
            MemoryLocation::CpuToGpu => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                required_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
                    | vk::MemoryPropertyFlags::HOST_COHERENT,
                ..Default::default()
            },
        }
    }
}

/// Device memory allocator backed by VMA.
pub struct Allocator {
    inner: vk_mem::Allocator,
    device: Arc<ash::Device>,
}

impl Allocator {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let create_info = vk_mem::AllocatorCreateInfo::new(
            device.instance.instance(),
            &device.device,
            device.physical_device,
        );
        let inner = unsafe { vk_mem::Allocator::new(create_info) }.map_err(|e| {
            RendererError::DeviceInitFailed(format!("Failed to create memory allocator: {e}"))
        })?;
        Ok(Self {
            inner,
            device: Arc::clone(&device.device),
        })
    }

    pub fn device(&self) -> &Arc<ash::Device> {
        &self.device
    }

    pub fn create_buffer(
        self: &Arc<Self>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<AllocatedBuffer> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let (buffer, allocation) = unsafe {
            self.inner
                .create_buffer(&buffer_info, &location.create_info())
                .map_err(|e| RendererError::VulkanError(format!("Failed to create buffer: {e}")))?
        };

        Ok(AllocatedBuffer {
            allocator: Arc::clone(self),
            buffer,
            allocation: Some(allocation),
            size,
        })
    }

    /// Host-visible transfer source filled with `data`.
    pub fn create_staging_buffer<T: Pod>(self: &Arc<Self>, data: &[T]) -> Result<AllocatedBuffer> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mut staging = self.create_buffer(
            bytes.len().max(1) as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        staging.write_bytes(0, bytes)?;
        Ok(staging)
    }

    /// Creates a 2D image and a view over all of its mip levels.
    pub fn create_image(self: &Arc<Self>, desc: &ImageDesc) -> Result<AllocatedImage> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let mut alloc_info = MemoryLocation::GpuOnly.create_info();
        if desc.dedicated {
            alloc_info.flags |= vk_mem::AllocationCreateFlags::DEDICATED_MEMORY;
        }

        let (image, mut allocation) = unsafe {
            self.inner
                .create_image(&image_info, &alloc_info)
                .map_err(|e| RendererError::VulkanError(format!("Failed to create image: {e}")))?
        };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect,
                base_mip_level: 0,
                level_count: desc.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = match unsafe { self.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe { self.inner.destroy_image(image, &mut allocation) };
                return Err(RendererError::VulkanError(format!(
                    "Failed to create image view: {e}"
                )));
            }
        };

        Ok(AllocatedImage {
            allocator: Arc::clone(self),
            image,
            view,
            allocation: Some(allocation),
            format: desc.format,
            extent: desc.extent,
            mip_levels: desc.mip_levels,
        })
    }
}

/// Creation parameters for [`Allocator::create_image`].
#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub mip_levels: u32,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    pub dedicated: bool,
}

impl ImageDesc {
    pub fn color(format: vk::Format, extent: vk::Extent2D, usage: vk::ImageUsageFlags) -> Self {
        Self {
            format,
            extent,
            mip_levels: 1,
            usage,
            aspect: vk::ImageAspectFlags::COLOR,
            dedicated: false,
        }
    }

    pub fn depth(format: vk::Format, extent: vk::Extent2D) -> Self {
        Self {
            format,
            extent,
            mip_levels: 1,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: vk::ImageAspectFlags::DEPTH,
            dedicated: false,
        }
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }

    pub fn dedicated(mut self) -> Self {
        self.dedicated = true;
        self
    }
}

/// Buffer plus its allocation; freed on drop.
pub struct AllocatedBuffer {
    allocator: Arc<Allocator>,
    buffer: vk::Buffer,
    allocation: Option<vk_mem::Allocation>,
    size: vk::DeviceSize,
}

impl AllocatedBuffer {
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Copies `data` into the buffer at `offset` through a transient mapping.
    pub fn write<T: Pod>(&mut self, offset: vk::DeviceSize, data: &[T]) -> Result<()> {
        self.write_bytes(offset, bytemuck::cast_slice(data))
    }

    pub fn write_bytes(&mut self, offset: vk::DeviceSize, bytes: &[u8]) -> Result<()> {
        let end = offset + bytes.len() as vk::DeviceSize;
        if end > self.size {
            return Err(RendererError::VulkanError(format!(
                "Buffer write of {} bytes at offset {offset} exceeds size {}",
                bytes.len(),
                self.size
            )));
        }
        let allocation = self
            .allocation
            .as_mut()
            .ok_or_else(|| RendererError::VulkanError("Buffer already released".into()))?;

        unsafe {
            let mapped = self.allocator.inner.map_memory(allocation)?;
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                mapped.add(offset as usize),
                bytes.len(),
            );
            self.allocator.inner.unmap_memory(allocation);
        }
        Ok(())
    }
}

impl Drop for AllocatedBuffer {
    fn drop(&mut self) {
        if let Some(mut allocation) = self.allocation.take() {
            unsafe { self.allocator.inner.destroy_buffer(self.buffer, &mut allocation) };
        }
    }
}

/// Image, view and allocation; freed on drop.
pub struct AllocatedImage {
    allocator: Arc<Allocator>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<vk_mem::Allocation>,
    format: vk::Format,
    extent: vk::Extent2D,
    mip_levels: u32,
}

impl AllocatedImage {
    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }
}

impl Drop for AllocatedImage {
    fn drop(&mut self) {
        unsafe {
            self.allocator.device.destroy_image_view(self.view, None);
            if let Some(mut allocation) = self.allocation.take() {
                self.allocator.inner.destroy_image(self.image, &mut allocation);
            }
        }
    }
}
