use std::sync::Arc;

use ash::{khr, vk};
use log::info;

use super::allocator::{AllocatedImage, Allocator, ImageDesc};
use super::barrier::{transition_image, LayoutTransition};
use super::device::VulkanDevice;
use super::render_pass::{create_framebuffer, destroy_framebuffers};
use super::upload::UploadContext;
use crate::{RendererError, Result};

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Prefers `B8G8R8A8_SRGB` with the sRGB non-linear color space.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// FIFO is the only mode every implementation must support.
pub fn choose_present_mode(_available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    vk::PresentModeKHR::FIFO
}

/// Uses the surface's current extent unless it is the "window decides" sentinel.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: window
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: window
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// `min + 1`, capped by the maximum when the surface reports one.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        desired.min(caps.max_image_count)
    } else {
        desired
    }
}

/// First candidate usable as an optimal-tiling depth attachment.
pub fn choose_depth_format(supports: impl Fn(vk::Format) -> bool) -> Option<vk::Format> {
    DEPTH_FORMAT_CANDIDATES
        .iter()
        .copied()
        .find(|&format| supports(format))
}

/// Sharing mode for images used by both the graphics and present families.
pub fn sharing_families(graphics: u32, present: u32) -> (vk::SharingMode, Vec<u32>) {
    if graphics == present {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (vk::SharingMode::CONCURRENT, vec![graphics, present])
    }
}

pub fn is_zero_extent(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

/// Structural description of a built swapchain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainSummary {
    pub image_count: usize,
    pub view_count: usize,
    pub framebuffer_count: usize,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub depth_format: vk::Format,
}

/// Everything a build derives from the surface and the window size.
///
/// Two plans from the same support and extent are equal, so a rebuild at a
/// steady window size recreates an equivalent swapchain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub min_image_count: u32,
}

impl SwapchainPlan {
    /// Fails with [`RendererError::SwapchainOutOfDate`] while the surface has no area.
    pub fn new(support: &SurfaceSupport, window_extent: vk::Extent2D) -> Result<Self> {
        let caps = &support.capabilities;
        let surface_format = support.surface_format()?;
        let extent = choose_extent(caps, window_extent);
        if is_zero_extent(extent) {
            return Err(RendererError::SwapchainOutOfDate);
        }
        Ok(Self {
            format: surface_format.format,
            color_space: surface_format.color_space,
            present_mode: choose_present_mode(&support.present_modes),
            extent,
            min_image_count: choose_image_count(caps),
        })
    }

    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format: self.format,
            color_space: self.color_space,
        }
    }
}

/// Surface capabilities queried before each build.
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub fn query(device: &VulkanDevice) -> Result<Self> {
        let loader = device.instance.surface_loader();
        let surface = device.instance.surface();
        let pdev = device.physical_device;
        unsafe {
            Ok(Self {
                capabilities: loader.get_physical_device_surface_capabilities(pdev, surface)?,
                formats: loader.get_physical_device_surface_formats(pdev, surface)?,
                present_modes: loader.get_physical_device_surface_present_modes(pdev, surface)?,
            })
        }
    }

    pub fn surface_format(&self) -> Result<vk::SurfaceFormatKHR> {
        choose_surface_format(&self.formats)
            .ok_or_else(|| RendererError::DeviceInitFailed("Surface reports no formats".into()))
    }
}

/// Presentable images, their views, a shared depth image and one framebuffer per image.
pub struct Swapchain {
    device: Arc<ash::Device>,
    loader: khr::swapchain::Device,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    depth: Option<AllocatedImage>,
    framebuffers: Vec<vk::Framebuffer>,
    surface_format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    depth_format: vk::Format,
    built: bool,
}

impl Swapchain {
    /// Builds the swapchain and its dependents, then moves every image to
    /// `PRESENT_SRC_KHR` so the first frame's blit sees a known layout.
    pub fn create(
        device: &VulkanDevice,
        allocator: &Arc<Allocator>,
        support: &SurfaceSupport,
        window_extent: vk::Extent2D,
        depth_format: vk::Format,
        render_pass: vk::RenderPass,
        upload: &UploadContext,
    ) -> Result<Self> {
        let plan = SwapchainPlan::new(support, window_extent)?;
        let surface_format = plan.surface_format();
        let extent = plan.extent;
        let (sharing_mode, families) = sharing_families(
            device.queue_families.graphics,
            device.queue_families.present,
        );

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(device.instance.surface())
            .min_image_count(plan.min_image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&families)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true);

        let loader = device.swapchain_loader.clone();
        let handle = unsafe { loader.create_swapchain(&create_info, None) }.map_err(|e| {
            RendererError::VulkanError(format!("Failed to create swapchain: {e}"))
        })?;

        let mut swapchain = Self {
            device: Arc::clone(&device.device),
            loader,
            handle,
            images: Vec::new(),
            views: Vec::new(),
            depth: None,
            framebuffers: Vec::new(),
            surface_format,
            extent,
            depth_format,
            built: true,
        };

        swapchain.images = unsafe { swapchain.loader.get_swapchain_images(handle)? };
        for &image in &swapchain.images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .subresource_range(LayoutTransition::color(
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::UNDEFINED,
                )
                .range());
            let view = unsafe { swapchain.device.create_image_view(&view_info, None) }.map_err(
                |e| RendererError::VulkanError(format!("Failed to create swapchain view: {e}")),
            )?;
            swapchain.views.push(view);
        }

        let depth = allocator.create_image(&ImageDesc::depth(depth_format, extent))?;
        for &view in &swapchain.views {
            let framebuffer =
                create_framebuffer(&swapchain.device, render_pass, &[view, depth.view()], extent)?;
            swapchain.framebuffers.push(framebuffer);
        }
        swapchain.depth = Some(depth);

        let images = swapchain.images.clone();
        upload.immediate_submit(|device, cmd| {
            for &image in &images {
                transition_image(
                    device,
                    cmd,
                    image,
                    LayoutTransition::color(
                        vk::ImageLayout::UNDEFINED,
                        vk::ImageLayout::PRESENT_SRC_KHR,
                    ),
                );
            }
        })?;

        info!(
            "Swapchain built: {} images, {:?}, {}x{}",
            swapchain.images.len(),
            surface_format.format,
            extent.width,
            extent.height
        );
        Ok(swapchain)
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn loader(&self) -> &khr::swapchain::Device {
        &self.loader
    }

    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image(&self, index: usize) -> vk::Image {
        self.images[index]
    }

    pub fn depth_view(&self) -> vk::ImageView {
        self.depth
            .as_ref()
            .map_or(vk::ImageView::null(), |d| d.view())
    }

    pub fn framebuffer(&self, index: usize) -> vk::Framebuffer {
        self.framebuffers[index]
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn summary(&self) -> SwapchainSummary {
        SwapchainSummary {
            image_count: self.images.len(),
            view_count: self.views.len(),
            framebuffer_count: self.framebuffers.len(),
            format: self.surface_format.format,
            extent: self.extent,
            depth_format: self.depth_format,
        }
    }

    /// Raw acquire; the caller classifies the result.
    pub fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
    ) -> std::result::Result<(u32, bool), vk::Result> {
        unsafe {
            self.loader
                .acquire_next_image(self.handle, u64::MAX, semaphore, vk::Fence::null())
        }
    }

    /// Destroys framebuffers, depth, views and the swapchain. Safe to call twice.
    pub fn destroy(&mut self) {
        if !self.built {
            return;
        }
        destroy_framebuffers(&self.device, &mut self.framebuffers);
        self.depth = None;
        for view in self.views.drain(..) {
            unsafe { self.device.destroy_image_view(view, None) };
        }
        self.images.clear();
        unsafe { self.loader.destroy_swapchain(self.handle, None) };
        self.handle = vk::SwapchainKHR::null();
        self.built = false;
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy();
    }
}
