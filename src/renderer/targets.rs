use std::sync::Arc;

use ash::vk;

use crate::vulkan::allocator::{AllocatedImage, Allocator, ImageDesc};
use crate::vulkan::render_pass::{create_framebuffer, destroy_framebuffers};
use crate::vulkan::swapchain::Swapchain;
use crate::Result;

pub const VIEWPORT_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw() | vk::ImageUsageFlags::SAMPLED.as_raw(),
);

pub const EDITOR_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw() | vk::ImageUsageFlags::TRANSFER_SRC.as_raw(),
);

/// Full-image blit between two same-sized color images.
pub fn full_blit(extent: vk::Extent2D) -> vk::ImageBlit {
    let layers = vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    };
    let corner = vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: 1,
    };
    vk::ImageBlit {
        src_subresource: layers,
        src_offsets: [vk::Offset3D::default(), corner],
        dst_subresource: layers,
        dst_offsets: [vk::Offset3D::default(), corner],
    }
}

/// Full-image copy between two same-sized, size-compatible color images.
pub fn full_copy(extent: vk::Extent2D) -> vk::ImageCopy {
    let layers = vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    };
    vk::ImageCopy {
        src_subresource: layers,
        src_offset: vk::Offset3D::default(),
        dst_subresource: layers,
        dst_offset: vk::Offset3D::default(),
        extent: vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        },
    }
}

pub fn is_srgb(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::B8G8R8A8_SRGB
            | vk::Format::R8G8B8A8_SRGB
            | vk::Format::A8B8G8R8_SRGB_PACK32
            | vk::Format::B8G8R8_SRGB
            | vk::Format::R8G8B8_SRGB
    )
}

/// Format of the editor images.
///
/// The gamma pass already encodes for display, so the editor images use the
/// swapchain format without its sRGB encoding and the composite stores the
/// encoded values unchanged.
pub fn editor_format(swapchain: vk::Format) -> vk::Format {
    match swapchain {
        vk::Format::B8G8R8A8_SRGB => vk::Format::B8G8R8A8_UNORM,
        vk::Format::R8G8B8A8_SRGB => vk::Format::R8G8B8A8_UNORM,
        vk::Format::A8B8G8R8_SRGB_PACK32 => vk::Format::A8B8G8R8_UNORM_PACK32,
        vk::Format::B8G8R8_SRGB => vk::Format::B8G8R8_UNORM,
        vk::Format::R8G8B8_SRGB => vk::Format::R8G8B8_UNORM,
        other => other,
    }
}

/// How editor pixels reach the swapchain image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentTransfer {
    Blit,
    /// Raw texel copy. A blit into an sRGB image from its UNORM twin would
    /// encode the values a second time.
    Copy,
}

pub fn present_transfer(editor: vk::Format, swapchain: vk::Format) -> PresentTransfer {
    if editor == swapchain {
        PresentTransfer::Blit
    } else {
        PresentTransfer::Copy
    }
}

/// sRGB transfer function, linear to encoded.
pub fn srgb_encode(value: f32) -> f32 {
    let value = value.clamp(0.0, 1.0);
    if value <= 0.003_130_8 {
        value * 12.92
    } else {
        1.055 * value.powf(1.0 / 2.4) - 0.055
    }
}

/// Encoded value the swapchain image receives for a linear viewport value.
///
/// Follows the gamma pass, the composite store into the editor image and the
/// transfer into the swapchain; both transfers keep the stored texels as-is.
pub fn presented_value(linear: f32, gamma: f32, swapchain: vk::Format) -> f32 {
    let graded = linear.max(0.0).powf(1.0 / gamma);
    if is_srgb(editor_format(swapchain)) {
        srgb_encode(graded)
    } else {
        graded
    }
}

/// Offscreen images sized to the swapchain, one per swapchain image.
///
/// Viewport images receive the 3D pass and share the swapchain depth image.
/// Editor images receive the overlay and are transferred into the swapchain.
pub struct RenderTargets {
    device: Arc<ash::Device>,
    transfer: PresentTransfer,
    viewport: Vec<AllocatedImage>,
    viewport_framebuffers: Vec<vk::Framebuffer>,
    editor: Vec<AllocatedImage>,
    editor_framebuffers: Vec<vk::Framebuffer>,
    extent: vk::Extent2D,
}

impl RenderTargets {
    pub fn create(
        allocator: &Arc<Allocator>,
        swapchain: &Swapchain,
        viewport_pass: vk::RenderPass,
        editor_pass: vk::RenderPass,
    ) -> Result<Self> {
        let extent = swapchain.extent();
        let format = swapchain.format();
        let editor_format = editor_format(format);
        let mut targets = Self {
            device: Arc::clone(allocator.device()),
            transfer: present_transfer(editor_format, format),
            viewport: Vec::with_capacity(swapchain.image_count()),
            viewport_framebuffers: Vec::with_capacity(swapchain.image_count()),
            editor: Vec::with_capacity(swapchain.image_count()),
            editor_framebuffers: Vec::with_capacity(swapchain.image_count()),
            extent,
        };

        for _ in 0..swapchain.image_count() {
            let viewport = allocator.create_image(&ImageDesc::color(format, extent, VIEWPORT_USAGE))?;
            let framebuffer = create_framebuffer(
                &targets.device,
                viewport_pass,
                &[viewport.view(), swapchain.depth_view()],
                extent,
            )?;
            targets.viewport.push(viewport);
            targets.viewport_framebuffers.push(framebuffer);

            let editor =
                allocator.create_image(&ImageDesc::color(editor_format, extent, EDITOR_USAGE))?;
            let framebuffer =
                create_framebuffer(&targets.device, editor_pass, &[editor.view()], extent)?;
            targets.editor.push(editor);
            targets.editor_framebuffers.push(framebuffer);
        }

        log::debug!(
            "Created {} viewport and editor targets at {}x{}",
            targets.viewport.len(),
            extent.width,
            extent.height
        );
        Ok(targets)
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn transfer(&self) -> PresentTransfer {
        self.transfer
    }

    pub fn len(&self) -> usize {
        self.viewport.len()
    }

    pub fn is_empty(&self) -> bool {
        self.viewport.is_empty()
    }

    pub fn viewport_views(&self) -> Vec<vk::ImageView> {
        self.viewport.iter().map(AllocatedImage::view).collect()
    }

    pub fn viewport_view(&self, index: usize) -> vk::ImageView {
        self.viewport[index].view()
    }

    pub fn viewport_framebuffer(&self, index: usize) -> vk::Framebuffer {
        self.viewport_framebuffers[index]
    }

    pub fn editor_image(&self, index: usize) -> vk::Image {
        self.editor[index].image()
    }

    pub fn editor_framebuffer(&self, index: usize) -> vk::Framebuffer {
        self.editor_framebuffers[index]
    }
}

impl Drop for RenderTargets {
    fn drop(&mut self) {
        destroy_framebuffers(&self.device, &mut self.editor_framebuffers);
        destroy_framebuffers(&self.device, &mut self.viewport_framebuffers);
    }
}
