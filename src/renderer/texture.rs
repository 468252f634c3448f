use std::path::Path;
use std::sync::Arc;

use ash::vk;

use crate::vulkan::allocator::{AllocatedImage, Allocator, ImageDesc};
use crate::vulkan::barrier::{transition_image, LayoutTransition};
use crate::vulkan::device::VulkanDevice;
use crate::vulkan::upload::UploadContext;
use crate::{RendererError, Result};

/// Semantic role of a texture; decides its format and fallback color.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureKind {
    Diffuse,
    Normal,
    Roughness,
    Metallic,
    Emissive,
    AmbientOcclusion,
}

impl TextureKind {
    pub const ALL: [TextureKind; 6] = [
        TextureKind::Diffuse,
        TextureKind::Normal,
        TextureKind::Roughness,
        TextureKind::Metallic,
        TextureKind::Emissive,
        TextureKind::AmbientOcclusion,
    ];

    pub fn format(self) -> vk::Format {
        match self {
            TextureKind::Diffuse => vk::Format::R8G8B8A8_SRGB,
            TextureKind::Normal => vk::Format::R8G8B8A8_UNORM,
            _ => vk::Format::R8_UNORM,
        }
    }

    /// Bytes per texel in the staging data.
    pub fn channels(self) -> usize {
        match self {
            TextureKind::Diffuse | TextureKind::Normal => 4,
            _ => 1,
        }
    }

    pub fn fallback_rgba(self) -> [u8; 4] {
        match self {
            TextureKind::Diffuse => [255, 0, 255, 255],
            TextureKind::Normal => [128, 128, 255, 255],
            TextureKind::Roughness | TextureKind::Metallic | TextureKind::Emissive => [0, 0, 0, 255],
            TextureKind::AmbientOcclusion => [255, 255, 255, 255],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TextureKind::Diffuse => "diffuse",
            TextureKind::Normal => "normal",
            TextureKind::Roughness => "roughness",
            TextureKind::Metallic => "metallic",
            TextureKind::Emissive => "emissive",
            TextureKind::AmbientOcclusion => "ao",
        }
    }
}

/// Decoded texels ready for staging, already reduced to the kind's channel count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelData {
    pub width: u32,
    pub height: u32,
    pub kind: TextureKind,
    pub pixels: Vec<u8>,
}

impl PixelData {
    pub fn from_file(path: &Path, kind: TextureKind) -> Result<Self> {
        let image = image::open(path).map_err(|e| RendererError::AssetLoad {
            name: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_image(image, kind))
    }

    pub fn from_memory(bytes: &[u8], kind: TextureKind) -> Result<Self> {
        let image = image::load_from_memory(bytes).map_err(|e| RendererError::AssetLoad {
            name: format!("{} texture from memory", kind.name()),
            reason: e.to_string(),
        })?;
        Ok(Self::from_image(image, kind))
    }

    fn from_image(image: image::DynamicImage, kind: TextureKind) -> Self {
        let (width, height, pixels) = if kind.channels() == 4 {
            let rgba = image.to_rgba8();
            (rgba.width(), rgba.height(), rgba.into_raw())
        } else {
            let luma = image.to_luma8();
            (luma.width(), luma.height(), luma.into_raw())
        };
        Self {
            width,
            height,
            kind,
            pixels,
        }
    }

    /// 1x1 texture of the kind's fallback color.
    pub fn fallback(kind: TextureKind) -> Self {
        let rgba = kind.fallback_rgba();
        Self {
            width: 1,
            height: 1,
            kind,
            pixels: rgba[..kind.channels()].to_vec(),
        }
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }
}

/// `floor(log2(max(w, h))) + 1`, or 1 without linear blit support.
pub fn mip_level_count(width: u32, height: u32, linear_blit: bool) -> u32 {
    if !linear_blit {
        return 1;
    }
    32 - width.max(height).max(1).leading_zeros()
}

/// One step of a mip chain recording.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MipStep {
    Transition {
        level: u32,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },
    Blit {
        src_level: u32,
        src_extent: (i32, i32),
        dst_extent: (i32, i32),
    },
}

/// Steps that take a freshly copied image (every level in `TRANSFER_DST_OPTIMAL`)
/// to `SHADER_READ_ONLY_OPTIMAL` on all levels, blitting each level from the one above.
pub fn mip_plan(width: u32, height: u32, levels: u32) -> Vec<MipStep> {
    let mut steps = Vec::with_capacity(levels as usize * 3);
    let (mut w, mut h) = (width.max(1) as i32, height.max(1) as i32);
    for level in 1..levels {
        let (next_w, next_h) = ((w / 2).max(1), (h / 2).max(1));
        steps.push(MipStep::Transition {
            level: level - 1,
            old: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            new: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        });
        steps.push(MipStep::Blit {
            src_level: level - 1,
            src_extent: (w, h),
            dst_extent: (next_w, next_h),
        });
        steps.push(MipStep::Transition {
            level: level - 1,
            old: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            new: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        });
        w = next_w;
        h = next_h;
    }
    steps.push(MipStep::Transition {
        level: levels.max(1) - 1,
        old: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        new: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    });
    steps
}

pub fn record_mip_plan(device: &ash::Device, cmd: vk::CommandBuffer, image: vk::Image, plan: &[MipStep]) {
    for step in plan {
        match *step {
            MipStep::Transition { level, old, new } => transition_image(
                device,
                cmd,
                image,
                LayoutTransition::color_mips(old, new, level, 1),
            ),
            MipStep::Blit {
                src_level,
                src_extent,
                dst_extent,
            } => {
                let blit = vk::ImageBlit {
                    src_subresource: color_layer(src_level),
                    src_offsets: [
                        vk::Offset3D::default(),
                        vk::Offset3D {
                            x: src_extent.0,
                            y: src_extent.1,
                            z: 1,
                        },
                    ],
                    dst_subresource: color_layer(src_level + 1),
                    dst_offsets: [
                        vk::Offset3D::default(),
                        vk::Offset3D {
                            x: dst_extent.0,
                            y: dst_extent.1,
                            z: 1,
                        },
                    ],
                };
                unsafe {
                    device.cmd_blit_image(
                        cmd,
                        image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[blit],
                        vk::Filter::LINEAR,
                    );
                }
            }
        }
    }
}

fn color_layer(mip_level: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// A sampled image with its semantic kind.
pub struct Texture {
    pub name: String,
    pub kind: TextureKind,
    image: AllocatedImage,
}

impl Texture {
    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    pub fn image(&self) -> vk::Image {
        self.image.image()
    }

    pub fn mip_levels(&self) -> u32 {
        self.image.mip_levels()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }
}

/// A texture whose mip chain still has to be recorded.
pub struct PendingMips {
    pub texture: Texture,
    pub plan: Vec<MipStep>,
}

/// Stages pixels and copies them into device-local images on the upload queue.
#[derive(Clone)]
pub struct TextureUploader {
    allocator: Arc<Allocator>,
    upload: Arc<UploadContext>,
    linear_blit: Vec<(vk::Format, bool)>,
}

impl TextureUploader {
    pub fn new(device: &VulkanDevice, allocator: Arc<Allocator>, upload: Arc<UploadContext>) -> Self {
        let mut linear_blit: Vec<(vk::Format, bool)> = Vec::new();
        for kind in TextureKind::ALL {
            let format = kind.format();
            if !linear_blit.iter().any(|(f, _)| *f == format) {
                linear_blit.push((format, device.supports_linear_blit(format)));
            }
        }
        Self {
            allocator,
            upload,
            linear_blit,
        }
    }

    pub fn supports_linear_blit(&self, format: vk::Format) -> bool {
        self.linear_blit
            .iter()
            .any(|&(f, supported)| f == format && supported)
    }

    /// Uploads and generates the full mip chain inside one immediate submit.
    pub fn upload(&self, name: &str, pixels: &PixelData) -> Result<Texture> {
        let (texture, plan) = self.copy_to_image(name, pixels, |device, cmd, image, plan| {
            record_mip_plan(device, cmd, image, plan)
        })?;
        debug_assert!(plan.is_empty());
        log::debug!(
            "Loaded texture '{name}' ({}x{}, {} mips)",
            pixels.width,
            pixels.height,
            texture.mip_levels()
        );
        Ok(texture)
    }

    /// Uploads level 0 only; the returned plan must be recorded on the graphics queue.
    pub fn upload_deferred(&self, name: &str, pixels: &PixelData) -> Result<PendingMips> {
        let (texture, plan) = self.copy_to_image(name, pixels, |_, _, _, _| {})?;
        Ok(PendingMips { texture, plan })
    }

    /// Copies `pixels` into a new image; `finish` may consume the mip plan in the
    /// same submit, in which case an empty plan is returned.
    fn copy_to_image<F>(&self, name: &str, pixels: &PixelData, finish: F) -> Result<(Texture, Vec<MipStep>)>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer, vk::Image, &[MipStep]),
    {
        let expected = pixels.width as usize * pixels.height as usize * pixels.kind.channels();
        if pixels.pixels.len() != expected || expected == 0 {
            return Err(RendererError::AssetLoad {
                name: name.to_string(),
                reason: format!(
                    "expected {expected} bytes for {}x{} {}, got {}",
                    pixels.width,
                    pixels.height,
                    pixels.kind.name(),
                    pixels.pixels.len()
                ),
            });
        }

        let format = pixels.kind.format();
        let levels = mip_level_count(
            pixels.width,
            pixels.height,
            self.supports_linear_blit(format),
        );
        let mut usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
        if levels > 1 {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }

        let staging = self.allocator.create_staging_buffer(&pixels.pixels)?;
        let image = self.allocator.create_image(
            &ImageDesc::color(format, pixels.extent(), usage).with_mip_levels(levels),
        )?;
        let plan = mip_plan(pixels.width, pixels.height, levels);

        let mut finish = Some(finish);
        let mut consumed = false;
        self.upload.immediate_submit(|device, cmd| {
            transition_image(
                device,
                cmd,
                image.image(),
                LayoutTransition::color_mips(
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    0,
                    levels,
                ),
            );
            let region = vk::BufferImageCopy::default()
                .image_subresource(color_layer(0))
                .image_extent(vk::Extent3D {
                    width: pixels.width,
                    height: pixels.height,
                    depth: 1,
                });
            unsafe {
                device.cmd_copy_buffer_to_image(
                    cmd,
                    staging.handle(),
                    image.image(),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
            if let Some(finish) = finish.take() {
                finish(device, cmd, image.image(), &plan);
                consumed = true;
            }
        })?;
        drop(staging);

        let texture = Texture {
            name: name.to_string(),
            kind: pixels.kind,
            image,
        };
        Ok((texture, if consumed { Vec::new() } else { plan }))
    }
}
