use std::path::Path;
use std::sync::Arc;

use ash::vk;

use crate::vulkan::allocator::{AllocatedImage, Allocator, ImageDesc};
use crate::vulkan::barrier::{transition_image, ImageDependency, LayoutTransition};
use crate::vulkan::descriptor_allocator::{DescriptorAllocator, PoolBackend};
use crate::vulkan::descriptor_builder::{DescriptorBuilder, DescriptorWriter};
use crate::vulkan::descriptor_layout::{DescriptorLayoutCache, LayoutFactory};
use crate::vulkan::pipeline::{Pipeline, PipelineBuilder, ShaderKind};
use crate::vulkan::upload::UploadContext;
use crate::{RendererError, Result};

/// Local size of every post-process compute shader.
pub const WORKGROUP_SIZE: u32 = 16;

/// Format of effect result images; `rgba8` in the shaders.
pub const RESULT_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

pub fn dispatch_groups(extent: vk::Extent2D) -> (u32, u32) {
    (
        extent.width.div_ceil(WORKGROUP_SIZE),
        extent.height.div_ceil(WORKGROUP_SIZE),
    )
}

struct Slot<T> {
    effect: T,
    active: bool,
}

/// Ordered list of effects with per-effect active flags.
///
/// Any change to order or activity marks the chain dirty; the owner rebuilds
/// descriptor sets and clears the flag.
pub struct EffectChain<T> {
    slots: Vec<Slot<T>>,
    dirty: bool,
}

impl<T> Default for EffectChain<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            dirty: false,
        }
    }
}

impl<T> EffectChain<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, effect: T) {
        self.slots.push(Slot {
            effect,
            active: true,
        });
        self.dirty = true;
    }

    pub fn pop(&mut self) -> Option<T> {
        let popped = self.slots.pop().map(|s| s.effect);
        if popped.is_some() {
            self.dirty = true;
        }
        popped
    }

    /// Swaps two distinct, in-range effects.
    pub fn checked_swap(&mut self, i: usize, j: usize) -> Result<()> {
        let len = self.slots.len();
        if i >= len || j >= len {
            return Err(RendererError::PipelineBuild(format!(
                "post-process swap ({i}, {j}) out of range for {len} effects"
            )));
        }
        if i == j {
            return Err(RendererError::PipelineBuild(format!(
                "post-process swap of effect {i} with itself"
            )));
        }
        self.slots.swap(i, j);
        self.dirty = true;
        Ok(())
    }

    pub fn set_active(&mut self, index: usize, active: bool) -> Result<()> {
        let len = self.slots.len();
        let slot = self.slots.get_mut(index).ok_or_else(|| {
            RendererError::PipelineBuild(format!(
                "post-process effect {index} out of range for {len} effects"
            ))
        })?;
        if slot.active != active {
            slot.active = active;
            self.dirty = true;
        }
        Ok(())
    }

    pub fn is_active(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(|s| s.active)
    }

    pub fn active(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter(|s| s.active).map(|s| &s.effect)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().map(|s| &s.effect)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().map(|s| &mut s.effect)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

struct EffectTarget {
    image: AllocatedImage,
    set: vk::DescriptorSet,
}

/// A compute pass with one result image per swapchain image.
pub struct PostEffect {
    pub name: String,
    pipeline: Pipeline,
    push_constants: Vec<u8>,
    pub clear_color: [f32; 4],
    targets: Vec<EffectTarget>,
}

impl PostEffect {
    pub fn set_push_constants(&mut self, bytes: &[u8]) {
        self.push_constants.clear();
        self.push_constants.extend_from_slice(bytes);
    }

    pub fn push_constants(&self) -> &[u8] {
        &self.push_constants
    }
}

/// Compute effects applied to the viewport image before compositing.
pub struct PostProcessStack {
    device: Arc<ash::Device>,
    chain: EffectChain<PostEffect>,
    set_layout: vk::DescriptorSetLayout,
    sampler: vk::Sampler,
}

impl PostProcessStack {
    /// Binding 0 is the storage result, binding 1 the sampled input.
    pub fn input_builder(
        result: vk::ImageView,
        input: vk::ImageView,
        input_layout: vk::ImageLayout,
        sampler: vk::Sampler,
    ) -> DescriptorBuilder {
        DescriptorBuilder::new()
            .bind_image(
                0,
                vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view: result,
                    image_layout: vk::ImageLayout::GENERAL,
                },
                vk::DescriptorType::STORAGE_IMAGE,
                vk::ShaderStageFlags::COMPUTE,
            )
            .bind_image(
                1,
                vk::DescriptorImageInfo {
                    sampler,
                    image_view: input,
                    image_layout: input_layout,
                },
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::COMPUTE,
            )
    }

    pub fn new<F: LayoutFactory>(
        device: Arc<ash::Device>,
        sampler: vk::Sampler,
        layouts: &mut DescriptorLayoutCache<F>,
    ) -> Result<Self> {
        let set_layout = Self::input_builder(
            vk::ImageView::null(),
            vk::ImageView::null(),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            sampler,
        )
        .build_layout(layouts)?;
        Ok(Self {
            device,
            chain: EffectChain::new(),
            set_layout,
            sampler,
        })
    }

    /// Builds the effect's pipeline and appends it. Targets are created on the next rebuild.
    pub fn push_effect(
        &mut self,
        name: &str,
        shader: &Path,
        push_constants: &[u8],
        cache: vk::PipelineCache,
    ) -> Result<()> {
        let mut builder = PipelineBuilder::new();
        builder
            .add_shader_stage(ShaderKind::Compute, shader)?
            .add_set_layout(self.set_layout);
        if !push_constants.is_empty() {
            builder.add_push_constant_range(
                vk::PushConstantRange::default()
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
                    .size(push_constants.len() as u32),
            );
        }
        let pipeline = builder.build_compute(&self.device, cache)?;
        log::info!("Added post-process effect '{name}'");
        self.chain.push(PostEffect {
            name: name.to_string(),
            pipeline,
            push_constants: push_constants.to_vec(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            targets: Vec::new(),
        });
        Ok(())
    }

    pub fn pop_effect(&mut self) -> Option<PostEffect> {
        self.chain.pop()
    }

    pub fn swap(&mut self, i: usize, j: usize) -> Result<()> {
        self.chain.checked_swap(i, j)
    }

    pub fn set_active(&mut self, index: usize, active: bool) -> Result<()> {
        self.chain.set_active(index, active)
    }

    pub fn chain(&self) -> &EffectChain<PostEffect> {
        &self.chain
    }

    pub fn effect_mut(&mut self, name: &str) -> Option<&mut PostEffect> {
        self.chain.iter_mut().find(|e| e.name == name)
    }

    pub fn is_dirty(&self) -> bool {
        self.chain.is_dirty()
    }

    /// Whether every effect has result images for `image_count` swapchain images.
    pub fn has_targets(&self, image_count: usize) -> bool {
        self.chain.iter().all(|e| e.targets.len() == image_count)
    }

    /// Creates result images for every effect, cleared and left in `GENERAL`.
    pub fn create_targets(
        &mut self,
        allocator: &Arc<Allocator>,
        upload: &UploadContext,
        extent: vk::Extent2D,
        image_count: usize,
    ) -> Result<()> {
        let usage = vk::ImageUsageFlags::COLOR_ATTACHMENT
            | vk::ImageUsageFlags::SAMPLED
            | vk::ImageUsageFlags::STORAGE
            | vk::ImageUsageFlags::TRANSFER_DST;
        let desc = ImageDesc::color(RESULT_FORMAT, extent, usage).dedicated();

        let mut fresh: Vec<(vk::Image, [f32; 4])> = Vec::new();
        for effect in self.chain.iter_mut() {
            if effect.targets.len() == image_count {
                continue;
            }
            effect.targets.clear();
            for _ in 0..image_count {
                let image = allocator.create_image(&desc)?;
                fresh.push((image.image(), effect.clear_color));
                effect.targets.push(EffectTarget {
                    image,
                    set: vk::DescriptorSet::null(),
                });
            }
        }
        if fresh.is_empty() {
            return Ok(());
        }

        let transition =
            LayoutTransition::color(vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL);
        upload.immediate_submit(|device, cmd| {
            for &(image, clear) in &fresh {
                transition_image(device, cmd, image, transition);
                unsafe {
                    device.cmd_clear_color_image(
                        cmd,
                        image,
                        vk::ImageLayout::GENERAL,
                        &vk::ClearColorValue { float32: clear },
                        &[transition.range()],
                    );
                }
            }
        })?;
        log::debug!("Created {} post-process result images", fresh.len());
        Ok(())
    }

    pub fn destroy_targets(&mut self) {
        for effect in self.chain.iter_mut() {
            effect.targets.clear();
        }
    }

    /// Writes one set per active effect per swapchain image, chaining each
    /// effect's input to the previous output.
    ///
    /// Sets come from the swapchain-lifetime allocator, which the caller resets first.
    pub fn allocate_sets<F, B, W>(
        &mut self,
        viewport_views: &[vk::ImageView],
        layouts: &mut DescriptorLayoutCache<F>,
        allocator: &mut DescriptorAllocator<B>,
        writer: &W,
    ) -> Result<()>
    where
        F: LayoutFactory,
        B: PoolBackend,
        W: DescriptorWriter + ?Sized,
    {
        for (index, &viewport) in viewport_views.iter().enumerate() {
            let mut input = (viewport, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
            for slot in self.chain.slots.iter_mut().filter(|s| s.active) {
                let target = slot.effect.targets.get_mut(index).ok_or_else(|| {
                    RendererError::VulkanError(format!(
                        "post-process effect '{}' has no target for image {index}",
                        slot.effect.name
                    ))
                })?;
                let (set, _) =
                    Self::input_builder(target.image.view(), input.0, input.1, self.sampler)
                        .build(layouts, allocator, writer)?;
                target.set = set;
                input = (target.image.view(), vk::ImageLayout::GENERAL);
            }
        }
        self.chain.clear_dirty();
        Ok(())
    }

    /// Records every active effect for `image_index`.
    pub fn record(&self, cmd: vk::CommandBuffer, image_index: usize, extent: vk::Extent2D) {
        let (groups_x, groups_y) = dispatch_groups(extent);
        let mut previous: Option<vk::Image> = None;
        for effect in self.chain.active() {
            let Some(target) = effect.targets.get(image_index) else {
                continue;
            };
            if let Some(image) = previous {
                ImageDependency::compute_to_compute().record(&self.device, cmd, image);
            }
            effect.pipeline.bind(cmd);
            unsafe {
                self.device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::COMPUTE,
                    effect.pipeline.layout(),
                    0,
                    &[target.set],
                    &[],
                );
                if !effect.push_constants.is_empty() {
                    self.device.cmd_push_constants(
                        cmd,
                        effect.pipeline.layout(),
                        vk::ShaderStageFlags::COMPUTE,
                        0,
                        &effect.push_constants,
                    );
                }
                self.device.cmd_dispatch(cmd, groups_x, groups_y, 1);
            }
            previous = Some(target.image.image());
        }
        if let Some(image) = previous {
            ImageDependency::compute_to_fragment().record(&self.device, cmd, image);
        }
    }

    /// Image the composite pass should sample for `image_index`, with its layout.
    pub fn output(&self, image_index: usize, viewport: vk::ImageView) -> (vk::ImageView, vk::ImageLayout) {
        self.chain
            .active()
            .filter_map(|e| e.targets.get(image_index))
            .last()
            .map_or((viewport, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL), |t| {
                (t.image.view(), vk::ImageLayout::GENERAL)
            })
    }
}
