use std::sync::Arc;

use ash::vk;

use crate::config::RendererConfig;
use crate::vulkan::descriptor_allocator::DescriptorAllocator;
use crate::vulkan::descriptor_builder::DescriptorBuilder;
use crate::vulkan::descriptor_layout::DescriptorLayoutCache;
use crate::vulkan::pipeline::{Pipeline, PipelineBuilder, ShaderKind, VertexInput};
use crate::Result;

pub const COMPOSITE_VERT: &str = "fullscreenVert.spv";
pub const COMPOSITE_FRAG: &str = "viewportCompositeFrag.spv";

/// Everything an overlay needs to (re)build its GPU state after a swapchain build.
pub struct OverlaySetup<'a> {
    pub device: &'a Arc<ash::Device>,
    pub config: &'a RendererConfig,
    pub render_pass: vk::RenderPass,
    pub pipeline_cache: vk::PipelineCache,
    pub layouts: &'a mut DescriptorLayoutCache,
    /// Swapchain-lifetime allocator; reset before every `prepare`.
    pub descriptors: &'a mut DescriptorAllocator,
    pub sampler: vk::Sampler,
    pub extent: vk::Extent2D,
    /// Post-processed viewport image per swapchain image, with its layout.
    pub sources: &'a [(vk::ImageView, vk::ImageLayout)],
}

/// Draws into the editor image inside the editor render pass.
pub trait EditorOverlay {
    /// Called after every swapchain build and post-process chain change.
    fn prepare(&mut self, setup: OverlaySetup<'_>) -> Result<()>;

    /// Records draws for `image_index`. The render pass is already active.
    fn record(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        image_index: usize,
        extent: vk::Extent2D,
    );

    /// Releases GPU objects. The device is idle when this runs.
    fn destroy(&mut self);
}

/// Draws the viewport image over the whole editor image.
#[derive(Default)]
pub struct ViewportComposite {
    pipeline: Option<Pipeline>,
    sets: Vec<vk::DescriptorSet>,
}

impl ViewportComposite {
    pub fn new() -> Self {
        Self::default()
    }

    fn source_builder(view: vk::ImageView, layout: vk::ImageLayout, sampler: vk::Sampler) -> DescriptorBuilder {
        DescriptorBuilder::new().bind_image(
            0,
            vk::DescriptorImageInfo {
                sampler,
                image_view: view,
                image_layout: layout,
            },
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        )
    }
}

impl EditorOverlay for ViewportComposite {
    fn prepare(&mut self, setup: OverlaySetup<'_>) -> Result<()> {
        if self.pipeline.is_none() {
            let layout = Self::source_builder(
                vk::ImageView::null(),
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                setup.sampler,
            )
            .build_layout(setup.layouts)?;

            let mut builder = PipelineBuilder::new();
            builder
                .add_shader_stage(ShaderKind::Vertex, &setup.config.shader_path(COMPOSITE_VERT))?
                .add_shader_stage(ShaderKind::Fragment, &setup.config.shader_path(COMPOSITE_FRAG))?
                .add_set_layout(layout)
                .set_render_pass(setup.render_pass, 0)
                .set_extent(setup.extent)
                .set_vertex_input(VertexInput::None);
            let state = builder.state_mut();
            state.depth_test = false;
            state.depth_write = false;
            state.cull_mode = vk::CullModeFlags::NONE;
            self.pipeline = Some(builder.build_graphics(setup.device, setup.pipeline_cache)?);
            log::info!("Viewport composite pipeline built");
        }

        self.sets.clear();
        for &(view, layout) in setup.sources {
            let (set, _) = Self::source_builder(view, layout, setup.sampler).build(
                setup.layouts,
                setup.descriptors,
                setup.device.as_ref(),
            )?;
            self.sets.push(set);
        }
        Ok(())
    }

    fn record(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        image_index: usize,
        _extent: vk::Extent2D,
    ) {
        let (Some(pipeline), Some(&set)) = (&self.pipeline, self.sets.get(image_index)) else {
            return;
        };
        pipeline.bind(cmd);
        unsafe {
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.layout(),
                0,
                &[set],
                &[],
            );
            device.cmd_draw(cmd, 3, 1, 0, 0);
        }
    }

    fn destroy(&mut self) {
        self.sets.clear();
        self.pipeline = None;
    }
}
