use std::ffi::CStr;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::vk;
use log::{debug, error};

use crate::{RendererError, Result};

const ENTRY_POINT: &CStr = c"main";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderKind {
    pub fn stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderKind::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderKind::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderKind::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }
}

/// Vertex input layout of a graphics pipeline.
#[derive(Clone, Debug, Default)]
pub enum VertexInput {
    /// No vertex buffers; positions come from `gl_VertexIndex`.
    #[default]
    None,
    /// One interleaved binding.
    Interleaved {
        binding: vk::VertexInputBindingDescription,
        attributes: Vec<vk::VertexInputAttributeDescription>,
    },
}

/// Fixed-function state applied to graphics pipelines.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FixedFunctionState {
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub samples: vk::SampleCountFlags,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: vk::CompareOp,
    pub blend: bool,
}

impl Default for FixedFunctionState {
    fn default() -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            samples: vk::SampleCountFlags::TYPE_1,
            depth_test: true,
            depth_write: true,
            depth_compare: vk::CompareOp::LESS,
            blend: false,
        }
    }
}

#[derive(Clone, Debug)]
struct ShaderStage {
    kind: ShaderKind,
    code: Vec<u32>,
    origin: PathBuf,
}

/// Loads a SPIR-V binary from disk.
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let mut file = File::open(path).map_err(|e| RendererError::ShaderLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    ash::util::read_spv(&mut file).map_err(|e| RendererError::ShaderLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Pipeline and its layout; destroyed on drop.
pub struct Pipeline {
    device: Arc<ash::Device>,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    bind_point: vk::PipelineBindPoint,
}

impl Pipeline {
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }

    pub fn bind(&self, cmd: vk::CommandBuffer) {
        unsafe {
            self.device
                .cmd_bind_pipeline(cmd, self.bind_point, self.pipeline)
        };
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Shader modules live only for the duration of one pipeline build.
struct ShaderModules<'a> {
    device: &'a ash::Device,
    modules: Vec<(ShaderKind, vk::ShaderModule)>,
}

impl<'a> ShaderModules<'a> {
    fn create(device: &'a ash::Device, stages: &[ShaderStage]) -> Result<Self> {
        let mut modules = Self {
            device,
            modules: Vec::with_capacity(stages.len()),
        };
        for stage in stages {
            let info = vk::ShaderModuleCreateInfo::default().code(&stage.code);
            let module = unsafe { device.create_shader_module(&info, None) }.map_err(|e| {
                RendererError::PipelineBuild(format!(
                    "Failed to create shader module for {}: {e}",
                    stage.origin.display()
                ))
            })?;
            modules.modules.push((stage.kind, module));
        }
        Ok(modules)
    }

    fn stage_infos(&self) -> Vec<vk::PipelineShaderStageCreateInfo<'static>> {
        self.modules
            .iter()
            .map(|&(kind, module)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(kind.stage())
                    .module(module)
                    .name(ENTRY_POINT)
            })
            .collect()
    }
}

impl Drop for ShaderModules<'_> {
    fn drop(&mut self) {
        for &(_, module) in &self.modules {
            unsafe { self.device.destroy_shader_module(module, None) };
        }
    }
}

/// Accumulates shader stages, layouts and fixed-function state for one pipeline.
///
/// The builder owns the SPIR-V words of each stage. Adding a stage of a kind
/// that is already present replaces it.
#[derive(Clone, Debug)]
pub struct PipelineBuilder {
    stages: Vec<ShaderStage>,
    push_constants: Vec<vk::PushConstantRange>,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    render_pass: Option<vk::RenderPass>,
    subpass: u32,
    extent: vk::Extent2D,
    vertex_input: VertexInput,
    state: FixedFunctionState,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            push_constants: Vec::new(),
            set_layouts: Vec::new(),
            render_pass: None,
            subpass: 0,
            extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            vertex_input: VertexInput::None,
            state: FixedFunctionState::default(),
        }
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset_to_defaults(&mut self) -> &mut Self {
        *self = Self::default();
        self
    }

    pub fn add_shader_stage(&mut self, kind: ShaderKind, path: &Path) -> Result<&mut Self> {
        let code = load_spirv(path)?;
        Ok(self.add_shader_code(kind, code, path))
    }

    pub fn add_shader_code(&mut self, kind: ShaderKind, code: Vec<u32>, origin: &Path) -> &mut Self {
        self.stages.retain(|s| s.kind != kind);
        self.stages.push(ShaderStage {
            kind,
            code,
            origin: origin.to_path_buf(),
        });
        self
    }

    pub fn add_push_constant_range(&mut self, range: vk::PushConstantRange) -> &mut Self {
        self.push_constants.push(range);
        self
    }

    pub fn add_set_layout(&mut self, layout: vk::DescriptorSetLayout) -> &mut Self {
        self.set_layouts.push(layout);
        self
    }

    pub fn set_render_pass(&mut self, render_pass: vk::RenderPass, subpass: u32) -> &mut Self {
        self.render_pass = Some(render_pass);
        self.subpass = subpass;
        self
    }

    /// Initial viewport and scissor; both stay dynamic.
    pub fn set_extent(&mut self, extent: vk::Extent2D) -> &mut Self {
        self.extent = extent;
        self
    }

    pub fn set_vertex_input(&mut self, vertex_input: VertexInput) -> &mut Self {
        self.vertex_input = vertex_input;
        self
    }

    pub fn state_mut(&mut self) -> &mut FixedFunctionState {
        &mut self.state
    }

    pub fn state(&self) -> &FixedFunctionState {
        &self.state
    }

    pub fn has_stage(&self, kind: ShaderKind) -> bool {
        self.stages.iter().any(|s| s.kind == kind)
    }

    pub fn set_layouts(&self) -> &[vk::DescriptorSetLayout] {
        &self.set_layouts
    }

    pub fn push_constant_ranges(&self) -> &[vk::PushConstantRange] {
        &self.push_constants
    }

    pub fn validate_graphics(&self) -> Result<()> {
        if !self.has_stage(ShaderKind::Vertex) {
            return Err(RendererError::PipelineBuild("missing vertex stage".into()));
        }
        if !self.has_stage(ShaderKind::Fragment) {
            return Err(RendererError::PipelineBuild("missing fragment stage".into()));
        }
        if self.render_pass.is_none() {
            return Err(RendererError::PipelineBuild("missing render pass".into()));
        }
        Ok(())
    }

    pub fn validate_compute(&self) -> Result<()> {
        if !self.has_stage(ShaderKind::Compute) {
            return Err(RendererError::PipelineBuild("missing compute stage".into()));
        }
        if self.set_layouts.is_empty() {
            return Err(RendererError::PipelineBuild(
                "compute pipeline has no descriptor set layouts".into(),
            ));
        }
        Ok(())
    }

    fn create_layout(&self, device: &ash::Device) -> Result<vk::PipelineLayout> {
        let info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&self.set_layouts)
            .push_constant_ranges(&self.push_constants);
        unsafe { device.create_pipeline_layout(&info, None) }.map_err(|e| {
            RendererError::PipelineBuild(format!("Failed to create pipeline layout: {e}"))
        })
    }

    pub fn build_graphics(
        &self,
        device: &Arc<ash::Device>,
        cache: vk::PipelineCache,
    ) -> Result<Pipeline> {
        self.validate_graphics().inspect_err(|e| error!("{e}"))?;
        let render_pass = self
            .render_pass
            .ok_or_else(|| RendererError::PipelineBuild("missing render pass".into()))?;

        let graphics_stages: Vec<ShaderStage> = self
            .stages
            .iter()
            .filter(|s| s.kind != ShaderKind::Compute)
            .cloned()
            .collect();
        let modules = ShaderModules::create(device, &graphics_stages)?;
        let stage_infos = modules.stage_infos();

        let (bindings, attributes) = match &self.vertex_input {
            VertexInput::None => (Vec::new(), Vec::new()),
            VertexInput::Interleaved {
                binding,
                attributes,
            } => (vec![*binding], attributes.clone()),
        };
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly =
            vk::PipelineInputAssemblyStateCreateInfo::default().topology(self.state.topology);

        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.extent.width as f32,
            height: self.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(self.state.polygon_mode)
            .cull_mode(self.state.cull_mode)
            .front_face(self.state.front_face)
            .line_width(1.0);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(self.state.samples);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(self.state.depth_test)
            .depth_write_enable(self.state.depth_write)
            .depth_compare_op(self.state.depth_compare)
            .max_depth_bounds(1.0);

        let attachment = if self.state.blend {
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD)
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        } else {
            vk::PipelineColorBlendAttachmentState::default()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        };
        let attachments = [attachment];
        let color_blending =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let layout = self.create_layout(device)?;

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stage_infos)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(self.subpass);

        let result = unsafe {
            device.create_graphics_pipelines(cache, std::slice::from_ref(&create_info), None)
        };
        drop(modules);

        match result {
            Ok(pipelines) => {
                debug!("Built graphics pipeline with {} stages", stage_infos.len());
                Ok(Pipeline {
                    device: Arc::clone(device),
                    pipeline: pipelines[0],
                    layout,
                    bind_point: vk::PipelineBindPoint::GRAPHICS,
                })
            }
            Err((_, e)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                Err(RendererError::PipelineBuild(format!(
                    "Failed to create graphics pipeline: {e}"
                )))
            }
        }
    }

    pub fn build_compute(
        &self,
        device: &Arc<ash::Device>,
        cache: vk::PipelineCache,
    ) -> Result<Pipeline> {
        self.validate_compute().inspect_err(|e| error!("{e}"))?;

        let compute_stages: Vec<ShaderStage> = self
            .stages
            .iter()
            .filter(|s| s.kind == ShaderKind::Compute)
            .cloned()
            .collect();
        let modules = ShaderModules::create(device, &compute_stages)?;
        let stage_info = modules.stage_infos()[0];

        let layout = self.create_layout(device)?;
        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage_info)
            .layout(layout);

        let result = unsafe {
            device.create_compute_pipelines(cache, std::slice::from_ref(&create_info), None)
        };
        drop(modules);

        match result {
            Ok(pipelines) => Ok(Pipeline {
                device: Arc::clone(device),
                pipeline: pipelines[0],
                layout,
                bind_point: vk::PipelineBindPoint::COMPUTE,
            }),
            Err((_, e)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                Err(RendererError::PipelineBuild(format!(
                    "Failed to create compute pipeline: {e}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn configure(builder: &mut PipelineBuilder) {
        builder
            .add_shader_code(ShaderKind::Vertex, vec![0x0723_0203], Path::new("a.vert"))
            .add_shader_code(ShaderKind::Fragment, vec![0x0723_0203], Path::new("a.frag"))
            .add_set_layout(vk::DescriptorSetLayout::from_raw(1))
            .add_set_layout(vk::DescriptorSetLayout::from_raw(2))
            .add_push_constant_range(
                vk::PushConstantRange::default()
                    .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                    .size(16),
            )
            .set_render_pass(vk::RenderPass::from_raw(3), 0);
    }

    #[test]
    fn defaults_match_opaque_triangle_state() {
        let state = FixedFunctionState::default();
        assert_eq!(state.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(state.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(state.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(state.samples, vk::SampleCountFlags::TYPE_1);
        assert!(state.depth_test && state.depth_write);
        assert_eq!(state.depth_compare, vk::CompareOp::LESS);
        assert!(!state.blend);
    }

    #[test]
    fn graphics_validation_reports_missing_pieces() {
        let mut builder = PipelineBuilder::new();
        assert!(builder.validate_graphics().is_err());

        builder.add_shader_code(ShaderKind::Vertex, vec![0x0723_0203], Path::new("a.vert"));
        builder.add_shader_code(ShaderKind::Fragment, vec![0x0723_0203], Path::new("a.frag"));
        let err = builder.validate_graphics().unwrap_err();
        assert!(err.to_string().contains("render pass"));

        builder.set_render_pass(vk::RenderPass::from_raw(1), 0);
        assert!(builder.validate_graphics().is_ok());
    }

    #[test]
    fn compute_requires_stage_and_layouts() {
        let mut builder = PipelineBuilder::new();
        builder.add_shader_code(ShaderKind::Compute, vec![0x0723_0203], Path::new("a.comp"));
        assert!(builder.validate_compute().is_err());
        builder.add_set_layout(vk::DescriptorSetLayout::from_raw(5));
        assert!(builder.validate_compute().is_ok());
    }

    #[test]
    fn same_kind_stage_is_replaced() {
        let mut builder = PipelineBuilder::new();
        builder.add_shader_code(ShaderKind::Vertex, vec![1], Path::new("first.vert"));
        builder.add_shader_code(ShaderKind::Vertex, vec![2], Path::new("second.vert"));
        assert_eq!(builder.stages.len(), 1);
        assert_eq!(builder.stages[0].code, vec![2]);
    }

    #[test]
    fn reset_then_reconfigure_yields_identical_layout_inputs() {
        let mut builder = PipelineBuilder::new();
        configure(&mut builder);
        let first_layouts = builder.set_layouts().to_vec();
        let first_ranges: Vec<_> = builder
            .push_constant_ranges()
            .iter()
            .map(|r| (r.stage_flags, r.offset, r.size))
            .collect();

        builder.state_mut().cull_mode = vk::CullModeFlags::NONE;
        builder.reset_to_defaults();
        assert!(builder.set_layouts().is_empty());
        assert_eq!(*builder.state(), FixedFunctionState::default());

        configure(&mut builder);
        let second_ranges: Vec<_> = builder
            .push_constant_ranges()
            .iter()
            .map(|r| (r.stage_flags, r.offset, r.size))
            .collect();
        assert_eq!(builder.set_layouts(), first_layouts.as_slice());
        assert_eq!(first_ranges, second_ranges);
    }

    #[test]
    fn missing_shader_file_is_a_load_error() {
        let mut builder = PipelineBuilder::new();
        let err = builder
            .add_shader_stage(ShaderKind::Vertex, Path::new("/nonexistent/shader.spv"))
            .unwrap_err();
        assert!(matches!(err, RendererError::ShaderLoad { .. }));
    }
}
