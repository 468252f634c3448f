use std::path::Path;
use std::sync::Arc;

use ash::vk;
use uuid::Uuid;

use super::editor::{EditorOverlay, OverlaySetup, ViewportComposite};
use super::frame::{
    after_rebuild, align_up, assemble_submission, classify_acquire, classify_present,
    dynamic_offset, next_slot, plan_frame_start, AcquireOutcome, FrameOutcome, FrameSlot,
    FrameStart, FrameStats, PresentOutcome, RebuildCause, SkipReason, SlotState, FRAMES_IN_FLIGHT,
};
use super::material::MaterialDesc;
use super::model::{MeshData, Vertex};
use super::post_process::PostProcessStack;
use super::resources::ResourceManager;
use super::scene::{FrameInput, SceneState};
use super::targets::{
    editor_format, full_blit, full_copy, is_srgb, presented_value, PresentTransfer, RenderTargets,
};
use super::texture::PixelData;
use super::uniforms::{LightBufferData, MatrixBufferData, PerObjectData};
use super::worker::{AssetEvent, AssetJob, AssetWorker, GpuAssetLoader, Priority};
use crate::config::RendererConfig;
use crate::vulkan::allocator::{AllocatedBuffer, MemoryLocation};
use crate::vulkan::barrier::{transition_image, LayoutTransition};
use crate::vulkan::deletion_queue::DeletionQueue;
use crate::vulkan::descriptor_builder::DescriptorBuilder;
use crate::vulkan::device::VulkanDevice;
use crate::vulkan::instance::VulkanInstance;
use crate::vulkan::pipeline::{Pipeline, PipelineBuilder, ShaderKind};
use crate::vulkan::render_pass::{create_editor_render_pass, create_viewport_render_pass};
use crate::vulkan::surface::SurfaceProvider;
use crate::vulkan::swapchain::{
    choose_depth_format, choose_extent, is_zero_extent, SurfaceSupport, Swapchain, SwapchainSummary,
};
use crate::{RendererError, Result};

pub const DEFAULT_VERT: &str = "helloTriangleVert.spv";
pub const DEFAULT_FRAG: &str = "phongLightingFrag.spv";
pub const GAMMA_COMP: &str = "gammaCorrectComp.spv";
pub const GAMMA_EFFECT: &str = "gamma";

/// Double-buffered frame executor.
///
/// Each frame renders the scene into an offscreen viewport image, runs the
/// post-process chain over it, draws the editor overlay into the editor image
/// and transfers that into the acquired swapchain image. Mip chains recorded by
/// the asset worker ride along with the frame's submission when available.
pub struct Renderer {
    worker: Option<AssetWorker<GpuAssetLoader>>,
    overlay: Box<dyn EditorOverlay>,
    post_process: PostProcessStack,
    viewport_pipeline: Pipeline,
    targets: Option<RenderTargets>,
    swapchain: Option<Swapchain>,
    slots: Vec<FrameSlot>,
    object_buffer: AllocatedBuffer,
    object_stride: u64,
    viewport_pass: vk::RenderPass,
    editor_pass: vk::RenderPass,
    deletion_queue: DeletionQueue,
    resources: ResourceManager,
    device: VulkanDevice,
    config: RendererConfig,
    window_extent: vk::Extent2D,
    pending_rebuild: Option<RebuildCause>,
    current_slot: usize,
    frame_count: u64,
    stats: FrameStats,
}

impl Renderer {
    pub fn new<S: SurfaceProvider>(surface_provider: &S, config: RendererConfig) -> Result<Self> {
        log::info!("Initializing editor renderer");
        let instance = Arc::new(VulkanInstance::from_surface(
            surface_provider,
            &config.app_name,
            config.enable_validation,
        )?);
        let device = VulkanDevice::new(instance)?;
        let mut resources = ResourceManager::new(&device, &config)?;
        let handle = Arc::clone(&device.device);
        let mut deletion_queue = DeletionQueue::new();

        let support = SurfaceSupport::query(&device)?;
        let surface_format = support.surface_format()?;
        let depth_format = choose_depth_format(|format| {
            device.supports_optimal(format, vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or_else(|| RendererError::DeviceInitFailed("No supported depth format".into()))?;

        let viewport_pass = create_viewport_render_pass(&handle, surface_format.format, depth_format)?;
        let editor_pass =
            create_editor_render_pass(&handle, editor_format(surface_format.format))?;
        if is_srgb(editor_format(surface_format.format)) {
            log::warn!(
                "No linear twin for {:?}; gamma-corrected output is encoded twice",
                surface_format.format
            );
        }
        for pass in [viewport_pass, editor_pass] {
            let device = Arc::clone(&handle);
            deletion_queue.push("render pass", move || unsafe {
                device.destroy_render_pass(pass, None)
            });
        }

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.queue_families.graphics)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { handle.create_command_pool(&pool_info, None) }.map_err(|e| {
            RendererError::VulkanError(format!("Failed to create frame command pool: {e}"))
        })?;
        {
            let device = Arc::clone(&handle);
            deletion_queue.push("frame command pool", move || unsafe {
                device.destroy_command_pool(command_pool, None)
            });
        }
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(2 * FRAMES_IN_FLIGHT as u32);
        let command_buffers = unsafe { handle.allocate_command_buffers(&alloc_info) }.map_err(|e| {
            RendererError::VulkanError(format!("Failed to allocate frame command buffers: {e}"))
        })?;

        let object_stride = align_up(
            std::mem::size_of::<PerObjectData>() as u64,
            device.min_uniform_buffer_offset_alignment(),
        );
        let object_buffer = resources.allocator().create_buffer(
            FRAMES_IN_FLIGHT as u64 * object_stride,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
        )?;

        let mut slots = Vec::with_capacity(FRAMES_IN_FLIGHT);
        let mut pass_layout = vk::DescriptorSetLayout::null();
        let mut object_layout = vk::DescriptorSetLayout::null();
        for buffers in command_buffers.chunks_exact(2) {
            let mut slot = FrameSlot::new(
                Arc::clone(&handle),
                resources.allocator(),
                [buffers[0], buffers[1]],
            )?;
            let (pass_set, layout) = pass_builder(&slot).build(
                &mut resources.layouts,
                &mut resources.static_descriptors,
                handle.as_ref(),
            )?;
            pass_layout = layout;
            let (object_set, layout) = object_builder(&object_buffer).build(
                &mut resources.layouts,
                &mut resources.static_descriptors,
                handle.as_ref(),
            )?;
            object_layout = layout;
            slot.pass_set = pass_set;
            slot.object_set = object_set;
            slots.push(slot);
        }
        let material_layout = resources.material_layout()?;

        let window_extent = surface_provider.extent();
        let initial_extent = choose_extent(&support.capabilities, window_extent);
        let mut builder = PipelineBuilder::new();
        builder
            .add_shader_stage(ShaderKind::Vertex, &config.shader_path(DEFAULT_VERT))?
            .add_shader_stage(ShaderKind::Fragment, &config.shader_path(DEFAULT_FRAG))?
            .add_set_layout(pass_layout)
            .add_set_layout(object_layout)
            .add_set_layout(material_layout)
            .set_render_pass(viewport_pass, 0)
            .set_extent(vk::Extent2D {
                width: initial_extent.width.max(1),
                height: initial_extent.height.max(1),
            })
            .set_vertex_input(Vertex::input());
        let viewport_pipeline = builder.build_graphics(&handle, resources.pipeline_cache.handle())?;

        let mut post_process = PostProcessStack::new(
            Arc::clone(&handle),
            resources.sampler(),
            &mut resources.layouts,
        )?;
        post_process.push_effect(
            GAMMA_EFFECT,
            &config.shader_path(GAMMA_COMP),
            bytemuck::bytes_of(&config.gamma),
            resources.pipeline_cache.handle(),
        )?;

        resources.upload_model("triangle", &[MeshData::triangle()])?;
        let worker = AssetWorker::spawn(resources.asset_loader())?;

        let mut renderer = Self {
            worker: Some(worker),
            overlay: Box::new(ViewportComposite::new()),
            post_process,
            viewport_pipeline,
            targets: None,
            swapchain: None,
            slots,
            object_buffer,
            object_stride,
            viewport_pass,
            editor_pass,
            deletion_queue,
            resources,
            device,
            config,
            window_extent,
            pending_rebuild: Some(RebuildCause::Resize),
            current_slot: 0,
            frame_count: 0,
            stats: FrameStats::default(),
        };
        if !is_zero_extent(renderer.window_extent) {
            renderer.rebuild_swapchain()?;
        }
        log::info!("Editor renderer ready");
        Ok(renderer)
    }

    /// Records the new window size.
    ///
    /// The next frame rebuilds the swapchain and returns without submitting;
    /// the frame after it presents at the new extent.
    pub fn resize(&mut self, width: u32, height: u32) {
        let extent = vk::Extent2D { width, height };
        if extent != self.window_extent {
            log::info!("Swapchain resize requested: {width}x{height}");
        }
        self.window_extent = extent;
        self.request_rebuild(RebuildCause::Resize);
    }

    fn request_rebuild(&mut self, cause: RebuildCause) {
        self.pending_rebuild = Some(RebuildCause::merge(self.pending_rebuild, cause));
    }

    pub fn draw_frame(&mut self, scene: &SceneState) -> Result<FrameOutcome> {
        match plan_frame_start(self.window_extent, self.pending_rebuild) {
            FrameStart::Skip(reason) => return Ok(self.skip(reason)),
            FrameStart::Rebuild(cause) => {
                let rebuilt = self.rebuild_swapchain()?;
                if let Some(reason) = after_rebuild(cause, rebuilt) {
                    return Ok(self.skip(reason));
                }
            }
            FrameStart::Draw => {}
        }
        if self.post_process.is_dirty() {
            self.wait_for_inflight_frames()?;
            self.allocate_swapchain_sets()?;
        }

        let slot = self.current_slot;
        self.slots[slot].sync.wait()?;
        if self.slots[slot].state != SlotState::Idle {
            log::warn!("Frame slot {slot} left in {:?}; resetting", self.slots[slot].state);
            self.slots[slot].state = SlotState::Idle;
        }
        self.retire_batches(slot)?;

        let (image_index, suboptimal) = {
            let swapchain = self.swapchain.as_ref().ok_or(RendererError::SwapchainOutOfDate)?;
            let acquired = swapchain.acquire_next_image(self.slots[slot].sync.image_available);
            match classify_acquire(acquired)? {
                AcquireOutcome::Image { index, suboptimal } => (index, suboptimal),
                AcquireOutcome::OutOfDate => {
                    log::debug!("Swapchain out of date on acquire; skipping frame");
                    self.request_rebuild(RebuildCause::Stale);
                    return Ok(self.skip(SkipReason::OutOfDate));
                }
            }
        };
        self.slots[slot].state.advance(SlotState::Acquired)?;

        if let Err(e) = self.record_and_submit(slot, image_index, scene) {
            self.abandon_frame(slot);
            return Err(e);
        }

        let presented = self.present(slot, image_index)?;
        self.slots[slot].state.advance(SlotState::Presented)?;
        self.slots[slot].state.advance(SlotState::Idle)?;
        if suboptimal || presented == PresentOutcome::NeedsRebuild {
            self.request_rebuild(RebuildCause::Stale);
        }

        self.current_slot = next_slot(slot);
        self.frame_count += 1;
        self.stats.frames_presented += 1;
        Ok(FrameOutcome::Presented)
    }

    fn skip(&mut self, reason: SkipReason) -> FrameOutcome {
        self.stats.frames_skipped += 1;
        FrameOutcome::Skipped(reason)
    }

    /// Uniforms, both command buffers and the merged submission for an acquired image.
    ///
    /// The fence is reset only once everything is recorded, so a failure
    /// before submission leaves it signaled.
    fn record_and_submit(&mut self, slot: usize, image_index: u32, scene: &SceneState) -> Result<()> {
        let extent = self.swapchain_extent();
        let aspect = extent.width as f32 / extent.height as f32;
        let input = FrameInput::from_scene(scene, aspect);
        self.write_uniforms(slot, &input)?;

        let image = image_index as usize;
        self.record_viewport(slot, image, &input)?;
        self.record_editor(slot, image)?;
        self.slots[slot].state.advance(SlotState::Recorded)?;

        let batch = self.resources.mipmaps.try_take()?;
        let command_buffers = assemble_submission(
            self.slots[slot].viewport_cmd,
            self.slots[slot].editor_cmd,
            batch.as_ref(),
        );
        let submitted = self.slots[slot]
            .sync
            .reset()
            .and_then(|()| self.submit(slot, &command_buffers));
        if let Err(e) = submitted {
            if let Some(batch) = batch {
                self.resources.mipmaps.requeue(batch);
            }
            return Err(e);
        }

        self.stats.last_submission_len = command_buffers.len();
        if let Some(batch) = batch {
            log::debug!("Merged mip batch for {} textures", batch.textures.len());
            self.stats.mipmap_batches_merged += 1;
            self.slots[slot].retired.push(batch);
        }
        self.slots[slot].state.advance(SlotState::Submitted)
    }

    /// Returns a slot whose acquired image was never submitted to a usable state.
    fn abandon_frame(&mut self, slot: usize) {
        log::warn!("Abandoning frame on slot {slot}");
        if let Err(e) = self.slots[slot].sync.rearm() {
            log::error!("Failed to restore frame slot {slot}: {e}");
        }
        self.slots[slot].state = SlotState::Idle;
        // The acquired image is never presented; only a rebuild gives it back.
        self.request_rebuild(RebuildCause::Stale);
    }

    fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain
            .as_ref()
            .map_or(self.window_extent, Swapchain::extent)
    }

    fn wait_for_inflight_frames(&mut self) -> Result<()> {
        for slot in &mut self.slots {
            slot.sync.wait()?;
            slot.state = SlotState::Idle;
        }
        for index in 0..self.slots.len() {
            self.retire_batches(index)?;
        }
        Ok(())
    }

    /// Frees mip batches whose frame has completed and marks their textures ready.
    fn retire_batches(&mut self, slot: usize) -> Result<()> {
        let retired = std::mem::take(&mut self.slots[slot].retired);
        let mut ready = Vec::new();
        for batch in retired {
            match self.resources.mipmaps.try_release(batch) {
                Ok(textures) => ready.extend(textures),
                Err(batch) => self.slots[slot].retired.push(batch),
            }
        }
        if !ready.is_empty() {
            let rebuilt = self.resources.textures_ready(&ready)?;
            log::debug!("{} textures ready, {rebuilt} materials rebuilt", ready.len());
        }
        Ok(())
    }

    /// Tears down and recreates the swapchain group. Returns `false` when the
    /// surface cannot be built yet.
    fn rebuild_swapchain(&mut self) -> Result<bool> {
        self.wait_for_inflight_frames()?;

        self.post_process.destroy_targets();
        self.targets = None;
        if let Some(mut swapchain) = self.swapchain.take() {
            swapchain.destroy();
        }

        let support = SurfaceSupport::query(&self.device)?;
        let depth_format = choose_depth_format(|format| {
            self.device
                .supports_optimal(format, vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or_else(|| RendererError::DeviceInitFailed("No supported depth format".into()))?;

        let swapchain = match Swapchain::create(
            &self.device,
            self.resources.allocator(),
            &support,
            self.window_extent,
            depth_format,
            self.viewport_pass,
            self.resources.upload(),
        ) {
            Ok(swapchain) => swapchain,
            Err(e) if e.is_surface_lost() => {
                log::debug!("Surface not ready for a swapchain; retrying next frame");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let targets = RenderTargets::create(
            self.resources.allocator(),
            &swapchain,
            self.viewport_pass,
            self.editor_pass,
        )?;
        self.post_process.create_targets(
            self.resources.allocator(),
            self.resources.upload(),
            swapchain.extent(),
            swapchain.image_count(),
        )?;
        log::debug!(
            "Background red channel presents as {:.3} ({:?})",
            presented_value(self.config.linear_clear_color()[0], self.config.gamma, swapchain.format()),
            targets.transfer()
        );
        self.targets = Some(targets);
        self.swapchain = Some(swapchain);
        self.allocate_swapchain_sets()?;

        self.pending_rebuild = None;
        self.stats.swapchain_rebuilds += 1;
        Ok(true)
    }

    /// Rewrites post-process and overlay sets from a fresh swapchain allocator.
    fn allocate_swapchain_sets(&mut self) -> Result<()> {
        let (Some(targets), Some(swapchain)) = (&self.targets, &self.swapchain) else {
            return Ok(());
        };
        if !self.post_process.has_targets(swapchain.image_count()) {
            self.post_process.create_targets(
                self.resources.allocator(),
                self.resources.upload(),
                swapchain.extent(),
                swapchain.image_count(),
            )?;
        }

        let device = Arc::clone(&self.device.device);
        let views = targets.viewport_views();
        self.resources.swapchain_descriptors.reset_all()?;
        self.post_process.allocate_sets(
            &views,
            &mut self.resources.layouts,
            &mut self.resources.swapchain_descriptors,
            device.as_ref(),
        )?;

        let sources: Vec<(vk::ImageView, vk::ImageLayout)> = views
            .iter()
            .enumerate()
            .map(|(index, &view)| self.post_process.output(index, view))
            .collect();
        let pipeline_cache = self.resources.pipeline_cache.handle();
        let sampler = self.resources.sampler();
        self.overlay.prepare(OverlaySetup {
            device: &device,
            config: &self.config,
            render_pass: self.editor_pass,
            pipeline_cache,
            layouts: &mut self.resources.layouts,
            descriptors: &mut self.resources.swapchain_descriptors,
            sampler,
            extent: swapchain.extent(),
            sources: &sources,
        })
    }

    fn write_uniforms(&mut self, slot: usize, input: &FrameInput) -> Result<()> {
        let frame = &mut self.slots[slot];
        frame.matrices.write(0, std::slice::from_ref(&input.matrices))?;
        frame.lights.write(0, std::slice::from_ref(&input.lights))?;
        let offset = dynamic_offset(slot, self.object_stride) as vk::DeviceSize;
        self.object_buffer
            .write(offset, std::slice::from_ref(&input.object))
    }

    fn record_viewport(&self, slot: usize, image: usize, input: &FrameInput) -> Result<()> {
        let device = self.device.device.as_ref();
        let frame = &self.slots[slot];
        let cmd = frame.viewport_cmd;
        let targets = self.targets.as_ref().ok_or(RendererError::SwapchainOutOfDate)?;
        let extent = targets.extent();

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.config.linear_clear_color(),
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let render_pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.viewport_pass)
            .framebuffer(targets.viewport_framebuffer(image))
            .render_area(full_rect(extent))
            .clear_values(&clear_values);

        unsafe {
            begin_frame_commands(device, cmd)?;
            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            set_viewport_and_scissor(device, cmd, extent);

            self.viewport_pipeline.bind(cmd);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.viewport_pipeline.layout(),
                0,
                &[frame.pass_set, frame.object_set],
                &[dynamic_offset(slot, self.object_stride)],
            );
            if let Some(model) = self.resources.models.selected(input.selected_model) {
                let materials = &self.resources.materials;
                let layout = self.viewport_pipeline.layout();
                model.draw(device, cmd, |material| {
                    device.cmd_bind_descriptor_sets(
                        cmd,
                        vk::PipelineBindPoint::GRAPHICS,
                        layout,
                        2,
                        &[materials.set_or_fallback(material)],
                        &[],
                    );
                });
            }
            device.cmd_end_render_pass(cmd);

            self.post_process.record(cmd, image, extent);
            device.end_command_buffer(cmd)?;
        }
        Ok(())
    }

    fn record_editor(&mut self, slot: usize, image: usize) -> Result<()> {
        let device = Arc::clone(&self.device.device);
        let cmd = self.slots[slot].editor_cmd;
        let (Some(targets), Some(swapchain)) = (&self.targets, &self.swapchain) else {
            return Err(RendererError::SwapchainOutOfDate);
        };
        let extent = targets.extent();
        let editor_image = targets.editor_image(image);
        let swapchain_image = swapchain.image(image);

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 1.0],
            },
        }];
        let render_pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.editor_pass)
            .framebuffer(targets.editor_framebuffer(image))
            .render_area(full_rect(extent))
            .clear_values(&clear_values);

        unsafe {
            begin_frame_commands(&device, cmd)?;
            transition_image(
                &device,
                cmd,
                editor_image,
                LayoutTransition::color(
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                ),
            );
            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            set_viewport_and_scissor(&device, cmd, extent);
            self.overlay.record(&device, cmd, image, extent);
            device.cmd_end_render_pass(cmd);

            acquire_for_transfer(&device, cmd, swapchain_image);
            match targets.transfer() {
                PresentTransfer::Blit => device.cmd_blit_image(
                    cmd,
                    editor_image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    swapchain_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[full_blit(extent)],
                    vk::Filter::NEAREST,
                ),
                PresentTransfer::Copy => device.cmd_copy_image(
                    cmd,
                    editor_image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    swapchain_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[full_copy(extent)],
                ),
            }
            transition_image(
                &device,
                cmd,
                swapchain_image,
                LayoutTransition::color(
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::PRESENT_SRC_KHR,
                ),
            );
            device.end_command_buffer(cmd)?;
        }
        Ok(())
    }

    fn submit(&self, slot: usize, command_buffers: &[vk::CommandBuffer]) -> Result<()> {
        let sync = &self.slots[slot].sync;
        let wait_semaphores = [sync.image_available];
        let wait_stages =
            [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::TRANSFER];
        let signal_semaphores = [sync.render_finished];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(&signal_semaphores);
        self.device
            .graphics_queue
            .submit(&self.device.device, &[submit], sync.in_flight)
    }

    fn present(&self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        let swapchain = self.swapchain.as_ref().ok_or(RendererError::SwapchainOutOfDate)?;
        let wait_semaphores = [self.slots[slot].sync.render_finished];
        let swapchains = [swapchain.handle()];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        classify_present(
            self.device
                .present_queue
                .present(swapchain.loader(), &present_info),
        )
    }

    /// Integrates finished worker jobs. Returns the number of events handled.
    pub fn poll_assets(&mut self) -> Result<usize> {
        let Some(worker) = &self.worker else {
            return Ok(0);
        };
        let mut handled = 0;
        for (_, events) in worker.drain() {
            for event in events {
                handled += 1;
                match event {
                    AssetEvent::TextureLoaded { texture, deferred } => {
                        self.resources.insert_texture(texture, deferred)?;
                    }
                    AssetEvent::ModelLoaded { model, materials } => {
                        for material in materials {
                            self.resources.add_material(material)?;
                        }
                        let index = self.resources.models.push(model);
                        log::info!("Model {index} available for selection");
                    }
                    AssetEvent::Failed { name, error } => {
                        log::warn!("Asset '{name}' unavailable, using fallbacks: {error}");
                    }
                }
            }
        }
        Ok(handled)
    }

    /// Queues an asset job on the worker thread.
    pub fn submit_asset(&self, job: AssetJob, priority: Priority) -> Option<Uuid> {
        self.worker.as_ref().map(|worker| worker.submit(job, priority))
    }

    /// Blocks until the worker has finished every queued job.
    pub fn wait_for_assets(&self) {
        if let Some(worker) = &self.worker {
            worker.wait_idle();
        }
    }

    /// Uploads a texture synchronously with its full mip chain.
    pub fn load_texture(&mut self, name: &str, pixels: &PixelData) -> Result<()> {
        self.resources.load_texture(name, pixels)
    }

    pub fn add_material(&mut self, desc: MaterialDesc) -> Result<()> {
        self.resources.add_material(desc)
    }

    /// Uploads geometry synchronously and returns the model's selection index.
    pub fn upload_model(&mut self, name: &str, meshes: &[MeshData]) -> Result<usize> {
        self.resources.upload_model(name, meshes)
    }

    pub fn model_count(&self) -> usize {
        self.resources.models.len()
    }

    pub fn model_names(&self) -> Vec<String> {
        self.resources.models.iter().map(|m| m.name.clone()).collect()
    }

    /// Appends a compute effect reading the previous stage's output.
    pub fn push_effect(&mut self, name: &str, shader: &Path, push_constants: &[u8]) -> Result<()> {
        let cache = self.resources.pipeline_cache.handle();
        self.post_process.push_effect(name, shader, push_constants, cache)
    }

    /// Removes the last effect once the GPU no longer uses it.
    pub fn pop_effect(&mut self) -> Result<Option<String>> {
        self.wait_for_inflight_frames()?;
        let effect = self.post_process.pop_effect();
        Ok(effect.map(|e| e.name.clone()))
    }

    pub fn swap_effects(&mut self, i: usize, j: usize) -> Result<()> {
        self.post_process.swap(i, j)
    }

    pub fn set_effect_active(&mut self, index: usize, active: bool) -> Result<()> {
        self.post_process.set_active(index, active)
    }

    pub fn effect_names(&self) -> Vec<String> {
        self.post_process.chain().iter().map(|e| e.name.clone()).collect()
    }

    pub fn set_gamma(&mut self, gamma: f32) {
        self.config.gamma = gamma;
        if let Some(effect) = self.post_process.effect_mut(GAMMA_EFFECT) {
            effect.set_push_constants(bytemuck::bytes_of(&gamma));
        }
    }

    /// Replaces the editor overlay; it is prepared before the next frame.
    pub fn set_overlay(&mut self, overlay: Box<dyn EditorOverlay>) -> Result<()> {
        self.wait_for_inflight_frames()?;
        self.overlay.destroy();
        self.overlay = overlay;
        self.allocate_swapchain_sets()
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    pub fn swapchain_summary(&self) -> Option<SwapchainSummary> {
        self.swapchain.as_ref().map(Swapchain::summary)
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Shutting down editor renderer");
        if let Err(e) = self.device.wait_idle() {
            log::error!("Device wait failed during shutdown: {e}");
        }

        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
        self.overlay.destroy();
        self.post_process.destroy_targets();
        self.targets = None;
        if let Some(mut swapchain) = self.swapchain.take() {
            swapchain.destroy();
        }
        for slot in &mut self.slots {
            for batch in slot.retired.drain(..) {
                self.resources.mipmaps.release(batch);
            }
        }
        self.deletion_queue.flush();
        log::info!("Editor renderer shut down after {} frames", self.frame_count);
    }
}

fn pass_builder(slot: &FrameSlot) -> DescriptorBuilder {
    DescriptorBuilder::new()
        .bind_buffer(
            0,
            vk::DescriptorBufferInfo {
                buffer: slot.matrices.handle(),
                offset: 0,
                range: std::mem::size_of::<MatrixBufferData>() as vk::DeviceSize,
            },
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        )
        .bind_buffer(
            1,
            vk::DescriptorBufferInfo {
                buffer: slot.lights.handle(),
                offset: 0,
                range: std::mem::size_of::<LightBufferData>() as vk::DeviceSize,
            },
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::FRAGMENT,
        )
}

fn object_builder(buffer: &AllocatedBuffer) -> DescriptorBuilder {
    DescriptorBuilder::new().bind_buffer(
        0,
        vk::DescriptorBufferInfo {
            buffer: buffer.handle(),
            offset: 0,
            range: std::mem::size_of::<PerObjectData>() as vk::DeviceSize,
        },
        vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        vk::ShaderStageFlags::VERTEX,
    )
}

fn full_rect(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D::default(),
        extent,
    }
}

fn begin_frame_commands(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    unsafe {
        device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
        device.begin_command_buffer(cmd, &begin_info)?;
    }
    Ok(())
}

fn set_viewport_and_scissor(device: &ash::Device, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    unsafe {
        device.cmd_set_viewport(cmd, 0, &[viewport]);
        device.cmd_set_scissor(cmd, 0, &[full_rect(extent)]);
    }
}

/// `PRESENT_SRC -> TRANSFER_DST` ordered after the acquire semaphore wait.
fn acquire_for_transfer(device: &ash::Device, cmd: vk::CommandBuffer, image: vk::Image) {
    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(
            LayoutTransition::color(
                vk::ImageLayout::PRESENT_SRC_KHR,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )
            .range(),
        );
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::TRANSFER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}
