use std::sync::Arc;

use ash::vk::{self, Handle};
use parking_lot::Mutex;

use ash_editor_renderer::config::{srgb_to_linear, RendererConfig};
use ash_editor_renderer::renderer::frame::{
    after_rebuild, align_up, assemble_submission, classify_acquire, classify_present,
    dynamic_offset, next_slot, plan_frame_start, AcquireOutcome, FrameStart, PresentOutcome,
    RebuildCause, SkipReason, SlotState, FRAMES_IN_FLIGHT,
};
use ash_editor_renderer::renderer::mipmap_channel::{BatchRecorder, MipmapChannel};
use ash_editor_renderer::renderer::targets::{
    editor_format, present_transfer, presented_value, PresentTransfer,
};
use ash_editor_renderer::renderer::texture::{mip_level_count, mip_plan, MipStep};
use ash_editor_renderer::renderer::uniforms::PerObjectData;
use ash_editor_renderer::vulkan::swapchain::{
    choose_extent, choose_surface_format, is_zero_extent, SurfaceSupport, SwapchainPlan,
};
use ash_editor_renderer::{RendererError, Result};

/// Shares its log with the test so frees can be observed after the channel takes ownership.
#[derive(Clone, Default)]
struct SharedRecorder {
    log: Arc<Mutex<RecorderLog>>,
}

#[derive(Default)]
struct RecorderLog {
    begun: u64,
    ended: Vec<vk::CommandBuffer>,
    freed: Vec<vk::CommandBuffer>,
}

impl BatchRecorder for SharedRecorder {
    fn begin(&mut self) -> Result<vk::CommandBuffer> {
        let mut log = self.log.lock();
        log.begun += 1;
        Ok(vk::CommandBuffer::from_raw(0xB000 + log.begun))
    }

    fn end(&mut self, cmd: vk::CommandBuffer) -> Result<()> {
        self.log.lock().ended.push(cmd);
        Ok(())
    }

    fn free(&mut self, cmd: vk::CommandBuffer) {
        self.log.lock().freed.push(cmd);
    }
}

fn frame_buffers() -> (vk::CommandBuffer, vk::CommandBuffer) {
    (
        vk::CommandBuffer::from_raw(0xA1),
        vk::CommandBuffer::from_raw(0xA2),
    )
}

#[test]
fn pending_mips_ride_along_as_third_buffer() {
    let recorder = SharedRecorder::default();
    let channel = MipmapChannel::new(recorder.clone());
    channel.record("bricks_1024", |_, _| {}).unwrap();
    assert_eq!(channel.pending(), 1);

    let (viewport, editor) = frame_buffers();
    let batch = channel.try_take().unwrap();
    let submission = assemble_submission(viewport, editor, batch.as_ref());

    assert_eq!(submission.len(), 3);
    assert_eq!(submission[0], viewport);
    assert_eq!(submission[1], editor);
    assert_eq!(channel.pending(), 0);
    let batch = batch.unwrap();
    assert_eq!(recorder.log.lock().ended, vec![batch.command_buffer]);
    assert_eq!(batch.textures, vec!["bricks_1024".to_string()]);
}

#[test]
fn contended_channel_leaves_frame_with_two_buffers() {
    let channel = MipmapChannel::new(SharedRecorder::default());
    channel.record("bricks_1024", |_, _| {}).unwrap();

    let (viewport, editor) = frame_buffers();
    let guard = channel.lock();
    let batch = channel.try_take().unwrap();
    let submission = assemble_submission(viewport, editor, batch.as_ref());
    assert_eq!(submission, vec![viewport, editor]);
    assert_eq!(guard.pending(), 1);
    drop(guard);

    // The work is picked up by the next uncontended frame.
    let batch = channel.try_take().unwrap();
    assert_eq!(assemble_submission(viewport, editor, batch.as_ref()).len(), 3);
}

#[test]
fn worker_recordings_merge_into_one_submission() {
    let recorder = SharedRecorder::default();
    let channel = Arc::new(MipmapChannel::new(recorder.clone()));

    let producer = {
        let channel = Arc::clone(&channel);
        std::thread::spawn(move || {
            for name in ["albedo", "normal", "roughness"] {
                channel.record(name, |_, _| {}).unwrap();
            }
        })
    };
    producer.join().unwrap();

    let batch = channel.try_take().unwrap().unwrap();
    assert_eq!(batch.textures.len(), 3);
    assert_eq!(recorder.log.lock().begun, 1);

    let cmd = batch.command_buffer;
    let ready = channel.try_release(batch).unwrap();
    assert_eq!(ready, vec!["albedo", "normal", "roughness"]);
    assert_eq!(recorder.log.lock().freed, vec![cmd]);
}

#[test]
fn release_is_handed_back_while_contended() {
    let channel = MipmapChannel::new(SharedRecorder::default());
    channel.record("a", |_, _| {}).unwrap();
    let batch = channel.try_take().unwrap().unwrap();

    let guard = channel.lock();
    let batch = channel.try_release(batch).unwrap_err();
    drop(guard);
    assert_eq!(channel.release(batch), vec!["a".to_string()]);
}

#[test]
fn out_of_date_acquire_skips_without_error() {
    assert_eq!(
        classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
        AcquireOutcome::OutOfDate
    );
    assert_eq!(
        classify_acquire(Ok((2, true))).unwrap(),
        AcquireOutcome::Image {
            index: 2,
            suboptimal: true
        }
    );
    assert!(matches!(
        classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)),
        Err(RendererError::Vulkan(vk::Result::ERROR_DEVICE_LOST))
    ));
}

#[test]
fn stale_present_requests_rebuild() {
    assert_eq!(classify_present(Ok(false)).unwrap(), PresentOutcome::Presented);
    assert_eq!(classify_present(Ok(true)).unwrap(), PresentOutcome::NeedsRebuild);
    assert_eq!(
        classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
        PresentOutcome::NeedsRebuild
    );
    assert!(classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
}

#[test]
fn slot_regions_never_overlap() {
    let object_size = std::mem::size_of::<PerObjectData>() as u64;
    for alignment in [16u64, 64, 256] {
        let stride = align_up(object_size, alignment);
        assert!(stride >= object_size);
        assert_eq!(stride % alignment, 0);

        let mut previous_end = 0u64;
        for slot in 0..FRAMES_IN_FLIGHT {
            let offset = u64::from(dynamic_offset(slot, stride));
            assert_eq!(offset, slot as u64 * stride);
            assert!(offset >= previous_end);
            previous_end = offset + object_size;
        }
    }
}

#[test]
fn slots_cycle_through_every_state() {
    let mut state = SlotState::Idle;
    for next in [
        SlotState::Acquired,
        SlotState::Recorded,
        SlotState::Submitted,
        SlotState::Presented,
        SlotState::Idle,
    ] {
        state.advance(next).unwrap();
    }
    assert!(state.advance(SlotState::Submitted).is_err());
    assert_eq!(next_slot(next_slot(0)), 0);
}

#[test]
fn minimized_window_is_a_zero_extent() {
    let minimized = vk::Extent2D {
        width: 0,
        height: 0,
    };
    assert!(is_zero_extent(minimized));
    assert!(is_zero_extent(vk::Extent2D {
        width: 1280,
        height: 0
    }));

    let caps = vk::SurfaceCapabilitiesKHR {
        current_extent: minimized,
        min_image_extent: minimized,
        max_image_extent: vk::Extent2D {
            width: 4096,
            height: 4096,
        },
        ..Default::default()
    };
    assert!(is_zero_extent(choose_extent(&caps, minimized)));
}

#[test]
fn mip_chain_ends_shader_readable_on_every_level() {
    let levels = mip_level_count(1024, 1024, true);
    assert_eq!(levels, 11);
    assert_eq!(mip_level_count(1024, 1024, false), 1);

    let plan = mip_plan(1024, 1024, levels);
    for level in 0..levels {
        let last = plan
            .iter()
            .filter_map(|step| match *step {
                MipStep::Transition { level: l, new, .. } if l == level => Some(new),
                _ => None,
            })
            .last();
        assert_eq!(last, Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));
    }
}

#[test]
fn failed_submission_requeues_batch_ahead_of_new_work() {
    let recorder = SharedRecorder::default();
    let channel = MipmapChannel::new(recorder.clone());
    channel.record("albedo", |_, _| {}).unwrap();
    let batch = channel.try_take().unwrap().unwrap();
    let cmd = batch.command_buffer;

    // Submission failed: the batch goes back instead of leaking.
    channel.requeue(batch);
    channel.record("normal", |_, _| {}).unwrap();
    assert!(recorder.log.lock().freed.is_empty());

    let retried = channel.try_take().unwrap().unwrap();
    assert_eq!(retried.command_buffer, cmd);
    assert_eq!(retried.textures, vec!["albedo".to_string()]);
    assert_eq!(channel.pending(), 1);

    let next = channel.try_take().unwrap().unwrap();
    assert_eq!(next.textures, vec!["normal".to_string()]);
}

fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

#[test]
fn resize_spends_one_frame_on_the_rebuild() {
    // 1920x1080 at steady state draws.
    let mut pending = None;
    assert_eq!(plan_frame_start(extent(1920, 1080), pending), FrameStart::Draw);

    // resize(1280, 720): the next frame rebuilds and submits nothing.
    pending = Some(RebuildCause::merge(pending, RebuildCause::Resize));
    let window = extent(1280, 720);
    let start = plan_frame_start(window, pending);
    assert_eq!(start, FrameStart::Rebuild(RebuildCause::Resize));
    assert_eq!(
        after_rebuild(RebuildCause::Resize, true),
        Some(SkipReason::OutOfDate)
    );
    pending = None;

    // The frame after presents.
    assert_eq!(plan_frame_start(window, pending), FrameStart::Draw);
}

#[test]
fn stale_swapchain_is_rebuilt_and_drawn_in_the_same_frame() {
    let pending = Some(RebuildCause::Stale);
    assert_eq!(
        plan_frame_start(extent(800, 600), pending),
        FrameStart::Rebuild(RebuildCause::Stale)
    );
    assert_eq!(after_rebuild(RebuildCause::Stale, true), None);
    assert_eq!(
        after_rebuild(RebuildCause::Stale, false),
        Some(SkipReason::OutOfDate)
    );
}

#[test]
fn minimized_window_never_rebuilds() {
    for pending in [None, Some(RebuildCause::Resize), Some(RebuildCause::Stale)] {
        assert_eq!(
            plan_frame_start(extent(0, 0), pending),
            FrameStart::Skip(SkipReason::Minimized)
        );
    }
}

fn support(current: vk::Extent2D) -> SurfaceSupport {
    SurfaceSupport {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: current,
            min_image_extent: extent(1, 1),
            max_image_extent: extent(4096, 4096),
            ..Default::default()
        },
        formats: vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ],
        present_modes: vec![vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO],
    }
}

#[test]
fn steady_state_rebuilds_plan_identical_swapchains() {
    let sentinel = extent(u32::MAX, u32::MAX);
    let support = support(sentinel);
    let first = SwapchainPlan::new(&support, extent(1280, 720)).unwrap();
    let second = SwapchainPlan::new(&support, extent(1280, 720)).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.extent, extent(1280, 720));
    assert_eq!(first.format, vk::Format::B8G8R8A8_SRGB);
    assert_eq!(first.min_image_count, 3);

    let resized = SwapchainPlan::new(&support, extent(1920, 1080)).unwrap();
    assert_eq!(resized.extent, extent(1920, 1080));
    assert_eq!(
        SwapchainPlan {
            extent: first.extent,
            ..resized
        },
        first
    );

    assert!(matches!(
        SwapchainPlan::new(&support, extent(0, 0)),
        Err(RendererError::SwapchainOutOfDate)
    ));
}

#[test]
fn background_is_gamma_encoded_exactly_once() {
    let config = RendererConfig::default();
    let swapchain = choose_surface_format(&support(extent(1, 1)).formats)
        .unwrap()
        .format;
    assert_eq!(
        present_transfer(editor_format(swapchain), swapchain),
        PresentTransfer::Copy
    );

    // The swapchain texels carry the sRGB-space clear color, so the display
    // shows linear clear^gamma.
    let linear = config.linear_clear_color();
    for channel in 0..3 {
        let presented = presented_value(linear[channel], config.gamma, swapchain);
        assert!(
            (presented - config.clear_color[channel]).abs() < 1e-4,
            "channel {channel}: {presented} != {}",
            config.clear_color[channel]
        );
        let displayed = srgb_to_linear(presented, config.gamma);
        assert!((displayed - config.clear_color[channel].powf(2.2)).abs() < 1e-4);
    }
}
