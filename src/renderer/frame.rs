//! Per-slot frame resources and the pure decisions the frame executor makes.

use std::sync::Arc;

use ash::vk;

use super::mipmap_channel::MergedBatch;
use super::uniforms::{LightBufferData, MatrixBufferData};
use crate::vulkan::allocator::{AllocatedBuffer, Allocator, MemoryLocation};
use crate::vulkan::sync::FrameSync;
use crate::{RendererError, Result};

pub const FRAMES_IN_FLIGHT: usize = 2;

/// Lifecycle of one frame slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SlotState {
    #[default]
    Idle,
    Acquired,
    Recorded,
    Submitted,
    Presented,
}

impl SlotState {
    pub fn next(self) -> SlotState {
        match self {
            SlotState::Idle => SlotState::Acquired,
            SlotState::Acquired => SlotState::Recorded,
            SlotState::Recorded => SlotState::Submitted,
            SlotState::Submitted => SlotState::Presented,
            SlotState::Presented => SlotState::Idle,
        }
    }

    /// Moves to `to` if it is the successor of the current state.
    pub fn advance(&mut self, to: SlotState) -> Result<()> {
        if self.next() != to {
            return Err(RendererError::VulkanError(format!(
                "Invalid frame slot transition {self:?} -> {to:?}"
            )));
        }
        *self = to;
        Ok(())
    }
}

pub fn next_slot(slot: usize) -> usize {
    (slot + 1) % FRAMES_IN_FLIGHT
}

pub fn align_up(size: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return size;
    }
    size.div_ceil(alignment) * alignment
}

/// Offset of `slot`'s region in the per-object dynamic uniform buffer.
pub fn dynamic_offset(slot: usize, stride: u64) -> u32 {
    (slot as u64 * stride) as u32
}

/// Command buffers for one submission, in execution order.
///
/// A mipmap batch taken from the side-channel rides along as the third entry.
pub fn assemble_submission(
    viewport: vk::CommandBuffer,
    editor: vk::CommandBuffer,
    mipmaps: Option<&MergedBatch>,
) -> Vec<vk::CommandBuffer> {
    let mut buffers = Vec::with_capacity(3);
    buffers.push(viewport);
    buffers.push(editor);
    if let Some(batch) = mipmaps {
        buffers.push(batch.command_buffer);
    }
    buffers
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Image { index: u32, suboptimal: bool },
    OutOfDate,
}

pub fn classify_acquire(result: std::result::Result<(u32, bool), vk::Result>) -> Result<AcquireOutcome> {
    match result {
        Ok((index, suboptimal)) => Ok(AcquireOutcome::Image { index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(e) => Err(RendererError::Vulkan(e)),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    NeedsRebuild,
}

pub fn classify_present(result: std::result::Result<bool, vk::Result>) -> Result<PresentOutcome> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) | Err(vk::Result::SUBOPTIMAL_KHR) => {
            Ok(PresentOutcome::NeedsRebuild)
        }
        Err(e) => Err(RendererError::Vulkan(e)),
    }
}

/// Why a frame was not drawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Zero-sized surface; nothing is drawn and nothing is rebuilt.
    Minimized,
    /// The swapchain is stale; it is rebuilt before the next frame.
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    Skipped(SkipReason),
}

/// Why the swapchain has to be rebuilt. Ordered so the stronger cause wins a merge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RebuildCause {
    /// Acquire or present reported the swapchain stale or suboptimal.
    Stale,
    /// The window changed size.
    Resize,
}

impl RebuildCause {
    pub fn merge(pending: Option<RebuildCause>, cause: RebuildCause) -> RebuildCause {
        pending.map_or(cause, |pending| pending.max(cause))
    }
}

/// What a frame does before touching its slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStart {
    Skip(SkipReason),
    Rebuild(RebuildCause),
    Draw,
}

/// A zero-sized window skips without rebuilding, even with a rebuild pending.
pub fn plan_frame_start(window: vk::Extent2D, pending: Option<RebuildCause>) -> FrameStart {
    if window.width == 0 || window.height == 0 {
        return FrameStart::Skip(SkipReason::Minimized);
    }
    match pending {
        Some(cause) => FrameStart::Rebuild(cause),
        None => FrameStart::Draw,
    }
}

/// Whether the frame that ran a rebuild still draws.
///
/// A resize spends its frame on the rebuild and the next frame presents at the
/// new extent. A stale swapchain is rebuilt and drawn to in the same frame.
/// A rebuild the surface refused always skips.
pub fn after_rebuild(cause: RebuildCause, rebuilt: bool) -> Option<SkipReason> {
    if !rebuilt || cause == RebuildCause::Resize {
        Some(SkipReason::OutOfDate)
    } else {
        None
    }
}

/// Running counters for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames_presented: u64,
    pub frames_skipped: u64,
    pub swapchain_rebuilds: u64,
    pub mipmap_batches_merged: u64,
    /// Command buffer count of the most recent submission.
    pub last_submission_len: usize,
}

/// Resources owned by one in-flight frame.
pub struct FrameSlot {
    pub sync: FrameSync,
    pub viewport_cmd: vk::CommandBuffer,
    pub editor_cmd: vk::CommandBuffer,
    pub matrices: AllocatedBuffer,
    pub lights: AllocatedBuffer,
    pub pass_set: vk::DescriptorSet,
    pub object_set: vk::DescriptorSet,
    /// Mipmap batches submitted from this slot and not yet freed.
    pub retired: Vec<MergedBatch>,
    pub state: SlotState,
}

impl FrameSlot {
    /// Creates sync objects and uniform buffers; descriptor sets are filled in later.
    pub fn new(
        device: Arc<ash::Device>,
        allocator: &Arc<Allocator>,
        command_buffers: [vk::CommandBuffer; 2],
    ) -> Result<Self> {
        let matrices = allocator.create_buffer(
            std::mem::size_of::<MatrixBufferData>() as u64,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
        )?;
        let lights = allocator.create_buffer(
            std::mem::size_of::<LightBufferData>() as u64,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
        )?;
        Ok(Self {
            sync: FrameSync::new(device)?,
            viewport_cmd: command_buffers[0],
            editor_cmd: command_buffers[1],
            matrices,
            lights,
            pass_set: vk::DescriptorSet::null(),
            object_set: vk::DescriptorSet::null(),
            retired: Vec::new(),
            state: SlotState::Idle,
        })
    }
}
