//! Side-channel for mip chain commands recorded off the frame thread.
//!
//! The asset worker records blits into a shared primary command buffer while
//! holding the channel lock. The frame executor only ever `try_lock`s: when
//! the lock is free and work is pending it ends the buffer and submits it with
//! the frame; otherwise the work waits for a later frame.

use std::sync::Arc;

use ash::vk;
use parking_lot::{Mutex, MutexGuard};

use crate::{RendererError, Result};

/// Command buffer lifecycle used by [`MipmapChannel`]. Every call happens under the channel lock.
pub trait BatchRecorder: Send {
    /// Allocates a primary command buffer and begins recording.
    fn begin(&mut self) -> Result<vk::CommandBuffer>;
    fn end(&mut self, cmd: vk::CommandBuffer) -> Result<()>;
    fn free(&mut self, cmd: vk::CommandBuffer);
}

/// Records into buffers from a dedicated pool on the graphics family.
pub struct DeviceBatchRecorder {
    device: Arc<ash::Device>,
    pool: vk::CommandPool,
}

impl DeviceBatchRecorder {
    pub fn new(device: Arc<ash::Device>, graphics_family: u32) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(graphics_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let pool = unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| {
            RendererError::VulkanError(format!("Failed to create mipmap command pool: {e}"))
        })?;
        Ok(Self { device, pool })
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }
}

impl BatchRecorder for DeviceBatchRecorder {
    fn begin(&mut self) -> Result<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        unsafe {
            let cmd = self.device.allocate_command_buffers(&alloc_info)?[0];
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            if let Err(e) = self.device.begin_command_buffer(cmd, &begin_info) {
                self.device.free_command_buffers(self.pool, &[cmd]);
                return Err(e.into());
            }
            Ok(cmd)
        }
    }

    fn end(&mut self, cmd: vk::CommandBuffer) -> Result<()> {
        unsafe { self.device.end_command_buffer(cmd)? };
        Ok(())
    }

    fn free(&mut self, cmd: vk::CommandBuffer) {
        unsafe { self.device.free_command_buffers(self.pool, &[cmd]) };
    }
}

impl Drop for DeviceBatchRecorder {
    fn drop(&mut self) {
        unsafe { self.device.destroy_command_pool(self.pool, None) };
    }
}

/// An ended command buffer and the textures whose mips it generates.
#[derive(Debug, PartialEq, Eq)]
pub struct MergedBatch {
    pub command_buffer: vk::CommandBuffer,
    pub textures: Vec<String>,
}

struct ChannelState<R> {
    recorder: R,
    current: Option<vk::CommandBuffer>,
    recorded: u32,
    textures: Vec<String>,
    // Ended batch whose submission failed; handed out before new work.
    requeued: Option<MergedBatch>,
}

/// Exclusive access to the channel for the producer.
pub struct ChannelGuard<'a, R: BatchRecorder> {
    state: MutexGuard<'a, ChannelState<R>>,
}

impl<R: BatchRecorder> ChannelGuard<'_, R> {
    /// Number of textures recorded since the last merge.
    pub fn pending(&self) -> u32 {
        self.state.recorded
    }

    pub fn recorder(&self) -> &R {
        &self.state.recorder
    }

    /// Appends commands for `texture` to the open batch, beginning one if needed.
    pub fn record<F>(&mut self, texture: &str, record: F) -> Result<()>
    where
        F: FnOnce(&R, vk::CommandBuffer),
    {
        let state = &mut *self.state;
        let cmd = match state.current {
            Some(cmd) => cmd,
            None => {
                let cmd = state.recorder.begin()?;
                state.current = Some(cmd);
                cmd
            }
        };
        record(&state.recorder, cmd);
        state.recorded += 1;
        state.textures.push(texture.to_string());
        Ok(())
    }
}

pub struct MipmapChannel<R: BatchRecorder = DeviceBatchRecorder> {
    state: Mutex<ChannelState<R>>,
}

impl<R: BatchRecorder> MipmapChannel<R> {
    pub fn new(recorder: R) -> Self {
        Self {
            state: Mutex::new(ChannelState {
                recorder,
                current: None,
                recorded: 0,
                textures: Vec::new(),
                requeued: None,
            }),
        }
    }

    /// Blocks until the channel is free. Producer side only.
    pub fn lock(&self) -> ChannelGuard<'_, R> {
        ChannelGuard {
            state: self.state.lock(),
        }
    }

    pub fn record<F>(&self, texture: &str, record: F) -> Result<()>
    where
        F: FnOnce(&R, vk::CommandBuffer),
    {
        self.lock().record(texture, record)
    }

    /// Takes the pending batch without blocking.
    ///
    /// Returns `None` when the lock is contended or nothing was recorded; the
    /// pending count is then left untouched.
    pub fn try_take(&self) -> Result<Option<MergedBatch>> {
        let Some(mut state) = self.state.try_lock() else {
            log::trace!("Mipmap channel busy; deferring merge");
            return Ok(None);
        };
        if let Some(batch) = state.requeued.take() {
            return Ok(Some(batch));
        }
        if state.recorded == 0 {
            return Ok(None);
        }
        let Some(cmd) = state.current else {
            return Ok(None);
        };
        state.recorder.end(cmd)?;
        state.current = None;
        state.recorded = 0;
        let textures = std::mem::take(&mut state.textures);
        Ok(Some(MergedBatch {
            command_buffer: cmd,
            textures,
        }))
    }

    /// Returns a taken batch that never reached the GPU. The next
    /// [`try_take`](Self::try_take) hands it out again, ahead of newer recordings.
    pub fn requeue(&self, batch: MergedBatch) {
        let mut state = self.state.lock();
        if let Some(stale) = state.requeued.replace(batch) {
            log::warn!("Dropping unsubmitted mip batch for {:?}", stale.textures);
            state.recorder.free(stale.command_buffer);
        }
    }

    /// Frees a batch whose submission has completed, returning its textures.
    ///
    /// Hands the batch back when the lock is contended so the caller can retry.
    pub fn try_release(&self, batch: MergedBatch) -> std::result::Result<Vec<String>, MergedBatch> {
        match self.state.try_lock() {
            Some(mut state) => {
                state.recorder.free(batch.command_buffer);
                Ok(batch.textures)
            }
            None => Err(batch),
        }
    }

    /// Frees a completed batch, waiting for the lock.
    pub fn release(&self, batch: MergedBatch) -> Vec<String> {
        self.state.lock().recorder.free(batch.command_buffer);
        batch.textures
    }

    pub fn pending(&self) -> u32 {
        self.state.lock().recorded
    }

    /// Drops any unsubmitted recording. The textures listed in it never become ready.
    pub fn discard_pending(&self) -> Vec<String> {
        let mut state = self.state.lock();
        if let Some(cmd) = state.current.take() {
            state.recorder.free(cmd);
        }
        if let Some(batch) = state.requeued.take() {
            state.recorder.free(batch.command_buffer);
            state.textures.extend(batch.textures);
        }
        state.recorded = 0;
        std::mem::take(&mut state.textures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[derive(Default)]
    struct FakeRecorder {
        next: u64,
        ended: Vec<vk::CommandBuffer>,
        freed: Vec<vk::CommandBuffer>,
    }

    impl BatchRecorder for FakeRecorder {
        fn begin(&mut self) -> Result<vk::CommandBuffer> {
            self.next += 1;
            Ok(vk::CommandBuffer::from_raw(self.next))
        }
        fn end(&mut self, cmd: vk::CommandBuffer) -> Result<()> {
            self.ended.push(cmd);
            Ok(())
        }
        fn free(&mut self, cmd: vk::CommandBuffer) {
            self.freed.push(cmd);
        }
    }

    #[test]
    fn empty_channel_yields_nothing() {
        let channel = MipmapChannel::new(FakeRecorder::default());
        assert_eq!(channel.try_take().unwrap(), None);
    }

    #[test]
    fn recordings_share_one_buffer_until_taken() {
        let channel = MipmapChannel::new(FakeRecorder::default());
        channel.record("a", |_, _| {}).unwrap();
        channel.record("b", |_, _| {}).unwrap();
        assert_eq!(channel.pending(), 2);

        let batch = channel.try_take().unwrap().unwrap();
        assert_eq!(batch.command_buffer, vk::CommandBuffer::from_raw(1));
        assert_eq!(batch.textures, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(channel.pending(), 0);
        assert_eq!(channel.lock().recorder().ended, vec![batch.command_buffer]);

        // Next recording opens a fresh buffer.
        channel.record("c", |_, cmd| assert_eq!(cmd.as_raw(), 2)).unwrap();
    }

    #[test]
    fn release_frees_and_reports_textures() {
        let channel = MipmapChannel::new(FakeRecorder::default());
        channel.record("brick", |_, _| {}).unwrap();
        let batch = channel.try_take().unwrap().unwrap();
        let cmd = batch.command_buffer;
        assert_eq!(channel.try_release(batch).unwrap(), vec!["brick".to_string()]);
        assert_eq!(channel.lock().recorder().freed, vec![cmd]);
    }

    #[test]
    fn contended_release_returns_batch() {
        let channel = MipmapChannel::new(FakeRecorder::default());
        channel.record("brick", |_, _| {}).unwrap();
        let batch = channel.try_take().unwrap().unwrap();
        let guard = channel.lock();
        let batch = channel.try_release(batch).unwrap_err();
        drop(guard);
        assert_eq!(channel.release(batch), vec!["brick".to_string()]);
    }

    #[test]
    fn discard_frees_open_buffer() {
        let channel = MipmapChannel::new(FakeRecorder::default());
        channel.record("x", |_, _| {}).unwrap();
        assert_eq!(channel.discard_pending(), vec!["x".to_string()]);
        assert_eq!(channel.pending(), 0);
        assert_eq!(channel.lock().recorder().freed.len(), 1);
    }
}
