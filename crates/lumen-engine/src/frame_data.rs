//! Frame slots and timeline pacing.
//!
//! Each of the `frame_overlap` slots owns its command buffers and binary
//! semaphores. A single timeline semaphore is signaled once per submitted
//! frame; [`FramePacer`] remembers which value each slot last submitted so a
//! slot is only reused once the GPU has reached that value.

use ash::vk;
use lumen_gpu::command::CommandPool;
use lumen_gpu::{create_semaphore, GpuContext};

use crate::error::Result;

/// Timeline bookkeeping for the frame slots.
#[derive(Debug, Clone)]
pub struct FramePacer {
    counter: u64,
    submitted: Vec<u64>,
    frame_number: u64,
}

impl FramePacer {
    /// Pacer for `overlap` slots. `overlap` is at least one.
    pub fn new(overlap: usize) -> Self {
        Self {
            counter: 0,
            submitted: vec![0; overlap.max(1)],
            frame_number: 0,
        }
    }

    /// Number of slots.
    pub fn slot_count(&self) -> usize {
        self.submitted.len()
    }

    /// Frames begun so far; the current frame's number.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Slot of the current frame.
    #[allow(clippy::cast_possible_truncation)]
    pub fn slot(&self) -> usize {
        (self.frame_number % self.submitted.len() as u64) as usize
    }

    /// Timeline value that must be signaled before `slot` is reused, or
    /// `None` if the slot never submitted.
    pub fn wait_value(&self, slot: usize) -> Option<u64> {
        self.submitted.get(slot).copied().filter(|&v| v > 0)
    }

    /// Claim the next timeline value for `slot`'s submission.
    pub fn submit(&mut self, slot: usize) -> u64 {
        self.counter += 1;
        if let Some(value) = self.submitted.get_mut(slot) {
            *value = self.counter;
        }
        self.counter
    }

    /// Last value handed out by [`FramePacer::submit`].
    pub fn last_value(&self) -> u64 {
        self.counter
    }

    /// Move on to the next frame.
    pub fn advance(&mut self) {
        self.frame_number += 1;
    }
}

/// What a graphics submission waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitSource {
    /// The swapchain image is ready.
    ImageAcquired,
    /// Async compute work for this frame finished.
    AsyncCompute,
}

/// One frame's graphics submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphicsSubmission {
    pub slot: usize,
    pub image_index: u32,
    /// Async compute work was submitted this frame.
    pub wait_async_compute: bool,
    /// Value the timeline is signaled to on completion.
    pub timeline_value: u64,
}

impl GraphicsSubmission {
    /// Semaphores the submission waits on, in submit order.
    pub fn wait_sources(&self) -> Vec<WaitSource> {
        let mut waits = vec![WaitSource::ImageAcquired];
        if self.wait_async_compute {
            waits.push(WaitSource::AsyncCompute);
        }
        waits
    }
}

/// Vulkan objects owned by one frame slot.
pub struct FrameSlot {
    pub command_pool: CommandPool,
    pub command_buffer: vk::CommandBuffer,
    /// Pool and buffer on the compute family, with async compute.
    pub compute: Option<(CommandPool, vk::CommandBuffer)>,
    /// Signaled by the async compute submission.
    pub compute_finished: vk::Semaphore,
    /// Signaled by swapchain acquire.
    pub image_acquired: vk::Semaphore,
}

impl FrameSlot {
    /// Create a slot's pools, buffers and semaphores.
    ///
    /// # Safety
    /// The GPU context must be valid.
    pub unsafe fn new(gpu: &GpuContext, async_compute: bool) -> Result<Self> {
        let device = gpu.device();
        let command_pool = CommandPool::new(
            device,
            gpu.graphics_queue_family(),
            vk::CommandPoolCreateFlags::TRANSIENT,
        )?;

        let mut slot = Self {
            command_pool,
            command_buffer: vk::CommandBuffer::null(),
            compute: None,
            compute_finished: vk::Semaphore::null(),
            image_acquired: vk::Semaphore::null(),
        };

        if let Err(e) = slot.populate(gpu, async_compute) {
            slot.destroy(device);
            return Err(e);
        }
        Ok(slot)
    }

    unsafe fn populate(&mut self, gpu: &GpuContext, async_compute: bool) -> Result<()> {
        let device = gpu.device();
        self.command_buffer = self.command_pool.allocate_command_buffer(device)?;
        self.image_acquired = create_semaphore(device)?;

        if async_compute {
            let pool = CommandPool::new(
                device,
                gpu.compute_queue_family(),
                vk::CommandPoolCreateFlags::TRANSIENT,
            )?;
            match pool.allocate_command_buffer(device) {
                Ok(cmd) => self.compute = Some((pool, cmd)),
                Err(e) => {
                    pool.destroy(device);
                    return Err(e.into());
                }
            }
            self.compute_finished = create_semaphore(device)?;
        }
        Ok(())
    }

    /// Replace the acquire semaphore.
    ///
    /// An acquire that succeeded but whose frame was aborted leaves the old
    /// semaphore with a pending signal.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn reset_acquire_semaphore(&mut self, device: &ash::Device) -> Result<()> {
        let fresh = create_semaphore(device)?;
        device.destroy_semaphore(self.image_acquired, None);
        self.image_acquired = fresh;
        Ok(())
    }

    /// Destroy everything the slot owns.
    ///
    /// # Safety
    /// No submission using the slot may be pending.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        if let Some((pool, _)) = &self.compute {
            pool.destroy(device);
        }
        device.destroy_semaphore(self.compute_finished, None);
        device.destroy_semaphore(self.image_acquired, None);
        self.command_pool.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_slots_have_nothing_to_wait_for() {
        let pacer = FramePacer::new(3);
        assert_eq!(pacer.slot_count(), 3);
        assert!((0..3).all(|slot| pacer.wait_value(slot).is_none()));
    }

    #[test]
    fn slot_reuse_waits_for_its_own_last_value() {
        let mut pacer = FramePacer::new(2);
        let mut values = Vec::new();
        for _ in 0..5 {
            let slot = pacer.slot();
            if let Some(wait) = pacer.wait_value(slot) {
                // Two frames ago, same slot.
                assert_eq!(wait + 2, pacer.last_value() + 1);
            }
            values.push(pacer.submit(slot));
            pacer.advance();
        }
        assert_eq!(values, [1, 2, 3, 4, 5]);
        assert_eq!(pacer.frame_number(), 5);
        assert_eq!(pacer.slot(), 1);
        assert_eq!(pacer.wait_value(0), Some(5));
        assert_eq!(pacer.wait_value(1), Some(4));
    }

    #[test]
    fn zero_overlap_is_treated_as_one() {
        let mut pacer = FramePacer::new(0);
        assert_eq!(pacer.slot_count(), 1);
        assert_eq!(pacer.submit(pacer.slot()), 1);
        pacer.advance();
        assert_eq!(pacer.slot(), 0);
        assert_eq!(pacer.wait_value(0), Some(1));
    }

    #[test]
    fn async_compute_wait_added_only_when_submitted() {
        let mut submission = GraphicsSubmission {
            slot: 0,
            image_index: 0,
            wait_async_compute: false,
            timeline_value: 1,
        };
        assert_eq!(submission.wait_sources(), [WaitSource::ImageAcquired]);

        submission.wait_async_compute = true;
        assert_eq!(
            submission.wait_sources(),
            [WaitSource::ImageAcquired, WaitSource::AsyncCompute]
        );
    }
}
