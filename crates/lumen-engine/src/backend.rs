//! The seam between the frame state machine and the GPU.
//!
//! [`Engine`](crate::Engine) only talks to the device through
//! [`GpuBackend`]. [`VulkanBackend`](crate::vulkan::VulkanBackend) is the real
//! implementation; tests drive the same state machine with a simulated one.

use std::sync::Arc;

use ash::vk;
use lumen_gpu::{AcquireOutcome, BlitRegion, GpuContext, GpuImage, ImageBarrier, PresentOutcome};

use crate::caps::AttachmentRequest;
use crate::error::Result;
use crate::frame_data::GraphicsSubmission;

/// Properties of a freshly created swapchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainInfo {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub image_count: u32,
}

/// Device operations the engine performs.
///
/// Slot indices are always below the count passed to
/// [`GpuBackend::create_frame_slots`].
pub trait GpuBackend {
    /// The GPU context, if backed by a real device.
    fn gpu(&self) -> Option<Arc<GpuContext>>;

    /// Whether a dedicated compute queue is available.
    fn has_async_compute(&self) -> bool;

    /// Current drawable size of the window in pixels.
    fn drawable_size(&self) -> (u32, u32);

    /// Build the swapchain. `usage` is added to `COLOR_ATTACHMENT`.
    fn create_swapchain(
        &mut self,
        width: u32,
        height: u32,
        usage: vk::ImageUsageFlags,
    ) -> Result<SwapchainInfo>;

    /// Destroy the swapchain. The device is idle.
    fn destroy_swapchain(&mut self);

    /// Image and view for a swapchain index.
    fn swapchain_target(&self, image_index: u32) -> (vk::Image, vk::ImageView);

    /// Allocate an offscreen image and leave it in the request's initial layout.
    fn create_attachment(
        &mut self,
        request: &AttachmentRequest,
        extent: vk::Extent2D,
    ) -> Result<GpuImage>;

    /// Free an offscreen image. The device is idle.
    fn destroy_attachment(&mut self, image: GpuImage);

    /// Create per-slot command buffers and semaphores.
    fn create_frame_slots(&mut self, count: usize, async_compute: bool) -> Result<()>;

    /// Destroy per-slot objects. The device is idle.
    fn destroy_frame_slots(&mut self);

    /// Block until the frame timeline reaches `value`. Expiry of the
    /// configured timeout is a [`lumen_gpu::GpuError::Timeout`].
    fn wait_timeline(&mut self, value: u64) -> Result<()>;

    /// Acquire a swapchain image, signaling the slot's acquire semaphore.
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome>;

    /// Reset and begin the slot's graphics command buffer.
    fn begin_commands(&mut self, slot: usize) -> Result<vk::CommandBuffer>;

    /// Begin the slot's async compute buffer, if the slot has one.
    fn begin_async_compute(&mut self, slot: usize) -> Result<Option<vk::CommandBuffer>>;

    /// End the async compute buffer and submit it when `submit` is set.
    fn end_async_compute(&mut self, slot: usize, submit: bool) -> Result<()>;

    /// Record layout transitions.
    fn record_barriers(&mut self, cmd: vk::CommandBuffer, barriers: &[ImageBarrier]);

    /// Record a full-image blit.
    fn record_blit(&mut self, cmd: vk::CommandBuffer, region: &BlitRegion);

    /// End the slot's graphics command buffer.
    fn end_commands(&mut self, slot: usize) -> Result<()>;

    /// Submit the frame's graphics work.
    fn submit_graphics(&mut self, submission: &GraphicsSubmission) -> Result<()>;

    /// Present the image rendered by `slot`.
    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;

    /// Wait until the device is idle.
    fn wait_idle(&mut self) -> Result<()>;

    /// Write the frame's start timestamp.
    fn begin_timing(&mut self, _slot: usize, _cmd: vk::CommandBuffer) {}

    /// Write the frame's end timestamp.
    fn end_timing(&mut self, _slot: usize, _cmd: vk::CommandBuffer) {}

    /// GPU milliseconds of the slot's last completed frame.
    fn read_timing(&mut self, _slot: usize) -> Option<f64> {
        None
    }
}
