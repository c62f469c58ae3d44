//! [`GpuBackend`] on a real Vulkan device.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use lumen_gpu::barrier::{record_barriers, record_blit};
use lumen_gpu::command::{
    begin_command_buffer, end_command_buffer, execute_single_time_commands, submit2, CommandPool,
};
use lumen_gpu::{
    create_semaphore, AcquireOutcome, BlitRegion, GpuContext, GpuError, GpuImage, GpuTimestamps,
    ImageBarrier, PresentOutcome, SurfaceContext, Swapchain, TimelineSemaphore,
};
use tracing::{debug, warn};
use winit::window::Window;

use crate::backend::{GpuBackend, SwapchainInfo};
use crate::caps::AttachmentRequest;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::frame_data::{FrameSlot, GraphicsSubmission, WaitSource};

/// Vulkan objects behind the frame loop: surface, swapchain, frame slots and
/// the frame timeline.
pub struct VulkanBackend {
    gpu: Arc<GpuContext>,
    window: Arc<Window>,
    surface: SurfaceContext,
    swapchain: Swapchain,
    timeline: TimelineSemaphore,
    /// Pool for one-shot attachment layout transitions.
    transfer_pool: CommandPool,
    slots: Vec<FrameSlot>,
    /// One per swapchain image; a present may still wait on it when the
    /// next frame for a different slot acquires the same image.
    render_complete: Vec<vk::Semaphore>,
    timestamps: Option<GpuTimestamps>,
    vsync: bool,
    timeout_ms: u64,
    gpu_timestamps: bool,
}

impl VulkanBackend {
    /// Create the surface for `window` and the frame timeline.
    pub fn new(gpu: Arc<GpuContext>, window: Arc<Window>, config: &EngineConfig) -> Result<Self> {
        let surface = unsafe { SurfaceContext::from_window(&gpu, window.as_ref())? };
        let device = gpu.device();

        let timeline = match unsafe { TimelineSemaphore::new(device, 0) } {
            Ok(timeline) => timeline,
            Err(e) => {
                unsafe { surface.destroy() };
                return Err(e.into());
            }
        };
        let transfer_pool = match unsafe {
            CommandPool::new(
                device,
                gpu.graphics_queue_family(),
                vk::CommandPoolCreateFlags::TRANSIENT,
            )
        } {
            Ok(pool) => pool,
            Err(e) => unsafe {
                timeline.destroy(device);
                surface.destroy();
                return Err(e.into());
            },
        };

        let swapchain = Swapchain::new(&gpu, &surface);
        Ok(Self {
            gpu,
            window,
            surface,
            swapchain,
            timeline,
            transfer_pool,
            slots: Vec::new(),
            render_complete: Vec::new(),
            timestamps: None,
            vsync: config.vsync,
            timeout_ms: config.gpu_timeout_ms,
            gpu_timestamps: config.gpu_timestamps,
        })
    }

    /// The window being rendered to.
    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    fn slot(&self, slot: usize) -> Result<&FrameSlot> {
        self.slots.get(slot).ok_or_else(|| {
            GpuError::InvalidState(format!("frame slot {slot} does not exist")).into()
        })
    }

    fn destroy_render_complete(&mut self) {
        let device = self.gpu.device();
        for semaphore in self.render_complete.drain(..) {
            unsafe { device.destroy_semaphore(semaphore, None) };
        }
    }

    fn transition_new_image(&self, image: &GpuImage, layout: vk::ImageLayout) -> Result<()> {
        let device = self.gpu.device();
        let barrier =
            ImageBarrier::transition(image.image, image.aspect, vk::ImageLayout::UNDEFINED, layout);
        unsafe {
            execute_single_time_commands(
                device,
                &self.transfer_pool,
                self.gpu.graphics_queue(),
                |cmd| record_barriers(device, cmd, &[barrier]),
            )?;
        }
        Ok(())
    }
}

impl GpuBackend for VulkanBackend {
    fn gpu(&self) -> Option<Arc<GpuContext>> {
        Some(Arc::clone(&self.gpu))
    }

    fn has_async_compute(&self) -> bool {
        self.gpu.has_async_compute()
    }

    fn drawable_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn create_swapchain(
        &mut self,
        width: u32,
        height: u32,
        usage: vk::ImageUsageFlags,
    ) -> Result<SwapchainInfo> {
        unsafe {
            self.swapchain
                .create(&self.gpu, &self.surface, width, height, self.vsync, usage)?;
        }

        for _ in 0..self.swapchain.images.len() {
            match unsafe { create_semaphore(self.gpu.device()) } {
                Ok(semaphore) => self.render_complete.push(semaphore),
                Err(e) => {
                    self.destroy_render_complete();
                    unsafe { self.swapchain.destroy(false) };
                    return Err(e.into());
                }
            }
        }

        Ok(SwapchainInfo {
            extent: self.swapchain.extent,
            format: self.swapchain.format,
            image_count: u32::try_from(self.swapchain.images.len()).unwrap_or(u32::MAX),
        })
    }

    fn destroy_swapchain(&mut self) {
        self.destroy_render_complete();
        // Live frame slots mean the frame loop continues with a new chain.
        let recreating = !self.slots.is_empty();
        unsafe { self.swapchain.destroy(recreating) };

        let device = self.gpu.device();
        for slot in &mut self.slots {
            if let Err(e) = unsafe { slot.reset_acquire_semaphore(device) } {
                warn!("Failed to reset acquire semaphore: {e}");
            }
        }
    }

    fn swapchain_target(&self, image_index: u32) -> (vk::Image, vk::ImageView) {
        let index = image_index as usize;
        (
            self.swapchain
                .images
                .get(index)
                .copied()
                .unwrap_or_default(),
            self.swapchain
                .image_views
                .get(index)
                .copied()
                .unwrap_or_default(),
        )
    }

    fn create_attachment(
        &mut self,
        request: &AttachmentRequest,
        extent: vk::Extent2D,
    ) -> Result<GpuImage> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(request.format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(request.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(request.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let mut image = self.gpu.allocator().lock().create_image_with_view(
            &create_info,
            request.aspect,
            MemoryLocation::GpuOnly,
            &request.name,
        )?;

        if request.initial_layout != vk::ImageLayout::UNDEFINED {
            if let Err(e) = self.transition_new_image(&image, request.initial_layout) {
                if let Err(free) = self.gpu.allocator().lock().free_image(&mut image) {
                    warn!("Failed to free attachment {:?}: {free}", request.name);
                }
                return Err(e);
            }
        }
        debug!(
            "Attachment {:?}: {}x{} {:?}",
            request.name, extent.width, extent.height, request.format
        );
        Ok(image)
    }

    fn destroy_attachment(&mut self, mut image: GpuImage) {
        if let Err(e) = self.gpu.allocator().lock().free_image(&mut image) {
            warn!("Failed to free attachment: {e}");
        }
    }

    fn create_frame_slots(&mut self, count: usize, async_compute: bool) -> Result<()> {
        self.destroy_frame_slots();
        for _ in 0..count {
            match unsafe { FrameSlot::new(&self.gpu, async_compute) } {
                Ok(slot) => self.slots.push(slot),
                Err(e) => {
                    self.destroy_frame_slots();
                    return Err(e);
                }
            }
        }

        let caps = self.gpu.capabilities();
        if self.gpu_timestamps {
            if caps.supports_timestamps {
                let device = self.gpu.device();
                match unsafe { GpuTimestamps::new(device, count, caps.timestamp_period) } {
                    Ok(timestamps) => self.timestamps = Some(timestamps),
                    Err(e) => warn!("GPU timestamps unavailable: {e}"),
                }
            } else {
                warn!("Graphics queue does not support timestamps");
            }
        }
        Ok(())
    }

    fn destroy_frame_slots(&mut self) {
        let device = self.gpu.device();
        for slot in self.slots.drain(..) {
            unsafe { slot.destroy(device) };
        }
        if let Some(timestamps) = self.timestamps.take() {
            unsafe { timestamps.destroy(device) };
        }
    }

    fn wait_timeline(&mut self, value: u64) -> Result<()> {
        unsafe {
            self.timeline
                .wait(self.gpu.device(), value, self.timeout_ms)?;
        }
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        let semaphore = self.slot(slot)?.image_acquired;
        let timeout_ns = self.timeout_ms.saturating_mul(1_000_000);
        Ok(unsafe { self.swapchain.acquire_next_image(semaphore, timeout_ns)? })
    }

    fn begin_commands(&mut self, slot: usize) -> Result<vk::CommandBuffer> {
        let device = self.gpu.device();
        let frame = self.slot(slot)?;
        unsafe {
            frame.command_pool.reset(device)?;
            begin_command_buffer(device, frame.command_buffer)?;
        }
        Ok(frame.command_buffer)
    }

    fn begin_async_compute(&mut self, slot: usize) -> Result<Option<vk::CommandBuffer>> {
        let device = self.gpu.device();
        let Some((pool, cmd)) = &self.slot(slot)?.compute else {
            return Ok(None);
        };
        unsafe {
            pool.reset(device)?;
            begin_command_buffer(device, *cmd)?;
        }
        Ok(Some(*cmd))
    }

    fn end_async_compute(&mut self, slot: usize, submit: bool) -> Result<()> {
        let device = self.gpu.device();
        let frame = self.slot(slot)?;
        let Some((_, cmd)) = &frame.compute else {
            return Ok(());
        };
        unsafe {
            end_command_buffer(device, *cmd)?;
            if submit {
                let signals = [vk::SemaphoreSubmitInfo::default()
                    .semaphore(frame.compute_finished)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
                submit2(
                    device,
                    self.gpu.compute_queue(),
                    *cmd,
                    &[],
                    &signals,
                    vk::Fence::null(),
                )?;
            }
        }
        Ok(())
    }

    fn record_barriers(&mut self, cmd: vk::CommandBuffer, barriers: &[ImageBarrier]) {
        unsafe { record_barriers(self.gpu.device(), cmd, barriers) };
    }

    fn record_blit(&mut self, cmd: vk::CommandBuffer, region: &BlitRegion) {
        unsafe { record_blit(self.gpu.device(), cmd, region) };
    }

    fn end_commands(&mut self, slot: usize) -> Result<()> {
        let cmd = self.slot(slot)?.command_buffer;
        unsafe { end_command_buffer(self.gpu.device(), cmd)? };
        Ok(())
    }

    fn submit_graphics(&mut self, submission: &GraphicsSubmission) -> Result<()> {
        let frame = self.slot(submission.slot)?;
        let render_complete = self
            .render_complete
            .get(submission.image_index as usize)
            .copied()
            .ok_or_else(|| {
                GpuError::InvalidState(format!(
                    "no swapchain image {}",
                    submission.image_index
                ))
            })?;

        let waits: Vec<vk::SemaphoreSubmitInfo<'_>> = submission
            .wait_sources()
            .into_iter()
            .map(|source| {
                let semaphore = match source {
                    WaitSource::ImageAcquired => frame.image_acquired,
                    WaitSource::AsyncCompute => frame.compute_finished,
                };
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            })
            .collect();
        let signals = [
            vk::SemaphoreSubmitInfo::default()
                .semaphore(render_complete)
                .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
            vk::SemaphoreSubmitInfo::default()
                .semaphore(self.timeline.handle())
                .value(submission.timeline_value)
                .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
        ];

        unsafe {
            submit2(
                self.gpu.device(),
                self.gpu.graphics_queue(),
                frame.command_buffer,
                &waits,
                &signals,
                vk::Fence::null(),
            )?;
        }
        Ok(())
    }

    fn present(&mut self, _slot: usize, image_index: u32) -> Result<PresentOutcome> {
        let render_complete = self
            .render_complete
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| GpuError::InvalidState(format!("no swapchain image {image_index}")))?;
        Ok(unsafe {
            self.swapchain
                .present(self.gpu.graphics_queue(), image_index, &[render_complete])?
        })
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.gpu.wait_idle()?;
        Ok(())
    }

    fn begin_timing(&mut self, slot: usize, cmd: vk::CommandBuffer) {
        if let Some(timestamps) = &mut self.timestamps {
            unsafe { timestamps.begin(self.gpu.device(), cmd, slot) };
        }
    }

    fn end_timing(&mut self, slot: usize, cmd: vk::CommandBuffer) {
        if let Some(timestamps) = &mut self.timestamps {
            unsafe { timestamps.end(self.gpu.device(), cmd, slot) };
        }
    }

    fn read_timing(&mut self, slot: usize) -> Option<f64> {
        let timestamps = self.timestamps.as_ref()?;
        unsafe { timestamps.read(self.gpu.device(), slot) }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Err(e) = self.gpu.wait_idle() {
            warn!("wait_idle before backend teardown failed: {e}");
        }
        self.destroy_frame_slots();
        self.destroy_render_complete();
        let device = self.gpu.device();
        unsafe {
            self.swapchain.shutdown();
            self.transfer_pool.destroy(device);
            self.timeline.destroy(device);
            self.surface.destroy();
        }
    }
}
