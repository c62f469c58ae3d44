//! Simulated backend and renderer for driving the engine without a GPU.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use ash::vk::{self, Handle};
use lumen_gpu::{AcquireOutcome, BlitRegion, GpuContext, GpuError, GpuImage, ImageBarrier, PresentOutcome};
use parking_lot::Mutex;

use crate::backend::{GpuBackend, SwapchainInfo};
use crate::caps::{AttachmentRequest, PresentationMode, RendererCaps};
use crate::context::EngineContext;
use crate::error::Result;
use crate::frame::FrameContext;
use crate::frame_data::GraphicsSubmission;
use crate::renderer::Renderer;

/// A call the engine made on the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateSwapchain(u32, u32),
    DestroySwapchain,
    CreateAttachment(String),
    DestroyAttachment(u64),
    CreateFrameSlots(usize, bool),
    DestroyFrameSlots,
    WaitTimeline(u64),
    Acquire(usize),
    BeginCommands(usize),
    BeginAsyncCompute(usize),
    EndAsyncCompute { slot: usize, submitted: bool },
    Barriers(Vec<(vk::ImageLayout, vk::ImageLayout)>),
    Blit,
    EndCommands(usize),
    Submit(GraphicsSubmission),
    Present(usize, u32),
    WaitIdle,
}

/// Backend that records calls and simulates a GPU that only finishes work
/// when the host waits for it.
pub struct MockBackend {
    pub calls: Vec<Call>,
    pub size: (u32, u32),
    pub format: vk::Format,
    pub image_count: u32,
    pub async_compute: bool,
    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<PresentOutcome>,
    next_handle: u64,
    live: BTreeSet<u64>,
    attachment_budget: Option<usize>,
    completed: u64,
    slot_submitted: Vec<u64>,
    next_image: u32,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            size: (1280, 720),
            format: vk::Format::B8G8R8A8_SRGB,
            image_count: 3,
            async_compute: false,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            next_handle: 1,
            live: BTreeSet::new(),
            attachment_budget: None,
            completed: 0,
            slot_submitted: Vec::new(),
            next_image: 0,
        }
    }

    pub fn with_async_compute(mut self) -> Self {
        self.async_compute = true;
        self
    }

    /// Queue an outcome for a future acquire.
    pub fn script_acquire(&mut self, outcome: AcquireOutcome) {
        self.acquire_script.push_back(outcome);
    }

    /// Queue an outcome for a future present.
    pub fn script_present(&mut self, outcome: PresentOutcome) {
        self.present_script.push_back(outcome);
    }

    /// Fail attachment creation once `count` more have succeeded.
    pub fn fail_attachment_after(&mut self, count: usize) {
        self.attachment_budget = Some(count);
    }

    pub fn live_attachments(&self) -> usize {
        self.live.len()
    }

    pub fn submissions(&self) -> Vec<GraphicsSubmission> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Submit(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }
}

impl GpuBackend for MockBackend {
    fn gpu(&self) -> Option<Arc<GpuContext>> {
        None
    }

    fn has_async_compute(&self) -> bool {
        self.async_compute
    }

    fn drawable_size(&self) -> (u32, u32) {
        self.size
    }

    fn create_swapchain(
        &mut self,
        width: u32,
        height: u32,
        _usage: vk::ImageUsageFlags,
    ) -> Result<SwapchainInfo> {
        self.calls.push(Call::CreateSwapchain(width, height));
        Ok(SwapchainInfo {
            extent: vk::Extent2D { width, height },
            format: self.format,
            image_count: self.image_count,
        })
    }

    fn destroy_swapchain(&mut self) {
        self.calls.push(Call::DestroySwapchain);
        self.next_image = 0;
    }

    fn swapchain_target(&self, image_index: u32) -> (vk::Image, vk::ImageView) {
        (
            vk::Image::from_raw(1000 + u64::from(image_index)),
            vk::ImageView::from_raw(2000 + u64::from(image_index)),
        )
    }

    fn create_attachment(
        &mut self,
        request: &AttachmentRequest,
        extent: vk::Extent2D,
    ) -> Result<GpuImage> {
        if let Some(budget) = &mut self.attachment_budget {
            if *budget == 0 {
                return Err(GpuError::AllocationFailed(request.name.clone()).into());
            }
            *budget -= 1;
        }
        self.calls.push(Call::CreateAttachment(request.name.clone()));
        let handle = self.next_handle;
        self.next_handle += 2;
        self.live.insert(handle);
        Ok(GpuImage {
            image: vk::Image::from_raw(handle),
            view: vk::ImageView::from_raw(handle + 1),
            allocation: None,
            format: request.format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            aspect: request.aspect,
        })
    }

    fn destroy_attachment(&mut self, image: GpuImage) {
        let handle = image.image.as_raw();
        assert!(self.live.remove(&handle), "attachment {handle} freed twice");
        self.calls.push(Call::DestroyAttachment(handle));
    }

    fn create_frame_slots(&mut self, count: usize, async_compute: bool) -> Result<()> {
        self.calls.push(Call::CreateFrameSlots(count, async_compute));
        self.slot_submitted = vec![0; count];
        Ok(())
    }

    fn destroy_frame_slots(&mut self) {
        self.calls.push(Call::DestroyFrameSlots);
        self.slot_submitted.clear();
    }

    fn wait_timeline(&mut self, value: u64) -> Result<()> {
        self.calls.push(Call::WaitTimeline(value));
        self.completed = self.completed.max(value);
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        self.calls.push(Call::Acquire(slot));
        if let Some(outcome) = self.acquire_script.pop_front() {
            return Ok(outcome);
        }
        let image_index = self.next_image % self.image_count;
        self.next_image += 1;
        Ok(AcquireOutcome::Acquired {
            image_index,
            suboptimal: false,
        })
    }

    fn begin_commands(&mut self, slot: usize) -> Result<vk::CommandBuffer> {
        let submitted = self.slot_submitted[slot];
        assert!(
            submitted <= self.completed,
            "slot {slot} reset while timeline value {submitted} is in flight (completed {})",
            self.completed
        );
        self.calls.push(Call::BeginCommands(slot));
        Ok(vk::CommandBuffer::from_raw(500 + slot as u64))
    }

    fn begin_async_compute(&mut self, slot: usize) -> Result<Option<vk::CommandBuffer>> {
        if !self.async_compute {
            return Ok(None);
        }
        self.calls.push(Call::BeginAsyncCompute(slot));
        Ok(Some(vk::CommandBuffer::from_raw(600 + slot as u64)))
    }

    fn end_async_compute(&mut self, slot: usize, submit: bool) -> Result<()> {
        self.calls.push(Call::EndAsyncCompute {
            slot,
            submitted: submit,
        });
        Ok(())
    }

    fn record_barriers(&mut self, _cmd: vk::CommandBuffer, barriers: &[ImageBarrier]) {
        if barriers.is_empty() {
            return;
        }
        self.calls.push(Call::Barriers(
            barriers
                .iter()
                .map(|b| (b.old_layout, b.new_layout))
                .collect(),
        ));
    }

    fn record_blit(&mut self, _cmd: vk::CommandBuffer, _region: &BlitRegion) {
        self.calls.push(Call::Blit);
    }

    fn end_commands(&mut self, slot: usize) -> Result<()> {
        self.calls.push(Call::EndCommands(slot));
        Ok(())
    }

    fn submit_graphics(&mut self, submission: &GraphicsSubmission) -> Result<()> {
        self.slot_submitted[submission.slot] = submission.timeline_value;
        self.calls.push(Call::Submit(*submission));
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        self.calls.push(Call::Present(slot, image_index));
        Ok(self
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented))
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.calls.push(Call::WaitIdle);
        self.completed = self.slot_submitted.iter().copied().max().unwrap_or(0).max(self.completed);
        Ok(())
    }
}

/// Renderer that logs its hooks and keeps every frame context it saw.
pub struct RecordingRenderer {
    pub caps: RendererCaps,
    pub log: Arc<Mutex<Vec<String>>>,
    pub frames: Arc<Mutex<Vec<FrameContext>>>,
    /// Whether to record async compute work on a given frame number.
    pub async_work: fn(u64) -> bool,
    /// Hook that returns an error.
    pub fail_hook: Option<&'static str>,
}

impl RecordingRenderer {
    pub fn new(caps: RendererCaps) -> Self {
        Self {
            caps,
            log: Arc::default(),
            frames: Arc::default(),
            async_work: |_| false,
            fail_hook: None,
        }
    }

    /// Renderer with one color attachment named `color`.
    pub fn single_color() -> Self {
        Self::new(RendererCaps {
            color_attachments: vec![AttachmentRequest::color(
                "color",
                vk::Format::R16G16B16A16_SFLOAT,
            )],
            presentation_mode: PresentationMode::EngineBlit,
            ..RendererCaps::default()
        })
    }

    fn note(&self, hook: &'static str) -> anyhow::Result<()> {
        self.log.lock().push(hook.to_string());
        if self.fail_hook == Some(hook) {
            anyhow::bail!("{hook} exploded");
        }
        Ok(())
    }
}

impl Renderer for RecordingRenderer {
    fn get_capabilities(&mut self, _engine: &EngineContext, caps: &mut RendererCaps) {
        *caps = self.caps.clone();
    }

    fn initialize(
        &mut self,
        _engine: &EngineContext,
        _caps: &RendererCaps,
        frame: &FrameContext,
    ) -> anyhow::Result<()> {
        assert!(frame.is_stub());
        self.note("initialize")
    }

    fn destroy(&mut self, _engine: &EngineContext, _caps: &RendererCaps) {
        self.log.lock().push("destroy".to_string());
    }

    fn on_swapchain_ready(&mut self, _engine: &EngineContext, frame: &FrameContext) -> anyhow::Result<()> {
        self.frames.lock().push(frame.clone());
        self.note("on_swapchain_ready")
    }

    fn on_swapchain_destroy(&mut self, _engine: &EngineContext) {
        self.log.lock().push("on_swapchain_destroy".to_string());
    }

    fn simulate(&mut self, _engine: &EngineContext, _frame: &FrameContext) -> anyhow::Result<()> {
        self.note("simulate")
    }

    fn record_async_compute(
        &mut self,
        _engine: &EngineContext,
        frame: &FrameContext,
        _cmd: vk::CommandBuffer,
    ) -> anyhow::Result<bool> {
        self.note("record_async_compute")?;
        Ok((self.async_work)(frame.frame_number))
    }

    fn update(&mut self, _engine: &EngineContext, _frame: &FrameContext) -> anyhow::Result<()> {
        self.note("update")
    }

    fn record_compute(&mut self, _engine: &EngineContext, _frame: &FrameContext) -> anyhow::Result<()> {
        self.note("record_compute")
    }

    fn record_graphics(&mut self, _engine: &EngineContext, frame: &FrameContext) -> anyhow::Result<()> {
        assert!(!frame.is_stub());
        self.frames.lock().push(frame.clone());
        self.note("record_graphics")
    }

    fn compose(&mut self, _engine: &EngineContext, _frame: &FrameContext) -> anyhow::Result<()> {
        self.note("compose")
    }

    fn reload_assets(&mut self, _engine: &EngineContext) -> anyhow::Result<()> {
        self.note("reload_assets")
    }
}

/// A stub frame context with no attachments.
pub fn stub_frame() -> FrameContext {
    FrameContext {
        frame_number: 0,
        slot: 0,
        image_index: 0,
        extent: vk::Extent2D {
            width: 1,
            height: 1,
        },
        dt: 0.0,
        elapsed: 0.0,
        command_buffer: vk::CommandBuffer::null(),
        swapchain_image: vk::Image::null(),
        swapchain_view: vk::ImageView::null(),
        swapchain_format: vk::Format::UNDEFINED,
        color_attachments: Vec::new(),
        depth_attachment: None,
        presentation_index: None,
        presentation_mode: PresentationMode::EngineBlit,
    }
}
