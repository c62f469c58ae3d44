//! The frame lifecycle state machine.
//!
//! [`Engine`] owns the renderer, plugins, swapchain, offscreen attachments and
//! frame slots, and drives one frame per [`Engine::run_frame`] call:
//!
//! 1. Rebuild the swapchain if a resize was requested.
//! 2. Wait for the slot's previous timeline value, then run its deferred
//!    cleanup.
//! 3. Acquire an image. Out-of-date or suboptimal aborts the frame and
//!    requests a rebuild.
//! 4. Record renderer, plugin, composition and overlay work.
//! 5. Submit, signaling the timeline, and present.

use std::time::Instant;

use lumen_gpu::{AcquireOutcome, DeletionQueue, DeviceRequirements, PresentOutcome};
use tracing::{debug, info, trace_span, warn};
use winit::event::{ElementState, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

use crate::attachments::AttachmentManager;
use crate::backend::GpuBackend;
use crate::caps::{PresentationMode, RendererCaps};
use crate::compositor::{direct_barrier, plan_composition, present_barrier, SwapchainTarget};
use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::error::{EngineError, Result};
use crate::frame::FrameContext;
use crate::frame_data::{FramePacer, GraphicsSubmission};
use crate::plugin::{Plugin, PluginHost};
use crate::renderer::Renderer;
use crate::stats::FrameTimings;
use crate::ui::{NullOverlay, UiOverlay};

/// Why a frame produced no image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// `init` has not succeeded yet, or the engine was shut down.
    NotInitialized,
    /// The drawable area is empty.
    Minimized,
    /// The swapchain no longer matches the surface; it is rebuilt next frame.
    OutOfDate,
}

/// Result of one [`Engine::run_frame`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented {
        frame_number: u64,
        /// Timeline value signaled when the frame's GPU work completes.
        timeline_value: u64,
    },
    Skipped(SkipReason),
}

/// Collect device requirements from a renderer and plugins before the
/// device is created.
pub fn collect_requirements(renderer: &dyn Renderer, plugins: &mut PluginHost) -> DeviceRequirements {
    let mut requirements = DeviceRequirements::new();
    renderer.query_required_device_caps(&mut requirements);
    plugins.setup(&mut requirements);
    requirements
}

/// Host of one renderer and any number of plugins.
pub struct Engine<B: GpuBackend> {
    config: EngineConfig,
    backend: B,
    context: EngineContext,
    renderer: Option<Box<dyn Renderer>>,
    plugins: PluginHost,
    overlay: Box<dyn UiOverlay>,
    caps: RendererCaps,
    targets: AttachmentManager,
    pacer: FramePacer,
    cleanup: Vec<DeletionQueue<EngineContext>>,
    timings: FrameTimings,
    resize_requested: bool,
    initialized: bool,
    started: Instant,
    last_frame: Instant,
}

impl<B: GpuBackend> Engine<B> {
    /// Create an engine on top of `backend`. Nothing is allocated until
    /// [`Engine::init`].
    pub fn new(config: EngineConfig, backend: B) -> Self {
        let context = EngineContext::new(backend.gpu());
        let now = Instant::now();
        Self {
            config,
            backend,
            context,
            renderer: None,
            plugins: PluginHost::new(),
            overlay: Box::new(NullOverlay),
            caps: RendererCaps::default(),
            targets: AttachmentManager::new(),
            pacer: FramePacer::new(1),
            cleanup: Vec::new(),
            timings: FrameTimings::default(),
            resize_requested: false,
            initialized: false,
            started: now,
            last_frame: now,
        }
    }

    /// Attach the renderer. Must happen before [`Engine::init`].
    pub fn set_renderer(&mut self, renderer: Box<dyn Renderer>) {
        self.renderer = Some(renderer);
    }

    /// Register a plugin. Must happen before [`Engine::init`].
    pub fn add_plugin(&mut self, plugin: Box<dyn Plugin>) {
        self.plugins.add(plugin);
    }

    /// Replace the plugin host, e.g. one used for [`collect_requirements`].
    pub fn set_plugins(&mut self, plugins: PluginHost) {
        self.plugins = plugins;
    }

    /// Replace the UI overlay.
    pub fn set_overlay(&mut self, overlay: Box<dyn UiOverlay>) {
        self.overlay = overlay;
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    /// Negotiated caps. Defaults before [`Engine::init`].
    pub fn caps(&self) -> &RendererCaps {
        &self.caps
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn timings(&self) -> &FrameTimings {
        &self.timings
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Whether the swapchain will be rebuilt before the next frame.
    pub fn resize_requested(&self) -> bool {
        self.resize_requested
    }

    /// The window was resized.
    pub fn notify_resized(&mut self) {
        self.resize_requested = true;
    }

    /// A renderer, plugin or hotkey asked to close the window.
    pub fn exit_requested(&self) -> bool {
        self.context.services().lock().exit_requested()
    }

    /// Window title requested through the tabs host since the last call.
    pub fn take_window_title(&self) -> Option<String> {
        self.context.services().lock().take_title()
    }

    /// Negotiate caps and create every GPU object the frame loop needs.
    ///
    /// Order: caps, swapchain, attachments, frame slots, overlay, renderer,
    /// plugins. On failure everything created so far is released and the
    /// renderer's `destroy` runs.
    pub fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        let renderer = self.renderer.as_deref_mut().ok_or(EngineError::NoRenderer)?;

        let mut caps = RendererCaps {
            frame_overlap: self.config.frame_overlap as usize,
            ..RendererCaps::default()
        };
        renderer.get_capabilities(&self.context, &mut caps);
        self.plugins.configure_caps(&mut caps);
        caps.sanitize();
        caps.validate()?;
        if caps.async_compute && !self.backend.has_async_compute() {
            debug!("No dedicated compute queue, async compute disabled");
            caps.async_compute = false;
        }

        self.context.async_compute = caps.async_compute;
        self.context.frame_overlap = caps.frame_overlap;
        self.caps = caps;

        if let Err(e) = self.create_gpu_objects() {
            self.release_gpu_objects();
            return Err(e);
        }

        if let Err(e) = self.initialize_modules() {
            if let Some(renderer) = self.renderer.as_deref_mut() {
                renderer.destroy(&self.context, &self.caps);
            }
            self.overlay.destroy(&self.context);
            self.release_gpu_objects();
            return Err(e);
        }

        self.initialized = true;
        self.started = Instant::now();
        self.last_frame = self.started;
        info!(
            "Engine initialized: {:?}, {} color attachment(s), depth: {}, {} frame(s) in flight, async compute: {}",
            self.caps.presentation_mode,
            self.caps.color_attachments.len(),
            self.caps.uses_depth,
            self.caps.frame_overlap,
            self.caps.async_compute
        );
        Ok(())
    }

    fn create_gpu_objects(&mut self) -> Result<()> {
        self.build_swapchain()?;
        self.backend
            .create_frame_slots(self.caps.frame_overlap, self.caps.async_compute)?;
        self.pacer = FramePacer::new(self.caps.frame_overlap);
        self.cleanup = (0..self.caps.frame_overlap)
            .map(|_| DeletionQueue::new())
            .collect();
        Ok(())
    }

    fn initialize_modules(&mut self) -> Result<()> {
        self.overlay
            .rebuild(&self.context, self.context.swapchain_format)
            .map_err(EngineError::hook("overlay rebuild"))?;

        let stub = self.stub_frame();
        let renderer = self.renderer.as_deref_mut().ok_or(EngineError::NoRenderer)?;
        renderer
            .initialize(&self.context, &self.caps, &stub)
            .map_err(EngineError::hook("initialize"))?;
        self.plugins.initialize(&self.context, &self.caps)?;
        renderer
            .on_swapchain_ready(&self.context, &stub)
            .map_err(EngineError::hook("on_swapchain_ready"))
    }

    /// Release frame slots, attachments and the swapchain, in that order.
    fn release_gpu_objects(&mut self) {
        if let Err(e) = self.backend.wait_idle() {
            warn!("wait_idle during teardown failed: {e}");
        }
        for queue in &mut self.cleanup {
            queue.flush(&self.context);
        }
        self.cleanup.clear();
        self.backend.destroy_frame_slots();
        self.targets.destroy_targets(&mut self.backend);
        self.backend.destroy_swapchain();
    }

    fn build_swapchain(&mut self) -> Result<()> {
        let (width, height) = self.backend.drawable_size();
        let info = self
            .backend
            .create_swapchain(width, height, self.caps.swapchain_usage)?;
        self.context.extent = info.extent;
        self.context.swapchain_format = info.format;

        if let Err(e) = self
            .targets
            .create_targets(&mut self.backend, &self.caps, info.extent)
        {
            self.backend.destroy_swapchain();
            return Err(e);
        }
        debug!(
            "Swapchain ready: {}x{} {:?}, {} images",
            info.extent.width, info.extent.height, info.format, info.image_count
        );
        Ok(())
    }

    /// Rebuild the swapchain and attachments for the current drawable size.
    ///
    /// With an empty drawable area nothing happens and the request stays
    /// pending.
    pub fn recreate_swapchain(&mut self) -> Result<()> {
        if !self.initialized {
            return Ok(());
        }
        let (width, height) = self.backend.drawable_size();
        if width == 0 || height == 0 {
            self.resize_requested = true;
            return Ok(());
        }

        if let Some(renderer) = self.renderer.as_deref_mut() {
            renderer.on_swapchain_destroy(&self.context);
        }
        self.backend.wait_idle()?;

        let old_format = self.context.swapchain_format;
        self.targets.destroy_targets(&mut self.backend);
        self.backend.destroy_swapchain();
        self.build_swapchain()?;
        self.resize_requested = false;

        if self.context.swapchain_format != old_format {
            debug!(
                "Swapchain format changed {old_format:?} -> {:?}, rebuilding overlay",
                self.context.swapchain_format
            );
            self.overlay
                .rebuild(&self.context, self.context.swapchain_format)
                .map_err(EngineError::hook("overlay rebuild"))?;
        }

        let stub = self.stub_frame();
        if let Some(renderer) = self.renderer.as_deref_mut() {
            renderer
                .on_swapchain_ready(&self.context, &stub)
                .map_err(EngineError::hook("on_swapchain_ready"))?;
        }
        Ok(())
    }

    fn stub_frame(&self) -> FrameContext {
        FrameContext {
            frame_number: self.pacer.frame_number(),
            slot: 0,
            image_index: 0,
            extent: self.context.extent,
            dt: 0.0,
            elapsed: self.started.elapsed().as_secs_f64(),
            command_buffer: ash::vk::CommandBuffer::null(),
            swapchain_image: ash::vk::Image::null(),
            swapchain_view: ash::vk::ImageView::null(),
            swapchain_format: self.context.swapchain_format,
            color_attachments: self.targets.color_views(),
            depth_attachment: self.targets.depth_view(),
            presentation_index: self.targets.presentation_index(),
            presentation_mode: self.caps.presentation_mode,
        }
    }

    /// Run one frame.
    ///
    /// Out-of-date and suboptimal swapchains are reported as
    /// [`FrameStatus::Skipped`] and handled on the next call; any error is
    /// fatal.
    pub fn run_frame(&mut self) -> Result<FrameStatus> {
        if !self.initialized {
            return Ok(FrameStatus::Skipped(SkipReason::NotInitialized));
        }
        let _span = trace_span!("frame", n = self.pacer.frame_number()).entered();

        if self.resize_requested {
            self.recreate_swapchain()?;
            if self.resize_requested {
                return Ok(FrameStatus::Skipped(SkipReason::Minimized));
            }
        }

        let slot = self.pacer.slot();
        if let Some(value) = self.pacer.wait_value(slot) {
            let _wait = trace_span!("wait_previous", value).entered();
            self.backend.wait_timeline(value)?;
        }
        if let Some(queue) = self.cleanup.get_mut(slot) {
            queue.flush(&self.context);
        }
        if self.config.gpu_timestamps {
            if let Some(ms) = self.backend.read_timing(slot) {
                self.timings.gpu_ms = Some(ms);
            }
        }

        let image_index = match self.backend.acquire_image(slot)? {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal: false,
            } => image_index,
            outcome => {
                debug!("Acquire reported {outcome:?}, swapchain rebuild requested");
                self.resize_requested = true;
                return Ok(FrameStatus::Skipped(SkipReason::OutOfDate));
            }
        };

        let now = Instant::now();
        let dt = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        self.timings.record(dt);

        let cmd = self.backend.begin_commands(slot)?;
        if self.config.gpu_timestamps {
            self.backend.begin_timing(slot, cmd);
        }

        let (swapchain_image, swapchain_view) = self.backend.swapchain_target(image_index);
        let frame = FrameContext {
            frame_number: self.pacer.frame_number(),
            slot,
            image_index,
            extent: self.context.extent,
            dt,
            elapsed: self.started.elapsed().as_secs_f64(),
            command_buffer: cmd,
            swapchain_image,
            swapchain_view,
            swapchain_format: self.context.swapchain_format,
            color_attachments: self.targets.color_views(),
            depth_attachment: self.targets.depth_view(),
            presentation_index: self.targets.presentation_index(),
            presentation_mode: self.caps.presentation_mode,
        };

        let wait_async_compute = self.record_frame(&frame)?;

        if self.config.gpu_timestamps {
            self.backend.end_timing(slot, cmd);
        }
        self.backend.end_commands(slot)?;

        let timeline_value = self.pacer.submit(slot);
        self.backend.submit_graphics(&GraphicsSubmission {
            slot,
            image_index,
            wait_async_compute,
            timeline_value,
        })?;

        match self.backend.present(slot, image_index)? {
            PresentOutcome::Presented => {}
            outcome => {
                debug!("Present reported {outcome:?}, swapchain rebuild requested");
                self.resize_requested = true;
            }
        }

        let frame_number = self.pacer.frame_number();
        self.pacer.advance();
        Ok(FrameStatus::Presented {
            frame_number,
            timeline_value,
        })
    }

    /// Record every hook for `frame`. Returns whether async compute work was
    /// submitted.
    fn record_frame(&mut self, frame: &FrameContext) -> Result<bool> {
        let engine = &self.context;
        let renderer = self.renderer.as_deref_mut().ok_or(EngineError::NoRenderer)?;
        let cmd = frame.command_buffer;
        let target = SwapchainTarget {
            image: frame.swapchain_image,
            extent: frame.extent,
        };
        let mode = frame.presentation_mode;

        renderer
            .simulate(engine, frame)
            .map_err(EngineError::hook("simulate"))?;
        self.plugins.pre_render(engine, frame)?;

        let mut async_submitted = false;
        if self.caps.async_compute {
            if let Some(compute_cmd) = self.backend.begin_async_compute(frame.slot)? {
                let _span = trace_span!("async_compute").entered();
                async_submitted = renderer
                    .record_async_compute(engine, frame, compute_cmd)
                    .map_err(EngineError::hook("record_async_compute"))?;
                self.backend.end_async_compute(frame.slot, async_submitted)?;
            }
        }

        renderer
            .update(engine, frame)
            .map_err(EngineError::hook("update"))?;
        renderer
            .record_compute(engine, frame)
            .map_err(EngineError::hook("record_compute"))?;

        if mode == PresentationMode::DirectToSwapchain {
            self.backend.record_barriers(cmd, &[direct_barrier(target)]);
        }
        renderer
            .record_graphics(engine, frame)
            .map_err(EngineError::hook("record_graphics"))?;
        self.plugins.render(engine, frame)?;

        let plan = plan_composition(mode, target, frame.presentation_attachment());
        self.backend.record_barriers(cmd, &plan.pre_barriers);
        if let Some(blit) = &plan.blit {
            self.backend.record_blit(cmd, blit);
        }
        self.backend.record_barriers(cmd, &plan.post_barriers);
        if mode == PresentationMode::RendererComposite {
            renderer
                .compose(engine, frame)
                .map_err(EngineError::hook("compose"))?;
        }
        self.plugins.post_render(engine, frame)?;

        let overlay_visible = engine.services().lock().overlay_visible();
        if overlay_visible {
            self.overlay.new_frame(engine, frame);
            renderer.on_imgui(engine, frame);
            self.plugins.imgui(engine, frame);
            self.overlay
                .render_overlay(engine, frame)
                .map_err(EngineError::hook("render_overlay"))?;
        }

        if let Some(queue) = self.cleanup.get_mut(frame.slot) {
            self.plugins.present(engine, frame, queue)?;
        }
        self.backend.record_barriers(cmd, &[present_barrier(target)]);
        Ok(async_submitted)
    }

    /// Route a window event. Returns `true` if something consumed it.
    ///
    /// Resizes are never consumed. UI hotkeys come first, then the
    /// hot-reload key, the renderer and the plugins.
    pub fn handle_event(&mut self, event: &WindowEvent) -> bool {
        if matches!(event, WindowEvent::Resized(_)) {
            self.notify_resized();
            return false;
        }
        if self.context.services().lock().handle_event(event) {
            return true;
        }
        if self.config.hot_reload && is_key_press(event, KeyCode::F5) {
            if let Err(e) = self.reload_assets() {
                warn!("Asset reload failed: {e}");
            }
            return true;
        }
        if let Some(renderer) = self.renderer.as_deref_mut() {
            if renderer.on_event(event) {
                return true;
            }
        }
        self.plugins.on_event(event)
    }

    /// Wait for the GPU and ask the renderer to reload its assets.
    pub fn reload_assets(&mut self) -> Result<()> {
        if !self.initialized {
            return Ok(());
        }
        self.backend.wait_idle()?;
        let renderer = self.renderer.as_deref_mut().ok_or(EngineError::NoRenderer)?;
        info!("Reloading assets for {}", renderer.name());
        renderer
            .reload_assets(&self.context)
            .map_err(EngineError::hook("reload_assets"))
    }

    /// Take a screenshot of the next frame. The renderer gets the first
    /// chance; otherwise the request goes to the screenshot plugin.
    pub fn request_screenshot(&mut self, path_hint: &str) {
        let handled = self
            .renderer
            .as_deref_mut()
            .is_some_and(|r| r.request_screenshot(path_hint));
        if !handled {
            self.context.services().lock().request_screenshot(path_hint);
        }
    }

    /// Tear everything down in reverse creation order.
    ///
    /// Deferred cleanup queues are flushed once the device is idle. Safe to
    /// call more than once.
    pub fn shutdown(&mut self) -> Result<()> {
        if !self.initialized {
            return Ok(());
        }
        self.initialized = false;
        info!("Engine shutting down");

        let idle = self.backend.wait_idle();
        for queue in &mut self.cleanup {
            queue.flush(&self.context);
        }

        self.plugins.cleanup(&self.context);
        if let Some(renderer) = self.renderer.as_deref_mut() {
            renderer.on_swapchain_destroy(&self.context);
            renderer.destroy(&self.context, &self.caps);
        }
        self.overlay.destroy(&self.context);

        self.release_gpu_objects();
        self.timings.log_summary();
        idle
    }
}

impl<B: GpuBackend> Drop for Engine<B> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Engine shutdown failed: {e}");
        }
    }
}

fn is_key_press(event: &WindowEvent, key: KeyCode) -> bool {
    matches!(
        event,
        WindowEvent::KeyboardInput { event, .. }
            if event.state == ElementState::Pressed
                && !event.repeat
                && event.physical_key == PhysicalKey::Code(key)
    )
}
