//! Plugins: auxiliary modules that run alongside the renderer.
//!
//! A plugin declares the phases it takes part in; [`PluginHost`] only calls
//! the hooks of declared phases.

use bitflags::bitflags;
use lumen_gpu::{DeletionQueue, DeviceRequirements};
use winit::event::WindowEvent;

use crate::caps::RendererCaps;
use crate::context::EngineContext;
use crate::error::{EngineError, Result};
use crate::frame::FrameContext;

bitflags! {
    /// Engine phases a plugin participates in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PluginPhase: u32 {
        /// Device requirements and caps negotiation.
        const SETUP = 1 << 0;
        const INITIALIZE = 1 << 1;
        /// After `simulate`, before GPU recording.
        const PRE_RENDER = 1 << 2;
        /// After `record_graphics`, before composition.
        const RENDER = 1 << 3;
        /// After composition; swapchain image in `COLOR_ATTACHMENT_OPTIMAL`.
        const POST_RENDER = 1 << 4;
        /// Last recording step before the present transition.
        const PRESENT = 1 << 5;
        const IMGUI = 1 << 6;
        const CLEANUP = 1 << 7;
    }
}

/// A module hooked into selected engine phases.
#[allow(unused_variables)]
pub trait Plugin {
    /// Name for logs.
    fn name(&self) -> &str;

    /// Phases this plugin takes part in.
    fn phases(&self) -> PluginPhase;

    /// `SETUP`: add device requirements.
    fn setup(&mut self, requirements: &mut DeviceRequirements) {}

    /// `SETUP`: adjust the renderer's caps before sanitization.
    ///
    /// Runs after the renderer's `get_capabilities`, so a plugin can add
    /// usage flags (e.g. `TRANSFER_SRC` on `swapchain_usage` to read the
    /// swapchain back) without the renderer knowing about it.
    fn configure_caps(&mut self, caps: &mut RendererCaps) {}

    /// `INITIALIZE`
    fn initialize(&mut self, engine: &EngineContext, caps: &RendererCaps) -> anyhow::Result<()> {
        Ok(())
    }

    /// `PRE_RENDER`
    fn pre_render(&mut self, engine: &EngineContext, frame: &FrameContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// `RENDER`
    fn render(&mut self, engine: &EngineContext, frame: &FrameContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// `POST_RENDER`
    fn post_render(&mut self, engine: &EngineContext, frame: &FrameContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// `PRESENT`: the last recording step before the swapchain image is
    /// transitioned for presentation.
    ///
    /// The image is in `COLOR_ATTACHMENT_OPTIMAL` with the debug UI already
    /// drawn, and must be left in that layout. Closures pushed to `cleanup`
    /// run once this frame's GPU work has completed, when the slot is next
    /// reused or at shutdown, which makes it the place to map readback
    /// buffers and free per-frame staging resources.
    ///
    /// Default implementation records nothing.
    fn present(
        &mut self,
        engine: &EngineContext,
        frame: &FrameContext,
        cleanup: &mut DeletionQueue<EngineContext>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// `IMGUI`
    fn imgui(&mut self, engine: &EngineContext, frame: &FrameContext) {}

    /// `CLEANUP`: the device is idle. Hooks run in reverse registration
    /// order, after every pending `present` closure has run.
    fn cleanup(&mut self, engine: &EngineContext) {}

    /// Handle a window event regardless of phases. Return `true` to consume
    /// it; later plugins then never see it. The renderer is offered events
    /// first.
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }
}

/// Ordered set of plugins with phase-filtered dispatch.
#[derive(Default)]
pub struct PluginHost {
    plugins: Vec<Box<dyn Plugin>>,
}

impl PluginHost {
    /// Create an empty host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a plugin. Plugins run in insertion order.
    pub fn add(&mut self, plugin: Box<dyn Plugin>) {
        tracing::debug!("Plugin registered: {} ({:?})", plugin.name(), plugin.phases());
        self.plugins.push(plugin);
    }

    /// Number of plugins.
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether no plugins are registered.
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    fn with_phase(&mut self, phase: PluginPhase) -> impl Iterator<Item = &mut Box<dyn Plugin>> {
        self.plugins
            .iter_mut()
            .filter(move |p| p.phases().contains(phase))
    }

    fn run(
        &mut self,
        phase: PluginPhase,
        hook: &'static str,
        mut f: impl FnMut(&mut dyn Plugin) -> anyhow::Result<()>,
    ) -> Result<()> {
        for plugin in self.with_phase(phase) {
            f(plugin.as_mut()).map_err(|error| EngineError::Renderer {
                hook,
                error: error.context(format!("plugin {}", plugin.name())),
            })?;
        }
        Ok(())
    }

    pub fn setup(&mut self, requirements: &mut DeviceRequirements) {
        for plugin in self.with_phase(PluginPhase::SETUP) {
            plugin.setup(requirements);
        }
    }

    pub fn configure_caps(&mut self, caps: &mut RendererCaps) {
        for plugin in self.with_phase(PluginPhase::SETUP) {
            plugin.configure_caps(caps);
        }
    }

    pub fn initialize(&mut self, engine: &EngineContext, caps: &RendererCaps) -> Result<()> {
        self.run(PluginPhase::INITIALIZE, "plugin initialize", |p| {
            p.initialize(engine, caps)
        })
    }

    pub fn pre_render(&mut self, engine: &EngineContext, frame: &FrameContext) -> Result<()> {
        self.run(PluginPhase::PRE_RENDER, "plugin pre_render", |p| {
            p.pre_render(engine, frame)
        })
    }

    pub fn render(&mut self, engine: &EngineContext, frame: &FrameContext) -> Result<()> {
        self.run(PluginPhase::RENDER, "plugin render", |p| p.render(engine, frame))
    }

    pub fn post_render(&mut self, engine: &EngineContext, frame: &FrameContext) -> Result<()> {
        self.run(PluginPhase::POST_RENDER, "plugin post_render", |p| {
            p.post_render(engine, frame)
        })
    }

    pub fn present(
        &mut self,
        engine: &EngineContext,
        frame: &FrameContext,
        cleanup: &mut DeletionQueue<EngineContext>,
    ) -> Result<()> {
        self.run(PluginPhase::PRESENT, "plugin present", |p| {
            p.present(engine, frame, cleanup)
        })
    }

    pub fn imgui(&mut self, engine: &EngineContext, frame: &FrameContext) {
        for plugin in self.with_phase(PluginPhase::IMGUI) {
            plugin.imgui(engine, frame);
        }
    }

    /// Run cleanup hooks in reverse registration order.
    pub fn cleanup(&mut self, engine: &EngineContext) {
        for plugin in self.plugins.iter_mut().rev() {
            if plugin.phases().contains(PluginPhase::CLEANUP) {
                plugin.cleanup(engine);
            }
        }
    }

    /// Offer an event to each plugin until one consumes it.
    pub fn on_event(&mut self, event: &WindowEvent) -> bool {
        self.plugins.iter_mut().any(|p| p.on_event(event))
    }
}
