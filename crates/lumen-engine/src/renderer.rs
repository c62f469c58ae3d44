//! `Renderer` trait definition.

use ash::vk;
use lumen_gpu::DeviceRequirements;
use winit::event::WindowEvent;

use crate::caps::RendererCaps;
use crate::context::EngineContext;
use crate::frame::FrameContext;
use crate::stats::RendererStats;

/// Value of a generic renderer option.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl OptionValue {
    /// Integer value. Floats are truncated.
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) => Some(*v as i64),
            Self::Str(_) => None,
        }
    }

    /// Float value. Integers are widened.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Str(_) => None,
        }
    }

    /// String value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for OptionValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

/// A pluggable visual module driven by the engine.
///
/// Every method has a no-op default; implement only what you need. Hooks
/// receive the engine and frame contexts by reference and must not keep
/// anything borrowed from them past the call.
///
/// Per-frame order: `simulate`, `record_async_compute`, `update`,
/// `record_compute`, `record_graphics`, then `compose` (renderer-composite
/// mode only) and `on_imgui`.
#[allow(unused_variables)]
pub trait Renderer {
    /// Human-readable name for logs.
    fn name(&self) -> &str {
        "renderer"
    }

    /// Declare device extensions and features before the device exists.
    fn query_required_device_caps(&self, requirements: &mut DeviceRequirements) {}

    /// Refine the rendering configuration once the device is known.
    ///
    /// The engine sanitizes `caps` afterwards.
    fn get_capabilities(&mut self, engine: &EngineContext, caps: &mut RendererCaps) {}

    /// Create renderer-owned GPU objects. `frame` is a stub without a
    /// command buffer.
    fn initialize(
        &mut self,
        engine: &EngineContext,
        caps: &RendererCaps,
        frame: &FrameContext,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Release renderer-owned GPU objects. Also called after a failed
    /// `initialize`, so it must tolerate partially created state.
    fn destroy(&mut self, engine: &EngineContext, caps: &RendererCaps) {}

    /// A swapchain (and its attachments) was created. `frame` is a stub.
    fn on_swapchain_ready(&mut self, engine: &EngineContext, frame: &FrameContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// The swapchain is about to be destroyed, on resize and at shutdown.
    ///
    /// Drop anything derived from the swapchain or its attachments (views,
    /// descriptor sets, framebuffers). On resize this runs before the engine
    /// waits for the device, so wait idle yourself before destroying anything
    /// the GPU may still read; at shutdown the device is already idle. The
    /// attachments are recreated and
    /// [`on_swapchain_ready`](Self::on_swapchain_ready) follows unless the
    /// engine is shutting down.
    ///
    /// Default implementation does nothing.
    fn on_swapchain_destroy(&mut self, engine: &EngineContext) {}

    /// Advance simulation state. Runs before any GPU work is recorded.
    fn simulate(&mut self, engine: &EngineContext, frame: &FrameContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Sync GPU-facing state (uniforms, instance buffers) before recording.
    fn update(&mut self, engine: &EngineContext, frame: &FrameContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Record compute work into the frame's graphics command buffer.
    fn record_compute(&mut self, engine: &EngineContext, frame: &FrameContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Record work into the async compute command buffer.
    ///
    /// Only called when `caps.async_compute` is set and the device has a
    /// separate compute queue; otherwise put the work in
    /// [`record_compute`](Self::record_compute). `cmd` is already begun and
    /// is ended by the engine. Return `true` only if commands were recorded:
    /// the buffer is then submitted on the compute queue and the frame's
    /// graphics submission waits on it. With `false` nothing is submitted.
    ///
    /// Default implementation records nothing and returns `false`.
    fn record_async_compute(
        &mut self,
        engine: &EngineContext,
        frame: &FrameContext,
        cmd: vk::CommandBuffer,
    ) -> anyhow::Result<bool> {
        Ok(false)
    }

    /// Record graphics work.
    ///
    /// Attachments are in their `initial_layout` and must be returned to it.
    /// In direct-to-swapchain mode the swapchain image is already in
    /// `COLOR_ATTACHMENT_OPTIMAL`.
    fn record_graphics(&mut self, engine: &EngineContext, frame: &FrameContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Write the swapchain image. Renderer-composite mode only.
    ///
    /// Runs after `record_graphics` in the same command buffer. The image
    /// (`frame.swapchain_image`) is in `COLOR_ATTACHMENT_OPTIMAL` with
    /// undefined contents and must be left in that layout: the debug UI and
    /// plugins draw on top before the engine transitions it for present.
    /// Attachments are in whatever layout `record_graphics` left them.
    ///
    /// Default implementation does nothing, which presents garbage in this
    /// mode.
    fn compose(&mut self, engine: &EngineContext, frame: &FrameContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle a window event. Return `true` to consume it.
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Contribute to the debug UI.
    fn on_imgui(&mut self, engine: &EngineContext, frame: &FrameContext) {}

    /// Reload shaders and other assets from disk.
    ///
    /// The engine waits for the device to go idle first. From the hot-reload
    /// key an error is only logged and rendering continues.
    fn reload_assets(&mut self, engine: &EngineContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Ask the renderer to take a screenshot itself. Return `false` to let
    /// the engine's screenshot plugin handle it.
    fn request_screenshot(&mut self, path_hint: &str) -> bool {
        false
    }

    /// Counters for display.
    fn stats(&self) -> RendererStats {
        RendererStats::default()
    }

    /// Read a named option.
    fn option(&self, key: &str) -> Option<OptionValue> {
        None
    }

    /// Set a named option. Returns `false` if the key or type is not accepted.
    fn set_option(&mut self, key: &str, value: OptionValue) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Minimal;
    impl Renderer for Minimal {}

    #[test]
    fn defaults_are_no_ops() {
        let mut renderer = Minimal;
        let mut reqs = DeviceRequirements::new();
        renderer.query_required_device_caps(&mut reqs);
        assert_eq!(reqs, DeviceRequirements::new());
        assert!(!renderer.request_screenshot("shot"));
        assert!(!renderer.set_option("speed", OptionValue::Float(1.0)));
        assert_eq!(renderer.option("speed"), None);
        assert_eq!(renderer.stats(), RendererStats::default());
    }

    #[test]
    fn default_frame_hooks_record_nothing() {
        let mut renderer = Minimal;
        let engine = EngineContext::detached();
        let frame = crate::testing::stub_frame();
        assert!(!renderer
            .record_async_compute(&engine, &frame, vk::CommandBuffer::null())
            .unwrap());
        renderer.compose(&engine, &frame).unwrap();
        renderer.record_graphics(&engine, &frame).unwrap();
        renderer.reload_assets(&engine).unwrap();
        renderer.on_swapchain_destroy(&engine);
    }

    #[test]
    fn option_value_conversions() {
        assert_eq!(OptionValue::Int(3).as_float(), Some(3.0));
        assert_eq!(OptionValue::Float(2.9).as_int(), Some(2));
        assert_eq!(OptionValue::from("fast").as_str(), Some("fast"));
        assert_eq!(OptionValue::Str("x".into()).as_int(), None);
        assert_eq!(OptionValue::Int(1).as_str(), None);
    }
}
