//! Animated clear of a single offscreen attachment.
//!
//! The smallest useful [`Renderer`]: one `"color"` attachment cleared to a
//! slowly cycling color, presented by engine blit. Useful as a smoke test for
//! the frame loop and as a template for real renderers.

use ash::vk;
use glam::{Vec3, Vec4};
use lumen_engine::{
    AttachmentRequest, EngineContext, FrameContext, KeyCode, OptionValue, PresentationMode, Renderer,
    RendererCaps, RendererStats, WindowEvent,
};
use tracing::info;
use winit::event::ElementState;
use winit::keyboard::PhysicalKey;

/// Name of the attachment the renderer clears and presents.
pub const COLOR_ATTACHMENT: &str = "color";

/// Color at animation time `t` (seconds, already scaled by speed).
pub fn clear_color(t: f32, brightness: f32) -> Vec4 {
    let phase = Vec3::new(0.0, 2.094, 4.189);
    let wave = |p: f32| (t + p).sin().mul_add(0.5, 0.5);
    let rgb = Vec3::new(wave(phase.x), wave(phase.y), wave(phase.z)) * brightness.clamp(0.0, 1.0);
    rgb.extend(1.0)
}

/// Clears the presentation attachment every frame.
pub struct ClearRenderer {
    format: vk::Format,
    speed: f32,
    brightness: f32,
    paused: bool,
    time: f32,
    frames: u64,
}

impl Default for ClearRenderer {
    fn default() -> Self {
        Self {
            format: vk::Format::R16G16B16A16_SFLOAT,
            speed: 1.0,
            brightness: 0.8,
            paused: false,
            time: 0.0,
            frames: 0,
        }
    }
}

impl ClearRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different attachment format.
    #[must_use]
    pub fn with_format(mut self, format: vk::Format) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
        info!("Clear animation {}", if self.paused { "paused" } else { "resumed" });
    }

    /// The color the next frame clears to.
    pub fn current_color(&self) -> Vec4 {
        clear_color(self.time, self.brightness)
    }
}

impl Renderer for ClearRenderer {
    fn name(&self) -> &str {
        "clear"
    }

    fn get_capabilities(&mut self, _engine: &EngineContext, caps: &mut RendererCaps) {
        caps.presentation_mode = PresentationMode::EngineBlit;
        caps.color_attachments = vec![AttachmentRequest::color(COLOR_ATTACHMENT, self.format)
            .with_usage(vk::ImageUsageFlags::TRANSFER_DST)];
        caps.presentation_attachment = Some(COLOR_ATTACHMENT.to_string());
    }

    fn initialize(
        &mut self,
        engine: &EngineContext,
        _caps: &RendererCaps,
        _frame: &FrameContext,
    ) -> anyhow::Result<()> {
        engine.with_tabs(|tabs| {
            tabs.add_tab("Clear");
            tabs.set_main_window_title("Lumen - clear");
        });
        Ok(())
    }

    fn simulate(&mut self, _engine: &EngineContext, frame: &FrameContext) -> anyhow::Result<()> {
        if !self.paused {
            self.time += frame.dt * self.speed;
        }
        Ok(())
    }

    fn record_graphics(&mut self, engine: &EngineContext, frame: &FrameContext) -> anyhow::Result<()> {
        let Some(target) = frame.presentation_attachment() else {
            return Ok(());
        };
        let device = engine.device()?;
        let color = vk::ClearColorValue {
            float32: self.current_color().to_array(),
        };
        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        unsafe {
            device.cmd_clear_color_image(frame.command_buffer, target.image, target.layout, &color, &[range]);
        }
        self.frames += 1;
        Ok(())
    }

    fn on_event(&mut self, event: &WindowEvent) -> bool {
        if let WindowEvent::KeyboardInput { event, .. } = event {
            if event.state == ElementState::Pressed
                && !event.repeat
                && event.physical_key == PhysicalKey::Code(KeyCode::Space)
            {
                self.toggle_pause();
                return true;
            }
        }
        false
    }

    /// Nothing is loaded from disk; restart the animation instead.
    fn reload_assets(&mut self, _engine: &EngineContext) -> anyhow::Result<()> {
        self.time = 0.0;
        info!("Clear animation restarted");
        Ok(())
    }

    fn stats(&self) -> RendererStats {
        RendererStats {
            extra: vec![
                ("clears".to_string(), self.frames as f64),
                ("time".to_string(), f64::from(self.time)),
            ],
            ..RendererStats::default()
        }
    }

    fn option(&self, key: &str) -> Option<OptionValue> {
        match key {
            "speed" => Some(OptionValue::Float(f64::from(self.speed))),
            "brightness" => Some(OptionValue::Float(f64::from(self.brightness))),
            "paused" => Some(OptionValue::Int(i64::from(self.paused))),
            _ => None,
        }
    }

    fn set_option(&mut self, key: &str, value: OptionValue) -> bool {
        match (key, value) {
            ("speed", value) => value.as_float().map(|v| self.speed = v as f32).is_some(),
            ("brightness", value) => value
                .as_float()
                .map(|v| self.brightness = (v as f32).clamp(0.0, 1.0))
                .is_some(),
            ("paused", value) => value.as_int().map(|v| self.paused = v != 0).is_some(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn frame_with_dt(dt: f32) -> FrameContext {
        FrameContext {
            frame_number: 0,
            slot: 0,
            image_index: 0,
            extent: vk::Extent2D {
                width: 4,
                height: 4,
            },
            dt,
            elapsed: 0.0,
            command_buffer: vk::CommandBuffer::null(),
            swapchain_image: vk::Image::null(),
            swapchain_view: vk::ImageView::null(),
            swapchain_format: vk::Format::B8G8R8A8_SRGB,
            color_attachments: Vec::new(),
            depth_attachment: None,
            presentation_index: None,
            presentation_mode: PresentationMode::EngineBlit,
        }
    }

    #[test]
    fn declares_a_single_blit_attachment() {
        let engine = EngineContext::detached();
        let mut caps = RendererCaps::default();
        ClearRenderer::new().get_capabilities(&engine, &mut caps);
        caps.sanitize();
        caps.validate().unwrap();

        assert_eq!(caps.presentation_mode, PresentationMode::EngineBlit);
        assert_eq!(caps.color_attachments.len(), 1);
        let color = &caps.color_attachments[0];
        assert_eq!(color.name, COLOR_ATTACHMENT);
        assert!(color.usage.contains(vk::ImageUsageFlags::TRANSFER_DST));
        assert!(color.usage.contains(vk::ImageUsageFlags::TRANSFER_SRC));
        assert_eq!(caps.presentation_index(), Some(0));
    }

    #[test]
    fn color_stays_in_range() {
        for step in 0..100 {
            let c = clear_color(step as f32 * 0.37, 1.0);
            for channel in c.to_array() {
                assert!((0.0..=1.0).contains(&channel));
            }
            assert_relative_eq!(c.w, 1.0);
        }
        assert_relative_eq!(clear_color(3.0, 0.0).truncate().length(), 0.0);
    }

    #[test]
    fn simulate_advances_unless_paused() {
        let engine = EngineContext::detached();
        let mut renderer = ClearRenderer::new().with_speed(2.0);

        renderer.simulate(&engine, &frame_with_dt(0.5)).unwrap();
        assert_relative_eq!(renderer.time, 1.0);

        renderer.toggle_pause();
        renderer.simulate(&engine, &frame_with_dt(0.5)).unwrap();
        assert_relative_eq!(renderer.time, 1.0);

        renderer.reload_assets(&engine).unwrap();
        assert_relative_eq!(renderer.time, 0.0);
    }

    #[test]
    fn options() {
        let mut renderer = ClearRenderer::new();
        assert!(renderer.set_option("speed", OptionValue::Float(3.0)));
        assert!(renderer.set_option("brightness", OptionValue::Float(7.0)));
        assert!(renderer.set_option("paused", OptionValue::Int(1)));
        assert!(!renderer.set_option("speed", "fast".into()));
        assert!(!renderer.set_option("missing", OptionValue::Int(1)));

        assert_eq!(renderer.option("speed").and_then(|v| v.as_float()), Some(3.0));
        assert_eq!(renderer.option("brightness").and_then(|v| v.as_float()), Some(1.0));
        assert_eq!(renderer.option("paused").and_then(|v| v.as_int()), Some(1));
        assert!(renderer.option("missing").is_none());
    }

    #[test]
    fn initialize_registers_tab() {
        let engine = EngineContext::detached();
        let mut renderer = ClearRenderer::new();
        renderer
            .initialize(&engine, &RendererCaps::default(), &frame_with_dt(0.0))
            .unwrap();
        let mut services = engine.services().lock();
        assert_eq!(services.tabs(), ["Clear".to_string()]);
        assert_eq!(services.take_title().as_deref(), Some("Lumen - clear"));
    }

    #[test]
    fn record_without_attachment_is_a_no_op() {
        let engine = EngineContext::detached();
        let mut renderer = ClearRenderer::new();
        renderer.record_graphics(&engine, &frame_with_dt(0.0)).unwrap();
        assert_eq!(renderer.frames, 0);
    }
}
