//! Window, event loop and logging setup.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use lumen_gpu::GpuContextBuilder;
use raw_window_handle::HasDisplayHandle;
use tracing::{debug, error, info, trace};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::config::EngineConfig;
use crate::engine::{collect_requirements, Engine};
use crate::plugin::PluginHost;
use crate::renderer::Renderer;
use crate::vulkan::VulkanBackend;

/// Install the `tracing` subscriber. `RUST_LOG` overrides the default
/// `info` filter. Calling it twice is harmless.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(e) = tracing_subscriber::fmt().with_env_filter(filter).try_init() {
        debug!("Logging already initialized: {e}");
    }
}

/// Open a window and drive `renderer` and `plugins` until it closes.
///
/// Returns the first fatal error, after the engine has been shut down.
pub fn run(config: EngineConfig, renderer: Box<dyn Renderer>, plugins: PluginHost) -> anyhow::Result<()> {
    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = Runner {
        config,
        pending: Some((renderer, plugins)),
        state: None,
        error: None,
    };
    event_loop.run_app(&mut runner)?;

    match runner.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

struct Runner {
    config: EngineConfig,
    pending: Option<(Box<dyn Renderer>, PluginHost)>,
    state: Option<RunState>,
    error: Option<anyhow::Error>,
}

/// Declared engine-first so the surface goes before the window.
struct RunState {
    engine: Engine<VulkanBackend>,
    window: Arc<Window>,
    target_frame_time: Option<Duration>,
    minimized_poll: Duration,
    minimized: bool,
}

impl Runner {
    fn create_state(
        &self,
        event_loop: &ActiveEventLoop,
        renderer: Box<dyn Renderer>,
        mut plugins: PluginHost,
    ) -> anyhow::Result<RunState> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));
        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let requirements = collect_requirements(renderer.as_ref(), &mut plugins);
        let gpu = GpuContextBuilder::new()
            .app_name(self.config.title.clone())
            .validation(self.config.validation)
            .requirements(requirements)
            .display(window.display_handle()?.as_raw())
            .build()?;
        info!("GPU: {}", gpu.capabilities().summary());

        let backend = VulkanBackend::new(Arc::new(gpu), Arc::clone(&window), &self.config)?;
        let mut engine = Engine::new(self.config.clone(), backend);
        engine.set_renderer(renderer);
        engine.set_plugins(plugins);
        engine.init()?;

        Ok(RunState {
            engine,
            window,
            target_frame_time: self.config.target_frame_time(),
            minimized_poll: self.config.minimized_poll(),
            minimized: false,
        })
    }

    /// Shut the engine down and leave the event loop, keeping the first error.
    fn exit(&mut self, event_loop: &ActiveEventLoop, error: Option<anyhow::Error>) {
        if let Some(e) = &error {
            error!("Fatal error: {e:#}");
        }
        if let Some(mut state) = self.state.take() {
            if let Err(e) = state.engine.shutdown() {
                error!("Shutdown failed: {e}");
                self.error.get_or_insert(e.into());
            }
        }
        if let Some(e) = error {
            self.error = Some(e);
        }
        event_loop.exit();
    }
}

impl RunState {
    fn redraw(&mut self) -> anyhow::Result<()> {
        if self.minimized {
            return Ok(());
        }
        let frame_start = Instant::now();

        let status = self.engine.run_frame()?;
        trace!(?status, "frame done");

        if let Some(title) = self.engine.take_window_title() {
            self.window.set_title(&title);
        }

        if let Some(target) = self.target_frame_time {
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                thread::sleep(target - elapsed);
            }
        }
        Ok(())
    }
}

impl ApplicationHandler for Runner {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }
        let Some((renderer, plugins)) = self.pending.take() else {
            return;
        };

        info!("Creating engine state...");
        match self.create_state(event_loop, renderer, plugins) {
            Ok(state) => {
                self.state = Some(state);
                info!("Engine ready");
            }
            Err(e) => {
                error!("Failed to initialize: {e:#}");
                self.error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = self.state.as_mut() else {
            return;
        };

        let outcome = match &event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                Ok(true)
            }
            WindowEvent::RedrawRequested => state
                .redraw()
                .map(|()| state.engine.exit_requested()),
            WindowEvent::Resized(size) => {
                state.minimized = size.width == 0 || size.height == 0;
                state.engine.handle_event(&event);
                Ok(false)
            }
            _ => {
                state.engine.handle_event(&event);
                Ok(state.engine.exit_requested())
            }
        };

        match outcome {
            Ok(false) => {}
            Ok(true) => self.exit(event_loop, None),
            Err(e) => self.exit(event_loop, Some(e)),
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(state) = &self.state else {
            return;
        };
        if state.minimized {
            event_loop.set_control_flow(ControlFlow::WaitUntil(
                Instant::now() + state.minimized_poll,
            ));
        } else {
            event_loop.set_control_flow(ControlFlow::Poll);
            state.window.request_redraw();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_twice_is_harmless() {
        init_logging();
        init_logging();
        info!("still logging");
    }
}
