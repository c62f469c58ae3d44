//! UI services: debug tabs, hotkeys and the overlay seam.
//!
//! The engine does not depend on a UI library. Plugins register tabs and
//! overlays through [`TabsHost`]; drawing goes through a [`UiOverlay`]
//! implementation supplied by the application (or [`NullOverlay`]).

use ash::vk;
use winit::event::{ElementState, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

use crate::context::EngineContext;
use crate::frame::FrameContext;

/// Narrow interface plugins use to contribute to the debug UI.
pub trait TabsHost {
    /// Register a tab and return its index. F1..F9 select the first nine.
    fn add_tab(&mut self, name: &str) -> usize;
    /// Request a new main window title.
    fn set_main_window_title(&mut self, title: &str);
    /// Register a named overlay drawn on top of the frame.
    fn add_overlay(&mut self, name: &str);
}

/// Engine-owned UI state shared with renderers and plugins.
#[derive(Debug)]
pub struct UiServices {
    tabs: Vec<String>,
    active_tab: Option<usize>,
    overlays: Vec<String>,
    overlay_visible: bool,
    pending_title: Option<String>,
    exit_requested: bool,
    screenshot_request: Option<String>,
}

impl Default for UiServices {
    fn default() -> Self {
        Self {
            tabs: Vec::new(),
            active_tab: None,
            overlays: Vec::new(),
            overlay_visible: true,
            pending_title: None,
            exit_requested: false,
            screenshot_request: None,
        }
    }
}

impl UiServices {
    /// Registered tab names.
    pub fn tabs(&self) -> &[String] {
        &self.tabs
    }

    /// Currently selected tab.
    pub fn active_tab(&self) -> Option<usize> {
        self.active_tab
    }

    /// Registered overlay names.
    pub fn overlays(&self) -> &[String] {
        &self.overlays
    }

    /// Whether the overlay is drawn.
    pub fn overlay_visible(&self) -> bool {
        self.overlay_visible
    }

    /// Take the title requested since the last call.
    pub fn take_title(&mut self) -> Option<String> {
        self.pending_title.take()
    }

    /// Ask the runner to close the window after the current frame.
    pub fn request_exit(&mut self) {
        self.exit_requested = true;
    }

    /// Whether an exit was requested.
    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    /// Ask whichever plugin captures screenshots to take one. `path_hint`
    /// may be empty.
    pub fn request_screenshot(&mut self, path_hint: &str) {
        self.screenshot_request = Some(path_hint.to_string());
    }

    /// Take the pending screenshot request.
    pub fn take_screenshot_request(&mut self) -> Option<String> {
        self.screenshot_request.take()
    }

    /// Apply a hotkey. Returns `true` if the key was consumed.
    pub fn handle_key(&mut self, key: KeyCode) -> bool {
        const TAB_KEYS: [KeyCode; 9] = [
            KeyCode::F1,
            KeyCode::F2,
            KeyCode::F3,
            KeyCode::F4,
            KeyCode::F5,
            KeyCode::F6,
            KeyCode::F7,
            KeyCode::F8,
            KeyCode::F9,
        ];

        if key == KeyCode::Backquote {
            self.overlay_visible = !self.overlay_visible;
            return true;
        }
        match TAB_KEYS.iter().position(|&k| k == key) {
            Some(index) if index < self.tabs.len() => {
                self.active_tab = Some(index);
                true
            }
            _ => false,
        }
    }

    /// Apply a window event. Returns `true` if it was consumed.
    pub fn handle_event(&mut self, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed && !event.repeat =>
            {
                match event.physical_key {
                    PhysicalKey::Code(code) => self.handle_key(code),
                    PhysicalKey::Unidentified(_) => false,
                }
            }
            _ => false,
        }
    }
}

impl TabsHost for UiServices {
    fn add_tab(&mut self, name: &str) -> usize {
        if let Some(index) = self.tabs.iter().position(|t| t == name) {
            return index;
        }
        self.tabs.push(name.to_string());
        if self.active_tab.is_none() {
            self.active_tab = Some(0);
        }
        self.tabs.len() - 1
    }

    fn set_main_window_title(&mut self, title: &str) {
        self.pending_title = Some(title.to_string());
    }

    fn add_overlay(&mut self, name: &str) {
        if !self.overlays.iter().any(|o| o == name) {
            self.overlays.push(name.to_string());
        }
    }
}

/// Draws the debug UI on top of the composed frame.
///
/// `render_overlay` records into the frame's command buffer while the
/// swapchain image is in `COLOR_ATTACHMENT_OPTIMAL`.
pub trait UiOverlay {
    /// (Re)build pipelines for the swapchain format.
    fn rebuild(&mut self, engine: &EngineContext, format: vk::Format) -> anyhow::Result<()>;
    /// Start a new UI frame.
    fn new_frame(&mut self, engine: &EngineContext, frame: &FrameContext);
    /// Record the UI draw calls.
    fn render_overlay(&mut self, engine: &EngineContext, frame: &FrameContext) -> anyhow::Result<()>;
    /// Release GPU objects.
    fn destroy(&mut self, engine: &EngineContext);
}

/// Overlay that draws nothing.
#[derive(Debug, Default)]
pub struct NullOverlay;

impl UiOverlay for NullOverlay {
    fn rebuild(&mut self, _engine: &EngineContext, _format: vk::Format) -> anyhow::Result<()> {
        Ok(())
    }

    fn new_frame(&mut self, _engine: &EngineContext, _frame: &FrameContext) {}

    fn render_overlay(&mut self, _engine: &EngineContext, _frame: &FrameContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn destroy(&mut self, _engine: &EngineContext) {}
}
