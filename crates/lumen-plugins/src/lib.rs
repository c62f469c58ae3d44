//! Stock renderer and plugins for the Lumen engine.
//!
//! - [`ClearRenderer`]: animated offscreen clear, presented by engine blit
//! - [`ScreenshotPlugin`]: swapchain readback saved once the frame completes
//! - [`FrameStatsPlugin`]: periodic frame timing log

pub mod clear_renderer;
pub mod frame_stats;
pub mod screenshot;

pub use clear_renderer::ClearRenderer;
pub use frame_stats::FrameStatsPlugin;
pub use screenshot::{ScreenshotConfig, ScreenshotError, ScreenshotFormat, ScreenshotPlugin};
