//! Frame lifecycle and renderer host for the Lumen engine.
//!
//! This crate owns everything between the window and a renderer:
//! - Capability negotiation and offscreen attachment management
//! - Frame slots paced by a timeline semaphore, with optional async compute
//! - Swapchain rebuilds on resize, out-of-date or suboptimal surfaces
//! - Composition of the presentation attachment onto the swapchain
//! - The [`Renderer`] and [`Plugin`] contracts, UI services and the runner
//!
//! # Example
//!
//! ```no_run
//! use lumen_engine::{run, EngineConfig, PluginHost, Renderer};
//!
//! struct Nothing;
//! impl Renderer for Nothing {}
//!
//! fn main() -> anyhow::Result<()> {
//!     lumen_engine::init_logging();
//!     run(EngineConfig::new("Demo"), Box::new(Nothing), PluginHost::new())
//! }
//! ```

pub mod attachments;
pub mod backend;
pub mod caps;
pub mod compositor;
mod config;
mod context;
mod engine;
mod error;
mod frame;
pub mod frame_data;
pub mod plugin;
mod renderer;
mod runner;
mod stats;
pub mod ui;
pub mod vulkan;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{GpuBackend, SwapchainInfo};
pub use caps::{AttachmentRequest, PresentationMode, RendererCaps};
pub use config::EngineConfig;
pub use context::EngineContext;
pub use engine::{collect_requirements, Engine, FrameStatus, SkipReason};
pub use error::{EngineError, Result};
pub use frame::{AttachmentView, FrameContext};
pub use plugin::{Plugin, PluginHost, PluginPhase};
pub use renderer::{OptionValue, Renderer};
pub use runner::{init_logging, run};
pub use stats::{FrameTimings, RendererStats};
pub use ui::{NullOverlay, TabsHost, UiOverlay, UiServices};
pub use vulkan::VulkanBackend;

pub use lumen_gpu::{DeletionQueue, DeviceRequirements, GpuContext};
pub use winit::event::WindowEvent;
pub use winit::keyboard::KeyCode;
