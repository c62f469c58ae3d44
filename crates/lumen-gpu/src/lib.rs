//! Vulkan abstraction layer for the Lumen engine.
//!
//! This crate provides:
//! - Vulkan instance and device management with requirement negotiation
//! - GPU capability detection
//! - Memory allocation via gpu-allocator
//! - Command buffer management and image barrier helpers
//! - Swapchain handling with explicit out-of-date outcomes
//! - Binary/timeline semaphores and GPU timestamp queries
//! - A LIFO deletion queue for ordered teardown

pub mod barrier;
pub mod capabilities;
pub mod command;
pub mod context;
pub mod deletion;
pub mod error;
pub mod instance;
pub mod memory;
pub mod requirements;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod timestamps;

pub use barrier::{BlitRegion, ImageBarrier};
pub use capabilities::{GpuCapabilities, GpuVendor};
pub use context::{GpuContext, GpuContextBuilder};
pub use deletion::DeletionQueue;
pub use error::{GpuError, Result};
pub use memory::{GpuAllocator, GpuBuffer, GpuImage};
pub use requirements::DeviceRequirements;
pub use surface::{SurfaceCapabilities, SurfaceContext};
pub use swapchain::{AcquireOutcome, PresentOutcome, Swapchain, SwapchainState};
pub use sync::{create_fence, create_semaphore, TimelineSemaphore};
pub use timestamps::GpuTimestamps;
